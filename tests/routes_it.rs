#![cfg(feature = "reqwest")]

mod common;

// std
use std::sync::Arc;
// crates.io
use httpmock::prelude::*;
use serde_json::{Value, json};
use time::Duration;
// self
use tracker_proxy::{
	rate_limit::{RateLimitConfig, RateLimiter},
	routes::{CallbackParams, Routes, SEARCH_RESOURCE},
	search::{ClauseParam, SearchParams},
};

fn page(start: u32, count: u32) -> String {
	let issues = (start..start + count)
		.map(|i| {
			json!({
				"id": (10_000 + i).to_string(),
				"key": format!("ENG-{i}"),
				"fields": {
					"summary": format!("Issue {i}"),
					"status": { "name": "Open", "statusCategory": { "name": "To Do" } }
				}
			})
		})
		.collect::<Vec<_>>();

	json!({ "startAt": start, "maxResults": 100, "total": 250, "issues": issues }).to_string()
}

#[tokio::test]
async fn search_route_paginates_and_reports_quota() {
	let server = MockServer::start_async().await;
	let (client, store) = common::build_client(&server);
	let user = common::user("user-search");
	let limiter = RateLimiter::new(RateLimitConfig::default())
		.with_resource_limit(SEARCH_RESOURCE, RateLimitConfig::new(5, Duration::minutes(1)));
	let routes = Routes::new(Arc::new(client), Arc::new(limiter));

	common::seed(&store, &user, "cloud-a", "token", Some("refresh"), Duration::hours(1)).await;

	let mut pages = Vec::new();

	for (start, count) in [(0, 100), (100, 100), (200, 50)] {
		let start_at = start.to_string();

		pages.push(
			server
				.mock_async(|when, then| {
					when.method(GET)
						.path("/ex/cloud-a/search")
						.query_param("startAt", start_at.as_str())
						.query_param("maxResults", "100")
						.query_param("jql", "project = \"ENG\" ORDER BY created ASC");
					then.status(200)
						.header("content-type", "application/json")
						.body(page(start, count));
				})
				.await,
		);
	}

	let response = routes
		.search(
			&user,
			SearchParams {
				clauses: vec![ClauseParam::new("project", "=", "ENG")],
				order_by: Some("created".into()),
				page_size: Some(25),
				start_offset: Some(240),
				..Default::default()
			},
		)
		.await;

	assert_eq!(response.status, 200);
	assert_eq!(response.header("X-RateLimit-Limit"), Some("5"));
	assert_eq!(response.header("X-RateLimit-Remaining"), Some("4"));

	for mock in &pages {
		mock.assert_async().await;
	}

	let body = response.body.expect("Search responses carry a body.");

	assert_eq!(body["total"], 250);
	assert_eq!(body["partial"], false);
	assert_eq!(body["pages_fetched"], 3);
	assert_eq!(body["items"].as_array().map(Vec::len), Some(10));
	assert_eq!(body["items"][0]["key"], "ENG-240");
	assert_eq!(body["items"][0]["status_category"], "To Do");
}

#[tokio::test]
async fn distinct_and_count_only_together_are_rejected_without_network() {
	let server = MockServer::start_async().await;
	let (client, store) = common::build_client(&server);
	let user = common::user("user-conflict");
	let routes = Routes::new(Arc::new(client), Arc::new(RateLimiter::default()));
	let search = server
		.mock_async(|when, then| {
			when.any_request();
			then.status(200).body("{}");
		})
		.await;

	common::seed(&store, &user, "cloud-a", "token", Some("refresh"), Duration::hours(1)).await;

	let response = routes
		.search(
			&user,
			SearchParams {
				count_only: true,
				distinct: Some("status".into()),
				..Default::default()
			},
		)
		.await;
	let body = response.body.expect("Errors carry a body.");

	assert_eq!(response.status, 400);
	assert_eq!(body["error"], "validation_failed");

	search.assert_calls_async(0).await;
}

#[tokio::test]
async fn full_connect_callback_status_disconnect_cycle() {
	let server = MockServer::start_async().await;
	let (client, _store) = common::build_client(&server);
	let user = common::user("user-cycle");
	let routes = Routes::new(Arc::new(client), Arc::new(RateLimiter::default()));

	server
		.mock_async(|when, then| {
			when.method(POST).path(common::TOKEN_PATH);
			then.status(200)
				.header("content-type", "application/json")
				.body(common::token_body("access-1", Some("refresh-1")));
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path(common::RESOURCES_PATH);
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"[{ "id": "cloud-a", "name": "Acme", "url": "https://acme.test" }]"#);
		})
		.await;

	let connect = routes.connect(&user, Some("/settings/integrations")).await;
	let location = connect.header("Location").expect("Connect redirects to the provider.");
	let state = tracker_proxy::url::Url::parse(location)
		.expect("Authorize URL should parse.")
		.query_pairs()
		.find(|(key, _)| key == "state")
		.map(|(_, value)| value.into_owned())
		.expect("Authorize URL carries state.");
	let callback = routes
		.callback(
			&user,
			CallbackParams { code: Some("code-1".into()), state: Some(state), error: None },
		)
		.await;

	assert_eq!(callback.status, 302);
	assert_eq!(callback.header("Location"), Some("/settings/integrations"));

	let status = routes.status(&user).await.body.expect("Status carries a body.");

	assert_eq!(status["authenticated"], true);
	assert_eq!(status["tenant_id"], "cloud-a");

	let disconnected = routes.disconnect(&user).await;

	assert_eq!(disconnected.status, 200);

	let status: Value = routes.status(&user).await.body.expect("Status carries a body.");

	assert_eq!(status["authenticated"], false);
}
