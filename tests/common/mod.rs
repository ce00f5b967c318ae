//! Fixtures shared by the integration tests.

#![allow(dead_code)]

// std
use std::sync::Arc;
// crates.io
use httpmock::MockServer;
use time::{Duration, OffsetDateTime};
// self
use tracker_proxy::{
	auth::{OAuthCredential, ProviderId, TenantId, UserId},
	client::{ApiClient, RetryPolicy},
	config::ClientConfig,
	flows::{ReqwestTokenManager, TokenManager},
	http::ReqwestHttpClient,
	oauth::ReqwestTransportErrorMapper,
	provider::{DefaultProviderStrategy, ProviderDescriptor},
	reqwest::{Client, redirect::Policy},
	store::{CredentialStore, MemoryStore},
	url::Url,
};

pub type TestClient = ApiClient<ReqwestHttpClient, ReqwestTransportErrorMapper>;

pub const TOKEN_PATH: &str = "/oauth/token";
pub const RESOURCES_PATH: &str = "/oauth/token/accessible-resources";

pub fn descriptor(server: &MockServer) -> ProviderDescriptor {
	ProviderDescriptor::builder(
		ProviderId::new("mock-tracker").expect("Provider identifier fixture should be valid."),
	)
	.authorization_endpoint(
		Url::parse(&server.url("/authorize")).expect("Mock authorize endpoint should parse."),
	)
	.token_endpoint(Url::parse(&server.url(TOKEN_PATH)).expect("Mock token endpoint should parse."))
	.resources_endpoint(
		Url::parse(&server.url(RESOURCES_PATH)).expect("Mock resources endpoint should parse."),
	)
	.api_base(format!("{}/ex/{{tenant}}/", server.base_url()))
	.build()
	.expect("Mock descriptor should build.")
}

pub fn config() -> ClientConfig {
	ClientConfig::new(
		"client-it",
		"secret-it",
		Url::parse("https://app.example.com/oauth/callback")
			.expect("Redirect fixture should parse."),
	)
}

/// Reqwest transport that accepts the self-signed certificates `httpmock` serves.
pub fn test_reqwest_http_client() -> ReqwestHttpClient {
	let client = Client::builder()
		.danger_accept_invalid_certs(true)
		.redirect(Policy::none())
		.build()
		.expect("Insecure reqwest client for tests should build.");

	ReqwestHttpClient(client)
}

pub fn build_manager(server: &MockServer, store: Arc<dyn CredentialStore>) -> ReqwestTokenManager {
	TokenManager::with_http_client(
		store,
		descriptor(server),
		Arc::new(DefaultProviderStrategy),
		config(),
		test_reqwest_http_client(),
		ReqwestTransportErrorMapper,
	)
}

pub fn build_client(server: &MockServer) -> (TestClient, Arc<MemoryStore>) {
	let store = Arc::new(MemoryStore::default());
	let manager = build_manager(server, store.clone());
	let client = ApiClient::new(Arc::new(manager)).with_retry_policy(RetryPolicy {
		base_delay: Duration::milliseconds(5),
		..Default::default()
	});

	(client, store)
}

pub fn user(id: &str) -> UserId {
	UserId::new(id).expect("User fixture should be valid.")
}

pub async fn seed(
	store: &MemoryStore,
	user: &UserId,
	tenant: &str,
	access: &str,
	refresh: Option<&str>,
	expires_in: Duration,
) {
	let mut builder = OAuthCredential::builder()
		.access_token(access)
		.tenant_id(TenantId::new(tenant).expect("Tenant fixture should be valid."))
		.issued_at(OffsetDateTime::now_utc())
		.expires_in(expires_in);

	if let Some(refresh) = refresh {
		builder = builder.refresh_token(refresh);
	}

	store
		.save(user, builder.build().expect("Credential fixture should build."))
		.await
		.expect("Seeding the credential should succeed.");
}

pub fn token_body(access: &str, refresh: Option<&str>) -> String {
	let mut body = serde_json::json!({
		"access_token": access,
		"token_type": "Bearer",
		"expires_in": 3600,
		"scope": "read:jira-work offline_access",
	});

	if let Some(refresh) = refresh {
		body["refresh_token"] = refresh.into();
	}

	body.to_string()
}
