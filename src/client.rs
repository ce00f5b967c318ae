//! Authenticated calls against the tracker's REST API.
//!
//! [`ApiClient::call`] is the single path every proxied request takes: it resolves a
//! bearer through the [`TokenManager`], performs at most one refresh-and-replay after a
//! 401, and retries throttling, 5xx, and network failures for idempotent methods within a
//! bounded [`RetryPolicy`]. Any other status is handed back untouched.

// crates.io
use oauth2::{
	HttpRequest,
	http::{
		Method,
		header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
	},
};
// self
use crate::{
	_prelude::*,
	auth::UserId,
	error::{ConfigError, TransientError},
	flows::{Bearer, TokenManager},
	http::{self, ProviderHttpClient},
	oauth::{self, TransportErrorMapper},
	obs::{self, FlowKind},
	provider::AccessibleResource,
	search::{self, Issue, Project, SearchLimits, ValidationError},
};

/// Bounded retry schedule for throttling, 5xx, and network failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Total attempts, including the first.
	pub max_attempts: u32,
	/// Delay before the second attempt; doubled for each later one.
	pub base_delay: Duration,
	/// Upper bound for any single delay, including `Retry-After` hints.
	pub max_delay: Duration,
}
impl RetryPolicy {
	/// Policy that never retries.
	pub fn disabled() -> Self {
		Self { max_attempts: 1, ..Self::default() }
	}

	/// Delay to wait after failed attempt number `attempt` (1-based).
	///
	/// A `Retry-After` hint only ever lengthens the backoff; both are capped at `max_delay`.
	pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
		let backoff =
			self.base_delay.saturating_mul(2_i32.saturating_pow(attempt.saturating_sub(1)));
		let delay = hint.map_or(backoff, |hint| hint.max(backoff));

		delay.min(self.max_delay).max(Duration::ZERO)
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::milliseconds(250),
			max_delay: Duration::seconds(5),
		}
	}
}

/// Per-call request options.
#[derive(Clone, Debug)]
pub struct CallOptions {
	/// HTTP method.
	pub method: Method,
	/// Query parameters appended to the URL.
	pub query: Vec<(String, String)>,
	/// JSON request body.
	pub body: Option<serde_json::Value>,
}
impl CallOptions {
	/// Options for a request with the given method.
	pub fn new(method: Method) -> Self {
		Self { method, query: Vec::new(), body: None }
	}

	/// Options for a `GET` request.
	pub fn get() -> Self {
		Self::new(Method::GET)
	}

	/// Appends a query parameter.
	pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.push((key.into(), value.into()));

		self
	}

	/// Attaches a JSON body.
	pub fn json(mut self, body: serde_json::Value) -> Self {
		self.body = Some(body);

		self
	}

	fn is_idempotent(&self) -> bool {
		self.method == Method::GET || self.method == Method::HEAD
	}
}
impl Default for CallOptions {
	fn default() -> Self {
		Self::get()
	}
}

/// Raw tracker response.
#[derive(Clone, Debug)]
pub struct ApiResponse {
	/// HTTP status.
	pub status: u16,
	/// `Retry-After` hint, when present.
	pub retry_after: Option<Duration>,
	/// Site URL of the tenant the call was routed to.
	pub site_url: Option<Url>,
	/// Response body bytes.
	pub body: Vec<u8>,
}
impl ApiResponse {
	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Decodes the body as JSON, reporting the failing path on error.
	pub fn json<T>(&self) -> Result<T>
	where
		T: for<'de> Deserialize<'de>,
	{
		oauth::decode_json(self.status, &self.body)
	}

	/// Body as lossy UTF-8.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}

	/// Converts non-2xx responses into [`Error::ProviderRejected`].
	pub fn into_result(self) -> Result<Self> {
		if self.is_success() {
			Ok(self)
		} else {
			Err(Error::ProviderRejected { status: self.status, body: self.text() })
		}
	}
}

/// Token-aware REST client shared by every route.
pub struct ApiClient<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Credential lifecycle owner.
	pub manager: Arc<TokenManager<C, M>>,
	/// Retry schedule for transient failures.
	pub retry: RetryPolicy,
	/// Caps applied to searches.
	pub search_limits: SearchLimits,
}
impl<C, M> ApiClient<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a client with default retry and search limits.
	pub fn new(manager: Arc<TokenManager<C, M>>) -> Self {
		Self { manager, retry: RetryPolicy::default(), search_limits: SearchLimits::default() }
	}

	/// Overrides the retry schedule.
	pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Overrides the search caps.
	pub fn with_search_limits(mut self, limits: SearchLimits) -> Self {
		self.search_limits = limits;

		self
	}

	/// Executes one logical authenticated call.
	///
	/// `path` is relative to the tenant's API base. A 401 triggers exactly one refresh and
	/// one replay; a second 401 fails with [`Error::NotAuthenticated`].
	pub async fn call(
		&self,
		user: &UserId,
		path: &str,
		options: CallOptions,
	) -> Result<ApiResponse> {
		obs::observe(FlowKind::ApiCall, "call", async move {
			let path = search::validate_api_path(path)?;
			let mut bearer = self.manager.access_token(user).await?;
			let mut replayed = false;

			loop {
				let response = self.send_with_retry(&bearer, path, &options).await?;

				if response.status != 401 {
					return Ok(response);
				}
				if replayed {
					obs_event!(warn, "Tracker rejected a freshly refreshed access token.");

					return Err(Error::NotAuthenticated);
				}

				bearer = self.manager.refresh_after_rejection(user, &bearer.token).await?;
				replayed = true;
			}
		})
		.await
	}

	/// Lists the tenants reachable with the user's grant.
	pub async fn accessible_resources(&self, user: &UserId) -> Result<Vec<AccessibleResource>> {
		let facade = self.manager.facade();
		let bearer = self.manager.access_token(user).await?;

		match facade.accessible_resources(&bearer.token).await {
			Err(Error::NotAuthenticated) => {
				let bearer = self.manager.refresh_after_rejection(user, &bearer.token).await?;

				facade.accessible_resources(&bearer.token).await
			},
			result => result,
		}
	}

	/// Fetches and normalizes one issue.
	pub async fn issue(&self, user: &UserId, key: &str) -> Result<Issue> {
		let key = search::validate_issue_key(key)?;
		let response =
			self.call(user, &format!("issue/{key}"), CallOptions::get()).await?.into_result()?;
		let raw = response.json::<serde_json::Value>()?;

		Issue::normalize(&raw, response.site_url.as_ref()).map_err(|err| {
			TransientError::Upstream {
				message: format!("Issue payload could not be normalized: {err}"),
				status: Some(response.status),
				retry_after: None,
			}
			.into()
		})
	}

	/// Lists projects visible to the user.
	pub async fn projects(&self, user: &UserId) -> Result<Vec<Project>> {
		self.call(user, "project", CallOptions::get()).await?.into_result()?.json()
	}

	async fn send_with_retry(
		&self,
		bearer: &Bearer,
		path: &str,
		options: &CallOptions,
	) -> Result<ApiResponse> {
		let url = self.endpoint(bearer, path, &options.query)?;
		let max_attempts = if options.is_idempotent() { self.retry.max_attempts.max(1) } else { 1 };
		let mut attempt = 1;

		loop {
			let request = build_request(bearer, &url, options)?;
			let failure = match http::dispatch(
				self.manager.http_client.as_ref(),
				self.manager.transport_mapper.as_ref(),
				FlowKind::ApiCall,
				request,
			)
			.await
			{
				Ok((response, meta)) => {
					let status = response.status().as_u16();

					if !is_transient_status(status) {
						return Ok(ApiResponse {
							status,
							retry_after: meta.retry_after,
							site_url: bearer.site_url.clone(),
							body: response.into_body(),
						});
					}

					Error::from(TransientError::Upstream {
						message: format!("HTTP {status} from {path}"),
						status: Some(status),
						retry_after: meta.retry_after,
					})
				},
				Err(err) if err.is_retryable() => err,
				Err(err) => return Err(err),
			};

			if attempt >= max_attempts {
				return Err(failure);
			}

			let hint = match &failure {
				Error::Transient(transient) => transient.retry_after(),
				_ => None,
			};
			let delay = self.retry.delay_for(attempt, hint);

			obs_event!(
				debug,
				attempt,
				delay_ms = delay.whole_milliseconds() as u64,
				error = %failure,
				"Retrying transient tracker failure."
			);

			tokio::time::sleep(delay.unsigned_abs()).await;

			attempt += 1;
		}
	}

	fn endpoint(&self, bearer: &Bearer, path: &str, query: &[(String, String)]) -> Result<Url> {
		let base = self
			.manager
			.descriptor
			.api_base_for(&bearer.tenant_id)
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let mut url =
			base.join(path).map_err(|source| ConfigError::InvalidDescriptor { source })?;

		// The bearer token must never leave the tenant's API base.
		if url.scheme() != base.scheme()
			|| url.host_str() != base.host_str()
			|| url.port_or_known_default() != base.port_or_known_default()
			|| !url.path().starts_with(base.path())
		{
			return Err(ValidationError::InvalidPath { path: path.to_owned() }.into());
		}

		if !query.is_empty() {
			url.query_pairs_mut().extend_pairs(query);
		}

		Ok(url)
	}
}
impl<C, M> Clone for ApiClient<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self {
			manager: Arc::clone(&self.manager),
			retry: self.retry,
			search_limits: self.search_limits,
		}
	}
}
impl<C, M> Debug for ApiClient<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ApiClient")
			.field("manager", &self.manager)
			.field("retry", &self.retry)
			.field("search_limits", &self.search_limits)
			.finish()
	}
}

fn is_transient_status(status: u16) -> bool {
	status == 429 || (500..=599).contains(&status)
}

fn build_request(bearer: &Bearer, url: &Url, options: &CallOptions) -> Result<HttpRequest> {
	let mut builder = oauth2::http::Request::builder()
		.method(options.method.clone())
		.uri(url.as_str())
		.header(AUTHORIZATION, bearer.header_value())
		.header(ACCEPT, "application/json");
	let body = match &options.body {
		Some(json) => {
			builder = builder.header(CONTENT_TYPE, "application/json");

			serde_json::to_vec(json).map_err(ConfigError::from)?
		},
		None => Vec::new(),
	};

	builder.body(body).map_err(|err| ConfigError::from(err).into())
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;
	use crate::{
		_preludet::*,
		auth::{TenantId, TokenSecret},
		store::CredentialStore,
	};

	#[test]
	fn retry_delays_grow_and_respect_the_cap() {
		let policy = RetryPolicy::default();

		assert_eq!(policy.delay_for(1, None), Duration::milliseconds(250));
		assert_eq!(policy.delay_for(2, None), Duration::milliseconds(500));
		assert_eq!(policy.delay_for(40, None), Duration::seconds(5));
		assert_eq!(policy.delay_for(1, Some(Duration::seconds(2))), Duration::seconds(2));
		assert_eq!(policy.delay_for(1, Some(Duration::minutes(5))), Duration::seconds(5));
		assert_eq!(policy.delay_for(3, Some(Duration::milliseconds(10))), Duration::seconds(1));
		assert_eq!(policy.delay_for(2, Some(Duration::seconds(-3))), Duration::milliseconds(500));
	}

	#[tokio::test]
	async fn unauthorized_call_refreshes_once_and_replays() {
		let http = ScriptedHttpClient::default();
		let (client, store) = build_scripted_client(http.clone());
		let user = user("u-1");

		seed_credential(&store, &user, "stale").await;
		http.push(401, "")
			.push_json(200, json!({ "access_token": "fresh", "expires_in": 3600 }))
			.push_json(200, json!([{ "id": "1", "key": "ENG", "name": "Engineering" }]));

		let projects = client.projects(&user).await.expect("Replay should succeed.");
		let requests = http.requests();

		assert_eq!(projects.len(), 1);
		assert_eq!(requests.len(), 3);
		assert_eq!(requests[0].authorization.as_deref(), Some("Bearer stale"));
		assert_eq!(requests[1].url.path(), "/oauth/token");
		assert_eq!(requests[2].authorization.as_deref(), Some("Bearer fresh"));
		assert_eq!(requests[2].url.as_str(), "https://api.tracker.test/ex/jira/tenant-1/project");

		let stored = store
			.load(&user)
			.await
			.expect("Store read should succeed.")
			.expect("Credential should remain stored.");

		assert!(stored.access_token.matches("fresh"));
		assert_eq!(
			stored.refresh_token.as_ref().map(|token| token.expose().to_owned()),
			Some("refresh-for-stale".into())
		);
	}

	#[tokio::test]
	async fn tenant_discovery_retries_once_after_rejection() {
		let http = ScriptedHttpClient::default();
		let (client, store) = build_scripted_client(http.clone());
		let user = user("u-1");

		seed_credential(&store, &user, "stale").await;
		http.push(401, "")
			.push_json(200, json!({ "access_token": "fresh", "expires_in": 3600 }))
			.push_json(
				200,
				json!([{ "id": "tenant-1", "name": "Acme", "url": "https://acme.tracker.test" }]),
			);

		let resources =
			client.accessible_resources(&user).await.expect("Discovery should succeed.");
		let requests = http.requests();

		assert_eq!(resources.len(), 1);
		assert_eq!(resources[0].id.as_ref(), "tenant-1");
		assert_eq!(requests.len(), 3);
		assert_eq!(requests[0].url.path(), "/oauth/token/accessible-resources");
		assert_eq!(requests[2].authorization.as_deref(), Some("Bearer fresh"));
	}

	#[tokio::test]
	async fn second_unauthorized_response_is_not_looped() {
		let http = ScriptedHttpClient::default();
		let (client, store) = build_scripted_client(http.clone());
		let user = user("u-1");

		seed_credential(&store, &user, "stale").await;
		http.push(401, "").push_json(200, json!({ "access_token": "fresh" })).push(401, "");

		let err = client
			.call(&user, "myself", CallOptions::get())
			.await
			.expect_err("Second 401 must surface.");

		assert!(matches!(err, Error::NotAuthenticated));
		assert_eq!(http.request_count(), 3);
	}

	#[tokio::test]
	async fn transient_failures_retry_within_bounds() {
		let http = ScriptedHttpClient::default();
		let (client, store) = build_scripted_client(http.clone());
		let client = client.with_retry_policy(RetryPolicy {
			base_delay: Duration::milliseconds(1),
			..Default::default()
		});
		let user = user("u-1");

		seed_credential(&store, &user, "token").await;
		http.push(503, "").push(429, "").push_json(200, json!({ "accountId": "a-1" }));

		let response =
			client.call(&user, "/myself", CallOptions::get()).await.expect("Third attempt wins.");

		assert_eq!(response.status, 200);
		assert_eq!(http.request_count(), 3);

		http.push(503, "").push(503, "").push(503, "").push(200, "{}");

		let err = client
			.call(&user, "myself", CallOptions::get())
			.await
			.expect_err("Persistent outage must surface.");

		assert!(matches!(err, Error::Transient(_)));
		assert_eq!(http.request_count(), 6);
	}

	#[tokio::test]
	async fn non_idempotent_calls_are_not_retried_and_domain_errors_pass_through() {
		let http = ScriptedHttpClient::default();
		let (client, store) = build_scripted_client(http.clone());
		let user = user("u-1");

		seed_credential(&store, &user, "token").await;
		http.push(503, "");

		let err = client
			.call(&user, "issue", CallOptions::new(Method::POST).json(json!({ "fields": {} })))
			.await
			.expect_err("POST must not be retried.");

		assert!(matches!(err, Error::Transient(_)));
		assert_eq!(http.request_count(), 1);

		http.push(404, r#"{"errorMessages":["Issue does not exist"]}"#);

		let response = client
			.call(&user, "issue/ENG-404", CallOptions::get())
			.await
			.expect("404 is returned verbatim.");

		assert_eq!(response.status, 404);
		assert!(matches!(
			response.into_result(),
			Err(Error::ProviderRejected { status: 404, .. })
		));
	}

	#[tokio::test]
	async fn invalid_paths_and_missing_credentials_never_reach_the_network() {
		let http = ScriptedHttpClient::default();
		let (client, store) = build_scripted_client(http.clone());
		let user = user("u-1");

		assert!(matches!(
			client.call(&user, "myself", CallOptions::get()).await,
			Err(Error::NotAuthenticated)
		));

		seed_credential(&store, &user, "token").await;

		for path in
			["https://evil.example/steal", "http:evil.example/steal", "%2e%2e/%2e%2e/%2e%2e/other"]
		{
			assert!(matches!(
				client.call(&user, path, CallOptions::get()).await,
				Err(Error::ValidationFailed(_))
			));
		}

		assert_eq!(http.request_count(), 0);
	}

	#[test]
	fn endpoints_stay_beneath_the_tenant_api_base() {
		let (client, _) = build_scripted_client(ScriptedHttpClient::default());
		let bearer = Bearer {
			token: TokenSecret::new("secret-token"),
			tenant_id: TenantId::new("tenant-1").expect("Tenant fixture should be valid."),
			site_url: None,
		};
		let url = client
			.endpoint(&bearer, "issue/ENG-1", &[("expand".into(), "names".into())])
			.expect("Tenant path should resolve.");

		assert_eq!(
			url.as_str(),
			"https://api.tracker.test/ex/jira/tenant-1/issue/ENG-1?expand=names"
		);

		let escapes = [
			"http:evil.example/steal",
			"%2e%2e/%2e%2e/%2e%2e/other",
			"//evil.example/x",
			"../other",
		];

		for escape in escapes {
			assert!(matches!(
				client.endpoint(&bearer, escape, &[]),
				Err(Error::ValidationFailed(ValidationError::InvalidPath { .. }))
			));
		}
	}
}
