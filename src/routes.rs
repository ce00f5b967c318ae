//! Framework-agnostic route handlers for the host application.
//!
//! Every handler returns a [`RouteResponse`] the host maps onto its HTTP framework.
//! Handlers charge the [`RateLimiter`] first, validate second, and only then reach the
//! network. Failures render as `{ "error", "message", "reconnect_required" }` so the UI
//! can send users back through authorization instead of showing a dead end.

// crates.io
use serde_json::{Value, json};
use url::form_urlencoded;
// self
use crate::{
	_prelude::*,
	auth::UserId,
	client::ApiClient,
	error::ConfigError,
	flows::ConnectionStatus,
	http::ProviderHttpClient,
	oauth::TransportErrorMapper,
	rate_limit::{RateLimitKey, RateLimitStatus, RateLimiter},
	search::SearchParams,
	store::{CredentialStore, StoreError},
};

/// Rate-limit resource charged by the connect, callback, and refresh routes.
pub const AUTH_RESOURCE: &str = "auth";
/// Rate-limit resource charged by the search route.
pub const SEARCH_RESOURCE: &str = "search";
/// Rate-limit resource charged by the issue route.
pub const ISSUE_RESOURCE: &str = "issue";
/// Rate-limit resource charged by the projects route.
pub const PROJECTS_RESOURCE: &str = "projects";
/// Query parameter carrying the error code on failed callbacks.
pub const CALLBACK_ERROR_PARAM: &str = "tracker_error";

/// Query parameters delivered to the OAuth callback.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackParams {
	/// Authorization code.
	pub code: Option<String>,
	/// Echoed anti-forgery state.
	pub state: Option<String>,
	/// Provider error such as `access_denied`.
	pub error: Option<String>,
}

/// Response produced by a handler.
#[derive(Clone, Debug, PartialEq)]
pub struct RouteResponse {
	/// HTTP status.
	pub status: u16,
	/// Response headers.
	pub headers: Vec<(String, String)>,
	/// JSON body, absent for redirects.
	pub body: Option<Value>,
}
impl RouteResponse {
	/// JSON response.
	pub fn json(status: u16, body: Value) -> Self {
		Self { status, headers: Vec::new(), body: Some(body) }
	}

	/// `302 Found` redirect.
	pub fn redirect(location: impl Into<String>) -> Self {
		Self { status: 302, headers: vec![("Location".into(), location.into())], body: None }
	}

	/// Renders an error with its status, code, and reconnect hint.
	pub fn error(err: &Error) -> Self {
		let mut body = json!({
			"error": err.code(),
			"message": err.to_string(),
			"reconnect_required": err.requires_reconnect(),
		});

		if let Error::ProviderRejected { body: details, .. } = err {
			body["details"] = serde_json::from_str::<Value>(details)
				.unwrap_or_else(|_| Value::String(details.clone()));
		}

		let mut response = Self::json(error_status(err), body);

		if let Error::RateLimited { retry_after, .. } = err {
			response = response.with_header("Retry-After", ceil_seconds(*retry_after).to_string());
		}

		response
	}

	/// Adds a header.
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));

		self
	}

	/// First header named `name` (case-insensitive).
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}

	fn with_quota(self, quota: Option<RateLimitStatus>) -> Self {
		match quota {
			Some(quota) => self
				.with_header("X-RateLimit-Limit", quota.limit.to_string())
				.with_header("X-RateLimit-Remaining", quota.remaining.to_string())
				.with_header("X-RateLimit-Reset", quota.reset_at.unix_timestamp().to_string()),
			None => self,
		}
	}
}

/// HTTP status for a proxy error.
pub fn error_status(err: &Error) -> u16 {
	match err {
		err if err.requires_reconnect() => 401,
		Error::RateLimited { .. } => 429,
		Error::ValidationFailed(_) => 400,
		Error::ProviderRejected { status, .. } => *status,
		Error::Transport(_) => 502,
		Error::Transient(_) | Error::NotConfigured { .. } => 503,
		_ => 500,
	}
}

/// Thin handlers over an [`ApiClient`] and a [`RateLimiter`].
pub struct Routes<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Authenticated tracker client.
	pub client: Arc<ApiClient<C, M>>,
	/// Admission control shared by every handler.
	pub limiter: Arc<RateLimiter>,
}
impl<C, M> Routes<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Bundles a client and a limiter.
	pub fn new(client: Arc<ApiClient<C, M>>, limiter: Arc<RateLimiter>) -> Self {
		Self { client, limiter }
	}

	/// Starts authorization and redirects to the provider.
	pub async fn connect(&self, user: &UserId, return_to: Option<&str>) -> RouteResponse {
		let result = async {
			let quota = self.admit(user, AUTH_RESOURCE)?;
			let request =
				self.client.manager.begin_authorization(user, return_to.unwrap_or("/")).await?;

			Ok::<_, Error>(
				RouteResponse::redirect(request.authorize_url.as_str()).with_quota(Some(quota)),
			)
		};

		respond(result.await)
	}

	/// Handles the provider callback and redirects back into the application.
	///
	/// Success lands on the recorded `return_to`; failure lands on
	/// `/?tracker_error=<code>`.
	pub async fn callback(&self, user: &UserId, params: CallbackParams) -> RouteResponse {
		let manager = &self.client.manager;
		let result = async {
			if let Err(err) = self.admit(user, AUTH_RESOURCE) {
				manager.store.take_pending(user).await?;

				return Err(err.into());
			}
			if let Some(provider_error) = params.error.as_deref() {
				manager.store.take_pending(user).await?;

				return Err(CallbackFailure::Provider(provider_error.to_owned()));
			}

			let (Some(code), Some(state)) = (params.code.as_deref(), params.state.as_deref())
			else {
				manager.store.take_pending(user).await?;

				return Err(Error::InvalidState.into());
			};
			let outcome = manager.complete_authorization(user, code, state).await?;

			Ok::<_, CallbackFailure>(outcome.return_to)
		};

		match result.await {
			Ok(return_to) => RouteResponse::redirect(return_to),
			Err(failure) => {
				let code = match &failure {
					CallbackFailure::Provider(code) => sanitize_error_code(code),
					CallbackFailure::Proxy(err) => err.code().to_owned(),
				};

				obs_event!(info, code = %code, "Authorization callback failed.");

				RouteResponse::redirect(format!(
					"/?{}",
					form_urlencoded::Serializer::new(String::new())
						.append_pair(CALLBACK_ERROR_PARAM, &code)
						.finish()
				))
			},
		}
	}

	/// Reports the user's connection state.
	pub async fn status(&self, user: &UserId) -> RouteResponse {
		respond(self.client.manager.status_for(user).await.and_then(|status| ok_json(&status)))
	}

	/// Forgets the user's credential.
	pub async fn disconnect(&self, user: &UserId) -> RouteResponse {
		respond(
			self.client
				.manager
				.disconnect(user)
				.await
				.and_then(|()| ok_json(&ConnectionStatus::disconnected())),
		)
	}

	/// Forces a refresh.
	pub async fn refresh(&self, user: &UserId) -> RouteResponse {
		let result = async {
			let quota = self.admit(user, AUTH_RESOURCE)?;
			let status = self.client.manager.refresh(user).await?;

			Ok::<_, Error>(ok_json(&status)?.with_quota(Some(quota)))
		};

		respond(result.await)
	}

	/// Runs a search.
	pub async fn search(&self, user: &UserId, params: SearchParams) -> RouteResponse {
		let result = async {
			let quota = self.admit(user, SEARCH_RESOURCE)?;
			let aggregated = self.client.search_params(user, params).await?;

			Ok::<_, Error>(ok_json(&aggregated)?.with_quota(Some(quota)))
		};

		respond(result.await)
	}

	/// Fetches one issue.
	pub async fn issue(&self, user: &UserId, key: &str) -> RouteResponse {
		let result = async {
			let quota = self.admit(user, ISSUE_RESOURCE)?;
			let issue = self.client.issue(user, key).await?;

			Ok::<_, Error>(ok_json(&issue)?.with_quota(Some(quota)))
		};

		respond(result.await)
	}

	/// Lists projects.
	pub async fn projects(&self, user: &UserId) -> RouteResponse {
		let result = async {
			let quota = self.admit(user, PROJECTS_RESOURCE)?;
			let projects = self.client.projects(user).await?;

			Ok::<_, Error>(ok_json(&projects)?.with_quota(Some(quota)))
		};

		respond(result.await)
	}

	fn admit(&self, user: &UserId, resource: &str) -> Result<RateLimitStatus> {
		self.limiter.admit(&RateLimitKey::new(user.clone(), resource))
	}
}
impl<C, M> Clone for Routes<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self { client: Arc::clone(&self.client), limiter: Arc::clone(&self.limiter) }
	}
}

enum CallbackFailure {
	Provider(String),
	Proxy(Error),
}
impl From<Error> for CallbackFailure {
	fn from(err: Error) -> Self {
		Self::Proxy(err)
	}
}
impl From<StoreError> for CallbackFailure {
	fn from(err: StoreError) -> Self {
		Self::Proxy(err.into())
	}
}

fn respond(result: Result<RouteResponse>) -> RouteResponse {
	result.unwrap_or_else(|err| RouteResponse::error(&err))
}

fn ok_json<T>(value: &T) -> Result<RouteResponse>
where
	T: Serialize,
{
	let body = serde_json::to_value(value).map_err(ConfigError::from)?;

	Ok(RouteResponse::json(200, body))
}

fn sanitize_error_code(raw: &str) -> String {
	let code = raw
		.chars()
		.filter(|c| c.is_ascii_alphanumeric() || *c == '_')
		.take(64)
		.collect::<String>();

	if code.is_empty() { "authorization_failed".into() } else { code }
}

fn ceil_seconds(duration: Duration) -> i64 {
	let whole = duration.whole_seconds();

	if duration.subsec_nanoseconds() > 0 { whole + 1 } else { whole.max(0) }
}
