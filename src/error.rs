//! Proxy-level error types shared across flows, clients, stores, and routes.

// self
use crate::{_prelude::*, search::ValidationError};

/// Proxy-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical proxy error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retried locally up to a fixed cap before surfacing.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Request rejected before any network call.
	#[error(transparent)]
	ValidationFailed(#[from] ValidationError),

	/// Client credentials for the integration are missing.
	#[error("Issue tracker integration is not configured: {missing} is missing.")]
	NotConfigured {
		/// Name of the missing setting.
		missing: &'static str,
	},
	/// Authorization callback did not match a pending authorization.
	#[error("Authorization state is missing, expired, or does not match.")]
	InvalidState,
	/// Authorization code could not be exchanged for tokens.
	#[error("Authorization code exchange failed: {reason}.")]
	TokenExchangeFailed {
		/// HTTP status returned by the token endpoint, when available.
		status: Option<u16>,
		/// Provider- or proxy-supplied reason string.
		reason: String,
	},
	/// Provider rejected the refresh token; stored credentials were purged.
	#[error("Provider rejected the refresh token: {reason}.")]
	RefreshFailed {
		/// Provider- or proxy-supplied reason string.
		reason: String,
	},
	/// Stored credential cannot self-renew.
	#[error("Stored credential has no refresh token.")]
	NoRefreshToken,
	/// No usable credential exists for the user.
	#[error("User is not connected to the issue tracker.")]
	NotAuthenticated,
	/// Caller exceeded its admission budget for a resource.
	#[error("Rate limit exceeded for {resource}; retry in {}s.", .retry_after.whole_seconds())]
	RateLimited {
		/// Resource label the budget applies to.
		resource: String,
		/// Time until the window resets.
		retry_after: Duration,
	},
	/// Provider answered with a non-auth client error; passed through verbatim.
	#[error("Issue tracker rejected the request with HTTP {status}.")]
	ProviderRejected {
		/// HTTP status returned by the provider.
		status: u16,
		/// Raw response body.
		body: String,
	},
}
impl Error {
	/// Returns `true` when the caller must send the user back through authorization.
	pub fn requires_reconnect(&self) -> bool {
		matches!(
			self,
			Self::InvalidState
				| Self::TokenExchangeFailed { .. }
				| Self::RefreshFailed { .. }
				| Self::NoRefreshToken
				| Self::NotAuthenticated
		)
	}

	/// Returns `true` for failures that may succeed when retried later.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Transient(_) | Self::Transport(_) | Self::RateLimited { .. })
	}

	/// Stable machine-readable code used in route error bodies.
	pub fn code(&self) -> &'static str {
		match self {
			Self::Storage(_) => "storage_error",
			Self::Config(_) => "config_error",
			Self::Transient(_) => "upstream_unavailable",
			Self::Transport(_) => "transport_error",
			Self::ValidationFailed(_) => "validation_failed",
			Self::NotConfigured { .. } => "not_configured",
			Self::InvalidState => "invalid_state",
			Self::TokenExchangeFailed { .. } => "token_exchange_failed",
			Self::RefreshFailed { .. } => "refresh_failed",
			Self::NoRefreshToken => "no_refresh_token",
			Self::NotAuthenticated => "not_authenticated",
			Self::RateLimited { .. } => "rate_limited",
			Self::ProviderRejected { .. } => "provider_rejected",
		}
	}
}

/// Configuration and validation failures raised by the proxy.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// A request body could not be serialized.
	#[error("Request body could not be serialized.")]
	RequestEncode(#[from] serde_json::Error),
	/// Provider descriptor produced an invalid URL.
	#[error("Descriptor produced an invalid URL.")]
	InvalidDescriptor {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Token record builder validation failed.
	#[error("Unable to build credential.")]
	CredentialBuild(#[from] crate::auth::CredentialBuilderError),
	/// Requested scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Provider returned a throttling or server-side failure.
	#[error("Issue tracker returned a temporary failure: {message}.")]
	Upstream {
		/// Provider- or proxy-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Provider responded with malformed JSON that could not be parsed.
	#[error("Issue tracker returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}
impl TransientError {
	/// Retry-After hint carried by the failure, if any.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::Upstream { retry_after, .. } => *retry_after,
			Self::ResponseParse { .. } => None,
		}
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the issue tracker.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the issue tracker.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn auth_lifecycle_errors_require_reconnect() {
		assert!(Error::InvalidState.requires_reconnect());
		assert!(Error::NotAuthenticated.requires_reconnect());
		assert!(Error::NoRefreshToken.requires_reconnect());
		assert!(Error::RefreshFailed { reason: "revoked".into() }.requires_reconnect());
		assert!(
			Error::TokenExchangeFailed { status: Some(400), reason: "bad code".into() }
				.requires_reconnect()
		);
		assert!(!Error::ProviderRejected { status: 404, body: String::new() }.requires_reconnect());
		assert!(
			!Error::RateLimited { resource: "search".into(), retry_after: Duration::seconds(3) }
				.requires_reconnect()
		);
	}

	#[test]
	fn transient_errors_are_retryable() {
		let err: Error = TransientError::Upstream {
			message: "busy".into(),
			status: Some(503),
			retry_after: Some(Duration::seconds(2)),
		}
		.into();

		assert!(err.is_retryable());
		assert_eq!(err.code(), "upstream_unavailable");
		assert!(!Error::InvalidState.is_retryable());
	}

	#[test]
	fn rate_limited_message_reports_whole_seconds() {
		let err =
			Error::RateLimited { resource: "search".into(), retry_after: Duration::seconds(42) };

		assert_eq!(err.to_string(), "Rate limit exceeded for search; retry in 42s.");
	}
}
