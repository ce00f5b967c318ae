//! Provider strategy hooks that customize token exchanges and tenant selection.
//!
//! Implementations decorate outgoing token requests, decide what a failed token endpoint
//! call means for the stored credential, and choose which discovered tenant a new
//! credential binds to.

// crates.io
use oauth2::basic::BasicErrorResponse;
// self
use crate::{
	_prelude::*,
	auth::TenantId,
	provider::{AccessibleResource, descriptor::GrantType},
};

/// Strategy hook that allows providers to decorate requests and classify errors.
///
/// Hooks take crate-owned data only, so strategies never see the HTTP client in use.
pub trait ProviderStrategy: Send + Sync {
	/// Decides what a failed token endpoint call means for the stored credential.
	fn classify_token_error(&self, ctx: &TokenErrorContext) -> TokenFailure;

	/// Adds provider-specific body parameters before a token request is dispatched.
	///
	/// Parameters land in the JSON object or form body, depending on
	/// [`TokenRequestEncoding`](crate::provider::TokenRequestEncoding).
	fn augment_token_request(&self, _grant: GrantType, _params: &mut BTreeMap<String, String>) {}

	/// Picks the tenant a fresh credential binds to.
	fn select_resource<'a>(
		&self,
		resources: &'a [AccessibleResource],
		previous: Option<&TenantId>,
	) -> Option<&'a AccessibleResource> {
		crate::provider::select_resource(resources, previous)
	}
}

/// Outcome of a failed token endpoint call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenFailure {
	/// The code or refresh token is no longer honored; the user must reconnect.
	Revoked,
	/// The client registration was refused.
	Misconfigured,
	/// The grant does not cover the requested scopes.
	ScopeMismatch,
	/// The token endpoint is throttling or down; the credential stays.
	Unavailable,
}
impl TokenFailure {
	/// Returns `true` when the stored credential can no longer be used and must be purged.
	pub fn purges_credential(self) -> bool {
		!matches!(self, Self::Unavailable)
	}

	/// Short label for logs and error messages.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Revoked => "revoked",
			Self::Misconfigured => "misconfigured",
			Self::ScopeMismatch => "scope_mismatch",
			Self::Unavailable => "unavailable",
		}
	}
}

/// Everything a strategy may inspect about a failed token endpoint response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenErrorContext {
	/// Grant the request was redeeming.
	pub grant_type: GrantType,
	/// HTTP status of the response.
	pub http_status: u16,
	/// OAuth `error` code, when the body was a standard error object.
	pub oauth_error: Option<String>,
	/// OAuth `error_description`, when present.
	pub error_description: Option<String>,
	/// Leading characters of a body that was not a standard error object.
	pub body_preview: Option<String>,
}
impl TokenErrorContext {
	/// Characters kept from unstructured bodies.
	pub const BODY_PREVIEW_LIMIT: usize = 256;

	/// Context carrying only a status code.
	pub fn new(grant_type: GrantType, http_status: u16) -> Self {
		Self {
			grant_type,
			http_status,
			oauth_error: None,
			error_description: None,
			body_preview: None,
		}
	}

	/// Reads the OAuth error object out of `body`, falling back to a trimmed preview.
	pub fn from_response(grant_type: GrantType, http_status: u16, body: &[u8]) -> Self {
		let mut ctx = Self::new(grant_type, http_status);

		match serde_json::from_slice::<BasicErrorResponse>(body) {
			Ok(response) => {
				ctx.oauth_error = Some(response.error().as_ref().to_owned());
				ctx.error_description = response.error_description().cloned();
			},
			Err(_) => {
				let text = String::from_utf8_lossy(body);
				let text = text.trim();

				if !text.is_empty() {
					ctx.body_preview = Some(preview(text));
				}
			},
		}

		ctx
	}

	/// Most specific human-readable reason available.
	pub fn reason(&self) -> String {
		self.error_description
			.as_deref()
			.or(self.oauth_error.as_deref())
			.or(self.body_preview.as_deref())
			.map(str::to_owned)
			.unwrap_or_else(|| format!("HTTP {}", self.http_status))
	}
}

/// Default strategy tuned for issue-tracker authorization servers.
///
/// A recognised OAuth error code decides first, then a code mentioned anywhere in the
/// description or body, then the HTTP status.
#[derive(Debug, Default)]
pub struct DefaultProviderStrategy;
impl Display for DefaultProviderStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("default-provider-strategy")
	}
}
impl ProviderStrategy for DefaultProviderStrategy {
	fn classify_token_error(&self, ctx: &TokenErrorContext) -> TokenFailure {
		ctx.oauth_error
			.as_deref()
			.and_then(lookup_code)
			.or_else(|| ctx.error_description.as_deref().and_then(mentioned_code))
			.or_else(|| ctx.body_preview.as_deref().and_then(mentioned_code))
			.unwrap_or(match ctx.http_status {
				400 => TokenFailure::Revoked,
				401 => TokenFailure::Misconfigured,
				403 => TokenFailure::ScopeMismatch,
				_ => TokenFailure::Unavailable,
			})
	}
}

// Trackers answer a rotated-away refresh token with `unauthorized_client`.
const ERROR_CODES: [(&str, TokenFailure); 8] = [
	("invalid_grant", TokenFailure::Revoked),
	("access_denied", TokenFailure::Revoked),
	("unauthorized_client", TokenFailure::Revoked),
	("invalid_client", TokenFailure::Misconfigured),
	("invalid_scope", TokenFailure::ScopeMismatch),
	("insufficient_scope", TokenFailure::ScopeMismatch),
	("temporarily_unavailable", TokenFailure::Unavailable),
	("server_error", TokenFailure::Unavailable),
];

fn lookup_code(code: &str) -> Option<TokenFailure> {
	let code = code.trim();

	ERROR_CODES
		.iter()
		.find(|(known, _)| known.eq_ignore_ascii_case(code))
		.map(|(_, failure)| *failure)
}

fn mentioned_code(text: &str) -> Option<TokenFailure> {
	let lowered = text.to_ascii_lowercase();

	ERROR_CODES.iter().find(|(known, _)| lowered.contains(known)).map(|(_, failure)| *failure)
}

fn preview(text: &str) -> String {
	match text.char_indices().nth(TokenErrorContext::BODY_PREVIEW_LIMIT) {
		Some((cut, _)) => format!("{}…", &text[..cut]),
		None => text.to_owned(),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn classify(status: u16, body: &str) -> TokenFailure {
		DefaultProviderStrategy.classify_token_error(&TokenErrorContext::from_response(
			GrantType::RefreshToken,
			status,
			body.as_bytes(),
		))
	}

	#[test]
	fn error_codes_win_over_status() {
		assert_eq!(classify(503, r#"{"error":"invalid_grant"}"#), TokenFailure::Revoked);
		assert_eq!(
			classify(
				403,
				r#"{"error":"unauthorized_client","error_description":"refresh_token is invalid"}"#
			),
			TokenFailure::Revoked
		);
		assert_eq!(classify(400, r#"{"error":"server_error"}"#), TokenFailure::Unavailable);
	}

	#[test]
	fn throttling_and_outages_keep_the_credential() {
		for status in [429, 500, 502, 503] {
			let failure = classify(status, "");

			assert_eq!(failure, TokenFailure::Unavailable, "HTTP {status} should be transient.");
			assert!(!failure.purges_credential());
		}
	}

	#[test]
	fn unstructured_bodies_are_scanned_then_fall_back_to_status() {
		assert_eq!(
			classify(502, "<html>upstream said invalid_grant</html>"),
			TokenFailure::Revoked
		);

		let failure = classify(400, "<html>Bad Request</html>");

		assert_eq!(failure, TokenFailure::Revoked);
		assert!(failure.purges_credential());
		assert_eq!(classify(403, ""), TokenFailure::ScopeMismatch);
	}

	#[test]
	fn reasons_prefer_descriptions_and_truncate_bodies() {
		let described = TokenErrorContext::from_response(
			GrantType::AuthorizationCode,
			400,
			br#"{"error":"invalid_grant","error_description":"Code already used"}"#,
		);

		assert_eq!(described.reason(), "Code already used");
		assert_eq!(
			TokenErrorContext::from_response(GrantType::AuthorizationCode, 500, b"  ").reason(),
			"HTTP 500"
		);

		let long = "x".repeat(1_000);
		let ctx = TokenErrorContext::from_response(
			GrantType::AuthorizationCode,
			500,
			long.as_bytes(),
		);

		assert_eq!(
			ctx.body_preview.map(|preview| preview.chars().count()),
			Some(TokenErrorContext::BODY_PREVIEW_LIMIT + 1)
		);
	}
}
