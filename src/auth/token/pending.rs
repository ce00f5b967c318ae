//! Short-lived record binding an authorization redirect to its callback.

// crates.io
use rand::{Rng, distr::Alphanumeric};
// self
use crate::_prelude::*;

/// Lifetime of a pending authorization before the callback is refused.
pub const PENDING_AUTHORIZATION_TTL: Duration = Duration::minutes(10);
/// Length of generated `state` values.
pub const STATE_LEN: usize = 32;

/// Proof that the current user initiated an authorization redirect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorization {
	/// Random anti-forgery value echoed back by the provider.
	pub state: String,
	/// Local path the user returns to after the callback.
	pub return_to: String,
	/// Instant the redirect was issued.
	pub created_at: OffsetDateTime,
}
impl PendingAuthorization {
	/// Generates a record with a fresh random state.
	pub fn generate(return_to: impl Into<String>, created_at: OffsetDateTime) -> Self {
		let state = rand::rng()
			.sample_iter(&Alphanumeric)
			.take(STATE_LEN)
			.map(char::from)
			.collect::<String>();

		Self { state, return_to: sanitize_return_to(&return_to.into()), created_at }
	}

	/// Returns `true` once the record outlived [`PENDING_AUTHORIZATION_TTL`].
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		instant - self.created_at > PENDING_AUTHORIZATION_TTL
	}

	/// Exact byte comparison against the `state` echoed by the provider.
	pub fn matches_state(&self, state: &str) -> bool {
		self.state.as_bytes() == state.as_bytes()
	}
}

/// Keeps only local absolute paths; anything else collapses to `/`.
pub fn sanitize_return_to(candidate: &str) -> String {
	let local = candidate.starts_with('/')
		&& !candidate.starts_with("//")
		&& !candidate.starts_with("/\\")
		&& !candidate.contains("://")
		&& !candidate.chars().any(char::is_control);

	if local { candidate.to_owned() } else { "/".into() }
}
