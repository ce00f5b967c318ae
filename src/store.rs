//! Storage contracts and built-in credential stores.
//!
//! The proxy persists two things per user: the [`OAuthCredential`] and at most one
//! [`PendingAuthorization`]. Hosts plug in their own persistence by implementing
//! [`CredentialStore`]; the crate ships an in-memory map, a JSON file of user rows, and a
//! sealed-cookie adapter.

pub mod cookie;
pub mod file;
pub mod memory;

pub use cookie::{CookieJar, CookieSealer, CookieStore, MemoryCookieJar};
pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{OAuthCredential, PendingAuthorization, TokenSecret, UserId},
};

/// Boxed future returned by [`CredentialStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend contract for per-user credentials and pending authorizations.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Fetches the credential stored for `user`, if any.
	fn load<'a>(&'a self, user: &'a UserId) -> StoreFuture<'a, Option<OAuthCredential>>;

	/// Persists or replaces the credential for `user`.
	fn save<'a>(&'a self, user: &'a UserId, credential: OAuthCredential) -> StoreFuture<'a, ()>;

	/// Replaces the credential only if its refresh token still equals `expected_refresh`.
	fn compare_and_swap_refresh<'a>(
		&'a self,
		user: &'a UserId,
		expected_refresh: Option<&'a str>,
		replacement: OAuthCredential,
	) -> StoreFuture<'a, CompareAndSwapOutcome>;

	/// Deletes the credential for `user`, returning what was removed.
	fn purge<'a>(&'a self, user: &'a UserId) -> StoreFuture<'a, Option<OAuthCredential>>;

	/// Stores the pending authorization for `user`, replacing any previous one.
	fn put_pending<'a>(
		&'a self,
		user: &'a UserId,
		pending: PendingAuthorization,
	) -> StoreFuture<'a, ()>;

	/// Reads and deletes the pending authorization for `user`.
	fn take_pending<'a>(&'a self, user: &'a UserId)
	-> StoreFuture<'a, Option<PendingAuthorization>>;
}

/// Result of a refresh-token compare-and-swap attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareAndSwapOutcome {
	/// The refresh secret matched the expected value and the credential was replaced.
	Updated,
	/// A credential exists but its refresh secret differs from the expected value.
	RefreshMismatch,
	/// No credential is stored for the user.
	Missing,
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Everything the proxy keeps for one user; the shape of a row in user-record stores.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoredRow {
	/// Current credential.
	#[serde(default)]
	pub credential: Option<OAuthCredential>,
	/// Outstanding authorization redirect.
	#[serde(default)]
	pub pending: Option<PendingAuthorization>,
}
impl StoredRow {
	/// Returns `true` when the row carries nothing worth persisting.
	pub fn is_empty(&self) -> bool {
		self.credential.is_none() && self.pending.is_none()
	}

	/// Applies compare-and-swap semantics to the credential slot.
	pub fn swap_refresh(
		&mut self,
		expected_refresh: Option<&str>,
		replacement: OAuthCredential,
	) -> CompareAndSwapOutcome {
		let outcome = match self.credential.as_ref() {
			Some(existing) if refresh_matches(existing.refresh_token.as_ref(), expected_refresh) =>
				CompareAndSwapOutcome::Updated,
			Some(_) => CompareAndSwapOutcome::RefreshMismatch,
			None => CompareAndSwapOutcome::Missing,
		};

		if matches!(outcome, CompareAndSwapOutcome::Updated) {
			self.credential = Some(replacement);
		}

		outcome
	}
}

fn refresh_matches(current: Option<&TokenSecret>, expected: Option<&str>) -> bool {
	match (current, expected) {
		(None, None) => true,
		(Some(cur), Some(exp)) => cur.matches(exp),
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::error::Error as StdError;
	// self
	use super::*;
	use crate::{auth::TenantId, error::Error};

	fn credential(refresh: Option<&str>) -> OAuthCredential {
		OAuthCredential::builder()
			.access_token("access")
			.maybe_refresh_token(refresh.map(TokenSecret::new))
			.tenant_id(TenantId::new("tenant-1").expect("Tenant fixture should be valid."))
			.build()
			.expect("Credential fixture should build.")
	}

	#[test]
	fn store_error_converts_into_proxy_error_with_source() {
		let store_error = StoreError::Backend { message: "database unreachable".into() };
		let proxy_error: Error = store_error.clone().into();

		assert!(matches!(proxy_error, Error::Storage(_)));
		assert!(proxy_error.to_string().contains("database unreachable"));

		let source = StdError::source(&proxy_error)
			.expect("Proxy error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}

	#[test]
	fn swap_refresh_only_replaces_matching_rows() {
		let mut row = StoredRow::default();

		assert_eq!(
			row.swap_refresh(Some("r1"), credential(Some("r2"))),
			CompareAndSwapOutcome::Missing
		);
		assert!(row.is_empty());

		row.credential = Some(credential(Some("r1")));

		assert_eq!(
			row.swap_refresh(Some("stale"), credential(Some("r3"))),
			CompareAndSwapOutcome::RefreshMismatch
		);
		assert_eq!(
			row.swap_refresh(Some("r1"), credential(Some("r2"))),
			CompareAndSwapOutcome::Updated
		);
		assert!(
			row.credential
				.as_ref()
				.and_then(|credential| credential.refresh_token.as_ref())
				.is_some_and(|secret| secret.matches("r2"))
		);
	}

	#[test]
	fn swap_refresh_matches_absent_refresh_tokens() {
		let mut row = StoredRow { credential: Some(credential(None)), pending: None };

		assert_eq!(row.swap_refresh(None, credential(None)), CompareAndSwapOutcome::Updated);
		assert_eq!(
			row.swap_refresh(Some("r1"), credential(None)),
			CompareAndSwapOutcome::RefreshMismatch
		);
	}
}
