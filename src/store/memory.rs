//! Thread-safe in-memory [`CredentialStore`] for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::{OAuthCredential, PendingAuthorization, UserId},
	store::{CompareAndSwapOutcome, CredentialStore, StoreFuture, StoredRow},
};

type StoreMap = Arc<RwLock<HashMap<UserId, StoredRow>>>;

/// Storage backend that keeps user rows in-process.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Number of users with a stored credential.
	pub fn credential_count(&self) -> usize {
		self.0.read().values().filter(|row| row.credential.is_some()).count()
	}

	fn update<T>(&self, user: &UserId, f: impl FnOnce(&mut StoredRow) -> T) -> T {
		let mut guard = self.0.write();
		let row = guard.entry(user.clone()).or_default();
		let value = f(row);

		if row.is_empty() {
			guard.remove(user);
		}

		value
	}
}
impl CredentialStore for MemoryStore {
	fn load<'a>(&'a self, user: &'a UserId) -> StoreFuture<'a, Option<OAuthCredential>> {
		Box::pin(async move { Ok(self.0.read().get(user).and_then(|row| row.credential.clone())) })
	}

	fn save<'a>(&'a self, user: &'a UserId, credential: OAuthCredential) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.update(user, |row| row.credential = Some(credential));

			Ok(())
		})
	}

	fn compare_and_swap_refresh<'a>(
		&'a self,
		user: &'a UserId,
		expected_refresh: Option<&'a str>,
		replacement: OAuthCredential,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		Box::pin(async move {
			Ok(self.update(user, |row| row.swap_refresh(expected_refresh, replacement)))
		})
	}

	fn purge<'a>(&'a self, user: &'a UserId) -> StoreFuture<'a, Option<OAuthCredential>> {
		Box::pin(async move { Ok(self.update(user, |row| row.credential.take())) })
	}

	fn put_pending<'a>(
		&'a self,
		user: &'a UserId,
		pending: PendingAuthorization,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.update(user, |row| row.pending = Some(pending));

			Ok(())
		})
	}

	fn take_pending<'a>(
		&'a self,
		user: &'a UserId,
	) -> StoreFuture<'a, Option<PendingAuthorization>> {
		Box::pin(async move { Ok(self.update(user, |row| row.pending.take())) })
	}
}
