//! File-backed [`CredentialStore`] keeping one JSON row per user.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{OAuthCredential, PendingAuthorization, UserId},
	store::{CompareAndSwapOutcome, CredentialStore, StoreError, StoreFuture, StoredRow},
};

type Table = BTreeMap<UserId, StoredRow>;

/// Persists user rows to a JSON file after each mutation.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<Table>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing rows.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Location of the backing file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<Table, StoreError> {
		if !path.exists() {
			return Ok(Table::new());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.iter().all(u8::is_ascii_whitespace) {
			return Ok(Table::new());
		}

		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist_locked(&self, contents: &Table) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let serialized =
			serde_json::to_vec_pretty(contents).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}

	/// Mutates one row under the write lock and persists the table when `dirty` says so.
	fn mutate<T>(
		&self,
		user: &UserId,
		f: impl FnOnce(&mut StoredRow) -> T,
		dirty: impl FnOnce(&T) -> bool,
	) -> Result<T, StoreError> {
		let mut guard = self.inner.write();
		let row = guard.entry(user.clone()).or_default();
		let value = f(row);

		if row.is_empty() {
			guard.remove(user);
		}
		if dirty(&value) {
			self.persist_locked(&guard)?;
		}

		Ok(value)
	}
}
impl CredentialStore for FileStore {
	fn load<'a>(&'a self, user: &'a UserId) -> StoreFuture<'a, Option<OAuthCredential>> {
		Box::pin(async move {
			Ok(self.inner.read().get(user).and_then(|row| row.credential.clone()))
		})
	}

	fn save<'a>(&'a self, user: &'a UserId, credential: OAuthCredential) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.mutate(user, |row| row.credential = Some(credential), |_| true)
		})
	}

	fn compare_and_swap_refresh<'a>(
		&'a self,
		user: &'a UserId,
		expected_refresh: Option<&'a str>,
		replacement: OAuthCredential,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		Box::pin(async move {
			self.mutate(
				user,
				|row| row.swap_refresh(expected_refresh, replacement),
				|outcome| matches!(outcome, CompareAndSwapOutcome::Updated),
			)
		})
	}

	fn purge<'a>(&'a self, user: &'a UserId) -> StoreFuture<'a, Option<OAuthCredential>> {
		Box::pin(async move {
			self.mutate(user, |row| row.credential.take(), |removed| removed.is_some())
		})
	}

	fn put_pending<'a>(
		&'a self,
		user: &'a UserId,
		pending: PendingAuthorization,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move { self.mutate(user, |row| row.pending = Some(pending), |_| true) })
	}

	fn take_pending<'a>(
		&'a self,
		user: &'a UserId,
	) -> StoreFuture<'a, Option<PendingAuthorization>> {
		Box::pin(async move {
			self.mutate(user, |row| row.pending.take(), |removed| removed.is_some())
		})
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// crates.io
	use tokio::runtime::Runtime;
	// self
	use super::*;
	use crate::auth::TenantId;

	fn temp_path() -> PathBuf {
		let unique = format!(
			"tracker_proxy_file_store_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	fn fixture() -> (UserId, OAuthCredential) {
		let user = UserId::new("user-demo").expect("Failed to build user fixture.");
		let credential = OAuthCredential::builder()
			.access_token("access-token")
			.refresh_token("refresh-token")
			.tenant_id(TenantId::new("tenant-demo").expect("Failed to build tenant fixture."))
			.expires_in(Duration::hours(1))
			.build()
			.expect("Failed to build file-store test credential.");

		(user, credential)
	}

	#[test]
	fn save_and_reload_round_trip() {
		let path = temp_path();
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let (user, credential) = fixture();
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");

		rt.block_on(store.save(&user, credential.clone()))
			.expect("Failed to save fixture credential to file store.");
		rt.block_on(
			store.put_pending(
				&user,
				PendingAuthorization::generate("/", OffsetDateTime::now_utc())
			),
		)
		.expect("Failed to save pending authorization to file store.");
		drop(store);

		let reopened = FileStore::open(&path).expect("Failed to reopen file store snapshot.");
		let fetched = rt
			.block_on(reopened.load(&user))
			.expect("Failed to load fixture credential from file store.")
			.expect("File store lost credential after reopen.");

		assert_eq!(fetched.access_token.expose(), credential.access_token.expose());
		assert_eq!(fetched.expires_at, credential.expires_at);
		assert!(
			rt.block_on(reopened.take_pending(&user))
				.expect("Failed to take pending authorization.")
				.is_some()
		);

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}

	#[test]
	fn purge_drops_empty_rows_from_disk() {
		let path = temp_path();
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let (user, credential) = fixture();
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");

		rt.block_on(store.save(&user, credential)).expect("Failed to save fixture credential.");
		rt.block_on(store.purge(&user)).expect("Failed to purge fixture credential.");

		let raw = fs::read_to_string(&path).expect("Snapshot should exist after mutations.");

		assert!(!raw.contains("user-demo"), "Purged rows must not linger on disk: {raw}");

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}
}
