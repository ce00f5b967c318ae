//! Sealed-cookie [`CredentialStore`] for hosts that keep credentials client-side.
//!
//! Each value is serialized to JSON, encrypted with AES-256-GCM under a key derived from
//! the host secret (SHA-256), and encoded as URL-safe base64 of `nonce || ciphertext`. The
//! cookie name is bound as associated data, so a sealed state cookie cannot be replayed as
//! a credential cookie. Values that fail to open are treated as absent.

// crates.io
use aes_gcm::{
	Aes256Gcm, Nonce,
	aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::{OAuthCredential, PENDING_AUTHORIZATION_TTL, PendingAuthorization, UserId},
	store::{CompareAndSwapOutcome, CredentialStore, StoreError, StoreFuture, StoredRow},
};

/// Cookie carrying the sealed credential.
pub const CREDENTIAL_COOKIE: &str = "tracker_credential";
/// Cookie carrying the sealed pending authorization.
pub const STATE_COOKIE: &str = "tracker_oauth_state";

const NONCE_LEN: usize = 12;

/// Cookie collaborator bound to the host's request/response cycle.
pub trait CookieJar
where
	Self: Send + Sync,
{
	/// Reads a cookie value for `user`.
	fn get(&self, user: &UserId, name: &str) -> Option<String>;

	/// Writes a cookie value for `user`; `max_age` of `None` means a session cookie.
	fn set(&self, user: &UserId, name: &str, value: String, max_age: Option<Duration>);

	/// Deletes a cookie for `user`.
	fn remove(&self, user: &UserId, name: &str);
}

/// In-process [`CookieJar`] used in tests and demos.
#[derive(Clone, Debug, Default)]
pub struct MemoryCookieJar(Arc<RwLock<HashMap<(UserId, String), String>>>);
impl MemoryCookieJar {
	/// Raw sealed value currently held for `name`.
	pub fn raw(&self, user: &UserId, name: &str) -> Option<String> {
		self.get(user, name)
	}

	/// Overwrites a raw value, bypassing sealing.
	pub fn insert_raw(&self, user: &UserId, name: &str, value: impl Into<String>) {
		self.0.write().insert((user.clone(), name.to_owned()), value.into());
	}
}
impl CookieJar for MemoryCookieJar {
	fn get(&self, user: &UserId, name: &str) -> Option<String> {
		self.0.read().get(&(user.clone(), name.to_owned())).cloned()
	}

	fn set(&self, user: &UserId, name: &str, value: String, _max_age: Option<Duration>) {
		self.insert_raw(user, name, value);
	}

	fn remove(&self, user: &UserId, name: &str) {
		self.0.write().remove(&(user.clone(), name.to_owned()));
	}
}

/// AES-256-GCM sealing for cookie values.
#[derive(Clone)]
pub struct CookieSealer {
	cipher: Aes256Gcm,
}
impl CookieSealer {
	/// Derives the sealing key from an arbitrary host secret.
	pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, StoreError> {
		let key = Sha256::digest(secret.as_ref());
		let cipher = Aes256Gcm::new_from_slice(&key).map_err(|e| StoreError::Backend {
			message: format!("Failed to initialize cookie cipher: {e}"),
		})?;

		Ok(Self { cipher })
	}

	/// Seals `plaintext` for the cookie called `name`.
	pub fn seal(&self, name: &str, plaintext: &[u8]) -> Result<String, StoreError> {
		let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
		let ciphertext = self
			.cipher
			.encrypt(&nonce, Payload { msg: plaintext, aad: name.as_bytes() })
			.map_err(|e| StoreError::Backend { message: format!("Failed to seal cookie: {e}") })?;
		let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());

		sealed.extend_from_slice(nonce.as_slice());
		sealed.extend_from_slice(&ciphertext);

		Ok(URL_SAFE_NO_PAD.encode(sealed))
	}

	/// Opens a sealed value; `None` when it was tampered with or sealed for another cookie.
	pub fn open(&self, name: &str, sealed: &str) -> Option<Vec<u8>> {
		let raw = URL_SAFE_NO_PAD.decode(sealed.trim()).ok()?;

		if raw.len() <= NONCE_LEN {
			return None;
		}

		let (nonce, ciphertext) = raw.split_at(NONCE_LEN);

		self.cipher
			.decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad: name.as_bytes() })
			.ok()
	}
}
impl Debug for CookieSealer {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("CookieSealer(..)")
	}
}

/// [`CredentialStore`] that keeps each user's row in two sealed cookies.
///
/// Compare-and-swap is serialized per store instance; concurrent requests carrying stale
/// cookies cannot be reconciled beyond that.
#[derive(Clone)]
pub struct CookieStore<J>
where
	J: CookieJar,
{
	jar: J,
	sealer: CookieSealer,
	write_lock: Arc<Mutex<()>>,
}
impl<J> CookieStore<J>
where
	J: CookieJar,
{
	/// Wraps `jar`, sealing values with a key derived from `secret`.
	pub fn new(jar: J, secret: impl AsRef<[u8]>) -> Result<Self, StoreError> {
		Ok(Self { jar, sealer: CookieSealer::new(secret)?, write_lock: Default::default() })
	}

	/// Borrow the underlying jar.
	pub fn jar(&self) -> &J {
		&self.jar
	}

	fn read<T>(&self, user: &UserId, name: &str) -> Option<T>
	where
		T: for<'de> Deserialize<'de>,
	{
		let sealed = self.jar.get(user, name)?;
		let Some(plaintext) = self.sealer.open(name, &sealed) else {
			obs_event!(warn, cookie = name, "Discarding cookie that failed to open.");

			self.jar.remove(user, name);

			return None;
		};

		match serde_json::from_slice(&plaintext) {
			Ok(value) => Some(value),
			Err(_e) => {
				obs_event!(warn, cookie = name, error = %_e, "Discarding malformed cookie.");

				self.jar.remove(user, name);

				None
			},
		}
	}

	fn write<T>(
		&self,
		user: &UserId,
		name: &str,
		value: &T,
		max_age: Option<Duration>,
	) -> Result<(), StoreError>
	where
		T: Serialize,
	{
		let plaintext = serde_json::to_vec(value).map_err(|e| StoreError::Serialization {
			message: format!("Failed to serialize {name} cookie: {e}"),
		})?;
		let sealed = self.sealer.seal(name, &plaintext)?;

		self.jar.set(user, name, sealed, max_age);

		Ok(())
	}

	fn load_row(&self, user: &UserId) -> StoredRow {
		StoredRow {
			credential: self.read(user, CREDENTIAL_COOKIE),
			pending: self.read(user, STATE_COOKIE),
		}
	}
}
impl<J> CredentialStore for CookieStore<J>
where
	J: CookieJar,
{
	fn load<'a>(&'a self, user: &'a UserId) -> StoreFuture<'a, Option<OAuthCredential>> {
		Box::pin(async move { Ok(self.read(user, CREDENTIAL_COOKIE)) })
	}

	fn save<'a>(&'a self, user: &'a UserId, credential: OAuthCredential) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let _guard = self.write_lock.lock();

			self.write(user, CREDENTIAL_COOKIE, &credential, None)
		})
	}

	fn compare_and_swap_refresh<'a>(
		&'a self,
		user: &'a UserId,
		expected_refresh: Option<&'a str>,
		replacement: OAuthCredential,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		Box::pin(async move {
			let _guard = self.write_lock.lock();
			let mut row = self.load_row(user);
			let outcome = row.swap_refresh(expected_refresh, replacement);

			if let (CompareAndSwapOutcome::Updated, Some(credential)) = (outcome, &row.credential)
			{
				self.write(user, CREDENTIAL_COOKIE, credential, None)?;
			}

			Ok(outcome)
		})
	}

	fn purge<'a>(&'a self, user: &'a UserId) -> StoreFuture<'a, Option<OAuthCredential>> {
		Box::pin(async move {
			let _guard = self.write_lock.lock();
			let existing = self.read(user, CREDENTIAL_COOKIE);

			self.jar.remove(user, CREDENTIAL_COOKIE);

			Ok(existing)
		})
	}

	fn put_pending<'a>(
		&'a self,
		user: &'a UserId,
		pending: PendingAuthorization,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.write(user, STATE_COOKIE, &pending, Some(PENDING_AUTHORIZATION_TTL))
		})
	}

	fn take_pending<'a>(
		&'a self,
		user: &'a UserId,
	) -> StoreFuture<'a, Option<PendingAuthorization>> {
		Box::pin(async move {
			let pending = self.read(user, STATE_COOKIE);

			self.jar.remove(user, STATE_COOKIE);

			Ok(pending)
		})
	}
}
impl<J> Debug for CookieStore<J>
where
	J: CookieJar,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CookieStore").field("sealer", &self.sealer).finish_non_exhaustive()
	}
}
