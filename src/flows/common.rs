//! Shared helpers for flow implementations (bearer handles, singleflight guards).

// self
use crate::{
	_prelude::*,
	auth::{OAuthCredential, TenantId, TokenSecret, UserId},
	flows::TokenManager,
	http::ProviderHttpClient,
	oauth::TransportErrorMapper,
};

/// Window before expiry inside which access tokens are renewed ahead of use.
pub const DEFAULT_PREEMPTIVE_WINDOW: Duration = Duration::seconds(60);

/// Access token plus the tenant it is scoped to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bearer {
	/// Access token to place in the `Authorization` header.
	pub token: TokenSecret,
	/// Tenant every call made with this token is routed to.
	pub tenant_id: TenantId,
	/// Human-facing base URL of the tenant.
	pub site_url: Option<Url>,
}
impl Bearer {
	/// `Authorization` header value.
	pub fn header_value(&self) -> String {
		format!("Bearer {}", self.token.expose())
	}
}
impl From<&OAuthCredential> for Bearer {
	fn from(credential: &OAuthCredential) -> Self {
		Self {
			token: credential.access_token.clone(),
			tenant_id: credential.tenant_id.clone(),
			site_url: credential.site_url.clone(),
		}
	}
}

/// Returns (and creates on demand) the singleflight guard for a user.
pub(crate) fn flow_guard<C, M>(manager: &TokenManager<C, M>, user: &UserId) -> Arc<AsyncMutex<()>>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let mut guards = manager.flow_guards.lock();

	guards.entry(user.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
}

/// Drops the user's guard when no other task holds a handle to it.
pub(crate) fn release_flow_guard<C, M>(manager: &TokenManager<C, M>, user: &UserId)
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let mut guards = manager.flow_guards.lock();

	if guards.get(user).is_some_and(|guard| Arc::strong_count(guard) == 1) {
		guards.remove(user);
	}
}
