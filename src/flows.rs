//! Per-user OAuth credential lifecycle: connect, refresh, disconnect, status.
//!
//! Each user moves through `Disconnected → Pending → Connected ⇄ Refreshing` and back to
//! `Disconnected` on revocation, explicit disconnect, or a provider-confirmed refresh
//! rejection. Refreshes for one user are serialized through a per-user async guard, so
//! concurrent callers never redeem the same refresh token twice.

pub mod authorize;
pub mod common;
pub mod refresh;

pub use authorize::*;
pub use common::*;
pub use refresh::*;

// self
use crate::{
	_prelude::*,
	auth::{OAuthCredential, TenantId, UserId},
	config::ClientConfig,
	http::ProviderHttpClient,
	oauth::{OAuthFacade, TransportErrorMapper},
	obs::{self, FlowKind},
	provider::{ProviderDescriptor, ProviderStrategy},
	store::CredentialStore,
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper};

/// Token manager specialized for the crate's default reqwest transport stack.
#[cfg(feature = "reqwest")]
pub type ReqwestTokenManager = TokenManager<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Connection summary exposed to the host application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
	/// `true` while a credential is stored for the user.
	pub authenticated: bool,
	/// Selected tenant.
	pub tenant_id: Option<TenantId>,
	/// Human-facing site URL of the tenant.
	pub site_url: Option<Url>,
	/// Access token expiry.
	pub expires_at: Option<OffsetDateTime>,
}
impl ConnectionStatus {
	/// Status for a user without a credential.
	pub fn disconnected() -> Self {
		Self { authenticated: false, tenant_id: None, site_url: None, expires_at: None }
	}
}
impl From<&OAuthCredential> for ConnectionStatus {
	fn from(credential: &OAuthCredential) -> Self {
		Self {
			authenticated: true,
			tenant_id: Some(credential.tenant_id.clone()),
			site_url: credential.site_url.clone(),
			expires_at: credential.expires_at,
		}
	}
}

/// Coordinates the OAuth lifecycle against a single provider descriptor.
///
/// The manager owns the transport, store, descriptor, strategy, and client configuration
/// so the individual flows only carry grant-specific logic.
#[derive(Clone)]
pub struct TokenManager<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// HTTP client wrapper used for every outbound provider request.
	pub http_client: Arc<C>,
	/// Mapper applied to transport-layer errors before surfacing them to callers.
	pub transport_mapper: Arc<M>,
	/// Credential store implementation.
	pub store: Arc<dyn CredentialStore>,
	/// Provider descriptor that defines OAuth endpoints and quirks.
	pub descriptor: ProviderDescriptor,
	/// Strategy responsible for provider-specific token request adjustments.
	pub strategy: Arc<dyn ProviderStrategy>,
	/// OAuth client registration.
	pub config: ClientConfig,
	/// Window before expiry inside which access tokens are renewed ahead of use.
	pub preemptive_window: Duration,
	/// Shared metrics recorder for refresh flow outcomes.
	pub refresh_metrics: Arc<RefreshMetrics>,
	flow_guards: Arc<Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>>,
}
impl<C, M> TokenManager<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a manager that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		store: Arc<dyn CredentialStore>,
		descriptor: ProviderDescriptor,
		strategy: Arc<dyn ProviderStrategy>,
		config: ClientConfig,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			http_client: http_client.into(),
			transport_mapper: mapper.into(),
			store,
			descriptor,
			strategy,
			config,
			preemptive_window: DEFAULT_PREEMPTIVE_WINDOW,
			refresh_metrics: Default::default(),
			flow_guards: Default::default(),
		}
	}

	/// Overrides the preemptive refresh window (defaults to 60 seconds).
	pub fn with_preemptive_window(mut self, window: Duration) -> Self {
		self.preemptive_window = if window.is_negative() { Duration::ZERO } else { window };

		self
	}

	/// Summarizes the stored credential for `user`.
	pub async fn status_for(&self, user: &UserId) -> Result<ConnectionStatus> {
		let credential = self.store.load(user).await?;

		Ok(credential
			.as_ref()
			.map(ConnectionStatus::from)
			.unwrap_or_else(ConnectionStatus::disconnected))
	}

	/// Forgets everything stored for `user`; calling it twice is harmless.
	pub async fn disconnect(&self, user: &UserId) -> Result<()> {
		obs::observe(FlowKind::Authorize, "disconnect", async move {
			{
				let guard = common::flow_guard(self, user);
				let _singleflight = guard.lock().await;

				self.store.purge(user).await?;
				self.store.take_pending(user).await?;
			}

			common::release_flow_guard(self, user);
			obs_event!(info, "Disconnected user from the issue tracker.");

			Ok(())
		})
		.await
	}

	pub(crate) fn facade(&self) -> OAuthFacade<'_, C, M> {
		OAuthFacade {
			http_client: self.http_client.as_ref(),
			error_mapper: self.transport_mapper.as_ref(),
			descriptor: &self.descriptor,
			strategy: self.strategy.as_ref(),
			config: &self.config,
		}
	}
}
#[cfg(feature = "reqwest")]
impl TokenManager<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a manager that provisions its own reqwest-backed transport.
	pub fn new(
		store: Arc<dyn CredentialStore>,
		descriptor: ProviderDescriptor,
		strategy: Arc<dyn ProviderStrategy>,
		config: ClientConfig,
	) -> Self {
		Self::with_http_client(
			store,
			descriptor,
			strategy,
			config,
			ReqwestHttpClient::default(),
			Arc::new(ReqwestTransportErrorMapper),
		)
	}
}
impl<C, M> Debug for TokenManager<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenManager")
			.field("descriptor", &self.descriptor.id)
			.field("config", &self.config)
			.field("preemptive_window", &self.preemptive_window)
			.finish()
	}
}
