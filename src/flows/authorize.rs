//! Authorization Code handshake: redirect, callback validation, exchange, tenant binding.

// self
use crate::{
	_prelude::*,
	auth::{OAuthCredential, PendingAuthorization, UserId},
	error::ConfigError,
	flows::{ConnectionStatus, TokenManager},
	http::ProviderHttpClient,
	oauth::TransportErrorMapper,
	obs::{self, FlowKind},
};

/// Redirect instructions returned by [`TokenManager::begin_authorization`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationRequest {
	/// Anti-forgery value the provider echoes back.
	pub state: String,
	/// Provider URL the user agent must be sent to.
	pub authorize_url: Url,
	/// Local path the user returns to after the callback.
	pub return_to: String,
}

/// Result of a successful [`TokenManager::complete_authorization`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationOutcome {
	/// Connection summary after the credential was stored.
	pub status: ConnectionStatus,
	/// Local path recorded when the redirect was issued.
	pub return_to: String,
}

impl<C, M> TokenManager<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Starts the connect handshake, replacing any previous pending authorization.
	///
	/// `return_to` must be a local absolute path; anything else falls back to `/`.
	pub async fn begin_authorization(
		&self,
		user: &UserId,
		return_to: &str,
	) -> Result<AuthorizationRequest> {
		obs::observe(FlowKind::Authorize, "begin_authorization", async move {
			let pending = PendingAuthorization::generate(return_to, OffsetDateTime::now_utc());
			let authorize_url = self.facade().authorize_url(&pending.state);
			let request = AuthorizationRequest {
				state: pending.state.clone(),
				authorize_url,
				return_to: pending.return_to.clone(),
			};

			self.store.put_pending(user, pending).await?;

			Ok(request)
		})
		.await
	}

	/// Completes the handshake with the `code` and `state` delivered to the callback.
	///
	/// The pending authorization is consumed on every path. A missing, mismatched, or
	/// expired record fails with [`Error::InvalidState`] before the provider is contacted.
	pub async fn complete_authorization(
		&self,
		user: &UserId,
		code: &str,
		state: &str,
	) -> Result<AuthorizationOutcome> {
		obs::observe(FlowKind::Authorize, "complete_authorization", async move {
			let pending = self.store.take_pending(user).await?.ok_or(Error::InvalidState)?;

			if !pending.matches_state(state) || pending.is_expired_at(OffsetDateTime::now_utc()) {
				obs_event!(warn, "Rejected authorization callback with stale or forged state.");

				return Err(Error::InvalidState);
			}

			let facade = self.facade();
			let grant = facade.exchange_code(code).await?;
			let resources = facade.accessible_resources(&grant.access_token).await.map_err(
				|err| Error::TokenExchangeFailed {
					status: None,
					reason: format!("Tenant discovery failed: {err}"),
				},
			)?;
			let previous = self.store.load(user).await?.map(|credential| credential.tenant_id);
			let resource = self
				.strategy
				.select_resource(&resources, previous.as_ref())
				.ok_or_else(|| Error::TokenExchangeFailed {
					status: None,
					reason: "The grant does not reach any site".into(),
				})?;
			let mut builder = OAuthCredential::builder()
				.access_token(grant.access_token.expose())
				.maybe_refresh_token(grant.refresh_token)
				.tenant_id(resource.id.clone())
				.issued_at(grant.issued_at);

			if let Some(site_url) = resource.url.clone() {
				builder = builder.site_url(site_url);
			}
			if let Some(expires_in) = grant.expires_in {
				builder = builder.expires_in(expires_in);
			}

			let credential = builder.build().map_err(ConfigError::from)?;
			let status = ConnectionStatus::from(&credential);

			self.store.save(user, credential).await?;
			obs_event!(info, tenant = %resource.id, "Connected user to the issue tracker.");

			Ok(AuthorizationOutcome { status, return_to: pending.return_to })
		})
		.await
	}
}
