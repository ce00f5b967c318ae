//! Refresh orchestration with per-user singleflight guards, CAS rotation, and metrics.
//!
//! Every path that may redeem a refresh token runs under the user's guard and re-reads
//! the store after acquiring it, so a caller that waited on a concurrent refresh reuses
//! that result instead of calling the provider again. Successful refreshes are written
//! back with [`CredentialStore::compare_and_swap_refresh`]; provider-confirmed rejections
//! purge the credential.

mod metrics;

pub use metrics::RefreshMetrics;

// self
use crate::{
	_prelude::*,
	auth::{OAuthCredential, TokenSecret, UserId},
	flows::{Bearer, ConnectionStatus, TokenManager, common},
	http::ProviderHttpClient,
	oauth::TransportErrorMapper,
	obs::{self, FlowKind},
	provider::GrantType,
	store::{CompareAndSwapOutcome, CredentialStore},
};

impl<C, M> TokenManager<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Returns a usable bearer for `user`, refreshing first when the access token expires
	/// within [`TokenManager::preemptive_window`].
	pub async fn access_token(&self, user: &UserId) -> Result<Bearer> {
		let credential = self.store.load(user).await?.ok_or(Error::NotAuthenticated)?;

		if !credential.expires_within(OffsetDateTime::now_utc(), self.preemptive_window) {
			return Ok(Bearer::from(&credential));
		}

		obs::observe(FlowKind::Refresh, "access_token", async move {
			self.with_guard(user, async {
				let now = OffsetDateTime::now_utc();
				let current = self.load_or_unauthenticated(user).await?;

				if !current.expires_within(now, self.preemptive_window) {
					return Ok(Bearer::from(&current));
				}
				if current.refresh_token.is_none() || !self.refresh_supported() {
					if current.is_expired_at(now) {
						return Err(self.purge_unrenewable(user).await);
					}

					return Ok(Bearer::from(&current));
				}

				match self.refresh_locked(user, &current).await {
					Ok(updated) => Ok(Bearer::from(&updated)),
					Err(err) if err.is_retryable() && !current.is_expired_at(now) => {
						obs_event!(
							warn,
							error = %err,
							"Preemptive refresh failed; reusing the still-valid access token."
						);

						Ok(Bearer::from(&current))
					},
					Err(err) => Err(err),
				}
			})
			.await
		})
		.await
	}

	/// Forces a refresh for `user`.
	///
	/// Fails with [`Error::NotAuthenticated`] when nothing is stored and
	/// [`Error::NoRefreshToken`] when the credential cannot self-renew.
	pub async fn refresh(&self, user: &UserId) -> Result<ConnectionStatus> {
		obs::observe(FlowKind::Refresh, "refresh", async move {
			self.with_guard(user, async {
				let current = self.load_or_unauthenticated(user).await?;

				if current.refresh_token.is_none() || !self.refresh_supported() {
					return Err(Error::NoRefreshToken);
				}

				let updated = self.refresh_locked(user, &current).await?;

				Ok(ConnectionStatus::from(&updated))
			})
			.await
		})
		.await
	}

	/// Renews the credential after the tracker answered 401 to `rejected`.
	///
	/// When another caller already rotated the access token, the stored one is returned
	/// without contacting the provider.
	pub async fn refresh_after_rejection(
		&self,
		user: &UserId,
		rejected: &TokenSecret,
	) -> Result<Bearer> {
		obs::observe(FlowKind::Refresh, "refresh_after_rejection", async move {
			self.with_guard(user, async {
				let current = self.load_or_unauthenticated(user).await?;

				if !current.access_token.matches(rejected.expose()) {
					return Ok(Bearer::from(&current));
				}
				if current.refresh_token.is_none() || !self.refresh_supported() {
					return Err(self.purge_unrenewable(user).await);
				}

				let updated = self.refresh_locked(user, &current).await?;

				Ok(Bearer::from(&updated))
			})
			.await
		})
		.await
	}

	/// Redeems the refresh token of `current`; callers must hold the user's guard.
	async fn refresh_locked(
		&self,
		user: &UserId,
		current: &OAuthCredential,
	) -> Result<OAuthCredential> {
		let expected_refresh = current.refresh_token.as_ref().ok_or(Error::NoRefreshToken)?;

		self.refresh_metrics.record_attempt();

		let grant = match self.facade().refresh(expected_refresh).await {
			Ok(grant) => grant,
			Err(err) => {
				self.refresh_metrics.record_failure();

				if matches!(err, Error::RefreshFailed { .. }) {
					obs_event!(warn, error = %err, "Provider rejected the refresh token; purging.");

					self.store.purge(user).await?;
				}

				return Err(err);
			},
		};
		let updated = current.rotated(
			grant.access_token,
			grant.refresh_token,
			grant.issued_at,
			grant.expires_in,
		);
		let outcome = self
			.store
			.compare_and_swap_refresh(user, Some(expected_refresh.expose()), updated.clone())
			.await
			.inspect_err(|_| self.refresh_metrics.record_failure())?;
		let result = match outcome {
			CompareAndSwapOutcome::Updated => updated,
			CompareAndSwapOutcome::RefreshMismatch => self
				.store
				.load(user)
				.await
				.inspect_err(|_| self.refresh_metrics.record_failure())?
				.unwrap_or(updated),
			CompareAndSwapOutcome::Missing => {
				self.refresh_metrics.record_failure();

				return Err(Error::NotAuthenticated);
			},
		};

		self.refresh_metrics.record_success();

		Ok(result)
	}

	async fn with_guard<T, F>(&self, user: &UserId, fut: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		let guard = common::flow_guard(self, user);
		let result = {
			let _singleflight = guard.lock().await;

			fut.await
		};

		drop(guard);
		common::release_flow_guard(self, user);

		result
	}

	async fn load_or_unauthenticated(&self, user: &UserId) -> Result<OAuthCredential> {
		self.store.load(user).await?.ok_or(Error::NotAuthenticated)
	}

	/// Purges a credential that expired without a way to renew it.
	async fn purge_unrenewable(&self, user: &UserId) -> Error {
		match self.store.purge(user).await {
			Ok(_) => {
				obs_event!(info, "Purged an expired credential without refresh token.");

				Error::NotAuthenticated
			},
			Err(err) => err.into(),
		}
	}

	fn refresh_supported(&self) -> bool {
		self.descriptor.supports(GrantType::RefreshToken)
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;
	use crate::{_preludet::*, auth::TenantId, store::MemoryStore};

	async fn seed(store: &MemoryStore, user: &UserId, refresh: Option<&str>, expires_in: Duration) {
		let credential = OAuthCredential::builder()
			.access_token("old-access")
			.maybe_refresh_token(refresh.map(TokenSecret::new))
			.tenant_id(TenantId::new("tenant-1").expect("Tenant fixture should be valid."))
			.issued_at(OffsetDateTime::now_utc())
			.expires_in(expires_in)
			.build()
			.expect("Credential fixture should build.");

		store.save(user, credential).await.expect("Seeding the credential should succeed.");
	}

	#[tokio::test]
	async fn forced_refresh_rotates_both_tokens() {
		let http = ScriptedHttpClient::default();
		let (manager, store) = build_scripted_manager(http.clone());
		let user = user("u-1");

		seed(&store, &user, Some("old-refresh"), Duration::hours(1)).await;
		http.push_json(
			200,
			json!({
				"access_token": "new-access",
				"refresh_token": "new-refresh",
				"expires_in": 3600,
			}),
		);

		let status = manager.refresh(&user).await.expect("Refresh should succeed.");
		let stored = store
			.load(&user)
			.await
			.expect("Store read should succeed.")
			.expect("Credential should remain stored.");

		assert!(status.authenticated);
		assert!(stored.access_token.matches("new-access"));
		assert_eq!(stored.refresh_token.as_ref().map(TokenSecret::expose), Some("new-refresh"));
		assert_eq!(stored.tenant_id.as_ref(), "tenant-1");
		assert_eq!(manager.refresh_metrics.successes(), 1);

		let body = String::from_utf8(http.requests()[0].body.clone())
			.expect("Token request body should be UTF-8.");

		assert!(body.contains("\"grant_type\":\"refresh_token\""));
		assert!(body.contains("\"refresh_token\":\"old-refresh\""));
	}

	#[tokio::test]
	async fn rejected_refresh_token_purges_the_credential() {
		let http = ScriptedHttpClient::default();
		let (manager, store) = build_scripted_manager(http.clone());
		let user = user("u-1");

		seed(&store, &user, Some("revoked"), Duration::hours(1)).await;
		http.push_json(
			400,
			json!({ "error": "invalid_grant", "error_description": "Unknown refresh token." }),
		);

		let err = manager.refresh(&user).await.expect_err("Revoked refresh token must fail.");

		assert!(matches!(err, Error::RefreshFailed { .. }));
		assert!(!manager.status_for(&user).await.expect("Status should load.").authenticated);
		assert_eq!(manager.refresh_metrics.failures(), 1);
	}

	#[tokio::test]
	async fn transient_refresh_failure_keeps_the_credential() {
		let http = ScriptedHttpClient::default();
		let (manager, store) = build_scripted_manager(http.clone());
		let user = user("u-1");

		seed(&store, &user, Some("old-refresh"), Duration::hours(1)).await;
		http.push(503, "upstream busy");

		let err = manager.refresh(&user).await.expect_err("Outage must surface.");

		assert!(err.is_retryable());
		assert!(manager.status_for(&user).await.expect("Status should load.").authenticated);
	}

	#[tokio::test]
	async fn missing_credentials_and_refresh_tokens_are_distinguished() {
		let http = ScriptedHttpClient::default();
		let (manager, store) = build_scripted_manager(http.clone());
		let user = user("u-1");

		assert!(matches!(manager.refresh(&user).await, Err(Error::NotAuthenticated)));

		seed(&store, &user, None, Duration::hours(1)).await;

		assert!(matches!(manager.refresh(&user).await, Err(Error::NoRefreshToken)));
		assert_eq!(http.request_count(), 0);
	}

	#[tokio::test]
	async fn access_token_refreshes_inside_the_preemptive_window() {
		let http = ScriptedHttpClient::default();
		let (manager, store) = build_scripted_manager(http.clone());
		let user = user("u-1");

		seed(&store, &user, Some("old-refresh"), Duration::seconds(30)).await;
		http.push_json(200, json!({ "access_token": "new-access", "expires_in": 3600 }));

		let bearer = manager.access_token(&user).await.expect("Bearer should be issued.");

		assert!(bearer.token.matches("new-access"));
		assert_eq!(http.request_count(), 1);

		let again = manager.access_token(&user).await.expect("Bearer should be cached.");

		assert!(again.token.matches("new-access"));
		assert_eq!(http.request_count(), 1);
	}

	#[tokio::test]
	async fn expired_credential_without_refresh_token_is_purged() {
		let http = ScriptedHttpClient::default();
		let (manager, store) = build_scripted_manager(http.clone());
		let user = user("u-1");

		seed(&store, &user, None, Duration::seconds(-5)).await;

		assert!(matches!(manager.access_token(&user).await, Err(Error::NotAuthenticated)));
		assert!(store.load(&user).await.expect("Store read should succeed.").is_none());
	}

	#[tokio::test]
	async fn concurrent_callers_share_one_refresh() {
		let http = ScriptedHttpClient::default();
		let (manager, store) = build_scripted_manager(http.clone());
		let user = user("u-1");

		seed(&store, &user, Some("old-refresh"), Duration::seconds(-1)).await;
		http.push_json(200, json!({ "access_token": "new-access", "expires_in": 3600 }));

		let rejected = TokenSecret::new("old-access");
		let (first, second, third) = tokio::join!(
			manager.access_token(&user),
			manager.access_token(&user),
			manager.refresh_after_rejection(&user, &rejected),
		);

		for bearer in [first, second, third] {
			assert!(bearer.expect("Every caller should get a bearer.").token.matches("new-access"));
		}

		assert_eq!(http.request_count(), 1);
		assert_eq!(manager.refresh_metrics.attempts(), 1);
	}
}
