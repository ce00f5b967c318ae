//! Per-user OAuth credential, lifecycle helpers, and builder.

// self
use crate::{
	_prelude::*,
	auth::{TenantId, token::secret::TokenSecret},
};

/// Lifecycle status for a stored credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialStatus {
	/// Access token is usable.
	Active,
	/// Access token expired but a refresh token can renew it.
	Renewable,
	/// Access token expired and nothing can renew it; re-authorization required.
	Dead,
}

/// Errors produced by [`OAuthCredentialBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum CredentialBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when no tenant was selected.
	#[error("Tenant identifier is required.")]
	MissingTenant,
}

/// One user's delegated grant to the external tracker.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthCredential {
	/// Bearer secret; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Long-lived refresh secret, if the provider issued one.
	pub refresh_token: Option<TokenSecret>,
	/// External site/workspace every API call is routed to.
	pub tenant_id: TenantId,
	/// Human-facing base URL of the tenant.
	pub site_url: Option<Url>,
	/// Instant the access token was issued.
	pub issued_at: OffsetDateTime,
	/// Expiry derived from the provider's `expires_in`, when reported.
	pub expires_at: Option<OffsetDateTime>,
}
impl OAuthCredential {
	/// Returns a builder for constructing credentials.
	pub fn builder() -> OAuthCredentialBuilder {
		OAuthCredentialBuilder::default()
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> CredentialStatus {
		if !self.is_expired_at(instant) {
			return CredentialStatus::Active;
		}
		if self.refresh_token.is_some() {
			CredentialStatus::Renewable
		} else {
			CredentialStatus::Dead
		}
	}

	/// Returns `true` if the access token has expired at the provided instant.
	///
	/// Credentials without a reported expiry are treated as valid until the provider
	/// rejects them.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		self.expires_at.is_some_and(|expires_at| instant >= expires_at)
	}

	/// Returns `true` if the access token expires within `window` of `instant`.
	pub fn expires_within(&self, instant: OffsetDateTime, window: Duration) -> bool {
		self.expires_at.is_some_and(|expires_at| expires_at - instant <= window)
	}

	/// Applies a refresh response: rotates the access token, keeps the old refresh token
	/// when the provider omitted a new one, and preserves tenant/site selection.
	pub fn rotated(
		&self,
		access_token: TokenSecret,
		refresh_token: Option<TokenSecret>,
		issued_at: OffsetDateTime,
		expires_in: Option<Duration>,
	) -> Self {
		Self {
			access_token,
			refresh_token: refresh_token.or_else(|| self.refresh_token.clone()),
			tenant_id: self.tenant_id.clone(),
			site_url: self.site_url.clone(),
			issued_at,
			expires_at: expires_in.map(|delta| issued_at + delta),
		}
	}
}
impl Debug for OAuthCredential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuthCredential")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("tenant_id", &self.tenant_id)
			.field("site_url", &self.site_url)
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Builder for [`OAuthCredential`].
#[derive(Clone, Debug, Default)]
pub struct OAuthCredentialBuilder {
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	tenant_id: Option<TenantId>,
	site_url: Option<Url>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl OAuthCredentialBuilder {
	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides an optional refresh token value.
	pub fn maybe_refresh_token(mut self, token: Option<TokenSecret>) -> Self {
		self.refresh_token = token;

		self
	}

	/// Sets the selected tenant.
	pub fn tenant_id(mut self, tenant: TenantId) -> Self {
		self.tenant_id = Some(tenant);

		self
	}

	/// Sets the human-facing site URL.
	pub fn site_url(mut self, url: Url) -> Self {
		self.site_url = Some(url);

		self
	}

	/// Sets the issued-at instant (defaults to now).
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Consumes the builder and produces an [`OAuthCredential`].
	pub fn build(self) -> Result<OAuthCredential, CredentialBuilderError> {
		let access_token = self.access_token.ok_or(CredentialBuilderError::MissingAccessToken)?;
		let tenant_id = self.tenant_id.ok_or(CredentialBuilderError::MissingTenant)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = self.expires_at.or_else(|| self.expires_in.map(|delta| issued_at + delta));

		Ok(OAuthCredential {
			access_token,
			refresh_token: self.refresh_token,
			tenant_id,
			site_url: self.site_url,
			issued_at,
			expires_at,
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn tenant() -> TenantId {
		TenantId::new("cloud-1").expect("Tenant fixture should be valid.")
	}

	#[test]
	fn builder_requires_access_token_and_tenant() {
		assert_eq!(
			OAuthCredential::builder().tenant_id(tenant()).build().map(|_| ()),
			Err(CredentialBuilderError::MissingAccessToken)
		);
		assert_eq!(
			OAuthCredential::builder().access_token("a").build().map(|_| ()),
			Err(CredentialBuilderError::MissingTenant)
		);
	}

	#[test]
	fn status_distinguishes_renewable_from_dead() {
		let issued = macros::datetime!(2025-01-01 00:00 UTC);
		let renewable = OAuthCredential::builder()
			.access_token("access")
			.refresh_token("refresh")
			.tenant_id(tenant())
			.issued_at(issued)
			.expires_in(Duration::hours(1))
			.build()
			.expect("Credential fixture should build.");

		assert_eq!(renewable.expires_at, Some(macros::datetime!(2025-01-01 01:00 UTC)));
		assert_eq!(
			renewable.status_at(macros::datetime!(2025-01-01 00:30 UTC)),
			CredentialStatus::Active
		);
		assert_eq!(
			renewable.status_at(macros::datetime!(2025-01-01 01:00 UTC)),
			CredentialStatus::Renewable
		);

		let dead = OAuthCredential { refresh_token: None, ..renewable };

		assert_eq!(dead.status_at(macros::datetime!(2025-01-02 00:00 UTC)), CredentialStatus::Dead);
	}

	#[test]
	fn missing_expiry_never_expires_locally() {
		let credential = OAuthCredential::builder()
			.access_token("access")
			.tenant_id(tenant())
			.build()
			.expect("Credential fixture should build.");

		assert!(!credential.is_expired_at(OffsetDateTime::now_utc() + Duration::days(365)));
		assert!(!credential.expires_within(OffsetDateTime::now_utc(), Duration::hours(1)));
	}

	#[test]
	fn rotation_keeps_refresh_token_when_omitted() {
		let issued = macros::datetime!(2025-01-01 00:00 UTC);
		let original = OAuthCredential::builder()
			.access_token("old-access")
			.refresh_token("old-refresh")
			.tenant_id(tenant())
			.site_url(Url::parse("https://acme.example.net").expect("URL fixture should parse."))
			.issued_at(issued)
			.expires_in(Duration::minutes(5))
			.build()
			.expect("Credential fixture should build.");
		let rotated = original.rotated(
			TokenSecret::new("new-access"),
			None,
			issued + Duration::minutes(10),
			Some(Duration::hours(1)),
		);

		assert!(rotated.access_token.matches("new-access"));
		assert_eq!(rotated.refresh_token.as_ref().map(TokenSecret::expose), Some("old-refresh"));
		assert_eq!(rotated.tenant_id, original.tenant_id);
		assert_eq!(rotated.site_url, original.site_url);
		assert_eq!(rotated.expires_at, Some(macros::datetime!(2025-01-01 01:10 UTC)));

		let rotated_twice = rotated.rotated(
			TokenSecret::new("newer-access"),
			Some(TokenSecret::new("new-refresh")),
			issued,
			None,
		);

		assert_eq!(
			rotated_twice.refresh_token.as_ref().map(TokenSecret::expose),
			Some("new-refresh")
		);
		assert_eq!(rotated_twice.expires_at, None);
	}

	#[test]
	fn debug_output_redacts_secrets() {
		let credential = OAuthCredential::builder()
			.access_token("very-secret")
			.refresh_token("also-secret")
			.tenant_id(tenant())
			.build()
			.expect("Credential fixture should build.");
		let rendered = format!("{credential:?}");

		assert!(!rendered.contains("very-secret"));
		assert!(!rendered.contains("also-secret"));
	}
}
