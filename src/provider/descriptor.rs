//! Provider descriptor data structures and helpers shared by all flows.
//!
//! The module exposes validated metadata, supporting builder utilities, and
//! grant-specific helpers so trackers can describe their endpoints in a
//! transport-agnostic way.

/// Builder API for assembling provider descriptors.
pub mod builder;
/// Grant helpers wired into provider descriptors.
pub mod grant;
/// Provider-specific quirk toggles.
pub mod quirks;

pub use builder::*;
pub use grant::*;
pub use quirks::*;

// self
use crate::{
	_prelude::*,
	auth::{ProviderId, TenantId},
};

/// Placeholder substituted with the tenant identifier in [`ProviderEndpoints::api_base`].
pub const TENANT_PLACEHOLDER: &str = "{tenant}";

/// Client authentication modes for token endpoint calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
	/// `client_id`/`client_secret` sent inside the request body.
	#[default]
	ClientSecretPost,
	/// HTTP Basic with `client_id`/`client_secret`.
	ClientSecretBasic,
}

/// Endpoint set declared by a provider descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
	/// Authorization endpoint the user is redirected to.
	pub authorization: Url,
	/// Token endpoint used for exchanges and refreshes.
	pub token: Url,
	/// Tenant discovery endpoint listing the sites a token may reach.
	pub resources: Url,
	/// REST API base template; contains [`TENANT_PLACEHOLDER`].
	pub api_base: String,
}

/// Immutable provider descriptor consumed by flows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Descriptor identifier.
	pub id: ProviderId,
	/// Endpoint definitions exposed by the provider.
	pub endpoints: ProviderEndpoints,
	/// Supported grant flags.
	pub supported_grants: SupportedGrants,
	/// Preferred client authentication mechanism.
	pub preferred_client_auth_method: ClientAuthMethod,
	/// Provider-specific quirks.
	pub quirks: ProviderQuirks,
}
impl ProviderDescriptor {
	/// Creates a new builder for the provided identifier.
	pub fn builder(id: ProviderId) -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::new(id)
	}

	/// Atlassian Cloud (Jira) preset.
	pub fn atlassian() -> Result<Self, ProviderDescriptorError> {
		Self::builder(ProviderId::new("atlassian")?)
			.authorization_endpoint(parse_endpoint(
				"authorization",
				"https://auth.atlassian.com/authorize",
			)?)
			.token_endpoint(parse_endpoint("token", "https://auth.atlassian.com/oauth/token")?)
			.resources_endpoint(parse_endpoint(
				"resources",
				"https://api.atlassian.com/oauth/token/accessible-resources",
			)?)
			.api_base("https://api.atlassian.com/ex/jira/{tenant}/rest/api/3/")
			.quirks(ProviderQuirks {
				audience: Some("api.atlassian.com".into()),
				..ProviderQuirks::default()
			})
			.build()
	}

	/// Checks whether the descriptor supports a given grant.
	pub fn supports(&self, grant: GrantType) -> bool {
		self.supported_grants.supports(grant)
	}

	/// Resolves the API base URL for a tenant.
	///
	/// The result always ends in `/` so relative paths join beneath it.
	pub fn api_base_for(&self, tenant: &TenantId) -> Result<Url, url::ParseError> {
		let mut resolved = self.endpoints.api_base.replace(TENANT_PLACEHOLDER, tenant.as_ref());

		if !resolved.ends_with('/') {
			resolved.push('/');
		}

		Url::parse(&resolved)
	}
}

fn parse_endpoint(endpoint: &'static str, raw: &str) -> Result<Url, ProviderDescriptorError> {
	Url::parse(raw).map_err(|_| ProviderDescriptorError::InvalidUrl { endpoint, url: raw.into() })
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn atlassian_preset_resolves_tenant_scoped_base() {
		let descriptor = ProviderDescriptor::atlassian().expect("Preset should validate.");
		let tenant = TenantId::new("11223344-aaaa").expect("Tenant fixture should be valid.");
		let base = descriptor.api_base_for(&tenant).expect("API base should resolve.");

		assert_eq!(base.as_str(), "https://api.atlassian.com/ex/jira/11223344-aaaa/rest/api/3/");
		assert_eq!(
			base.join("search").expect("Join should succeed.").as_str(),
			"https://api.atlassian.com/ex/jira/11223344-aaaa/rest/api/3/search"
		);
		assert_eq!(descriptor.quirks.audience.as_deref(), Some("api.atlassian.com"));
		assert!(descriptor.supports(GrantType::RefreshToken));
	}

	fn local(path: &str) -> Url {
		Url::parse(&format!("http://127.0.0.1:9000/{path}")).expect("URL fixture should parse.")
	}

	#[test]
	fn api_base_gains_trailing_slash() {
		let descriptor = ProviderDescriptor::builder(
			ProviderId::new("local").expect("Provider fixture should be valid."),
		)
		.authorization_endpoint(local("authorize"))
		.token_endpoint(local("token"))
		.resources_endpoint(local("resources"))
		.api_base("http://127.0.0.1:9000/ex/{tenant}")
		.build()
		.expect("Loopback descriptor should validate.");
		let tenant = TenantId::new("t1").expect("Tenant fixture should be valid.");

		assert_eq!(
			descriptor.api_base_for(&tenant).expect("API base should resolve.").as_str(),
			"http://127.0.0.1:9000/ex/t1/"
		);
	}
}
