//! OAuth client configuration for the tracker integration.
//!
//! Values can be built in code, deserialized with `serde`, or pulled from the process
//! environment (`TRACKER_CLIENT_ID`, `TRACKER_CLIENT_SECRET`, `TRACKER_REDIRECT_URI`,
//! `TRACKER_SCOPES`).

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, ScopeValidationError, TokenSecret},
	error::ConfigError,
};

/// Environment variable holding the OAuth client identifier.
pub const ENV_CLIENT_ID: &str = "TRACKER_CLIENT_ID";
/// Environment variable holding the OAuth client secret.
pub const ENV_CLIENT_SECRET: &str = "TRACKER_CLIENT_SECRET";
/// Environment variable holding the registered callback URL.
pub const ENV_REDIRECT_URI: &str = "TRACKER_REDIRECT_URI";
/// Environment variable holding requested scopes (space or comma separated).
pub const ENV_SCOPES: &str = "TRACKER_SCOPES";

/// Scopes requested when none are configured.
pub const DEFAULT_SCOPES: [&str; 4] =
	["read:jira-work", "read:jira-user", "write:jira-work", "offline_access"];

/// OAuth client registration used by every grant.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
	/// OAuth 2.0 client identifier.
	pub client_id: String,
	/// Confidential client secret.
	pub client_secret: TokenSecret,
	/// Callback URL registered with the provider.
	pub redirect_uri: Url,
	/// Scopes requested during authorization.
	#[serde(default = "default_scopes")]
	pub scopes: ScopeSet,
}
impl ClientConfig {
	/// Creates a configuration requesting [`DEFAULT_SCOPES`].
	pub fn new(
		client_id: impl Into<String>,
		client_secret: impl Into<String>,
		redirect_uri: Url,
	) -> Self {
		Self {
			client_id: client_id.into(),
			client_secret: TokenSecret::new(client_secret),
			redirect_uri,
			scopes: default_scopes(),
		}
	}

	/// Replaces the requested scopes.
	pub fn with_scopes<I, S>(mut self, scopes: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.scopes = ScopeSet::new(scopes)?;

		Ok(self)
	}

	/// Loads the configuration from the process environment.
	///
	/// Missing or blank client credentials surface as [`Error::NotConfigured`].
	pub fn from_env() -> Result<Self> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Loads the configuration through an arbitrary key lookup.
	pub fn from_lookup<F>(lookup: F) -> Result<Self>
	where
		F: Fn(&str) -> Option<String>,
	{
		let required = |key: &'static str| {
			lookup(key)
				.map(|value| value.trim().to_owned())
				.filter(|value| !value.is_empty())
				.ok_or(Error::NotConfigured { missing: key })
		};
		let client_id = required(ENV_CLIENT_ID)?;
		let client_secret = required(ENV_CLIENT_SECRET)?;
		let redirect_uri = Url::parse(&required(ENV_REDIRECT_URI)?)
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let mut config = Self::new(client_id, client_secret, redirect_uri);

		if let Some(raw) = lookup(ENV_SCOPES).filter(|raw| !raw.trim().is_empty()) {
			config.scopes = ScopeSet::from_str(raw.trim()).map_err(ConfigError::from)?;
		}

		Ok(config)
	}
}
impl Debug for ClientConfig {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ClientConfig")
			.field("client_id", &self.client_id)
			.field("client_secret", &self.client_secret)
			.field("redirect_uri", &self.redirect_uri.as_str())
			.field("scopes", &self.scopes)
			.finish()
	}
}

fn default_scopes() -> ScopeSet {
	ScopeSet::new(DEFAULT_SCOPES).unwrap_or_default()
}
