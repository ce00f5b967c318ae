// self
use crate::_prelude::*;

/// Body encoding the token endpoint expects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenRequestEncoding {
	/// `application/json` object body.
	#[default]
	Json,
	/// `application/x-www-form-urlencoded` body.
	Form,
}

/// Provider-specific quirks that influence how flows behave.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderQuirks {
	/// Character used to join scopes when constructing `scope` parameters.
	pub scope_delimiter: char,
	/// Extra `audience` parameter appended to the authorization URL.
	pub audience: Option<String>,
	/// Appends `prompt=consent` so the provider always shows its consent screen.
	pub prompt_consent: bool,
	/// Token endpoint body encoding.
	pub token_request_encoding: TokenRequestEncoding,
}
impl Default for ProviderQuirks {
	fn default() -> Self {
		Self {
			scope_delimiter: ' ',
			audience: None,
			prompt_consent: true,
			token_request_encoding: TokenRequestEncoding::Json,
		}
	}
}
