//! Token endpoint and tenant discovery protocol.
//!
//! [`OAuthFacade`] borrows the manager's transport, descriptor, strategy, and client
//! configuration to build authorization URLs, exchange codes, refresh tokens, and list
//! accessible resources. Every failure is normalized into the proxy [`Error`] taxonomy
//! before it leaves this module.

pub use oauth2;

// crates.io
use base64::{Engine, engine::general_purpose::STANDARD};
use oauth2::{
	HttpClientError, HttpRequest,
	http::{
		Method,
		header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
	},
};
use url::form_urlencoded;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	config::ClientConfig,
	error::{ConfigError, TransientError, TransportError},
	http::{self, ProviderHttpClient, ResponseMetadata},
	obs::FlowKind,
	provider::{
		AccessibleResource, ClientAuthMethod, GrantType, ProviderDescriptor, ProviderStrategy,
		TokenErrorContext, TokenRequestEncoding,
	},
};

/// Longest `expires_in` accepted from a token endpoint.
pub const MAX_EXPIRES_IN: Duration = Duration::days(366);

/// Maps HTTP transport failures into proxy [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into a proxy error.
	fn map_transport_error(
		&self,
		operation: FlowKind,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		operation: FlowKind,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(operation, meta, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) => TransientError::Upstream {
				message: format!("HTTP client error during {operation}: {message}"),
				status: meta_status(meta),
				retry_after: meta_retry_after(meta),
			}
			.into(),
			_ => TransientError::Upstream {
				message: format!("HTTP client error during {operation}"),
				status: meta_status(meta),
				retry_after: meta_retry_after(meta),
			}
			.into(),
		}
	}
}

/// Successful token endpoint payload.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenEndpointResponse {
	/// Newly issued access token.
	pub access_token: TokenSecret,
	/// Rotated refresh token, when the provider issued one.
	#[serde(default)]
	pub refresh_token: Option<TokenSecret>,
	/// Lifetime of the access token in seconds.
	#[serde(default)]
	pub expires_in: Option<i64>,
	/// Granted scopes as reported by the provider.
	#[serde(default)]
	pub scope: Option<String>,
	/// Token type, normally `Bearer`.
	#[serde(default)]
	pub token_type: Option<String>,
}

/// Validated token grant ready to be turned into a credential.
#[derive(Clone, Debug)]
pub struct TokenGrant {
	/// Newly issued access token.
	pub access_token: TokenSecret,
	/// Rotated refresh token, if any.
	pub refresh_token: Option<TokenSecret>,
	/// Validated access token lifetime.
	pub expires_in: Option<Duration>,
	/// Instant the response was received.
	pub issued_at: OffsetDateTime,
}
impl TryFrom<TokenEndpointResponse> for TokenGrant {
	type Error = ConfigError;

	fn try_from(response: TokenEndpointResponse) -> Result<Self, Self::Error> {
		let expires_in = match response.expires_in {
			None => None,
			Some(secs) if secs <= 0 => return Err(ConfigError::NonPositiveExpiresIn),
			Some(secs) if secs > MAX_EXPIRES_IN.whole_seconds() =>
				return Err(ConfigError::ExpiresInOutOfRange),
			Some(secs) => Some(Duration::seconds(secs)),
		};

		Ok(Self {
			access_token: response.access_token,
			refresh_token: response.refresh_token,
			expires_in,
			issued_at: OffsetDateTime::now_utc(),
		})
	}
}

/// Borrowed view over everything needed to talk to the provider's OAuth endpoints.
pub(crate) struct OAuthFacade<'a, C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	pub(crate) http_client: &'a C,
	pub(crate) error_mapper: &'a M,
	pub(crate) descriptor: &'a ProviderDescriptor,
	pub(crate) strategy: &'a dyn ProviderStrategy,
	pub(crate) config: &'a ClientConfig,
}
impl<C, M> OAuthFacade<'_, C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Builds the provider authorization URL for a fresh `state`.
	pub(crate) fn authorize_url(&self, state: &str) -> Url {
		let mut url = self.descriptor.endpoints.authorization.clone();

		{
			let quirks = &self.descriptor.quirks;
			let mut query = url.query_pairs_mut();

			if let Some(audience) = quirks.audience.as_deref() {
				query.append_pair("audience", audience);
			}

			query.append_pair("client_id", &self.config.client_id);

			if let Some(scope) = self.config.scopes.joined(quirks.scope_delimiter) {
				query.append_pair("scope", &scope);
			}

			query
				.append_pair("redirect_uri", self.config.redirect_uri.as_str())
				.append_pair("state", state)
				.append_pair("response_type", "code");

			if quirks.prompt_consent {
				query.append_pair("prompt", "consent");
			}
		}

		url
	}

	/// Exchanges an authorization code; every non-2xx answer is a failed exchange.
	pub(crate) async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
		let mut params = BTreeMap::new();

		params.insert("code".to_owned(), code.to_owned());
		params.insert("redirect_uri".to_owned(), self.config.redirect_uri.to_string());

		let (status, body) =
			self.post_token(FlowKind::Authorize, GrantType::AuthorizationCode, params).await?;

		if !(200..300).contains(&status) {
			let ctx = TokenErrorContext::from_response(GrantType::AuthorizationCode, status, &body);

			return Err(Error::TokenExchangeFailed { status: Some(status), reason: ctx.reason() });
		}

		parse_grant(status, &body)
	}

	/// Redeems a refresh token.
	///
	/// Provider-confirmed rejections surface as [`Error::RefreshFailed`]; throttling,
	/// server errors, and network failures stay transient.
	pub(crate) async fn refresh(&self, refresh_token: &TokenSecret) -> Result<TokenGrant> {
		let mut params = BTreeMap::new();

		params.insert("refresh_token".to_owned(), refresh_token.expose().to_owned());

		let (status, body) =
			self.post_token(FlowKind::Refresh, GrantType::RefreshToken, params).await?;

		if !(200..300).contains(&status) {
			let ctx = TokenErrorContext::from_response(GrantType::RefreshToken, status, &body);
			let failure = self.strategy.classify_token_error(&ctx);

			return Err(if failure.purges_credential() {
				Error::RefreshFailed { reason: format!("{} ({})", ctx.reason(), failure.as_str()) }
			} else {
				TransientError::Upstream {
					message: format!("Token endpoint is unavailable: {}", ctx.reason()),
					status: Some(status),
					retry_after: None,
				}
				.into()
			});
		}

		parse_grant(status, &body)
	}

	/// Lists the tenants an access token may reach.
	pub(crate) async fn accessible_resources(
		&self,
		access_token: &TokenSecret,
	) -> Result<Vec<AccessibleResource>> {
		let request = oauth2::http::Request::builder()
			.method(Method::GET)
			.uri(self.descriptor.endpoints.resources.as_str())
			.header(AUTHORIZATION, format!("Bearer {}", access_token.expose()))
			.header(ACCEPT, "application/json")
			.body(Vec::new())
			.map_err(ConfigError::from)?;
		let (response, meta) =
			http::dispatch(self.http_client, self.error_mapper, FlowKind::Resources, request)
				.await?;
		let status = response.status().as_u16();

		match status {
			200..=299 => decode_json(status, response.body()),
			401 => Err(Error::NotAuthenticated),
			429 | 500..=599 => Err(TransientError::Upstream {
				message: "Tenant discovery is unavailable".into(),
				status: Some(status),
				retry_after: meta.retry_after,
			}
			.into()),
			_ => Err(Error::ProviderRejected {
				status,
				body: String::from_utf8_lossy(response.body()).into_owned(),
			}),
		}
	}

	async fn post_token(
		&self,
		flow: FlowKind,
		grant: GrantType,
		mut params: BTreeMap<String, String>,
	) -> Result<(u16, Vec<u8>)> {
		params.insert("grant_type".to_owned(), grant.as_str().to_owned());

		let mut builder = oauth2::http::Request::builder()
			.method(Method::POST)
			.uri(self.descriptor.endpoints.token.as_str())
			.header(ACCEPT, "application/json");

		match self.descriptor.preferred_client_auth_method {
			ClientAuthMethod::ClientSecretPost => {
				params.insert("client_id".to_owned(), self.config.client_id.clone());
				params.insert(
					"client_secret".to_owned(),
					self.config.client_secret.expose().to_owned(),
				);
			},
			ClientAuthMethod::ClientSecretBasic => {
				builder = builder.header(AUTHORIZATION, basic_authorization(self.config));
			},
		}

		self.strategy.augment_token_request(grant, &mut params);

		let request =
			encode_token_request(builder, self.descriptor.quirks.token_request_encoding, &params)?;
		let (response, _) =
			http::dispatch(self.http_client, self.error_mapper, flow, request).await?;

		Ok((response.status().as_u16(), response.into_body()))
	}
}

fn encode_token_request(
	builder: oauth2::http::request::Builder,
	encoding: TokenRequestEncoding,
	params: &BTreeMap<String, String>,
) -> Result<HttpRequest> {
	let (content_type, body) = match encoding {
		TokenRequestEncoding::Json =>
			("application/json", serde_json::to_vec(params).map_err(ConfigError::from)?),
		TokenRequestEncoding::Form => (
			"application/x-www-form-urlencoded",
			form_urlencoded::Serializer::new(String::new())
				.extend_pairs(params.iter())
				.finish()
				.into_bytes(),
		),
	};

	builder
		.header(CONTENT_TYPE, content_type)
		.body(body)
		.map_err(|err| ConfigError::from(err).into())
}

fn basic_authorization(config: &ClientConfig) -> String {
	let id = form_urlencoded::byte_serialize(config.client_id.as_bytes()).collect::<String>();
	let secret = form_urlencoded::byte_serialize(config.client_secret.expose().as_bytes())
		.collect::<String>();

	format!("Basic {}", STANDARD.encode(format!("{id}:{secret}")))
}

fn parse_grant(status: u16, body: &[u8]) -> Result<TokenGrant> {
	let response = decode_json::<TokenEndpointResponse>(status, body)?;

	TokenGrant::try_from(response).map_err(Error::from)
}

pub(crate) fn decode_json<T>(status: u16, body: &[u8]) -> Result<T>
where
	T: for<'de> Deserialize<'de>,
{
	let mut deserializer = serde_json::Deserializer::from_slice(body);

	serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|source| TransientError::ResponseParse { source, status: Some(status) }.into())
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(
	operation: FlowKind,
	meta: Option<&ResponseMetadata>,
	err: ReqwestError,
) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return TransientError::Upstream {
			message: format!("Request timed out during {operation}"),
			status: meta_status(meta).or_else(|| err.status().map(|code| code.as_u16())),
			retry_after: meta_retry_after(meta),
		}
		.into();
	}

	TransportError::from(err).into()
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}
