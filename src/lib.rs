//! Delegated-authorization proxy for OAuth 2.0 issue trackers—refresh-safe credentials,
//! sanitized structured search, bounded pagination, and per-user admission control.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

/// Emits a structured `tracing` event when the `tracing` feature is enabled.
macro_rules! obs_event {
	($level:ident, $($arg:tt)+) => {{
		#[cfg(feature = "tracing")]
		::tracing::$level!($($arg)+);
	}};
}

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod flows;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod provider;
pub mod rate_limit;
pub mod routes;
pub mod search;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for tests; enabled via `cfg(test)` or the `test`
	//! crate feature.

	pub use crate::_prelude::*;

	// std
	use std::collections::VecDeque;
	// crates.io
	use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
	// self
	use crate::{
		auth::{OAuthCredential, TenantId, UserId},
		client::ApiClient,
		config::ClientConfig,
		flows::TokenManager,
		http::{ProviderHttpClient, ResponseMetadata, ResponseMetadataSlot},
		oauth::TransportErrorMapper,
		provider::{DefaultProviderStrategy, ProviderDescriptor},
		store::{CredentialStore, MemoryStore},
	};

	/// Token manager type alias used by scripted-transport tests.
	pub type ScriptedManager = TokenManager<ScriptedHttpClient, ScriptedErrorMapper>;

	/// Client configuration fixture shared by tests.
	pub fn test_client_config() -> ClientConfig {
		ClientConfig::new(
			"client-test",
			"secret-test",
			Url::parse("https://app.example.com/oauth/callback")
				.expect("Redirect fixture should parse."),
		)
		.with_scopes(["read:jira-work", "offline_access"])
		.expect("Scope fixture should be valid.")
	}

	/// Descriptor pointing at `https://tracker.test`, used with the scripted transport.
	pub fn scripted_descriptor() -> ProviderDescriptor {
		ProviderDescriptor::builder(
			crate::auth::ProviderId::new("scripted").expect("Provider fixture should be valid."),
		)
		.authorization_endpoint(
			Url::parse("https://auth.tracker.test/authorize").expect("URL fixture should parse."),
		)
		.token_endpoint(
			Url::parse("https://auth.tracker.test/oauth/token").expect("URL fixture should parse."),
		)
		.resources_endpoint(
			Url::parse("https://api.tracker.test/oauth/token/accessible-resources")
				.expect("URL fixture should parse."),
		)
		.api_base("https://api.tracker.test/ex/jira/{tenant}/")
		.build()
		.expect("Scripted descriptor should build.")
	}

	/// Builds a [`TokenManager`] over a scripted transport and an in-memory store.
	pub fn build_scripted_manager(http: ScriptedHttpClient) -> (ScriptedManager, Arc<MemoryStore>) {
		let store_backend = Arc::new(MemoryStore::default());
		let store: Arc<dyn CredentialStore> = store_backend.clone();
		let manager = TokenManager::with_http_client(
			store,
			scripted_descriptor(),
			Arc::new(DefaultProviderStrategy),
			test_client_config(),
			http,
			Arc::new(ScriptedErrorMapper),
		);

		(manager, store_backend)
	}

	/// Builds an [`ApiClient`] over a scripted transport and an in-memory store.
	pub fn build_scripted_client(
		http: ScriptedHttpClient,
	) -> (ApiClient<ScriptedHttpClient, ScriptedErrorMapper>, Arc<MemoryStore>) {
		let (manager, store) = build_scripted_manager(http);

		(ApiClient::new(Arc::new(manager)), store)
	}

	/// Seeds a long-lived credential for `user` so calls skip the OAuth handshake.
	pub async fn seed_credential(store: &MemoryStore, user: &UserId, access: &str) {
		let credential = OAuthCredential::builder()
			.access_token(access)
			.refresh_token(format!("refresh-for-{access}"))
			.tenant_id(TenantId::new("tenant-1").expect("Tenant fixture should be valid."))
			.site_url(Url::parse("https://acme.tracker.test").expect("URL fixture should parse."))
			.expires_in(Duration::hours(1))
			.build()
			.expect("Credential fixture should build.");

		store.save(user, credential).await.expect("Seeding the credential should succeed.");
	}

	/// Shorthand for test user identifiers.
	pub fn user(id: &str) -> UserId {
		UserId::new(id).expect("User fixture should be valid.")
	}

	/// Transport failure emitted by [`ScriptedHttpClient`] when its script runs dry.
	#[derive(Debug, ThisError)]
	#[error("Scripted transport has no response queued.")]
	pub struct ScriptExhausted;

	/// Request captured by [`ScriptedHttpClient`].
	#[derive(Clone, Debug)]
	pub struct RecordedRequest {
		/// HTTP method.
		pub method: String,
		/// Full request URL.
		pub url: Url,
		/// `Authorization` header, when present.
		pub authorization: Option<String>,
		/// Raw request body.
		pub body: Vec<u8>,
	}

	/// In-process transport that replays queued responses and records every request.
	#[derive(Clone, Default)]
	pub struct ScriptedHttpClient {
		responses: Arc<Mutex<VecDeque<(u16, String)>>>,
		requests: Arc<Mutex<Vec<RecordedRequest>>>,
	}
	impl ScriptedHttpClient {
		/// Queues a response with the provided status and body.
		pub fn push(&self, status: u16, body: impl Into<String>) -> &Self {
			self.responses.lock().push_back((status, body.into()));

			self
		}

		/// Queues a JSON response.
		pub fn push_json(&self, status: u16, body: serde_json::Value) -> &Self {
			self.push(status, body.to_string())
		}

		/// Returns every request observed so far.
		pub fn requests(&self) -> Vec<RecordedRequest> {
			self.requests.lock().clone()
		}

		/// Number of requests observed so far.
		pub fn request_count(&self) -> usize {
			self.requests.lock().len()
		}
	}
	impl ProviderHttpClient for ScriptedHttpClient {
		type Handle = ScriptedHandle;
		type TransportError = ScriptExhausted;

		fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
			ScriptedHandle { client: self.clone(), slot }
		}
	}

	/// Handle returned by [`ScriptedHttpClient::with_metadata`].
	pub struct ScriptedHandle {
		client: ScriptedHttpClient,
		slot: ResponseMetadataSlot,
	}
	impl<'c> AsyncHttpClient<'c> for ScriptedHandle {
		type Error = HttpClientError<ScriptExhausted>;
		type Future =
			Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

		fn call(&'c self, request: HttpRequest) -> Self::Future {
			let client = self.client.clone();
			let slot = self.slot.clone();

			Box::pin(async move {
				slot.take();

				let authorization = request
					.headers()
					.get(oauth2::http::header::AUTHORIZATION)
					.and_then(|value| value.to_str().ok())
					.map(str::to_owned);
				let url = Url::parse(&request.uri().to_string())
					.expect("Scripted requests should carry absolute URLs.");

				client.requests.lock().push(RecordedRequest {
					method: request.method().to_string(),
					url,
					authorization,
					body: request.body().clone(),
				});

				let (status, body) = client
					.responses
					.lock()
					.pop_front()
					.ok_or_else(|| HttpClientError::Reqwest(Box::new(ScriptExhausted)))?;

				slot.store(ResponseMetadata { status: Some(status), retry_after: None });

				let mut response = HttpResponse::new(body.into_bytes());

				*response.status_mut() = oauth2::http::StatusCode::from_u16(status)
					.expect("Scripted status codes should be valid.");

				Ok(response)
			})
		}
	}

	/// Maps scripted transport failures into network errors.
	#[derive(Clone, Debug, Default)]
	pub struct ScriptedErrorMapper;
	impl TransportErrorMapper<ScriptExhausted> for ScriptedErrorMapper {
		fn map_transport_error(
			&self,
			_operation: crate::obs::FlowKind,
			_meta: Option<&ResponseMetadata>,
			err: HttpClientError<ScriptExhausted>,
		) -> Error {
			crate::error::TransportError::network(std::io::Error::other(err.to_string())).into()
		}
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
