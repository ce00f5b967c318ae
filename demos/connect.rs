//! Starts a connection for one user and prints the provider redirect.
//!
//! Reads `TRACKER_CLIENT_ID`, `TRACKER_CLIENT_SECRET`, and `TRACKER_REDIRECT_URI` from the
//! environment, then asks the routes layer for the authorize redirect the browser should follow.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
// self
use tracker_proxy::{
	auth::UserId,
	client::ApiClient,
	config::ClientConfig,
	flows::ReqwestTokenManager,
	provider::{DefaultProviderStrategy, ProviderDescriptor},
	rate_limit::RateLimiter,
	routes::Routes,
	store::MemoryStore,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let manager = ReqwestTokenManager::new(
		Arc::new(MemoryStore::default()),
		ProviderDescriptor::atlassian()?,
		Arc::new(DefaultProviderStrategy),
		ClientConfig::from_env()?,
	);
	let routes = Routes::new(
		Arc::new(ApiClient::new(Arc::new(manager))),
		Arc::new(RateLimiter::default()),
	);
	let user = UserId::new("demo-user")?;
	let response = routes.connect(&user, Some("/projects")).await;

	match response.header("location") {
		Some(location) => println!("Send the browser to {location}."),
		None => eprintln!("Connect failed with status {}: {:?}.", response.status, response.body),
	}

	let status = routes.status(&user).await;

	println!("Connection status before the callback: {:?}.", status.body);

	Ok(())
}
