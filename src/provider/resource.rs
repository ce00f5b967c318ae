//! Tenant discovery payloads returned by the accessible-resources endpoint.

// self
use crate::{_prelude::*, auth::TenantId};

/// One site/workspace a bearer token may reach.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibleResource {
	/// Tenant identifier used in API paths.
	pub id: TenantId,
	/// Display name of the site.
	#[serde(default)]
	pub name: Option<String>,
	/// Human-facing site URL.
	#[serde(default)]
	pub url: Option<Url>,
	/// Scopes granted on this site.
	#[serde(default)]
	pub scopes: Vec<String>,
	/// Avatar image for the site.
	#[serde(default)]
	pub avatar_url: Option<Url>,
}

/// Picks the tenant to bind after authorization.
///
/// Prefers the previously stored tenant when the provider still lists it; otherwise takes
/// the first resource in provider order.
pub fn select_resource<'a>(
	resources: &'a [AccessibleResource],
	previous: Option<&TenantId>,
) -> Option<&'a AccessibleResource> {
	previous
		.and_then(|tenant| resources.iter().find(|resource| &resource.id == tenant))
		.or_else(|| resources.first())
}
