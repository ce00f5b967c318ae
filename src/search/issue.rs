//! Normalized tracker entities returned to the host application.

// crates.io
use serde_json::{Map, Value};
// self
use crate::_prelude::*;

const KNOWN_FIELDS: [&str; 11] = [
	"summary",
	"status",
	"priority",
	"issuetype",
	"assignee",
	"reporter",
	"project",
	"labels",
	"created",
	"updated",
	"duedate",
];

/// Reasons a raw provider item could not be normalized.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum NormalizeError {
	/// The item is not a JSON object.
	#[error("Issue payload is not an object.")]
	NotAnObject,
	/// A required identifier is missing or not a string.
	#[error("Issue payload has no `{0}`.")]
	MissingField(&'static str),
}

/// Simplified issue representation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Issue {
	/// Provider identifier.
	pub id: String,
	/// Human-facing key such as `ENG-42`.
	pub key: String,
	/// One-line summary.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub summary: Option<String>,
	/// Workflow status name.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub status: Option<String>,
	/// Status category (`To Do`, `In Progress`, `Done`).
	#[serde(skip_serializing_if = "Option::is_none")]
	pub status_category: Option<String>,
	/// Priority name.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub priority: Option<String>,
	/// Issue type name.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub issue_type: Option<String>,
	/// Assignee display name.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub assignee: Option<String>,
	/// Reporter display name.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reporter: Option<String>,
	/// Project key.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub project: Option<String>,
	/// Labels.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub labels: Vec<String>,
	/// Creation timestamp as reported.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub created: Option<String>,
	/// Last update timestamp as reported.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub updated: Option<String>,
	/// Due date as reported.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub due_date: Option<String>,
	/// Browse link on the tenant's site.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub url: Option<Url>,
	/// Other requested fields with empty values pruned.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub extra: BTreeMap<String, Value>,
}
impl Issue {
	/// Normalizes one raw provider item; `site_url` is used to derive browse links.
	pub fn normalize(raw: &Value, site_url: Option<&Url>) -> Result<Self, NormalizeError> {
		let object = raw.as_object().ok_or(NormalizeError::NotAnObject)?;
		let id = match object.get("id") {
			Some(Value::String(id)) if !id.is_empty() => id.clone(),
			Some(Value::Number(id)) => id.to_string(),
			_ => return Err(NormalizeError::MissingField("id")),
		};
		let key = object
			.get("key")
			.and_then(Value::as_str)
			.filter(|key| !key.is_empty())
			.ok_or(NormalizeError::MissingField("key"))?
			.to_owned();
		let empty = Map::new();
		let fields = object.get("fields").and_then(Value::as_object).unwrap_or(&empty);
		let extra = fields
			.iter()
			.filter(|(name, _)| !KNOWN_FIELDS.contains(&name.as_str()))
			.filter_map(|(name, value)| prune(value).map(|value| (name.clone(), value)))
			.collect();
		let url = site_url.and_then(|site| browse_url(site, &key));

		Ok(Self {
			summary: text(fields.get("summary")),
			status: named(fields.get("status"), "name"),
			status_category: fields
				.get("status")
				.and_then(|status| named(status.get("statusCategory"), "name")),
			priority: named(fields.get("priority"), "name"),
			issue_type: named(fields.get("issuetype"), "name"),
			assignee: named(fields.get("assignee"), "displayName"),
			reporter: named(fields.get("reporter"), "displayName"),
			project: named(fields.get("project"), "key"),
			labels: fields
				.get("labels")
				.and_then(Value::as_array)
				.map(|labels| {
					labels.iter().filter_map(|label| text(Some(label))).collect::<Vec<_>>()
				})
				.unwrap_or_default(),
			created: text(fields.get("created")),
			updated: text(fields.get("updated")),
			due_date: text(fields.get("duedate")),
			id,
			key,
			url,
			extra,
		})
	}
}

/// Project summary returned by the projects route.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
	/// Provider identifier.
	pub id: String,
	/// Project key.
	pub key: String,
	/// Display name.
	pub name: String,
	/// Project type, when reported.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub project_type_key: Option<String>,
}

// `Url::join` replaces the last segment unless the base path ends in `/`.
fn browse_url(site: &Url, key: &str) -> Option<Url> {
	let mut base = site.clone();

	if !base.path().ends_with('/') {
		let path = format!("{}/", base.path());

		base.set_path(&path);
	}

	base.join(&format!("browse/{key}")).ok()
}

fn text(value: Option<&Value>) -> Option<String> {
	value.and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned)
}

fn named(value: Option<&Value>, key: &str) -> Option<String> {
	text(value.and_then(|value| value.get(key)))
}

/// Drops `null`, `false`, empty strings, empty arrays, and empty objects, recursively.
fn prune(value: &Value) -> Option<Value> {
	match value {
		Value::Null | Value::Bool(false) => None,
		Value::String(s) if s.is_empty() => None,
		Value::Array(items) => {
			let items = items.iter().filter_map(prune).collect::<Vec<_>>();

			(!items.is_empty()).then_some(Value::Array(items))
		},
		Value::Object(map) => {
			let map = map
				.iter()
				.filter_map(|(k, v)| prune(v).map(|v| (k.clone(), v)))
				.collect::<Map<_, _>>();

			(!map.is_empty()).then_some(Value::Object(map))
		},
		other => Some(other.clone()),
	}
}
