//! Pagination and aggregation over the provider's bounded search endpoint.
//!
//! Pages are fetched sequentially through [`ApiClient::call`]. Any failed page aborts
//! the whole aggregation; [`AggregatedResult::partial`] is set only when a scan cap ended
//! the loop before the provider ran out of results. Distinct aggregation is deliberately
//! approximate on very large result sets: it never scans more than
//! [`SearchLimits::distinct_page_cap`] pages.

// crates.io
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	auth::UserId,
	client::{ApiClient, CallOptions},
	error::TransientError,
	http::ProviderHttpClient,
	oauth::TransportErrorMapper,
	obs::{self, FlowKind},
	search::{Issue, QueryRequest, SearchMode, SearchParams},
};

/// Bucket label used when an item carries no value for the distinct field.
pub const NO_VALUE_BUCKET: &str = "(none)";
/// Provider search path relative to the tenant API base.
pub const SEARCH_PATH: &str = "search";

/// Output of [`ApiClient::search`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
	/// Caller page of normalized issues (list mode only).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub items: Option<Vec<Issue>>,
	/// Total matching items as reported by the provider, or as observed.
	pub total: u64,
	/// Value frequencies (distinct mode only).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub distinct: Option<BTreeMap<String, u64>>,
	/// `true` only when a safety cap ended the scan early.
	pub partial: bool,
	/// Provider pages fetched.
	pub pages_fetched: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPage {
	#[serde(default)]
	max_results: Option<u32>,
	#[serde(default)]
	total: Option<u64>,
	#[serde(default)]
	issues: Vec<Value>,
}

struct PageOutcome {
	page: SearchPage,
	site_url: Option<Url>,
}

impl<C, M> ApiClient<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Validates untrusted parameters and runs the search.
	///
	/// Validation failures are returned before any network call.
	pub async fn search_params(
		&self,
		user: &UserId,
		params: SearchParams,
	) -> Result<AggregatedResult> {
		let request = QueryRequest::from_params(params, &self.search_limits)?;

		self.search(user, &request).await
	}

	/// Runs a validated search in its aggregation mode.
	pub async fn search(&self, user: &UserId, request: &QueryRequest) -> Result<AggregatedResult> {
		obs::observe(FlowKind::Search, request.mode.as_str(), async move {
			match &request.mode {
				SearchMode::List => self.search_list(user, request).await,
				SearchMode::CountOnly => self.search_count(user, request).await,
				SearchMode::Distinct { field } => self.search_distinct(user, request, field).await,
			}
		})
		.await
	}

	async fn search_list(&self, user: &UserId, request: &QueryRequest) -> Result<AggregatedResult> {
		let jql = request.jql();
		let fields = request.fields.join(",");
		let batch = self.search_limits.batch_size.max(1);
		let cap = self.search_limits.list_scan_cap;
		let mut items = Vec::new();
		let mut scanned = 0_u32;
		let mut pages_fetched = 0;
		let mut reported_total = None;
		let mut partial = false;

		loop {
			if scanned >= cap {
				partial = reported_total.is_none_or(|total| total > u64::from(scanned));

				break;
			}

			let wanted = batch.min(cap - scanned);
			let PageOutcome { page, site_url } =
				self.fetch_page(user, &jql, &fields, scanned, wanted).await?;
			let received = page.issues.len() as u32;

			pages_fetched += 1;
			scanned += received;
			reported_total = page.total.or(reported_total);

			for raw in &page.issues {
				match Issue::normalize(raw, site_url.as_ref()) {
					Ok(issue) => items.push(issue),
					Err(_err) => {
						obs_event!(debug, error = %_err, "Skipped an unnormalizable issue.");
					},
				}
			}

			if received < effective_batch(&page, wanted)
				|| reported_total.is_some_and(|total| u64::from(scanned) >= total)
			{
				break;
			}
		}

		let start = request.start_offset as usize;
		let items =
			items.into_iter().skip(start).take(request.page_size as usize).collect::<Vec<_>>();

		Ok(AggregatedResult {
			items: Some(items),
			total: reported_total.unwrap_or(u64::from(scanned)),
			distinct: None,
			partial,
			pages_fetched,
		})
	}

	async fn search_count(
		&self,
		user: &UserId,
		request: &QueryRequest,
	) -> Result<AggregatedResult> {
		let PageOutcome { page, .. } = self.fetch_page(user, &request.jql(), "id", 0, 0).await?;
		let total = page.total.ok_or_else(|| TransientError::Upstream {
			message: "Search response did not report a total".into(),
			status: Some(200),
			retry_after: None,
		})?;

		Ok(AggregatedResult {
			items: None,
			total,
			distinct: None,
			partial: false,
			pages_fetched: 1,
		})
	}

	async fn search_distinct(
		&self,
		user: &UserId,
		request: &QueryRequest,
		field: &str,
	) -> Result<AggregatedResult> {
		let jql = request.jql();
		let batch = self.search_limits.batch_size.max(1);
		let mut buckets = BTreeMap::<String, u64>::new();
		let mut scanned = 0_u32;
		let mut pages_fetched = 0;
		let mut reported_total = None;
		let mut exhausted = false;

		while pages_fetched < self.search_limits.distinct_page_cap {
			let PageOutcome { page, .. } =
				self.fetch_page(user, &jql, field, scanned, batch).await?;
			let received = page.issues.len() as u32;

			pages_fetched += 1;
			scanned += received;
			reported_total = page.total.or(reported_total);

			for raw in &page.issues {
				let raw_value = raw.get("fields").and_then(|fields| fields.get(field));

				for value in distinct_values(raw_value) {
					*buckets.entry(value).or_default() += 1;
				}
			}

			if received < effective_batch(&page, batch)
				|| reported_total.is_some_and(|total| u64::from(scanned) >= total)
			{
				exhausted = true;

				break;
			}
		}

		Ok(AggregatedResult {
			items: None,
			total: reported_total.unwrap_or(u64::from(scanned)),
			distinct: Some(buckets),
			partial: !exhausted,
			pages_fetched,
		})
	}

	async fn fetch_page(
		&self,
		user: &UserId,
		jql: &str,
		fields: &str,
		start_at: u32,
		max_results: u32,
	) -> Result<PageOutcome> {
		let options = CallOptions::get()
			.query("jql", jql)
			.query("startAt", start_at.to_string())
			.query("maxResults", max_results.to_string())
			.query("fields", fields);
		let response = self.call(user, SEARCH_PATH, options).await?.into_result()?;
		let page = response.json::<SearchPage>()?;

		Ok(PageOutcome { page, site_url: response.site_url })
	}
}

/// Page size the provider actually applied; it may clamp `maxResults` below the request.
fn effective_batch(page: &SearchPage, requested: u32) -> u32 {
	page.max_results
		.filter(|applied| *applied > 0)
		.map_or(requested, |applied| applied.min(requested))
}

/// Extracts bucket labels from one item's field value.
///
/// Objects contribute their `name`, `displayName`, `value`, or `key`; arrays contribute
/// each element; missing or empty values land in [`NO_VALUE_BUCKET`].
pub fn distinct_values(value: Option<&Value>) -> Vec<String> {
	let labels = match value {
		Some(Value::Array(values)) => values.iter().filter_map(label).collect::<Vec<_>>(),
		Some(value) => label(value).into_iter().collect(),
		None => Vec::new(),
	};

	if labels.is_empty() { vec![NO_VALUE_BUCKET.to_owned()] } else { labels }
}

fn label(value: &Value) -> Option<String> {
	match value {
		Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
		Value::Number(n) => Some(n.to_string()),
		Value::Bool(b) => Some(b.to_string()),
		Value::Object(map) => ["name", "displayName", "value", "key"]
			.iter()
			.find_map(|key| map.get(*key).and_then(label)),
		_ => None,
	}
}
