//! Structured search over the tracker: validation, query building, and aggregation.
//!
//! Inbound [`SearchParams`] are untrusted. [`QueryRequest::from_params`] sanitizes every
//! clause, enforces the [`SearchLimits`] caps, and resolves exactly one [`SearchMode`]
//! before anything touches the network. The engine then pages through the provider's
//! bounded search endpoint to build an [`AggregatedResult`].

pub mod engine;
pub mod issue;
pub mod sanitize;

pub use engine::*;
pub use issue::*;
pub use sanitize::*;

// self
use crate::_prelude::*;

/// Fields requested when the caller does not name any.
pub const DEFAULT_FIELDS: [&str; 11] = [
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

/// Validation failures raised before any network call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum ValidationError {
	/// `count_only` and `distinct` were both requested.
	#[error("Count-only and distinct aggregation cannot be combined.")]
	ConflictingModes,
	/// More filter clauses than allowed.
	#[error("Too many filter clauses: {count} (max {max}).")]
	TooManyClauses {
		/// Clauses supplied.
		count: usize,
		/// Configured cap.
		max: usize,
	},
	/// Built query exceeds the length cap.
	#[error("Query is too long: {length} characters (max {max}).")]
	QueryTooLong {
		/// Length of the built query.
		length: usize,
		/// Configured cap.
		max: usize,
	},
	/// More requested fields than allowed.
	#[error("Too many requested fields: {count} (max {max}).")]
	TooManyFields {
		/// Fields supplied.
		count: usize,
		/// Configured cap.
		max: usize,
	},
	/// Page size outside `1..=max`.
	#[error("Page size {size} is outside 1..={max}.")]
	PageSizeOutOfRange {
		/// Requested page size.
		size: u32,
		/// Configured cap.
		max: u32,
	},
	/// Field identifier contains characters outside the allowed set.
	#[error("Field identifier `{field}` is not allowed.")]
	InvalidField {
		/// Offending identifier.
		field: String,
	},
	/// Operator is not one of the supported comparison operators.
	#[error("Operator `{operator}` is not supported.")]
	InvalidOperator {
		/// Offending operator.
		operator: String,
	},
	/// Value is empty once sanitized, or unsuitable for the operator.
	#[error("Value for `{field}` is empty or unsuitable for its operator.")]
	InvalidValue {
		/// Field the value belongs to.
		field: String,
	},
	/// Distinct aggregation requested on a field outside the allow-list.
	#[error("Distinct aggregation is not available for `{field}`.")]
	DistinctFieldNotAllowed {
		/// Requested field.
		field: String,
	},
	/// API path is not a relative tracker path.
	#[error("Path `{path}` is not a relative tracker API path.")]
	InvalidPath {
		/// Offending path.
		path: String,
	},
	/// Issue key or identifier is malformed.
	#[error("Issue key `{key}` is malformed.")]
	InvalidIssueKey {
		/// Offending key.
		key: String,
	},
}

/// Caps applied to inbound searches and the aggregation engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchLimits {
	/// Maximum number of filter clauses.
	pub max_clauses: usize,
	/// Maximum length of the built query, in characters.
	pub max_query_len: usize,
	/// Maximum number of requested fields.
	pub max_fields: usize,
	/// Largest caller page size.
	pub max_page_size: u32,
	/// Caller page size used when none is given.
	pub default_page_size: u32,
	/// Provider page size used while scanning.
	pub batch_size: u32,
	/// Maximum items scanned by list searches before the result is marked partial.
	pub list_scan_cap: u32,
	/// Maximum provider pages scanned by distinct aggregation.
	pub distinct_page_cap: u32,
}
impl Default for SearchLimits {
	fn default() -> Self {
		Self {
			max_clauses: 20,
			max_query_len: 2_000,
			max_fields: 50,
			max_page_size: 100,
			default_page_size: 50,
			batch_size: 100,
			list_scan_cap: 1_000,
			distinct_page_cap: 10,
		}
	}
}

/// Untrusted search request as received from the host application.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
	/// Filter clauses joined with `AND`.
	pub clauses: Vec<ClauseParam>,
	/// Optional ordering field.
	pub order_by: Option<String>,
	/// Sort descending when `true`.
	pub descending: bool,
	/// Fields to return for each issue.
	pub fields: Vec<String>,
	/// Caller page size.
	pub page_size: Option<u32>,
	/// Caller offset into the assembled result.
	pub start_offset: Option<u32>,
	/// Only count matching issues.
	pub count_only: bool,
	/// Count occurrences of each value of this field.
	pub distinct: Option<String>,
}

/// Untrusted `field operator value` triple.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClauseParam {
	/// Field identifier.
	pub field: String,
	/// Comparison operator.
	pub operator: String,
	/// Raw value; comma separated for `in` / `not in`.
	pub value: String,
}
impl ClauseParam {
	/// Convenience constructor.
	pub fn new(
		field: impl Into<String>,
		operator: impl Into<String>,
		value: impl Into<String>,
	) -> Self {
		Self { field: field.into(), operator: operator.into(), value: value.into() }
	}
}

/// Aggregation mode; exactly one per request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum SearchMode {
	/// Return normalized issues.
	List,
	/// Return only the total.
	CountOnly,
	/// Return value frequencies for one field.
	Distinct {
		/// Field being aggregated.
		field: String,
	},
}
impl SearchMode {
	/// Stable label used in spans and logs.
	pub const fn as_str(&self) -> &'static str {
		match self {
			Self::List => "list",
			Self::CountOnly => "count_only",
			Self::Distinct { .. } => "distinct",
		}
	}
}

/// Ordering applied by the provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
	/// Validated field identifier.
	pub field: String,
	/// Sort descending when `true`.
	pub descending: bool,
}

/// Validated, sanitized search request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
	/// Sanitized filter clauses in caller order.
	pub clauses: Vec<Clause>,
	/// Optional ordering.
	pub order_by: Option<OrderBy>,
	/// Fields to request from the provider.
	pub fields: Vec<String>,
	/// Caller page size.
	pub page_size: u32,
	/// Caller offset into the assembled result.
	pub start_offset: u32,
	/// Aggregation mode.
	pub mode: SearchMode,
}
impl QueryRequest {
	/// Validates untrusted parameters against `limits`.
	pub fn from_params(
		params: SearchParams,
		limits: &SearchLimits,
	) -> Result<Self, ValidationError> {
		let mode = match (params.count_only, params.distinct) {
			(true, Some(_)) => return Err(ValidationError::ConflictingModes),
			(true, None) => SearchMode::CountOnly,
			(false, Some(field)) =>
				SearchMode::Distinct { field: validate_distinct_field(&field)? },
			(false, None) => SearchMode::List,
		};

		if params.clauses.len() > limits.max_clauses {
			return Err(ValidationError::TooManyClauses {
				count: params.clauses.len(),
				max: limits.max_clauses,
			});
		}
		if params.fields.len() > limits.max_fields {
			return Err(ValidationError::TooManyFields {
				count: params.fields.len(),
				max: limits.max_fields,
			});
		}

		let page_size = params.page_size.unwrap_or(limits.default_page_size);

		if page_size == 0 || page_size > limits.max_page_size {
			return Err(ValidationError::PageSizeOutOfRange {
				size: page_size,
				max: limits.max_page_size,
			});
		}

		let clauses = params.clauses.iter().map(Clause::parse).collect::<Result<Vec<_>, _>>()?;
		let order_by = params
			.order_by
			.map(|field| {
				validate_field(&field).map(|field| OrderBy { field, descending: params.descending })
			})
			.transpose()?;
		let mut fields = params
			.fields
			.iter()
			.map(|field| validate_field(field))
			.collect::<Result<Vec<_>, _>>()?;

		if fields.is_empty() {
			fields = DEFAULT_FIELDS.iter().map(|field| (*field).to_owned()).collect();
		}

		fields.dedup();

		let request = Self {
			clauses,
			order_by,
			fields,
			page_size,
			start_offset: params.start_offset.unwrap_or(0),
			mode,
		};
		let length = request.jql().chars().count();

		if length > limits.max_query_len {
			return Err(ValidationError::QueryTooLong { length, max: limits.max_query_len });
		}

		Ok(request)
	}

	/// Renders the provider query string.
	pub fn jql(&self) -> String {
		let mut jql =
			self.clauses.iter().map(Clause::render).collect::<Vec<_>>().join(" AND ");

		if let Some(order) = &self.order_by {
			if !jql.is_empty() {
				jql.push(' ');
			}

			jql.push_str("ORDER BY ");
			jql.push_str(&order.field);
			jql.push_str(if order.descending { " DESC" } else { " ASC" });
		}

		jql
	}
}
