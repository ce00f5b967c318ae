//! Injection-safe construction of provider query clauses.
//!
//! The tracker's query language has no parameter binding, so every caller value is
//! interpolated as text. Values lose quotes, backslashes, semicolons, parentheses, and
//! control characters before the builder wraps them in its own double quotes. Only the
//! exact fragments in [`TRUSTED_FRAGMENTS`] are emitted unquoted.

// self
use crate::{_prelude::*, search::ValidationError};

/// Fragments passed through verbatim when a value matches one exactly.
pub const TRUSTED_FRAGMENTS: [&str; 8] = [
	"currentUser()",
	"now()",
	"startOfDay()",
	"endOfDay()",
	"startOfWeek()",
	"endOfWeek()",
	"EMPTY",
	"null",
];
/// Fields that support distinct-value aggregation.
pub const DISTINCT_FIELDS: [&str; 10] = [
	"status",
	"priority",
	"assignee",
	"reporter",
	"issuetype",
	"project",
	"labels",
	"resolution",
	"components",
	"fixVersions",
];
/// Characters removed from every interpolated value.
pub const STRIPPED_CHARS: [char; 6] = ['"', '\'', '\\', ';', '(', ')'];

const MAX_IDENTIFIER_LEN: usize = 64;

/// Removes injection-capable characters from a value and trims the result.
pub fn sanitize_value(raw: &str) -> String {
	raw.chars()
		.filter(|c| !STRIPPED_CHARS.contains(c) && !c.is_control())
		.collect::<String>()
		.trim()
		.to_owned()
}

/// Accepts `[A-Za-z][A-Za-z0-9_.]*` identifiers (which covers `customfield_N`).
pub fn validate_field(raw: &str) -> Result<String, ValidationError> {
	let field = raw.trim();
	let mut chars = field.chars();
	let valid = field.len() <= MAX_IDENTIFIER_LEN
		&& chars.next().is_some_and(|c| c.is_ascii_alphabetic())
		&& chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');

	if valid {
		Ok(field.to_owned())
	} else {
		Err(ValidationError::InvalidField { field: raw.to_owned() })
	}
}

/// Validates a distinct-aggregation field against [`DISTINCT_FIELDS`].
pub fn validate_distinct_field(raw: &str) -> Result<String, ValidationError> {
	let field = validate_field(raw)?;

	if DISTINCT_FIELDS.contains(&field.as_str()) {
		Ok(field)
	} else {
		Err(ValidationError::DistinctFieldNotAllowed { field })
	}
}

/// Accepts `PROJ-123` style keys and numeric issue ids.
pub fn validate_issue_key(raw: &str) -> Result<&str, ValidationError> {
	let key = raw.trim();
	let numeric = !key.is_empty() && key.chars().all(|c| c.is_ascii_digit());
	let keyed = key.split_once('-').is_some_and(|(project, number)| {
		project.chars().next().is_some_and(|c| c.is_ascii_uppercase())
			&& project.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
			&& !number.is_empty()
			&& number.chars().all(|c| c.is_ascii_digit())
	});

	if (numeric || keyed) && key.len() <= MAX_IDENTIFIER_LEN {
		Ok(key)
	} else {
		Err(ValidationError::InvalidIssueKey { key: raw.to_owned() })
	}
}

/// Normalizes a caller-supplied API path into one relative to the tenant's API base.
///
/// Absolute URLs, scheme prefixes, protocol-relative paths, dot segments in any percent
/// spelling, query or fragment markers, and control characters are rejected.
pub fn validate_api_path(raw: &str) -> Result<&str, ValidationError> {
	let path = raw.strip_prefix('/').unwrap_or(raw);
	let first_segment = path.split('/').next().unwrap_or_default();
	let valid = !path.is_empty()
		&& !raw.starts_with("//")
		&& !first_segment.contains(':')
		&& !path.contains(['?', '#', '\\'])
		&& !path.chars().any(char::is_control)
		&& path.split('/').all(|segment| !is_dot_segment(segment));

	if valid { Ok(path) } else { Err(ValidationError::InvalidPath { path: raw.to_owned() }) }
}

// Dot segments in any spelling the URL parser normalizes, including `%2e`.
fn is_dot_segment(segment: &str) -> bool {
	let decoded = segment.to_ascii_lowercase().replace("%2e", ".");

	decoded == "." || decoded == ".."
}

/// Comparison operators accepted in clauses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
	/// `=`
	Eq,
	/// `!=`
	NotEq,
	/// `~`
	Contains,
	/// `!~`
	NotContains,
	/// `>`
	Gt,
	/// `>=`
	Gte,
	/// `<`
	Lt,
	/// `<=`
	Lte,
	/// `in`
	In,
	/// `not in`
	NotIn,
	/// `is`
	Is,
	/// `is not`
	IsNot,
}
impl Operator {
	/// Query-language spelling.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Eq => "=",
			Self::NotEq => "!=",
			Self::Contains => "~",
			Self::NotContains => "!~",
			Self::Gt => ">",
			Self::Gte => ">=",
			Self::Lt => "<",
			Self::Lte => "<=",
			Self::In => "in",
			Self::NotIn => "not in",
			Self::Is => "is",
			Self::IsNot => "is not",
		}
	}

	fn takes_list(self) -> bool {
		matches!(self, Self::In | Self::NotIn)
	}
}
impl FromStr for Operator {
	type Err = ValidationError;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_lowercase();

		Ok(match normalized.as_str() {
			"=" => Self::Eq,
			"!=" => Self::NotEq,
			"~" => Self::Contains,
			"!~" => Self::NotContains,
			">" => Self::Gt,
			">=" => Self::Gte,
			"<" => Self::Lt,
			"<=" => Self::Lte,
			"in" => Self::In,
			"not in" => Self::NotIn,
			"is" => Self::Is,
			"is not" => Self::IsNot,
			_ => return Err(ValidationError::InvalidOperator { operator: raw.to_owned() }),
		})
	}
}

/// Sanitized clause value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClauseValue {
	/// Allow-listed fragment rendered verbatim.
	Trusted(String),
	/// Sanitized literal rendered in double quotes.
	Literal(String),
	/// Values for `in` / `not in`.
	List(Vec<ClauseValue>),
}
impl ClauseValue {
	fn parse(raw: &str) -> Option<Self> {
		let trimmed = raw.trim();

		if let Some(fragment) = TRUSTED_FRAGMENTS.iter().find(|fragment| **fragment == trimmed) {
			return Some(Self::Trusted((*fragment).to_owned()));
		}

		let literal = sanitize_value(trimmed);

		(!literal.is_empty()).then_some(Self::Literal(literal))
	}

	fn render(&self) -> String {
		match self {
			Self::Trusted(fragment) => fragment.clone(),
			Self::Literal(literal) => format!("\"{literal}\""),
			Self::List(values) =>
				format!("({})", values.iter().map(Self::render).collect::<Vec<_>>().join(", ")),
		}
	}
}

/// One validated `field operator value` clause.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clause {
	/// Validated field identifier.
	pub field: String,
	/// Comparison operator.
	pub operator: Operator,
	/// Sanitized value.
	pub value: ClauseValue,
}
impl Clause {
	/// Validates and sanitizes an untrusted clause.
	pub fn parse(param: &crate::search::ClauseParam) -> Result<Self, ValidationError> {
		let field = validate_field(&param.field)?;
		let operator = param.operator.parse::<Operator>()?;
		let invalid = || ValidationError::InvalidValue { field: field.clone() };
		let value = if operator.takes_list() {
			let values = param
				.value
				.split(',')
				.filter(|part| !part.trim().is_empty())
				.map(|part| ClauseValue::parse(part).ok_or_else(invalid))
				.collect::<Result<Vec<_>, _>>()?;

			if values.is_empty() {
				return Err(invalid());
			}

			ClauseValue::List(values)
		} else {
			ClauseValue::parse(&param.value).ok_or_else(invalid)?
		};

		let empty_check = matches!(
			&value,
			ClauseValue::Trusted(fragment) if fragment == "EMPTY" || fragment == "null"
		);

		if matches!(operator, Operator::Is | Operator::IsNot) && !empty_check {
			return Err(invalid());
		}

		Ok(Self { field, operator, value })
	}

	/// Renders the clause in the provider's query language.
	pub fn render(&self) -> String {
		format!("{} {} {}", self.field, self.operator.as_str(), self.value.render())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::search::ClauseParam;

	#[test]
	fn sanitized_values_contain_no_injection_characters() {
		let hostile = [
			r#"ENG" OR project = "SECRET"#,
			r#"foo\") OR (1=1"#,
			"a;b'c(d)e",
			"\"\"\"",
			"multi\nline\ttext",
		];

		for input in hostile {
			let out = sanitize_value(input);

			assert!(
				!out.contains(STRIPPED_CHARS.as_slice()),
				"Sanitized output still carries a stripped character: {out:?}."
			);
			assert!(!out.chars().any(char::is_control));
		}
		assert_eq!(sanitize_value(r#"ENG" OR project = "SECRET"#), "ENG OR project = SECRET");
	}

	#[test]
	fn injected_values_stay_inside_quotes() {
		let clause = Clause::parse(&ClauseParam::new("project", "=", r#"ENG" OR project = "HR"#))
			.expect("Sanitized clause should parse.");

		assert_eq!(clause.render(), "project = \"ENG OR project = HR\"");
	}

	#[test]
	fn trusted_fragments_require_exact_match() {
		let exact = Clause::parse(&ClauseParam::new("assignee", "=", "currentUser()"))
			.expect("Trusted fragment should parse.");
		let near = Clause::parse(&ClauseParam::new("assignee", "=", "currentuser()"))
			.expect("Near-miss should parse as a literal.");
		let suffixed = Clause::parse(&ClauseParam::new("assignee", "=", "currentUser() OR 1=1"))
			.expect("Suffixed fragment should parse as a literal.");

		assert_eq!(exact.render(), "assignee = currentUser()");
		assert_eq!(near.render(), "assignee = \"currentuser\"");
		assert_eq!(suffixed.render(), "assignee = \"currentUser OR 1=1\"");
	}

	#[test]
	fn fields_and_operators_are_allow_listed() {
		assert!(validate_field("customfield_10020").is_ok());
		assert!(validate_field("status.name").is_ok());
		assert!(validate_field("status = x OR y").is_err());
		assert!(validate_field("1abc").is_err());
		assert!(validate_field("").is_err());
		assert_eq!("NOT   IN".parse::<Operator>(), Ok(Operator::NotIn));
		assert!(" OR ".parse::<Operator>().is_err());
	}

	#[test]
	fn empty_values_and_bad_is_operands_fail() {
		assert!(matches!(
			Clause::parse(&ClauseParam::new("summary", "~", "\"();")),
			Err(ValidationError::InvalidValue { .. })
		));
		assert!(matches!(
			Clause::parse(&ClauseParam::new("labels", "in", " , ,")),
			Err(ValidationError::InvalidValue { .. })
		));
		assert!(matches!(
			Clause::parse(&ClauseParam::new("assignee", "is", "bob")),
			Err(ValidationError::InvalidValue { .. })
		));
		assert_eq!(
			Clause::parse(&ClauseParam::new("assignee", "is not", "EMPTY"))
				.expect("EMPTY is a valid operand.")
				.render(),
			"assignee is not EMPTY"
		);
	}

	#[test]
	fn issue_keys_and_paths_are_validated() {
		assert_eq!(validate_issue_key("ENG-42"), Ok("ENG-42"));
		assert_eq!(validate_issue_key("10001"), Ok("10001"));
		assert!(validate_issue_key("eng-42").is_err());
		assert!(validate_issue_key("ENG-42/../admin").is_err());
		assert_eq!(validate_api_path("/issue/ENG-1"), Ok("issue/ENG-1"));
		assert_eq!(validate_api_path("project"), Ok("project"));
		assert!(validate_api_path("https://evil.example/x").is_err());
		assert!(validate_api_path("//evil.example/x").is_err());
		assert!(validate_api_path("issue/../../admin").is_err());
		assert!(validate_api_path("search?jql=x").is_err());
		assert!(validate_api_path("/").is_err());
		assert!(validate_api_path("http:evil.example/steal").is_err());
		assert!(validate_api_path("javascript:alert").is_err());
		assert!(validate_api_path("%2e%2e/%2e%2e/other").is_err());
		assert!(validate_api_path("issue/%2E%2e/admin").is_err());
		assert!(validate_api_path("issue/.%2E").is_err());
		assert_eq!(validate_api_path("issue/ENG-1/comment:all"), Ok("issue/ENG-1/comment:all"));
	}
}
