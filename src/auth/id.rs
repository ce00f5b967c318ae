//! Strongly typed identifiers for users, tenants, and providers.
//!
//! Each kind carries its own character rules: tenant identifiers are interpolated into API
//! paths, so they are limited to URL path-segment characters, while user identifiers come
//! from the host application and only need to be printable.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $kind:literal, $max:expr, $allowed:expr, $doc:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Longest accepted identifier, in bytes.
			pub const MAX_LEN: usize = $max;

			/// Validates and wraps `value`.
			pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
				let value = value.into();

				check($kind, &value, Self::MAX_LEN, $allowed)?;

				Ok(Self(value))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &str {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, IdentifierError> {
				Self::new(value)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, IdentifierError> {
				Self::new(s)
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, "{}({})", $kind, self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
	};
}

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// Nothing was supplied.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Identifier kind.
		kind: &'static str,
	},
	/// The identifier is longer than its kind permits.
	#[error("{kind} identifier exceeds {max} bytes.")]
	TooLong {
		/// Identifier kind.
		kind: &'static str,
		/// Maximum permitted length.
		max: usize,
	},
	/// A character outside the kind's alphabet was found.
	#[error("{kind} identifier contains {found:?}.")]
	InvalidCharacter {
		/// Identifier kind.
		kind: &'static str,
		/// First offending character.
		found: char,
	},
}

def_id! {
	UserId,
	"User",
	256,
	|c: char| !c.is_whitespace() && !c.is_control(),
	"Host-application user the proxy acts on behalf of."
}
def_id! {
	TenantId,
	"Tenant",
	128,
	|c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'),
	"External site a bearer token is scoped to; safe to splice into a URL path."
}
def_id! {
	ProviderId,
	"Provider",
	64,
	|c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_'),
	"Name of an OAuth provider descriptor."
}

fn check(
	kind: &'static str,
	value: &str,
	max: usize,
	allowed: impl Fn(char) -> bool,
) -> Result<(), IdentifierError> {
	if value.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if value.len() > max {
		return Err(IdentifierError::TooLong { kind, max });
	}
	if let Some(found) = value.chars().find(|c| !allowed(*c)) {
		return Err(IdentifierError::InvalidCharacter { kind, found });
	}
	// Dot-only segments would walk out of the tenant-scoped API base.
	if kind == "Tenant" && value.chars().all(|c| c == '.') {
		return Err(IdentifierError::InvalidCharacter { kind, found: '.' });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn tenants_stay_inside_one_path_segment() {
		assert!(TenantId::new("a3b1c2d4-0000-4e5f-9a8b-1234567890ab").is_ok());
		assert_eq!(
			TenantId::new("../admin"),
			Err(IdentifierError::InvalidCharacter { kind: "Tenant", found: '/' })
		);
		assert!(TenantId::new("..").is_err());
		assert!(TenantId::new("site?x=1").is_err());
		assert!(TenantId::new(" tenant-123").is_err(), "Leading whitespace must be rejected.");
		assert_eq!(TenantId::new(""), Err(IdentifierError::Empty { kind: "Tenant" }));
	}

	#[test]
	fn users_accept_host_formats() {
		let user =
			UserId::new("jane.doe@acme.example").expect("Email-style users should be valid.");

		assert_eq!(user.as_ref(), "jane.doe@acme.example");
		assert_eq!(format!("{user:?}"), "User(jane.doe@acme.example)");
		assert!(UserId::new("with space").is_err());
		assert!(UserId::new(format!("non{}breaking", '\u{00A0}')).is_err());
	}

	#[test]
	fn providers_are_lowercase_slugs() {
		assert!(ProviderId::new("mock-tracker").is_ok());
		assert!(ProviderId::new("Atlassian").is_err());
		assert_eq!(
			ProviderId::new("a".repeat(ProviderId::MAX_LEN + 1)),
			Err(IdentifierError::TooLong { kind: "Provider", max: ProviderId::MAX_LEN })
		);
	}

	#[test]
	fn deserialization_runs_the_same_rules() {
		let tenant: TenantId =
			serde_json::from_str("\"tenant-42\"").expect("Tenant should deserialize.");
		let map = HashMap::from([(tenant, 7_u8)]);

		assert_eq!(map.get("tenant-42"), Some(&7));
		assert!(serde_json::from_str::<TenantId>("\"tenant/42\"").is_err());
	}
}
