//! Strongly typed identifiers for providers, consumers, and sessions.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal, $validate:path) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				$validate($kind, view)?;

				Ok(Self(view.to_owned()))
			}

			/// Returns the identifier as a string slice.
			pub fn as_str(&self) -> &str {
				&self.0
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
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

			fn try_from(value: String) -> Result<Self, Self::Error> {
				$validate($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl TryFrom<&str> for $name {
			type Error = IdentifierError;

			fn try_from(value: &str) -> Result<Self, Self::Error> {
				Self::new(value)
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

const TOKEN_ID_MAX_LEN: usize = 256;
// Dynamic provider ids embed two absolute URLs.
const PROVIDER_ID_MAX_LEN: usize = 4096;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (provider, consumer, session).
		kind: &'static str,
	},
	/// The identifier contains whitespace where none is allowed.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// Kind of identifier (provider, consumer, session).
		kind: &'static str,
	},
	/// The identifier exceeded the allowed character count.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (provider, consumer, session).
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
}

def_id! {
	ProviderId,
	"Identifier of an authentication provider. Dynamic providers join the authorization server and resource with a single space.",
	"Provider",
	validate_provider
}
def_id! {
	ConsumerId,
	"Identifier of a consumer (an extension or an MCP server).",
	"Consumer",
	validate_token
}
def_id! { SessionId, "Identifier of a provider-issued session.", "Session", validate_token }

fn validate_token(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace { kind });
	}
	if view.len() > TOKEN_ID_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: TOKEN_ID_MAX_LEN });
	}

	Ok(())
}

fn validate_provider(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.trim().is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.starts_with(char::is_whitespace) || view.ends_with(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace { kind });
	}
	if view.len() > PROVIDER_ID_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: PROVIDER_ID_MAX_LEN });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn consumer_ids_reject_whitespace() {
		assert!(ConsumerId::new(" ext").is_err(), "Leading whitespace must be rejected.");
		assert!(ConsumerId::new("pub.ext name").is_err());
		assert!(ConsumerId::new("").is_err());

		let id = ConsumerId::new("publisher.extension").expect("Consumer fixture should be valid.");

		assert_eq!(id.as_ref(), "publisher.extension");
	}

	#[test]
	fn provider_ids_allow_inner_spaces_for_dynamic_providers() {
		let id = ProviderId::new("https://auth.example.com/ https://api.example.com/mcp")
			.expect("Dynamic provider identifiers should be valid.");

		assert!(id.contains(' '));
		assert!(ProviderId::new(" github").is_err());
		assert!(ProviderId::new("   ").is_err());
	}

	#[test]
	fn serde_round_trip_enforces_validation() {
		let id: ConsumerId =
			serde_json::from_str("\"ms-vscode.remote\"").expect("Consumer should deserialize.");

		assert_eq!(id.as_ref(), "ms-vscode.remote");
		assert!(serde_json::from_str::<ConsumerId>("\"with space\"").is_err());
	}

	#[test]
	fn borrow_supports_fast_lookup() {
		let map: HashMap<ProviderId, u8> = HashMap::from_iter([(
			ProviderId::new("github").expect("Provider used for lookup should be valid."),
			7_u8,
		)]);

		assert_eq!(map.get("github"), Some(&7));
	}
}
