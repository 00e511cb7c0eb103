//! Scope list modeling.
//!
//! Sessions keep scopes in the order the provider reported them, while every comparison in the
//! broker is order-independent (RFC 6749 section 3.3). [`ScopeList`] carries both views: the
//! original order for display and persistence, and a sorted key + fingerprint for matching.

// std
use std::sync::OnceLock;
// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use serde::{Deserializer, Serializer, de::Error as DeError};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

/// Separator used when joining scopes; OAuth forbids spaces inside a scope token.
pub const SCOPE_SEPARATOR: char = ' ';

/// Errors emitted when validating scopes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ScopeValidationError {
	/// Empty scope entries are not allowed.
	#[error("Scope entries cannot be empty.")]
	Empty,
	/// Scopes cannot contain embedded whitespace characters.
	#[error("Scope contains whitespace: {scope}.")]
	ContainsWhitespace {
		/// The offending scope string.
		scope: String,
	},
}

/// Ordered list of scopes with order-independent matching helpers.
#[derive(Default)]
pub struct ScopeList {
	scopes: Vec<String>,
	fingerprint_cache: OnceLock<String>,
}
impl ScopeList {
	/// Builds a validated scope list, preserving order and duplicates.
	pub fn new<I, S>(scopes: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut list = Vec::new();

		for scope in scopes {
			let owned: String = scope.into();

			if owned.is_empty() {
				return Err(ScopeValidationError::Empty);
			}
			if owned.chars().any(char::is_whitespace) {
				return Err(ScopeValidationError::ContainsWhitespace { scope: owned });
			}

			list.push(owned);
		}

		Ok(Self { scopes: list, fingerprint_cache: OnceLock::new() })
	}

	/// Splits a space-delimited scope string, ignoring repeated separators.
	pub fn parse(value: &str) -> Self {
		let scopes = value.split(SCOPE_SEPARATOR).filter(|s| !s.is_empty()).map(str::to_owned);

		Self { scopes: scopes.collect(), fingerprint_cache: OnceLock::new() }
	}

	/// Number of scopes (duplicates included).
	pub fn len(&self) -> usize {
		self.scopes.len()
	}

	/// Returns true if no scopes are present.
	pub fn is_empty(&self) -> bool {
		self.scopes.is_empty()
	}

	/// Iterator over scopes in their original order.
	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.scopes.iter().map(String::as_str)
	}

	/// Returns the scopes in their original order.
	pub fn as_slice(&self) -> &[String] {
		&self.scopes
	}

	/// Space-joined scopes in their original order.
	pub fn joined(&self) -> String {
		self.scopes.join(" ")
	}

	/// Space-joined scopes sorted lexicographically; equal for any two matching lists.
	pub fn sorted_key(&self) -> String {
		let mut sorted = self.scopes.clone();

		sorted.sort();

		sorted.join(" ")
	}

	/// Base64 (no padding) SHA-256 digest of [`sorted_key`](Self::sorted_key), cached.
	pub fn fingerprint(&self) -> String {
		self.fingerprint_cache.get_or_init(|| compute_fingerprint(&self.sorted_key())).clone()
	}

	/// Order-independent multiset equality.
	pub fn matches(&self, other: &[String]) -> bool {
		scopes_equal(Some(&self.scopes), Some(other))
	}
}
impl Clone for ScopeList {
	fn clone(&self) -> Self {
		Self { scopes: self.scopes.clone(), fingerprint_cache: OnceLock::new() }
	}
}
impl PartialEq for ScopeList {
	fn eq(&self, other: &Self) -> bool {
		self.matches(&other.scopes)
	}
}
impl Eq for ScopeList {}
impl Debug for ScopeList {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("ScopeList").field(&self.scopes).finish()
	}
}
impl Display for ScopeList {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.joined())
	}
}
impl From<ScopeList> for Vec<String> {
	fn from(value: ScopeList) -> Self {
		value.scopes
	}
}
impl TryFrom<Vec<String>> for ScopeList {
	type Error = ScopeValidationError;

	fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}
impl Serialize for ScopeList {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		self.scopes.serialize(serializer)
	}
}
impl<'de> Deserialize<'de> for ScopeList {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let values = <Vec<String>>::deserialize(deserializer)?;

		ScopeList::new(values).map_err(DeError::custom)
	}
}

/// Order-independent multiset equality over optional scope lists.
///
/// Two absent lists are equal; an absent list never equals a present one, even an empty one.
pub fn scopes_equal(a: Option<&[String]>, b: Option<&[String]>) -> bool {
	match (a, b) {
		(None, None) => true,
		(Some(a), Some(b)) => {
			if a.len() != b.len() {
				return false;
			}

			let mut lhs = a.iter().collect::<Vec<_>>();
			let mut rhs = b.iter().collect::<Vec<_>>();

			lhs.sort();
			rhs.sort();

			lhs == rhs
		},
		_ => false,
	}
}

fn compute_fingerprint(sorted: &str) -> String {
	let mut hasher = Sha256::new();

	hasher.update(sorted.as_bytes());

	STANDARD_NO_PAD.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn owned(values: &[&str]) -> Vec<String> {
		values.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn scopes_equal_is_order_independent() {
		assert!(scopes_equal(Some(&owned(&["a", "b"])), Some(&owned(&["b", "a"]))));
		assert!(scopes_equal(None, None));
		assert!(!scopes_equal(Some(&owned(&["a"])), None));
		assert!(!scopes_equal(None, Some(&owned(&["a"]))));
		assert!(!scopes_equal(Some(&[]), None));
	}

	#[test]
	fn scopes_equal_counts_duplicates() {
		assert!(!scopes_equal(Some(&owned(&["a", "a", "b"])), Some(&owned(&["a", "b", "b"]))));
		assert!(scopes_equal(Some(&owned(&["a", "a", "b"])), Some(&owned(&["b", "a", "a"]))));
		assert!(!scopes_equal(Some(&owned(&["a"])), Some(&owned(&["a", "a"]))));
	}

	#[test]
	fn list_keeps_order_but_keys_sorted() {
		let list = ScopeList::new(["write", "read"]).expect("Scope fixture should be valid.");

		assert_eq!(list.joined(), "write read");
		assert_eq!(list.sorted_key(), "read write");

		let other = ScopeList::parse("read  write");

		assert_eq!(list, other);
		assert_eq!(list.fingerprint(), other.fingerprint());
	}

	#[test]
	fn invalid_scopes_error() {
		assert_eq!(ScopeList::new([""]).expect_err("Empty scope must fail."), ScopeValidationError::Empty);
		assert!(matches!(
			ScopeList::new(["has space"]).expect_err("Whitespace scope must fail."),
			ScopeValidationError::ContainsWhitespace { .. }
		));
	}
}
