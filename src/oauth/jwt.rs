//! Unverified JWT claims decoding.
//!
//! The broker reads claims only to label accounts; signatures are never checked here.

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use serde_json::{Map, Value};
// self
use crate::_prelude::*;

/// Claims object decoded from a JWT payload.
pub type JwtClaims = Map<String, Value>;

/// Errors produced by [`decode_jwt_claims`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum JwtError {
	/// The token does not have exactly three dot-separated segments.
	#[error("Invalid JWT token format: token must have three parts separated by dots")]
	InvalidFormat,
	/// A segment is not base64 JSON, or the payload is not an object.
	#[error("Failed to parse JWT token")]
	Parse,
}

/// Decodes the payload segment of `token` into its claims object.
///
/// The header must also decode to a JSON object; anything else fails rather than yielding
/// partial claims.
pub fn decode_jwt_claims(token: &str) -> Result<JwtClaims, JwtError> {
	let segments = token.split('.').collect::<Vec<_>>();
	let [header, payload, _signature] = segments.as_slice() else {
		return Err(JwtError::InvalidFormat);
	};

	decode_object(header)?;

	decode_object(payload)
}

/// Reads a claim as a string.
pub fn claim_str<'a>(claims: &'a JwtClaims, name: &str) -> Option<&'a str> {
	claims.get(name).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Reads a `scope`/`scp` claim as a list, accepting both space-delimited strings and arrays.
pub fn claim_scopes(claims: &JwtClaims) -> Option<Vec<String>> {
	let value = claims.get("scope").or_else(|| claims.get("scp"))?;

	match value {
		Value::String(s) => Some(s.split(' ').filter(|s| !s.is_empty()).map(str::to_owned).collect()),
		Value::Array(items) => Some(items.iter().filter_map(Value::as_str).map(str::to_owned).collect()),
		_ => None,
	}
}

fn decode_object(segment: &str) -> Result<JwtClaims, JwtError> {
	// Accept both base64url and standard alphabets, padded or not.
	let normalized = segment
		.trim_end_matches('=')
		.chars()
		.map(|c| match c {
			'-' => '+',
			'_' => '/',
			other => other,
		})
		.collect::<String>();
	let bytes = STANDARD_NO_PAD.decode(normalized).map_err(|_| JwtError::Parse)?;

	match serde_json::from_slice::<Value>(&bytes) {
		Ok(Value::Object(map)) => Ok(map),
		_ => Err(JwtError::Parse),
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
	use serde_json::json;
	// self
	use super::*;

	fn token_with(header: &str, payload: &str) -> String {
		format!("{}.{}.fake-signature", STANDARD.encode(header), URL_SAFE_NO_PAD.encode(payload))
	}

	#[test]
	fn decodes_payload_claims() {
		let payload = json!({ "sub": "user123", "name": "Test User", "exp": 1716239022 });
		let token = token_with(r#"{"alg":"HS256","typ":"JWT"}"#, &payload.to_string());
		let claims = decode_jwt_claims(&token).expect("Well-formed token should decode.");

		assert_eq!(Value::Object(claims.clone()), payload);
		assert_eq!(claim_str(&claims, "name"), Some("Test User"));
	}

	#[test]
	fn rejects_wrong_segment_counts() {
		for token in ["only.two", "one", "has.four.parts.here"] {
			assert_eq!(decode_jwt_claims(token), Err(JwtError::InvalidFormat));
		}
	}

	#[test]
	fn rejects_non_json_segments() {
		assert_eq!(
			decode_jwt_claims(&token_with("not-json", r#"{"sub":"test"}"#)),
			Err(JwtError::Parse)
		);
		assert_eq!(
			decode_jwt_claims(&token_with(r#"{"alg":"HS256"}"#, "not-json")),
			Err(JwtError::Parse)
		);
		assert_eq!(decode_jwt_claims(&token_with(r#"{"alg":"HS256"}"#, "[1,2]")), Err(JwtError::Parse));
	}

	#[test]
	fn scope_claims_accept_strings_and_arrays() {
		let claims = json!({ "scope": "read  write" });
		let Value::Object(map) = claims else { panic!("Fixture should be an object.") };

		assert_eq!(claim_scopes(&map), Some(vec!["read".into(), "write".into()]));

		let claims = json!({ "scp": ["a", "b"] });
		let Value::Object(map) = claims else { panic!("Fixture should be an object.") };

		assert_eq!(claim_scopes(&map), Some(vec!["a".into(), "b".into()]));
	}
}
