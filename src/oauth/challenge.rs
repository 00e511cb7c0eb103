//! `WWW-Authenticate` challenge parsing (RFC 7235 section 4.1).
//!
//! A header value may carry several challenges separated by commas, and parameters inside a
//! challenge are separated by commas too. The value is first split on commas outside quoted
//! strings. A piece whose first whitespace-delimited word contains no `=`, and is not followed
//! by one, starts a new challenge (the word is the scheme and the rest, if any, its first
//! parameter or token68); every other piece is a parameter of the current challenge.

// self
use crate::_prelude::*;

/// One parsed authentication challenge.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
	/// Authentication scheme, e.g. `Bearer`.
	pub scheme: String,
	/// `auth-param` pairs with quoted values unescaped.
	pub params: BTreeMap<String, String>,
	/// `token68` credential form, when the challenge uses it instead of parameters.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token68: Option<String>,
}
impl Challenge {
	/// Looks up a parameter by name, case-insensitively.
	pub fn param(&self, name: &str) -> Option<&str> {
		self.params.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
	}

	/// Returns `true` for the `Bearer` scheme (case-insensitive).
	pub fn is_bearer(&self) -> bool {
		self.scheme.eq_ignore_ascii_case("bearer")
	}
}

/// Splits a `WWW-Authenticate` header value into challenges.
pub fn parse_www_authenticate(value: &str) -> Vec<Challenge> {
	let mut challenges = Vec::new();
	let mut current: Option<Challenge> = None;

	for piece in split_outside_quotes(value) {
		let piece = piece.trim();

		if piece.is_empty() {
			continue;
		}

		let (head, rest) = match piece.split_once(char::is_whitespace) {
			Some((head, rest)) => (head, Some(rest.trim_start())),
			None => (piece, None),
		};

		// `name = value` is still a parameter (`token BWS "=" BWS`).
		let is_param = head.contains('=') || rest.is_some_and(|r| r.starts_with('='));

		if !is_param {
			if let Some(done) = current.take() {
				challenges.push(done);
			}

			let mut challenge = Challenge { scheme: head.to_owned(), ..Default::default() };

			if let Some(rest) = rest.filter(|r| !r.is_empty()) {
				if is_token68(rest) {
					challenge.token68 = Some(rest.to_owned());
				} else {
					insert_param(&mut challenge, rest);
				}
			}

			current = Some(challenge);
		} else if let Some(challenge) = current.as_mut() {
			insert_param(challenge, piece);
		}
	}

	if let Some(done) = current {
		challenges.push(done);
	}

	challenges
}

/// Scopes requested by the first `Bearer` challenge carrying a `scope` parameter.
pub fn scopes_from_challenges(challenges: &[Challenge]) -> Option<Vec<String>> {
	challenges.iter().filter(|c| c.is_bearer()).find_map(|c| c.param("scope")).map(|scope| {
		scope.split(' ').filter(|s| !s.is_empty()).map(str::to_owned).collect()
	})
}

/// `resource_metadata` URL advertised by a `Bearer` challenge (RFC 9728 section 5.1).
pub fn resource_metadata_from_challenges(challenges: &[Challenge]) -> Option<&str> {
	challenges.iter().filter(|c| c.is_bearer()).find_map(|c| c.param("resource_metadata"))
}

fn split_outside_quotes(value: &str) -> Vec<&str> {
	let mut pieces = Vec::new();
	let mut start = 0;
	let mut in_quotes = false;
	let mut escaped = false;

	for (idx, ch) in value.char_indices() {
		match ch {
			_ if escaped => escaped = false,
			'\\' if in_quotes => escaped = true,
			'"' => in_quotes = !in_quotes,
			',' if !in_quotes => {
				pieces.push(&value[start..idx]);
				start = idx + 1;
			},
			_ => {},
		}
	}

	pieces.push(&value[start..]);

	pieces
}

fn insert_param(challenge: &mut Challenge, raw: &str) {
	let Some((key, value)) = raw.split_once('=') else {
		return;
	};
	let key = key.trim();

	if key.is_empty() {
		return;
	}

	challenge.params.insert(key.to_owned(), unquote(value.trim()));
}

fn unquote(value: &str) -> String {
	let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) else {
		return value.to_owned();
	};
	let mut out = String::with_capacity(inner.len());
	let mut chars = inner.chars();

	while let Some(ch) = chars.next() {
		if ch == '\\' {
			if let Some(next) = chars.next() {
				out.push(next);
			}
		} else {
			out.push(ch);
		}
	}

	out
}

// token68 = 1*( ALPHA / DIGIT / "-" / "." / "_" / "~" / "+" / "/" ) *"="
fn is_token68(value: &str) -> bool {
	let body = value.trim_end_matches('=');

	!body.is_empty()
		&& body.chars().all(|c| c.is_ascii_alphanumeric() || "-._~+/".contains(c))
}
