//! Redacted secrets and the persisted token set kept for dynamic providers.

// self
use crate::{_prelude::*, auth::ScopeList};

/// Redacted token secret wrapper keeping sensitive material out of logs and error messages.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner secret value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Token set issued by an authorization server and persisted for a dynamic provider.
///
/// `created_at` is stamped locally when the response arrives so the absolute expiry can be
/// recomputed after a restart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
	/// Access token secret.
	pub access_token: TokenSecret,
	/// Token type reported by the server (usually `Bearer`).
	pub token_type: String,
	/// Lifetime in seconds relative to `created_at`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expires_in: Option<u64>,
	/// Refresh token secret, if issued.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<TokenSecret>,
	/// Space-delimited scopes granted by the server.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub scope: Option<String>,
	/// OpenID Connect ID token, if issued.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id_token: Option<TokenSecret>,
	/// Local instant the token response was received.
	#[serde(with = "time::serde::timestamp")]
	pub created_at: OffsetDateTime,
}
impl StoredToken {
	/// Creates a token set stamped with the current instant.
	pub fn new(access_token: impl Into<String>, token_type: impl Into<String>) -> Self {
		Self {
			access_token: TokenSecret::new(access_token),
			token_type: token_type.into(),
			expires_in: None,
			refresh_token: None,
			scope: None,
			id_token: None,
			created_at: OffsetDateTime::now_utc(),
		}
	}

	/// Sets the relative lifetime in seconds.
	pub fn with_expires_in(mut self, seconds: u64) -> Self {
		self.expires_in = Some(seconds);

		self
	}

	/// Sets the refresh token.
	pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Sets the granted scope string.
	pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
		self.scope = Some(scope.into());

		self
	}

	/// Sets the ID token.
	pub fn with_id_token(mut self, token: impl Into<String>) -> Self {
		self.id_token = Some(TokenSecret::new(token));

		self
	}

	/// Overrides the creation instant.
	pub fn created_at(mut self, instant: OffsetDateTime) -> Self {
		self.created_at = instant;

		self
	}

	/// Absolute expiry, when the server reported a lifetime.
	pub fn expires_at(&self) -> Option<OffsetDateTime> {
		let secs = i64::try_from(self.expires_in?).ok()?;

		self.created_at.checked_add(Duration::seconds(secs))
	}

	/// Returns `true` when the token expires within `window` of `now`.
	///
	/// Tokens without a reported lifetime never expire from the broker's point of view.
	pub fn expires_within(&self, window: Duration, now: OffsetDateTime) -> bool {
		self.expires_at().is_some_and(|at| at - now < window)
	}

	/// Scopes granted by the token response, in server order.
	pub fn granted_scopes(&self) -> Option<ScopeList> {
		self.scope.as_deref().map(ScopeList::parse)
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn secret_formatters_redact() {
		let secret = TokenSecret::new("super-secret");

		assert_eq!(format!("{secret:?}"), "TokenSecret(\"<redacted>\")");
		assert_eq!(format!("{secret}"), "<redacted>");
	}

	#[test]
	fn debug_output_never_contains_secrets() {
		let token = StoredToken::new("access-value", "Bearer")
			.with_refresh_token("refresh-value")
			.with_id_token("id-value");
		let rendered = format!("{token:?}");

		assert!(!rendered.contains("access-value"));
		assert!(!rendered.contains("refresh-value"));
		assert!(!rendered.contains("id-value"));
	}

	#[test]
	fn expiry_window_uses_created_at() {
		let created = macros::datetime!(2025-01-01 00:00 UTC);
		let token = StoredToken::new("a", "Bearer").with_expires_in(600).created_at(created);

		assert_eq!(token.expires_at(), Some(macros::datetime!(2025-01-01 00:10 UTC)));
		assert!(!token.expires_within(Duration::minutes(5), created));
		assert!(token.expires_within(Duration::minutes(5), macros::datetime!(2025-01-01 00:06 UTC)));

		let no_expiry = StoredToken::new("a", "Bearer").created_at(created);

		assert!(!no_expiry.expires_within(Duration::minutes(5), created + Duration::days(365)));
	}

	#[test]
	fn serialized_form_is_plain_json() {
		let token = StoredToken::new("a", "Bearer")
			.with_scope("read write")
			.created_at(macros::datetime!(2025-01-01 00:00 UTC));
		let json = serde_json::to_value(&token).expect("Token set should serialize.");

		assert_eq!(json["access_token"], "a");
		assert_eq!(json["created_at"], 1_735_689_600);
		assert!(json.get("refresh_token").is_none());

		let back: StoredToken = serde_json::from_value(json).expect("Token set should deserialize.");

		assert_eq!(back, token);
		assert_eq!(back.granted_scopes().map(|s| s.joined()), Some("read write".into()));
	}
}
