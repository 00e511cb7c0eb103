//! Sessions handed to consumers and the change notifications providers publish.

// self
use crate::{
	_prelude::*,
	auth::{ProviderId, SessionId, TokenSecret},
};

/// Account a session was issued for.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountInfo {
	/// Provider-scoped account identifier.
	pub id: String,
	/// Human-readable label; access, usage, and preference records are keyed by it.
	pub label: String,
}
impl AccountInfo {
	/// Builds an account from its id and label.
	pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
		Self { id: id.into(), label: label.into() }
	}
}

/// An issued token plus the account and scopes it was issued for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
	/// Provider-assigned session identifier.
	pub id: SessionId,
	/// Bearer token.
	pub access_token: TokenSecret,
	/// OpenID Connect ID token, when the provider issues one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id_token: Option<TokenSecret>,
	/// Account the session belongs to.
	pub account: AccountInfo,
	/// Granted scopes in provider order.
	pub scopes: Vec<String>,
}
impl Session {
	/// Builds a session without an ID token.
	pub fn new(
		id: SessionId,
		access_token: impl Into<String>,
		account: AccountInfo,
		scopes: Vec<String>,
	) -> Self {
		Self { id, access_token: TokenSecret::new(access_token), id_token: None, account, scopes }
	}

	/// Attaches an ID token.
	pub fn with_id_token(mut self, token: impl Into<String>) -> Self {
		self.id_token = Some(TokenSecret::new(token));

		self
	}
}

/// Delta published whenever a provider's session set changes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionDelta {
	/// Sessions that appeared.
	pub added: Vec<Session>,
	/// Sessions that disappeared.
	pub removed: Vec<Session>,
	/// Sessions whose tokens were replaced in place.
	pub changed: Vec<Session>,
}
impl SessionDelta {
	/// Returns `true` when the delta carries no sessions.
	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
	}
}

/// Session change notification tagged with the originating provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionChangeEvent {
	/// Provider whose sessions changed.
	pub provider_id: ProviderId,
	/// Provider label at the time of the change.
	pub label: String,
	/// The change itself.
	pub delta: SessionDelta,
}
