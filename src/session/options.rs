//! Consumer-facing request shapes and their validation.

// self
use crate::{
	_prelude::*,
	auth::AccountInfo,
	registry::{ChallengeRequest, ProviderSessionOptions},
};

/// Options accepted by `get_session`.
///
/// `force_new_session`, `create_if_none`, and `silent` are mutually exclusive in pairs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionOptions {
	/// Create a session (after consent) when none is usable.
	pub create_if_none: bool,
	/// Create a new session even when one exists.
	pub force_new_session: bool,
	/// Never prompt and never record pending requests.
	pub silent: bool,
	/// Drop the stored account preference before resolving.
	pub clear_session_preference: bool,
	/// Account the session must belong to; wins over the stored preference.
	pub account: Option<AccountInfo>,
	/// Authorization server the session is for.
	pub authorization_server: Option<Url>,
}
impl SessionOptions {
	/// Options that create a session when none is usable.
	pub fn create_if_none() -> Self {
		Self { create_if_none: true, ..Default::default() }
	}

	/// Options that always create a new session.
	pub fn force_new_session() -> Self {
		Self { force_new_session: true, ..Default::default() }
	}

	/// Options that never prompt.
	pub fn silent() -> Self {
		Self { silent: true, ..Default::default() }
	}

	/// Requests a specific account.
	pub fn with_account(mut self, account: AccountInfo) -> Self {
		self.account = Some(account);

		self
	}

	/// Targets a specific authorization server.
	pub fn with_authorization_server(mut self, server: Url) -> Self {
		self.authorization_server = Some(server);

		self
	}

	/// Clears the stored account preference first.
	pub fn clearing_preference(mut self) -> Self {
		self.clear_session_preference = true;

		self
	}

	/// Rejects mutually exclusive combinations.
	pub fn validate(&self) -> Result<()> {
		let conflict = if self.force_new_session && self.create_if_none {
			Some(("forceNewSession", "createIfNone"))
		} else if self.force_new_session && self.silent {
			Some(("forceNewSession", "silent"))
		} else if self.create_if_none && self.silent {
			Some(("createIfNone", "silent"))
		} else {
			None
		};

		match conflict {
			Some((first, second)) => Err(Error::OptionConflict { first, second }),
			None => Ok(()),
		}
	}

	pub(crate) fn provider_options(&self) -> ProviderSessionOptions {
		ProviderSessionOptions {
			account: self.account.clone(),
			authorization_server: self.authorization_server.clone(),
		}
	}

	pub(crate) fn fingerprint(&self) -> String {
		format!(
			"{}{}{}{}|{}|{}",
			u8::from(self.create_if_none),
			u8::from(self.force_new_session),
			u8::from(self.silent),
			u8::from(self.clear_session_preference),
			self.account.as_ref().map(|a| a.label.as_str()).unwrap_or_default(),
			self.authorization_server.as_ref().map(Url::as_str).unwrap_or_default(),
		)
	}
}

/// What a consumer asks for: a scope list or a `WWW-Authenticate` challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionRequest {
	/// Plain scope list.
	Scopes(Vec<String>),
	/// Parsed challenges; only providers supporting challenges can serve these.
	Challenges(ChallengeRequest),
}
impl SessionRequest {
	/// Builds a scope request.
	pub fn scopes<I, S>(scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self::Scopes(scopes.into_iter().map(Into::into).collect())
	}

	/// Key identifying equivalent sign-in requests.
	pub fn request_key(&self) -> String {
		match self {
			Self::Scopes(scopes) => scopes.join(" "),
			Self::Challenges(request) => format!(
				"{}:{}",
				request.www_authenticate,
				request.fallback_scopes.as_deref().map(|s| s.join(" ")).unwrap_or_default()
			),
		}
	}

	/// Scopes the request is expected to yield, when they can be known up front.
	pub fn expected_scopes(&self) -> Option<Vec<String>> {
		match self {
			Self::Scopes(scopes) => Some(scopes.clone()),
			Self::Challenges(request) => crate::oauth::scopes_from_challenges(&request.challenges)
				.or_else(|| request.fallback_scopes.clone()),
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn conflicts_are_reported_in_a_fixed_order() {
		let all = SessionOptions {
			create_if_none: true,
			force_new_session: true,
			silent: true,
			..Default::default()
		};

		assert!(matches!(
			all.validate(),
			Err(Error::OptionConflict { first: "forceNewSession", second: "createIfNone" })
		));
		assert!(matches!(
			SessionOptions { silent: true, ..SessionOptions::force_new_session() }.validate(),
			Err(Error::OptionConflict { first: "forceNewSession", second: "silent" })
		));
		assert!(matches!(
			SessionOptions { silent: true, ..SessionOptions::create_if_none() }.validate(),
			Err(Error::OptionConflict { first: "createIfNone", second: "silent" })
		));
		assert!(SessionOptions::silent().clearing_preference().validate().is_ok());
	}

	#[test]
	fn challenge_keys_include_fallback_scopes() {
		let request = SessionRequest::Challenges(ChallengeRequest::from_header(
			r#"Bearer scope="read""#,
			Some(vec!["a".into(), "b".into()]),
		));

		assert_eq!(request.request_key(), r#"Bearer scope="read":a b"#);
		assert_eq!(request.expected_scopes(), Some(vec!["read".to_owned()]));
		assert_eq!(SessionRequest::scopes(["x", "y"]).request_key(), "x y");
	}
}
