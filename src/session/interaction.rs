//! User-facing prompts the orchestrator suspends on.
//!
//! Rendering is the host's business; the orchestrator only needs the answers. None of these
//! calls time out.

// self
use crate::{
	_prelude::*,
	auth::{AccountInfo, Session},
	consumer::Consumer,
	registry::{ProviderFuture, ProviderInfo},
};

/// Answer to the "continue with a different account?" prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncorrectAccountChoice {
	/// Keep the session for the account that signed in.
	KeepNew,
	/// Sign in again, hoping for the requested account.
	TryAgain,
	/// Abort; resolution fails with [`Error::Cancelled`].
	Cancel,
}

/// Answer to an access request prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessDecision {
	/// Grant and remember.
	Allow,
	/// Deny and remember.
	Deny,
	/// Dismissed; nothing is recorded.
	Cancel,
}

/// One row of the account picker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountChoice {
	/// An existing session.
	Session(Session),
	/// A signed-in account without a session for the requested scopes.
	Account(AccountInfo),
	/// Sign in to another account.
	NewAccount,
}
impl AccountChoice {
	/// Label shown for the row.
	pub fn label(&self) -> &str {
		match self {
			Self::Session(session) => &session.account.label,
			Self::Account(account) => &account.label,
			Self::NewAccount => "Sign in to another account",
		}
	}
}

/// Prompts shown while resolving a session.
pub trait SessionInteraction
where
	Self: Send + Sync,
{
	/// Asks whether `consumer` may sign in with the provider; `recreating` is set when existing
	/// sessions are being forced through.
	fn login_prompt<'a>(
		&'a self,
		provider: &'a ProviderInfo,
		consumer: &'a Consumer,
		recreating: bool,
	) -> ProviderFuture<'a, bool>;

	/// Asks what to do when the signed-in account differs from the requested one.
	fn continue_with_incorrect_account<'a>(
		&'a self,
		chosen: &'a AccountInfo,
		requested: &'a AccountInfo,
	) -> ProviderFuture<'a, IncorrectAccountChoice>;

	/// Lets the user pick among `choices`; `None` means dismissed.
	fn select_account<'a>(
		&'a self,
		provider: &'a ProviderInfo,
		consumer: &'a Consumer,
		choices: &'a [AccountChoice],
	) -> ProviderFuture<'a, Option<usize>>;

	/// Asks whether `consumer` may use `account`.
	fn access_prompt<'a>(
		&'a self,
		provider: &'a ProviderInfo,
		account: &'a AccountInfo,
		consumer: &'a Consumer,
	) -> ProviderFuture<'a, AccessDecision>;
}
