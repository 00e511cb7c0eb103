//! Authentication provider broker: OAuth/OIDC discovery, dynamic client registration, a
//! provider registry with activation waits, and per-consumer session policy in one crate.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod broker;
pub mod config;
pub mod consumer;
pub mod dynamic;
pub mod error;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod policy;
pub mod query;
pub mod registry;
pub mod session;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and fixtures for tests; enabled via `cfg(test)` or the `test`
	//! crate feature.

	pub use crate::_prelude::*;

	// std
	use std::{
		collections::VecDeque,
		sync::atomic::{AtomicUsize, Ordering},
	};
	// crates.io
	use tokio::sync::broadcast;
	use tokio_util::sync::CancellationToken;
	// self
	#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;
	use crate::{
		auth::{AccountInfo, ProviderId, Session, SessionDelta, SessionId, scopes_equal},
		broker::AuthBroker,
		config::BrokerConfig,
		consumer::Consumer,
		dynamic::DynamicProviderStorage,
		registry::{
			AuthenticationProvider, ProviderFuture, ProviderInfo, ProviderRegistry,
			ProviderSessionOptions,
		},
		session::{AccessDecision, AccountChoice, IncorrectAccountChoice, SessionInteraction},
		store::{MemorySecretStore, MemoryStateStore},
	};

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	#[cfg(feature = "reqwest")]
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Dynamic provider storage over fresh in-memory stores.
	pub fn test_storage() -> Arc<DynamicProviderStorage> {
		Arc::new(DynamicProviderStorage::new(
			Arc::new(MemoryStateStore::default()),
			Arc::new(MemorySecretStore::default()),
		))
	}

	/// Registry with in-memory storage and the default 5 second registration bound.
	pub fn test_registry() -> ProviderRegistry {
		ProviderRegistry::new(
			test_storage(),
			std::time::Duration::from_millis(5_000),
			CancellationToken::new(),
		)
	}

	/// Broker over in-memory stores with the default configuration.
	pub fn test_broker(interaction: Arc<ScriptedInteraction>) -> AuthBroker {
		test_broker_with_config(BrokerConfig::default(), interaction)
	}

	/// Broker over in-memory stores.
	pub fn test_broker_with_config(
		config: BrokerConfig,
		interaction: Arc<ScriptedInteraction>,
	) -> AuthBroker {
		AuthBroker::new(
			config,
			Arc::new(MemoryStateStore::default()),
			Arc::new(MemorySecretStore::default()),
			interaction,
		)
	}

	/// In-memory provider whose sessions are seeded up front and minted on demand.
	///
	/// `create_session` signs in the next queued account, else the requested account, else
	/// `new-user`.
	pub struct StaticProvider {
		info: ProviderInfo,
		sessions: RwLock<Vec<Session>>,
		next_accounts: Mutex<VecDeque<String>>,
		created: AtomicUsize,
		changes: broadcast::Sender<SessionDelta>,
	}
	impl StaticProvider {
		/// Single-account provider without challenge support.
		pub fn new(id: &str, label: &str) -> Self {
			let id = ProviderId::new(id).expect("Provider id fixture should be valid.");
			let (changes, _) = broadcast::channel(16);

			Self {
				info: ProviderInfo::new(id, label),
				sessions: RwLock::new(Vec::new()),
				next_accounts: Mutex::new(VecDeque::new()),
				created: AtomicUsize::new(0),
				changes,
			}
		}

		/// Adjusts the provider description.
		pub fn with_info(mut self, f: impl FnOnce(ProviderInfo) -> ProviderInfo) -> Self {
			self.info = f(self.info);

			self
		}

		/// Seeds a session for `account_label`.
		pub fn with_session(self, account_label: &str, scopes: &[&str]) -> Self {
			let scopes = scopes.iter().map(|s| (*s).to_owned()).collect::<Vec<_>>();

			self.push_session(account_label, scopes);

			self
		}

		/// Queues the account the next `create_session` signs in.
		pub fn with_next_account(self, account_label: &str) -> Self {
			self.next_accounts.lock().push_back(account_label.to_owned());

			self
		}

		/// Number of sessions minted through `create_session`.
		pub fn created(&self) -> usize {
			self.created.load(Ordering::SeqCst)
		}

		/// Current sessions.
		pub fn sessions(&self) -> Vec<Session> {
			self.sessions.read().clone()
		}

		fn push_session(&self, account_label: &str, scopes: Vec<String>) -> Session {
			let mut sessions = self.sessions.write();
			let n = sessions.len();
			let session = Session::new(
				SessionId::new(format!("{account_label}-{n}")).expect("Session id should be valid."),
				format!("token-{account_label}-{n}"),
				AccountInfo::new(account_label, account_label),
				scopes,
			);

			sessions.push(session.clone());

			session
		}
	}
	impl AuthenticationProvider for StaticProvider {
		fn info(&self) -> &ProviderInfo {
			&self.info
		}

		fn get_sessions<'a>(
			&'a self,
			scopes: Option<&'a [String]>,
			options: &'a ProviderSessionOptions,
		) -> ProviderFuture<'a, Vec<Session>> {
			let sessions = self
				.sessions
				.read()
				.iter()
				.filter(|s| scopes.is_none() || scopes_equal(Some(s.scopes.as_slice()), scopes))
				.filter(|s| options.account.as_ref().is_none_or(|a| a.label == s.account.label))
				.cloned()
				.collect();

			Box::pin(async move { Ok(sessions) })
		}

		fn create_session<'a>(
			&'a self,
			scopes: &'a [String],
			options: &'a ProviderSessionOptions,
		) -> ProviderFuture<'a, Session> {
			Box::pin(async move {
				let label = self
					.next_accounts
					.lock()
					.pop_front()
					.or_else(|| options.account.as_ref().map(|a| a.label.clone()))
					.unwrap_or_else(|| "new-user".into());
				let session = self.push_session(&label, scopes.to_vec());

				self.created.fetch_add(1, Ordering::SeqCst);

				let _ = self.changes.send(SessionDelta {
					added: vec![session.clone()],
					..Default::default()
				});

				Ok(session)
			})
		}

		fn remove_session<'a>(&'a self, session_id: &'a str) -> ProviderFuture<'a, ()> {
			Box::pin(async move {
				let removed = {
					let mut sessions = self.sessions.write();
					let (removed, kept) =
						sessions.drain(..).partition::<Vec<_>, _>(|s| s.id.as_str() == session_id);

					*sessions = kept;

					removed
				};

				if !removed.is_empty() {
					let _ = self.changes.send(SessionDelta { removed, ..Default::default() });
				}

				Ok(())
			})
		}

		fn session_changes(&self) -> Option<broadcast::Receiver<SessionDelta>> {
			Some(self.changes.subscribe())
		}
	}

	/// Scripted answers for every session prompt, plus a log of which prompts were shown.
	pub struct ScriptedInteraction {
		allow_login: bool,
		incorrect_account: Mutex<VecDeque<IncorrectAccountChoice>>,
		selection: Option<usize>,
		access: AccessDecision,
		shown: Mutex<Vec<&'static str>>,
	}
	impl ScriptedInteraction {
		/// Consents to logins, keeps mismatched accounts, picks the first row, and allows access.
		pub fn new() -> Self {
			Self {
				allow_login: true,
				incorrect_account: Mutex::new(VecDeque::new()),
				selection: Some(0),
				access: AccessDecision::Allow,
				shown: Mutex::new(Vec::new()),
			}
		}

		/// Declines every login prompt.
		pub fn declining_login(mut self) -> Self {
			self.allow_login = false;

			self
		}

		/// Answers to successive account mismatch prompts; `KeepNew` once exhausted.
		pub fn with_incorrect_account_choices(
			self,
			choices: impl IntoIterator<Item = IncorrectAccountChoice>,
		) -> Self {
			self.incorrect_account.lock().extend(choices);

			self
		}

		/// Account picker answer.
		pub fn selecting(mut self, selection: Option<usize>) -> Self {
			self.selection = selection;

			self
		}

		/// Access prompt answer.
		pub fn deciding(mut self, access: AccessDecision) -> Self {
			self.access = access;

			self
		}

		/// Prompts shown so far, in order.
		pub fn shown(&self) -> Vec<&'static str> {
			self.shown.lock().clone()
		}

		fn record(&self, prompt: &'static str) {
			self.shown.lock().push(prompt);
		}
	}
	impl Default for ScriptedInteraction {
		fn default() -> Self {
			Self::new()
		}
	}
	impl SessionInteraction for ScriptedInteraction {
		fn login_prompt<'a>(
			&'a self,
			_: &'a ProviderInfo,
			_: &'a Consumer,
			_: bool,
		) -> ProviderFuture<'a, bool> {
			self.record("login");

			Box::pin(async move { Ok(self.allow_login) })
		}

		fn continue_with_incorrect_account<'a>(
			&'a self,
			_: &'a AccountInfo,
			_: &'a AccountInfo,
		) -> ProviderFuture<'a, IncorrectAccountChoice> {
			self.record("incorrect_account");

			let choice =
				self.incorrect_account.lock().pop_front().unwrap_or(IncorrectAccountChoice::KeepNew);

			Box::pin(async move { Ok(choice) })
		}

		fn select_account<'a>(
			&'a self,
			_: &'a ProviderInfo,
			_: &'a Consumer,
			_: &'a [AccountChoice],
		) -> ProviderFuture<'a, Option<usize>> {
			self.record("select_account");

			Box::pin(async move { Ok(self.selection) })
		}

		fn access_prompt<'a>(
			&'a self,
			_: &'a ProviderInfo,
			_: &'a AccountInfo,
			_: &'a Consumer,
		) -> ProviderFuture<'a, AccessDecision> {
			self.record("access");

			Box::pin(async move { Ok(self.access) })
		}
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
