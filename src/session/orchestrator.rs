//! The "which session does this consumer get" decision procedure.

// self
use crate::{
	_prelude::*,
	auth::{AccountInfo, ConsumerId, ProviderId, Session},
	consumer::{Consumer, ConsumerKind},
	obs::{self, OpLabels, OperationKind},
	policy::{AllowedConsumer, KindPolicy, PolicyStores},
	registry::{ProviderInfo, ProviderRegistry, ProviderSessionOptions},
	session::{
		AccessDecision, AccountChoice, IncorrectAccountChoice, PendingRequests, SessionInteraction,
		SessionOptions, SessionRequest, TaskSingler,
	},
};

/// Session resolution for one consumer kind.
pub struct SessionOrchestrator {
	kind: ConsumerKind,
	registry: Arc<ProviderRegistry>,
	policy: Arc<PolicyStores>,
	interaction: Arc<dyn SessionInteraction>,
	pending: PendingRequests,
	singler: TaskSingler,
}
impl SessionOrchestrator {
	/// Builds an orchestrator for `kind`.
	pub fn new(
		kind: ConsumerKind,
		registry: Arc<ProviderRegistry>,
		policy: Arc<PolicyStores>,
		interaction: Arc<dyn SessionInteraction>,
	) -> Self {
		Self {
			kind,
			registry,
			policy,
			interaction,
			pending: PendingRequests::default(),
			singler: TaskSingler::default(),
		}
	}

	/// Consumer kind served.
	pub fn kind(&self) -> ConsumerKind {
		self.kind
	}

	/// Parked sign-in and access requests.
	pub fn pending(&self) -> &PendingRequests {
		&self.pending
	}

	/// Number of parked requests.
	pub fn pending_request_count(&self) -> usize {
		self.pending.count()
	}

	/// Resolves a session for a consumer, prompting as `options` allow.
	///
	/// Returns `Ok(None)` when no session is usable without interaction the options forbid.
	/// Identical concurrent calls share one resolution.
	pub async fn get_session(
		&self,
		provider_id: &ProviderId,
		request: SessionRequest,
		consumer_id: &ConsumerId,
		consumer_name: &str,
		options: SessionOptions,
	) -> Result<Option<Session>> {
		options.validate()?;

		let consumer = self.consumer(consumer_id, consumer_name);
		let key = format!(
			"{}\n{provider_id}\n{}\n{}",
			consumer.key(),
			request.request_key(),
			options.fingerprint()
		);

		self.singler
			.run(key, || {
				obs::observe(
					OpLabels::new(OperationKind::SessionResolution, "get_session")
						.provider(provider_id.as_str())
						.consumer_kind(self.kind),
					self.resolve_and_record(provider_id, &request, &consumer, &options),
				)
			})
			.await
	}

	/// Distinct accounts signed in to the provider.
	pub async fn get_accounts(&self, provider_id: &ProviderId) -> Result<Vec<AccountInfo>> {
		self.registry.get_accounts(provider_id).await
	}

	/// Removes a session from its provider.
	pub async fn remove_session(&self, provider_id: &str, session_id: &str) -> Result<()> {
		self.registry.remove_session(provider_id, session_id).await
	}

	/// Resolves a parked access request interactively.
	///
	/// Multi-account providers show the account picker; others show the allow/deny prompt for
	/// the first candidate. Usage is recorded when a session is granted.
	pub async fn complete_access_request(
		&self,
		provider_id: &ProviderId,
		consumer_id: &ConsumerId,
	) -> Result<Option<Session>> {
		let consumer_key = self.kind.normalize_id(consumer_id);
		let Some(parked) = self.pending.access_request(provider_id, &consumer_key) else {
			return Ok(None);
		};
		let info = self.registry.provider_info(provider_id)?;
		let session = if info.supports_multiple_accounts {
			match self
				.select_session(&info, &parked.request, &parked.consumer, &parked.possible_sessions)
				.await
			{
				Ok(session) => Some(session),
				Err(e) if e.is_user_refusal() => None,
				Err(e) => return Err(e),
			}
		} else {
			let Some(candidate) = parked.possible_sessions.first() else {
				self.pending.remove_access_request(provider_id, &consumer_key);

				return Ok(None);
			};

			match self.interaction.access_prompt(&info, &candidate.account, &parked.consumer).await? {
				AccessDecision::Cancel => None,
				decision => {
					let allowed = decision == AccessDecision::Allow;

					self.policies().access.update_allowed(
						provider_id,
						&candidate.account.label,
						&[AllowedConsumer::new(&consumer_key, &parked.consumer.name, allowed)],
					)?;
					self.pending.remove_access_request(provider_id, &consumer_key);

					allowed.then(|| candidate.clone())
				},
			}
		};

		if let Some(session) = &session {
			self.record_usage(provider_id, session, &parked.consumer);
		}

		Ok(session)
	}

	fn consumer(&self, id: &ConsumerId, name: &str) -> Consumer {
		Consumer { kind: self.kind, id: id.clone(), name: name.to_owned() }
	}

	fn policies(&self) -> &KindPolicy {
		self.policy.kind(self.kind)
	}

	async fn resolve_and_record(
		&self,
		provider_id: &ProviderId,
		request: &SessionRequest,
		consumer: &Consumer,
		options: &SessionOptions,
	) -> Result<Option<Session>> {
		let session = self.resolve(provider_id, request, consumer, options).await?;

		if let Some(session) = &session {
			self.record_usage(provider_id, session, consumer);
		}

		Ok(session)
	}

	async fn resolve(
		&self,
		provider_id: &ProviderId,
		request: &SessionRequest,
		consumer: &Consumer,
		options: &SessionOptions,
	) -> Result<Option<Session>> {
		let policies = self.policies();
		let consumer_key = consumer.key();

		if options.clear_session_preference {
			policies.preference.remove(&consumer_key, provider_id)?;
		}

		let provider_options = options.provider_options();
		let sessions = self.list(provider_id, request, &provider_options).await?;
		let info = self.registry.provider_info(provider_id)?;
		let allowed = |session: &Session| {
			policies.access.is_access_allowed(provider_id, &session.account.label, &consumer_key)
				== Some(true)
		};
		let preferred_label = policies.preference.get(&consumer_key, provider_id);
		// A requested account wins over the stored preference.
		let preferred = if options.account.is_some() {
			sessions.first().cloned()
		} else {
			preferred_label
				.as_deref()
				.and_then(|label| sessions.iter().find(|s| s.account.label == label).cloned())
		};

		if !options.force_new_session && !sessions.is_empty() {
			if let Some(session) = preferred.as_ref().filter(|s| allowed(s)) {
				return Ok(Some(session.clone()));
			}
			if !info.supports_multiple_accounts && allowed(&sessions[0]) {
				return Ok(Some(sessions[0].clone()));
			}
		}

		if options.create_if_none || options.force_new_session {
			let recreating = options.force_new_session && !sessions.is_empty();

			if !self.interaction.login_prompt(&info, consumer, recreating).await? {
				return Err(Error::ConsentDeclined { action: "login" });
			}

			let session = if !sessions.is_empty() && !options.force_new_session {
				if info.supports_multiple_accounts && options.account.is_none() {
					self.select_session(&info, request, consumer, &sessions).await?
				} else {
					sessions[0].clone()
				}
			} else {
				let wanted = options.account.clone().or_else(|| preferred.map(|s| s.account));

				self.create_for_account(provider_id, request, &provider_options, wanted).await?
			};

			self.grant(provider_id, &session, consumer);
			self.pending.update_new_session_requests(provider_id, std::slice::from_ref(&session));

			return Ok(Some(session));
		}

		if preferred.is_none()
			&& preferred_label.is_none()
			&& let Some(session) = sessions.iter().find(|s| allowed(s))
		{
			return Ok(Some(session.clone()));
		}

		if !options.silent {
			if sessions.is_empty() {
				self.pending.request_new_session(provider_id, request, consumer);
			} else {
				self.pending.request_session_access(provider_id, request, consumer, sessions);
			}
		}

		Ok(None)
	}

	async fn list(
		&self,
		provider_id: &ProviderId,
		request: &SessionRequest,
		options: &ProviderSessionOptions,
	) -> Result<Vec<Session>> {
		match request {
			SessionRequest::Scopes(scopes) =>
				self.registry.get_sessions(provider_id, Some(scopes.as_slice()), options).await,
			SessionRequest::Challenges(challenges) =>
				self.registry.get_sessions_from_challenges(provider_id, challenges, options).await,
		}
	}

	async fn create(
		&self,
		provider_id: &ProviderId,
		request: &SessionRequest,
		options: &ProviderSessionOptions,
	) -> Result<Session> {
		match request {
			SessionRequest::Scopes(scopes) =>
				self.registry.create_session(provider_id, scopes, options).await,
			SessionRequest::Challenges(challenges) =>
				self.registry.create_session_from_challenges(provider_id, challenges, options).await,
		}
	}

	// Creates sessions until the account matches `wanted` or the user settles.
	async fn create_for_account(
		&self,
		provider_id: &ProviderId,
		request: &SessionRequest,
		base: &ProviderSessionOptions,
		wanted: Option<AccountInfo>,
	) -> Result<Session> {
		let options = ProviderSessionOptions { account: wanted.clone(), ..base.clone() };

		loop {
			let session = self.create(provider_id, request, &options).await?;
			let Some(wanted) = wanted.as_ref().filter(|w| w.label != session.account.label) else {
				return Ok(session);
			};

			match self.interaction.continue_with_incorrect_account(&session.account, wanted).await? {
				IncorrectAccountChoice::KeepNew => return Ok(session),
				IncorrectAccountChoice::TryAgain => {},
				IncorrectAccountChoice::Cancel => return Err(Error::Cancelled),
			}
		}
	}

	async fn select_session(
		&self,
		info: &ProviderInfo,
		request: &SessionRequest,
		consumer: &Consumer,
		available: &[Session],
	) -> Result<Session> {
		let accounts = self.registry.get_accounts(&info.id).await?;
		let mut choices = Vec::<AccountChoice>::new();

		for session in available {
			if !choices.iter().any(|c| c.label() == session.account.label) {
				choices.push(AccountChoice::Session(session.clone()));
			}
		}
		for account in accounts {
			if !choices.iter().any(|c| c.label() == account.label) {
				choices.push(AccountChoice::Account(account));
			}
		}

		choices.push(AccountChoice::NewAccount);

		let picked = self
			.interaction
			.select_account(info, consumer, &choices)
			.await?
			.and_then(|index| choices.get(index))
			.ok_or(Error::ConsentDeclined { action: "account access" })?;
		let session = match picked {
			AccountChoice::Session(session) => session.clone(),
			AccountChoice::Account(account) => {
				let options =
					ProviderSessionOptions { account: Some(account.clone()), ..Default::default() };

				self.create(&info.id, request, &options).await?
			},
			AccountChoice::NewAccount =>
				self.create(&info.id, request, &ProviderSessionOptions::default()).await?,
		};

		self.grant(&info.id, &session, consumer);
		self.pending.remove_access_request(&info.id, &consumer.key());

		Ok(session)
	}

	// Policy writes happen once the session exists; a failed write is logged and the session
	// is still handed to the consumer.
	fn grant(&self, provider_id: &str, session: &Session, consumer: &Consumer) {
		let policies = self.policies();
		let consumer_key = consumer.key();
		let granted = policies
			.access
			.update_allowed(
				provider_id,
				&session.account.label,
				&[AllowedConsumer::new(&consumer_key, &consumer.name, true)],
			)
			.and_then(|()| policies.preference.set(&consumer_key, provider_id, &session.account.label));

		if let Err(e) = granted {
			obs::warn_event!(
				provider = provider_id,
				account = %session.account.label,
				error = %e,
				"Failed to record access for a new session."
			);
		}
	}

	fn record_usage(&self, provider_id: &str, session: &Session, consumer: &Consumer) {
		let recorded = self.policies().usage.add_usage(
			provider_id,
			&session.account.label,
			&session.scopes,
			&consumer.key(),
			&consumer.name,
		);

		if let Err(e) = recorded {
			obs::warn_event!(provider = provider_id, error = %e, "Failed to record session usage.");
		}
	}
}
impl Debug for SessionOrchestrator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionOrchestrator")
			.field("kind", &self.kind)
			.field("pending", &self.pending)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::{ScriptedInteraction, StaticProvider, test_broker},
		broker::AuthBroker,
		config::BrokerConfig,
		registry::ChallengeRequest,
		store::{MemorySecretStore, MemoryStateStore, StateStore, StorageScope, StoreError},
	};

	// Memory store whose writes fail while `read_only` is set.
	#[derive(Default)]
	struct ReadOnlyStateStore {
		inner: MemoryStateStore,
		read_only: std::sync::atomic::AtomicBool,
	}
	impl ReadOnlyStateStore {
		fn check(&self) -> Result<(), StoreError> {
			if self.read_only.load(std::sync::atomic::Ordering::SeqCst) {
				Err(StoreError::Backend { message: "store is read-only".into() })
			} else {
				Ok(())
			}
		}
	}
	impl StateStore for ReadOnlyStateStore {
		fn get(&self, key: &str, scope: StorageScope) -> Result<Option<String>, StoreError> {
			self.inner.get(key, scope)
		}

		fn store(&self, key: &str, value: String, scope: StorageScope) -> Result<(), StoreError> {
			self.check()?;
			self.inner.store(key, value, scope)
		}

		fn remove(&self, key: &str, scope: StorageScope) -> Result<(), StoreError> {
			self.check()?;
			self.inner.remove(key, scope)
		}

		fn keys(&self, scope: StorageScope) -> Result<Vec<String>, StoreError> {
			self.inner.keys(scope)
		}
	}

	struct Fixture {
		broker: AuthBroker,
		interaction: Arc<ScriptedInteraction>,
		provider: Arc<StaticProvider>,
	}
	impl Fixture {
		fn new(provider: StaticProvider, interaction: ScriptedInteraction) -> Self {
			let interaction = Arc::new(interaction);
			let broker = test_broker(interaction.clone());
			let provider = Arc::new(provider);

			broker.registry().register_provider(provider.clone()).expect("Registration should succeed.");

			Self { broker, interaction, provider }
		}

		async fn get(&self, options: SessionOptions) -> Result<Option<Session>> {
			self.broker
				.extensions()
				.get_session(&github(), SessionRequest::scopes(["read"]), &consumer_id(), "Ext", options)
				.await
		}

		fn allow(&self, label: &str) {
			self.broker
				.query()
				.account("github", label)
				.extension("pub.ext")
				.set_access_allowed(true, Some("Ext"))
				.expect("Access write should succeed.");
		}

		fn preference(&self) -> Option<String> {
			self.broker.query().provider("github").extension("pub.ext").get_account_preference()
		}
	}

	fn github() -> ProviderId {
		ProviderId::new("github").expect("Provider id fixture should be valid.")
	}

	fn consumer_id() -> ConsumerId {
		ConsumerId::new("pub.ext").expect("Consumer id fixture should be valid.")
	}

	fn multi(info: ProviderInfo) -> ProviderInfo {
		info.with_multiple_accounts()
	}

	#[tokio::test]
	async fn conflicting_options_fail_before_any_io() {
		let interaction = Arc::new(ScriptedInteraction::new());
		let broker = test_broker(interaction.clone());
		let mut activations = broker.registry().subscribe_activation_requests();
		let options = SessionOptions { create_if_none: true, ..SessionOptions::force_new_session() };
		let err = broker
			.extensions()
			.get_session(&github(), SessionRequest::scopes(["read"]), &consumer_id(), "Ext", options)
			.await
			.expect_err("Conflicting options should be rejected.");

		assert!(matches!(
			err,
			Error::OptionConflict { first: "forceNewSession", second: "createIfNone" }
		));
		assert!(activations.try_recv().is_err());
		assert!(interaction.shown().is_empty());
	}

	#[tokio::test]
	async fn an_allowed_session_is_returned_silently_and_usage_is_recorded() {
		let fixture =
			Fixture::new(StaticProvider::new("github", "GitHub").with_session("alice", &["read"]), ScriptedInteraction::new());

		fixture.allow("alice");

		let session = fixture
			.get(SessionOptions::default())
			.await
			.expect("Resolution should succeed.")
			.expect("Allowed session should be returned.");

		assert_eq!(session.account.label, "alice");
		assert!(fixture.interaction.shown().is_empty());

		let usage = fixture.broker.query().account("github", "alice").extension("pub.ext").get_usage();

		assert_eq!(usage.len(), 1);
		assert_eq!(usage[0].scopes, vec!["read".to_owned()]);
	}

	#[tokio::test]
	async fn silent_misses_park_nothing_while_passive_misses_park_an_access_request() {
		let fixture =
			Fixture::new(StaticProvider::new("github", "GitHub").with_session("alice", &["read"]), ScriptedInteraction::new());

		assert_eq!(fixture.get(SessionOptions::silent()).await.expect("Silent call should succeed."), None);
		assert_eq!(fixture.broker.pending_request_count(), 0);
		assert_eq!(fixture.get(SessionOptions::default()).await.expect("Passive call should succeed."), None);
		assert_eq!(fixture.broker.pending_request_count(), 1);

		let granted = fixture
			.broker
			.extensions()
			.complete_access_request(&github(), &consumer_id())
			.await
			.expect("Access request should resolve.");

		assert_eq!(granted.map(|s| s.account.label), Some("alice".into()));
		assert_eq!(fixture.broker.pending_request_count(), 0);
		assert_eq!(fixture.interaction.shown(), vec!["access"]);
		assert_eq!(
			fixture.broker.query().account("github", "alice").extension("pub.ext").is_access_allowed(),
			Some(true)
		);
	}

	#[tokio::test]
	async fn passive_misses_without_sessions_park_a_sign_in_request() {
		let fixture = Fixture::new(StaticProvider::new("github", "GitHub"), ScriptedInteraction::new());

		assert_eq!(fixture.get(SessionOptions::default()).await.expect("Passive call should succeed."), None);

		let requests = fixture.broker.extensions().pending().sign_in_requests("github");

		assert_eq!(requests.len(), 1);
		assert_eq!(requests[0].consumers[0].name, "Ext");
	}

	#[tokio::test]
	async fn a_declined_login_is_a_user_refusal() {
		let fixture = Fixture::new(
			StaticProvider::new("github", "GitHub"),
			ScriptedInteraction::new().declining_login(),
		);
		let err = fixture
			.get(SessionOptions::create_if_none())
			.await
			.expect_err("Declined login should fail.");

		assert!(matches!(err, Error::ConsentDeclined { action: "login" }));
		assert!(err.is_user_refusal());
		assert_eq!(fixture.provider.created(), 0);
	}

	#[tokio::test]
	async fn creating_a_session_grants_access_and_learns_the_preference() {
		let fixture = Fixture::new(StaticProvider::new("github", "GitHub"), ScriptedInteraction::new());
		let session = fixture
			.get(SessionOptions::create_if_none())
			.await
			.expect("Creation should succeed.")
			.expect("A session should be created.");

		assert_eq!(session.account.label, "new-user");
		assert_eq!(fixture.provider.created(), 1);
		assert_eq!(fixture.preference().as_deref(), Some("new-user"));
		assert_eq!(
			fixture.broker.query().account("github", "new-user").extension("pub.ext").is_access_allowed(),
			Some(true)
		);
	}

	#[tokio::test]
	async fn failed_policy_writes_do_not_lose_a_created_session() {
		let state = Arc::new(ReadOnlyStateStore::default());
		let broker = AuthBroker::new(
			BrokerConfig::default(),
			state.clone(),
			Arc::new(MemorySecretStore::default()),
			Arc::new(ScriptedInteraction::new()),
		);
		let provider = Arc::new(StaticProvider::new("github", "GitHub"));

		broker.registry().register_provider(provider.clone()).expect("Registration should succeed.");
		state.read_only.store(true, std::sync::atomic::Ordering::SeqCst);

		let session = broker
			.extensions()
			.get_session(
				&github(),
				SessionRequest::scopes(["read"]),
				&consumer_id(),
				"Ext",
				SessionOptions::create_if_none(),
			)
			.await
			.expect("Creation should succeed despite the failed writes.")
			.expect("The created session should be returned.");

		assert_eq!(session.account.label, "new-user");
		assert_eq!(provider.created(), 1);
		assert_eq!(
			broker.query().account("github", "new-user").extension("pub.ext").is_access_allowed(),
			None
		);
	}

	#[tokio::test]
	async fn account_mismatches_loop_until_the_user_cancels() {
		let fixture = Fixture::new(
			StaticProvider::new("github", "GitHub").with_next_account("bob").with_next_account("bob"),
			ScriptedInteraction::new().with_incorrect_account_choices([
				IncorrectAccountChoice::TryAgain,
				IncorrectAccountChoice::Cancel,
			]),
		);
		let err = fixture
			.get(SessionOptions::force_new_session().with_account(AccountInfo::new("alice", "alice")))
			.await
			.expect_err("Cancelled mismatch should fail.");

		assert!(matches!(err, Error::Cancelled));
		assert_eq!(fixture.provider.created(), 2);
		assert_eq!(fixture.interaction.shown(), vec!["login", "incorrect_account", "incorrect_account"]);
	}

	#[tokio::test]
	async fn multi_account_providers_go_through_the_picker() {
		let fixture = Fixture::new(
			StaticProvider::new("github", "GitHub")
				.with_info(multi)
				.with_session("alice", &["read"])
				.with_session("bob", &["read"]),
			ScriptedInteraction::new().selecting(Some(1)),
		);
		let session = fixture
			.get(SessionOptions::create_if_none())
			.await
			.expect("Picker resolution should succeed.")
			.expect("A session should be picked.");

		assert_eq!(session.account.label, "bob");
		assert_eq!(fixture.preference().as_deref(), Some("bob"));
		assert_eq!(fixture.interaction.shown(), vec!["login", "select_account"]);
		assert_eq!(fixture.provider.created(), 0);
	}

	#[tokio::test]
	async fn a_dismissed_picker_is_a_user_refusal() {
		let fixture = Fixture::new(
			StaticProvider::new("github", "GitHub").with_info(multi).with_session("alice", &["read"]),
			ScriptedInteraction::new().selecting(None),
		);
		let err = fixture
			.get(SessionOptions::create_if_none())
			.await
			.expect_err("Dismissed picker should fail.");

		assert!(err.is_user_refusal());
	}

	#[tokio::test]
	async fn clearing_the_preference_falls_back_to_the_first_allowed_session() {
		let fixture = Fixture::new(
			StaticProvider::new("github", "GitHub")
				.with_info(multi)
				.with_session("alice", &["read"])
				.with_session("bob", &["read"]),
			ScriptedInteraction::new(),
		);

		fixture.allow("alice");
		fixture.allow("bob");
		fixture
			.broker
			.query()
			.provider("github")
			.extension("pub.ext")
			.set_account_preference("bob")
			.expect("Preference write should succeed.");

		let preferred = fixture.get(SessionOptions::silent()).await.expect("Silent call should succeed.");

		assert_eq!(preferred.map(|s| s.account.label), Some("bob".into()));

		let fallback = fixture
			.get(SessionOptions::silent().clearing_preference())
			.await
			.expect("Silent call should succeed.");

		assert_eq!(fallback.map(|s| s.account.label), Some("alice".into()));
		assert_eq!(fixture.preference(), None);
	}

	#[tokio::test]
	async fn challenge_requests_require_a_capable_provider() {
		let fixture = Fixture::new(StaticProvider::new("github", "GitHub"), ScriptedInteraction::new());
		let request = SessionRequest::Challenges(ChallengeRequest::from_header(
			r#"Bearer scope="read""#,
			None,
		));
		let err = fixture
			.broker
			.extensions()
			.get_session(&github(), request, &consumer_id(), "Ext", SessionOptions::default())
			.await
			.expect_err("Challenge request should be rejected.");

		assert!(matches!(err, Error::CapabilityMissing { .. }));
	}
}
