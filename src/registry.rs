//! Provider registry: the live provider map, declared providers, host delegates, and the
//! activation wait.
//!
//! A call against a provider that has not registered yet fires an activation request and then
//! waits for the matching registration. The wait races the registration stream against the
//! registry's cancellation token and a timer; whichever branch loses is dropped together with
//! its subscription.

pub mod declared;
pub mod delegate;
pub mod provider;

pub use declared::*;
pub use delegate::*;
pub use provider::*;

// std
use std::{
	collections::HashSet,
	sync::atomic::{AtomicU64, Ordering},
};
// crates.io
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	auth::{AccountInfo, ProviderId, Session, SessionChangeEvent, SessionDelta},
	dynamic::DynamicProviderStorage,
	oauth::{AuthorizationServerMetadata, ProtectedResourceMetadata},
	obs::{self, OpLabels, OperationKind},
};

const EVENT_CAPACITY: usize = 64;

/// Registration lifecycle notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderEvent {
	/// A provider registered.
	Registered {
		/// Provider id.
		id: ProviderId,
		/// Provider label.
		label: String,
	},
	/// A provider unregistered.
	Unregistered {
		/// Provider id.
		id: ProviderId,
		/// Provider label.
		label: String,
	},
}

/// Request for a host to activate whatever contributes a provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivationRequest {
	/// Provider the caller is waiting for.
	pub provider_id: ProviderId,
	/// Activation event name (`onAuthenticationRequest:<id>`).
	pub event: String,
}

/// Who is unregistering a provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnregisterMode {
	/// A normal unregistration; fires exactly one [`ProviderEvent::Unregistered`] and purges
	/// dynamic provider storage.
	External,
	/// Part of an internal re-registration sequence; fires nothing and keeps storage.
	Internal,
}

struct Registration {
	provider: Arc<dyn AuthenticationProvider>,
	forwarder: CancellationToken,
}

#[derive(Default)]
struct RegistryState {
	providers: HashMap<ProviderId, Registration>,
	declared: Vec<DeclaredProvider>,
	dynamic: HashSet<ProviderId>,
	delegates: Vec<(DelegateHandle, Arc<dyn HostDelegate>)>,
}

/// Hub owning every provider registration.
pub struct ProviderRegistry {
	state: RwLock<RegistryState>,
	storage: Arc<DynamicProviderStorage>,
	registration_timeout: std::time::Duration,
	cancel: CancellationToken,
	provider_events: broadcast::Sender<ProviderEvent>,
	activations: broadcast::Sender<ActivationRequest>,
	session_changes: broadcast::Sender<SessionChangeEvent>,
	next_delegate: AtomicU64,
}
impl ProviderRegistry {
	/// Builds an empty registry.
	///
	/// `cancel` is the process-wide disposal signal; cancelling it fails pending waits with
	/// [`Error::Disposed`] and stops session-change forwarding.
	pub fn new(
		storage: Arc<DynamicProviderStorage>,
		registration_timeout: std::time::Duration,
		cancel: CancellationToken,
	) -> Self {
		let (provider_events, _) = broadcast::channel(EVENT_CAPACITY);
		let (activations, _) = broadcast::channel(EVENT_CAPACITY);
		let (session_changes, _) = broadcast::channel(EVENT_CAPACITY);

		Self {
			state: RwLock::new(RegistryState::default()),
			storage,
			registration_timeout,
			cancel,
			provider_events,
			activations,
			session_changes,
			next_delegate: AtomicU64::new(1),
		}
	}

	/// Dynamic provider storage shared with host delegates.
	pub fn storage(&self) -> &Arc<DynamicProviderStorage> {
		&self.storage
	}

	/// Disposal signal.
	pub fn cancellation(&self) -> &CancellationToken {
		&self.cancel
	}

	/// Subscribes to registration and unregistration events.
	pub fn subscribe_provider_events(&self) -> broadcast::Receiver<ProviderEvent> {
		self.provider_events.subscribe()
	}

	/// Subscribes to activation requests.
	pub fn subscribe_activation_requests(&self) -> broadcast::Receiver<ActivationRequest> {
		self.activations.subscribe()
	}

	/// Subscribes to session changes of every provider.
	pub fn subscribe_session_changes(&self) -> broadcast::Receiver<SessionChangeEvent> {
		self.session_changes.subscribe()
	}

	/// Declares a provider that may register later.
	pub fn declare_provider(&self, declared: DeclaredProvider) -> Result<()> {
		declared.validate()?;

		let mut state = self.state.write();

		if state.declared.iter().any(|d| d.id == declared.id) {
			return Err(Error::InvalidDeclaration {
				reason: format!("provider `{}` is already declared", declared.id),
			});
		}

		state.declared.push(declared);

		Ok(())
	}

	/// Removes a declaration; returns `false` when none existed.
	pub fn undeclare_provider(&self, id: &str) -> bool {
		let mut state = self.state.write();
		let before = state.declared.len();

		state.declared.retain(|d| d.id != id);

		state.declared.len() != before
	}

	/// Declared providers in declaration order.
	pub fn declared_providers(&self) -> Vec<DeclaredProvider> {
		self.state.read().declared.clone()
	}

	/// Registers a live provider.
	pub fn register_provider(&self, provider: Arc<dyn AuthenticationProvider>) -> Result<()> {
		let info = provider.info().clone();
		let forwarder = self.cancel.child_token();

		{
			let mut state = self.state.write();

			if state.providers.contains_key(&info.id) {
				return Err(Error::AlreadyRegistered { provider: info.id.to_string() });
			}
			if !state.dynamic.contains(&info.id)
				&& !state.declared.iter().any(|d| d.id == info.id.as_str())
			{
				obs::warn_event!(
					provider = %info.id,
					"Authentication provider was registered without being declared."
				);
			}

			state.providers.insert(
				info.id.clone(),
				Registration { provider: provider.clone(), forwarder: forwarder.clone() },
			);
		}

		if let Some(changes) = provider.session_changes() {
			self.forward_session_changes(&info, changes, forwarder);
		}

		obs::debug_event!(provider = %info.id, "Authentication provider registered.");

		let _ = self.provider_events.send(ProviderEvent::Registered { id: info.id, label: info.label });

		Ok(())
	}

	/// Marks `provider` as dynamic, then registers it.
	pub fn register_dynamic_provider(&self, provider: Arc<dyn AuthenticationProvider>) -> Result<()> {
		self.state.write().dynamic.insert(provider.info().id.clone());

		self.register_provider(provider)
	}

	/// Unregisters a provider.
	///
	/// External unregistrations fire one [`ProviderEvent::Unregistered`] and purge the client
	/// registration and tokens of dynamic providers.
	pub async fn unregister_provider(&self, id: &str, mode: UnregisterMode) -> Result<()> {
		let (removed, dynamic) = {
			let mut state = self.state.write();
			let removed = state.providers.remove(id);
			let dynamic = match mode {
				UnregisterMode::External => state.dynamic.remove(id),
				UnregisterMode::Internal => state.dynamic.contains(id),
			};

			(removed, dynamic)
		};

		if let Some(registration) = removed {
			registration.forwarder.cancel();

			if mode == UnregisterMode::External {
				let info = registration.provider.info();

				let _ = self.provider_events.send(ProviderEvent::Unregistered {
					id: info.id.clone(),
					label: info.label.clone(),
				});
			}
		}
		if mode == UnregisterMode::External && (dynamic || self.storage.has_provider(id)) {
			self.storage.remove_provider(id).await?;
		}

		Ok(())
	}

	/// Returns `true` when `id` is registered.
	pub fn is_registered(&self, id: &str) -> bool {
		self.state.read().providers.contains_key(id)
	}

	/// Returns `true` when `id` was minted by a host delegate.
	pub fn is_dynamic(&self, id: &str) -> bool {
		self.state.read().dynamic.contains(id) || self.storage.has_provider(id)
	}

	/// Registered provider ids, sorted.
	pub fn provider_ids(&self) -> Vec<ProviderId> {
		let mut ids = self.state.read().providers.keys().cloned().collect::<Vec<_>>();

		ids.sort();

		ids
	}

	/// Looks up a registered provider without activation.
	pub fn provider(&self, id: &str) -> Result<Arc<dyn AuthenticationProvider>> {
		self.lookup(id).ok_or_else(|| Error::NotRegistered { provider: id.to_owned() })
	}

	/// Description of a registered provider.
	pub fn provider_info(&self, id: &str) -> Result<ProviderInfo> {
		Ok(self.provider(id)?.info().clone())
	}

	/// Returns the provider, activating it and waiting for its registration when needed.
	pub async fn ensure_provider(&self, id: &ProviderId) -> Result<Arc<dyn AuthenticationProvider>> {
		if let Some(provider) = self.lookup(id) {
			return Ok(provider);
		}

		let labels =
			OpLabels::new(OperationKind::ProviderActivation, "ensure_provider").provider(id.as_str());

		obs::observe(labels, self.wait_for_registration(id)).await
	}

	/// Adds a host delegate.
	pub fn register_host_delegate(&self, delegate: Arc<dyn HostDelegate>) -> DelegateHandle {
		let handle = DelegateHandle(self.next_delegate.fetch_add(1, Ordering::Relaxed));

		self.state.write().delegates.push((handle, delegate));

		handle
	}

	/// Removes a host delegate; returns `false` when the handle is unknown.
	pub fn unregister_host_delegate(&self, handle: DelegateHandle) -> bool {
		let mut state = self.state.write();
		let before = state.delegates.len();

		state.delegates.retain(|(h, _)| *h != handle);

		state.delegates.len() != before
	}

	/// Mints (or reuses) the dynamic provider for `authorization_server` and `resource` through
	/// the highest-priority host delegate.
	///
	/// A dynamic provider already registered for the same pair is returned without consulting
	/// any delegate.
	pub async fn create_dynamic_authentication_provider(
		&self,
		authorization_server: &Url,
		server_metadata: &AuthorizationServerMetadata,
		resource: Option<&ProtectedResourceMetadata>,
	) -> Result<ProviderId> {
		if let Some(id) =
			self.registered_dynamic_provider(authorization_server, resource.map(|r| r.resource.as_str()))
		{
			return Ok(id);
		}

		let delegate = self.select_delegate().ok_or(Error::NoHostDelegate)?;
		let id = delegate.create(self, authorization_server, server_metadata, resource).await?;

		self.state.write().dynamic.insert(id.clone());

		Ok(id)
	}

	/// First registered provider serving the pair, by id order.
	pub fn provider_id_for_server(
		&self,
		authorization_server: &Url,
		resource: Option<&Url>,
	) -> Option<ProviderId> {
		let state = self.state.read();
		let mut matches = state
			.providers
			.values()
			.filter(|r| r.provider.info().serves(authorization_server, resource))
			.map(|r| r.provider.info().id.clone())
			.collect::<Vec<_>>();

		matches.sort();

		matches.into_iter().next()
	}

	/// Like [`Self::provider_id_for_server`], extended to declared providers whose globs match
	/// the issuer. Candidates are activated one at a time until one confirms the match.
	pub async fn get_or_activate_provider_id_for_server(
		&self,
		authorization_server: &Url,
		resource: Option<&Url>,
	) -> Result<Option<ProviderId>> {
		if let Some(id) = self.provider_id_for_server(authorization_server, resource) {
			return Ok(Some(id));
		}

		let candidates = self
			.declared_providers()
			.into_iter()
			.filter(|d| d.matches_issuer(authorization_server) && !self.is_registered(&d.id))
			.collect::<Vec<_>>();

		for declared in candidates {
			let Ok(id) = declared.validate() else { continue };

			match self.ensure_provider(&id).await {
				Ok(provider) if provider.info().serves(authorization_server, resource) =>
					return Ok(Some(id)),
				Ok(_) => {},
				Err(Error::Disposed) => return Err(Error::Disposed),
				Err(e) => {
					obs::warn_event!(provider = %id, error = %e, "Declared provider did not activate.");
				},
			}
		}

		Ok(None)
	}

	/// Lists sessions, activating the provider first when needed.
	pub async fn get_sessions(
		&self,
		id: &ProviderId,
		scopes: Option<&[String]>,
		options: &ProviderSessionOptions,
	) -> Result<Vec<Session>> {
		let provider = self.ensure_provider(id).await?;

		provider.get_sessions(scopes, options).await
	}

	/// Lists sessions for a challenge request; the provider must support challenges.
	pub async fn get_sessions_from_challenges(
		&self,
		id: &ProviderId,
		request: &ChallengeRequest,
		options: &ProviderSessionOptions,
	) -> Result<Vec<Session>> {
		let provider = self.ensure_provider(id).await?;

		require_challenges(provider.info())?;

		provider.get_sessions_from_challenges(request, options).await
	}

	/// Creates a session, activating the provider first when needed.
	pub async fn create_session(
		&self,
		id: &ProviderId,
		scopes: &[String],
		options: &ProviderSessionOptions,
	) -> Result<Session> {
		let provider = self.ensure_provider(id).await?;

		provider.create_session(scopes, options).await
	}

	/// Creates a session for a challenge request; the provider must support challenges.
	pub async fn create_session_from_challenges(
		&self,
		id: &ProviderId,
		request: &ChallengeRequest,
		options: &ProviderSessionOptions,
	) -> Result<Session> {
		let provider = self.ensure_provider(id).await?;

		require_challenges(provider.info())?;

		provider.create_session_from_challenges(request, options).await
	}

	/// Removes a session from a registered provider.
	pub async fn remove_session(&self, id: &str, session_id: &str) -> Result<()> {
		self.provider(id)?.remove_session(session_id).await
	}

	/// Distinct accounts across the provider's sessions, in session order.
	pub async fn get_accounts(&self, id: &ProviderId) -> Result<Vec<AccountInfo>> {
		let sessions = self.get_sessions(id, None, &ProviderSessionOptions::default()).await?;
		let mut accounts = Vec::<AccountInfo>::new();

		for session in sessions {
			if !accounts.iter().any(|a| a.label == session.account.label) {
				accounts.push(session.account);
			}
		}

		Ok(accounts)
	}

	/// Publishes a session change on behalf of a provider without its own stream.
	pub fn fire_session_change(&self, id: &str, delta: SessionDelta) -> Result<()> {
		let info = self.provider_info(id)?;

		let _ = self.session_changes.send(SessionChangeEvent {
			provider_id: info.id,
			label: info.label,
			delta,
		});

		Ok(())
	}

	fn registered_dynamic_provider(
		&self,
		authorization_server: &Url,
		resource: Option<&str>,
	) -> Option<ProviderId> {
		let state = self.state.read();

		state
			.dynamic
			.iter()
			.filter_map(|id| state.providers.get(id))
			.map(|r| r.provider.info())
			.find(|info| info.is_minted_for(authorization_server, resource))
			.map(|info| info.id.clone())
	}

	fn lookup(&self, id: &str) -> Option<Arc<dyn AuthenticationProvider>> {
		self.state.read().providers.get(id).map(|r| r.provider.clone())
	}

	fn select_delegate(&self) -> Option<Arc<dyn HostDelegate>> {
		let state = self.state.read();
		let mut best: Option<&Arc<dyn HostDelegate>> = None;

		for (_, delegate) in &state.delegates {
			if best.is_none_or(|b| delegate.priority() > b.priority()) {
				best = Some(delegate);
			}
		}

		best.cloned()
	}

	async fn wait_for_registration(&self, id: &ProviderId) -> Result<Arc<dyn AuthenticationProvider>> {
		if self.cancel.is_cancelled() {
			return Err(Error::Disposed);
		}

		// Subscribe before the second lookup so a registration in between is not missed.
		let mut registrations = self.provider_events.subscribe();

		if let Some(provider) = self.lookup(id) {
			return Ok(provider);
		}

		let _ = self.activations.send(ActivationRequest {
			provider_id: id.clone(),
			event: activation_event(id),
		});

		let registered = async {
			loop {
				match registrations.recv().await {
					Ok(ProviderEvent::Registered { id: registered, .. }) if &registered == id =>
						if let Some(provider) = self.lookup(id) {
							return Ok(provider);
						},
					Ok(_) => {},
					Err(RecvError::Lagged(_)) =>
						if let Some(provider) = self.lookup(id) {
							return Ok(provider);
						},
					Err(RecvError::Closed) => return Err(Error::Disposed),
				}
			}
		};
		let timeout = self.registration_timeout;

		tokio::select! {
			biased;
			_ = self.cancel.cancelled() => Err(Error::Disposed),
			result = registered => result,
			_ = tokio::time::sleep(timeout) => Err(Error::RegistrationTimeout {
				provider: id.to_string(),
				waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
			}),
		}
	}

	fn forward_session_changes(
		&self,
		info: &ProviderInfo,
		mut changes: broadcast::Receiver<SessionDelta>,
		stop: CancellationToken,
	) {
		let Ok(runtime) = tokio::runtime::Handle::try_current() else {
			obs::warn_event!(
				provider = %info.id,
				"No async runtime; provider session changes will not be forwarded."
			);

			return;
		};
		let sink = self.session_changes.clone();
		let provider_id = info.id.clone();
		let label = info.label.clone();

		runtime.spawn(async move {
			loop {
				tokio::select! {
					_ = stop.cancelled() => break,
					delta = changes.recv() => match delta {
						Ok(delta) => {
							let _ = sink.send(SessionChangeEvent {
								provider_id: provider_id.clone(),
								label: label.clone(),
								delta,
							});
						},
						Err(RecvError::Lagged(skipped)) => {
							obs::warn_event!(provider = %provider_id, skipped, "Session changes were dropped.");
						},
						Err(RecvError::Closed) => break,
					},
				}
			}
		});
	}
}
impl Debug for ProviderRegistry {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let state = self.state.read();

		f.debug_struct("ProviderRegistry")
			.field("providers", &state.providers.keys().collect::<Vec<_>>())
			.field("declared", &state.declared.len())
			.field("delegates", &state.delegates.len())
			.finish()
	}
}

fn require_challenges(info: &ProviderInfo) -> Result<()> {
	if info.supports_challenges {
		Ok(())
	} else {
		Err(Error::CapabilityMissing {
			provider: info.id.to_string(),
			capability: "challenge-based sessions",
		})
	}
}
