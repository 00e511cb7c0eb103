//! The broker context: one object owning every store, the registry, both orchestrators, and
//! the query service for the lifetime of the process.
//!
//! Dropping or [disposing](AuthBroker::dispose) the broker cancels pending registration waits,
//! session-change forwarding, and the secret-store listener.

// crates.io
use oauth2::http::HeaderMap;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	auth::{ProviderId, SessionChangeEvent},
	config::BrokerConfig,
	consumer::ConsumerKind,
	dynamic::{
		AuthorizationHandler, ClientRegistrationPrompt, DynamicProviderEnv, DynamicProviderStorage,
		OAuthHostDelegate,
	},
	error::ConfigError,
	http::OAuthHttpClient,
	oauth::{
		self, CandidateError, ClientProfile, ProtectedResourceMetadata, default_metadata_for_url,
		discover_authorization_server_metadata, discover_protected_resource_metadata,
	},
	obs,
	policy::PolicyStores,
	query::AuthQuery,
	registry::{DelegateHandle, ProviderEvent, ProviderRegistry},
	session::{SessionInteraction, SessionOrchestrator},
	store::{SecretStore, StateStore},
};

/// Process-wide broker context.
pub struct AuthBroker {
	config: BrokerConfig,
	storage: Arc<DynamicProviderStorage>,
	policy: Arc<PolicyStores>,
	registry: Arc<ProviderRegistry>,
	extensions: Arc<SessionOrchestrator>,
	mcp_servers: Arc<SessionOrchestrator>,
	query: AuthQuery,
	cancel: CancellationToken,
}
impl AuthBroker {
	/// Wires every component over the given stores.
	///
	/// Background listeners start only when called inside a Tokio runtime.
	pub fn new(
		config: BrokerConfig,
		state: Arc<dyn StateStore>,
		secrets: Arc<dyn SecretStore>,
		interaction: Arc<dyn SessionInteraction>,
	) -> Self {
		let cancel = CancellationToken::new();
		let storage = Arc::new(DynamicProviderStorage::new(state.clone(), secrets));
		let policy = Arc::new(PolicyStores::new(state, &config));
		let registry = Arc::new(ProviderRegistry::new(
			storage.clone(),
			config.registration_timeout(),
			cancel.child_token(),
		));
		let orchestrator = |kind| {
			Arc::new(SessionOrchestrator::new(
				kind,
				registry.clone(),
				policy.clone(),
				interaction.clone(),
			))
		};
		let extensions = orchestrator(ConsumerKind::Extension);
		let mcp_servers = orchestrator(ConsumerKind::McpServer);
		let query = AuthQuery::new(registry.clone(), policy.clone());
		let broker =
			Self { config, storage, policy, registry, extensions, mcp_servers, query, cancel };

		broker.storage.spawn_secret_listener(broker.cancel.child_token());
		broker.spawn_pending_request_upkeep();

		broker
	}

	/// Loaded configuration.
	pub fn config(&self) -> &BrokerConfig {
		&self.config
	}

	/// Provider registry.
	pub fn registry(&self) -> &Arc<ProviderRegistry> {
		&self.registry
	}

	/// Policy stores of both kinds.
	pub fn policy(&self) -> &Arc<PolicyStores> {
		&self.policy
	}

	/// Dynamic provider storage.
	pub fn storage(&self) -> &Arc<DynamicProviderStorage> {
		&self.storage
	}

	/// Query service.
	pub fn query(&self) -> &AuthQuery {
		&self.query
	}

	/// Orchestrator for `kind`.
	pub fn orchestrator(&self, kind: ConsumerKind) -> &Arc<SessionOrchestrator> {
		match kind {
			ConsumerKind::Extension => &self.extensions,
			ConsumerKind::McpServer => &self.mcp_servers,
		}
	}

	/// Extension orchestrator.
	pub fn extensions(&self) -> &Arc<SessionOrchestrator> {
		&self.extensions
	}

	/// MCP server orchestrator.
	pub fn mcp_servers(&self) -> &Arc<SessionOrchestrator> {
		&self.mcp_servers
	}

	/// Parked requests across both kinds.
	pub fn pending_request_count(&self) -> usize {
		self.extensions.pending_request_count() + self.mcp_servers.pending_request_count()
	}

	/// Subscribes to session changes of every registered provider.
	pub fn subscribe_session_changes(&self) -> broadcast::Receiver<SessionChangeEvent> {
		self.registry.subscribe_session_changes()
	}

	/// Registers an [`OAuthHostDelegate`] built from the configuration.
	pub fn install_oauth_delegate<C>(
		&self,
		http: Arc<C>,
		handler: Arc<dyn AuthorizationHandler>,
		prompt: Option<Arc<dyn ClientRegistrationPrompt>>,
		priority: i32,
	) -> DelegateHandle
	where
		C: OAuthHttpClient,
	{
		let env = DynamicProviderEnv {
			http,
			storage: self.storage.clone(),
			handler,
			prompt,
			profile: ClientProfile {
				client_name: self.config.app_name.clone(),
				client_uri: self.config.client_uri.clone(),
				redirect_uris: self.config.redirect_uris.clone(),
			},
			client_id_metadata_url: self.config.auth_client_id_metadata_url.clone(),
		};

		self.registry.register_host_delegate(Arc::new(OAuthHostDelegate::new(env, priority)))
	}

	/// Finds or mints the provider guarding `target`.
	///
	/// Protected-resource metadata is discovered first (from the challenge's
	/// `resource_metadata` when present). Without it the target's origin is treated as the
	/// authorization server. Authorization server metadata falls back to the conventional
	/// endpoints when discovery is exhausted. Existing and declared providers are preferred over
	/// minting a dynamic one.
	pub async fn resolve_provider_for_resource<C>(
		&self,
		http: &C,
		target: &Url,
		www_authenticate: Option<&str>,
		headers: &HeaderMap,
	) -> Result<ProviderId>
	where
		C: ?Sized + OAuthHttpClient,
	{
		let challenges = www_authenticate.map(oauth::parse_www_authenticate).unwrap_or_default();
		let explicit = oauth::resource_metadata_from_challenges(&challenges)
			.and_then(|url| Url::parse(url).ok());
		let resource =
			match discover_protected_resource_metadata(http, target, explicit.as_ref(), headers).await {
				Ok(metadata) => Some(metadata),
				Err(e) if is_misconfiguration(&e, explicit.is_some()) => {
					obs::warn_event!(
						target = %target,
						error = %e,
						"Protected resource metadata was rejected; using the target origin as the authorization server."
					);

					None
				},
				Err(e) => {
					obs::debug_event!(target = %target, error = %e, "No protected resource metadata.");

					None
				},
			};
		let authorization_server = authorization_server_for(target, resource.as_ref())?;
		let server_metadata =
			match discover_authorization_server_metadata(http, &authorization_server, headers).await {
				Ok(metadata) => metadata,
				Err(Error::DiscoveryExhausted { .. } | Error::Candidate(_)) => {
					obs::warn_event!(
						server = %authorization_server,
						"Authorization server metadata unavailable; using default endpoints."
					);

					default_metadata_for_url(&authorization_server)
				},
				Err(e) => return Err(e),
			};
		let resource_url = resource.as_ref().and_then(|r| Url::parse(&r.resource).ok());

		if let Some(id) = self
			.registry
			.get_or_activate_provider_id_for_server(&authorization_server, resource_url.as_ref())
			.await?
		{
			return Ok(id);
		}

		self.registry
			.create_dynamic_authentication_provider(
				&authorization_server,
				&server_metadata,
				resource.as_ref(),
			)
			.await
	}

	/// Cancels every wait and background listener. Idempotent.
	pub fn dispose(&self) {
		self.cancel.cancel();
	}

	/// Returns `true` once disposed.
	pub fn is_disposed(&self) -> bool {
		self.cancel.is_cancelled()
	}

	// Keeps parked requests in step with session and registration changes.
	fn spawn_pending_request_upkeep(&self) {
		let Ok(runtime) = tokio::runtime::Handle::try_current() else {
			obs::warn_event!("No async runtime; pending requests will not track provider changes.");

			return;
		};
		let mut sessions = self.registry.subscribe_session_changes();
		let mut providers = self.registry.subscribe_provider_events();
		let orchestrators = [self.extensions.clone(), self.mcp_servers.clone()];
		let cancel = self.cancel.child_token();

		runtime.spawn(async move {
			loop {
				tokio::select! {
					_ = cancel.cancelled() => break,
					event = sessions.recv() => match event {
						Ok(event) =>
							for orchestrator in &orchestrators {
								let pending = orchestrator.pending();

								pending.update_new_session_requests(&event.provider_id, &event.delta.added);
								pending.update_access_requests(&event.provider_id, &event.delta.removed);
							},
						Err(RecvError::Lagged(_)) => {},
						Err(RecvError::Closed) => break,
					},
					event = providers.recv() => match event {
						Ok(ProviderEvent::Unregistered { id, .. }) =>
							for orchestrator in &orchestrators {
								orchestrator.pending().provider_unregistered(&id);
							},
						Ok(ProviderEvent::Registered { .. }) | Err(RecvError::Lagged(_)) => {},
						Err(RecvError::Closed) => break,
					},
				}
			}
		});
	}
}
impl Debug for AuthBroker {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthBroker")
			.field("registry", &self.registry)
			.field("extensions", &self.extensions)
			.field("mcp_servers", &self.mcp_servers)
			.field("disposed", &self.is_disposed())
			.finish_non_exhaustive()
	}
}
impl Drop for AuthBroker {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

// Rejected advertised documents and resource mismatches mean a misconfigured server.
fn is_misconfiguration(err: &Error, advertised: bool) -> bool {
	advertised
		|| match err {
			Error::DiscoveryExhausted { attempts, .. } =>
				attempts.iter().any(|a| matches!(a, CandidateError::ResourceMismatch { .. })),
			Error::Candidate(CandidateError::ResourceMismatch { .. }) => true,
			_ => false,
		}
}

fn authorization_server_for(
	target: &Url,
	resource: Option<&ProtectedResourceMetadata>,
) -> Result<Url> {
	let advertised = resource
		.and_then(|r| r.authorization_servers.as_ref())
		.and_then(|servers| servers.first());

	let raw = match advertised {
		Some(server) => server.clone(),
		None => format!("{}/", target.origin().ascii_serialization()),
	};

	Url::parse(&raw)
		.map_err(|source| ConfigError::InvalidEndpoint { endpoint: "authorization server", source }.into())
}
