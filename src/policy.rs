//! Per-account consumer policy: access allow-lists, usage logs, and account preferences.
//!
//! Each store exists once per [`ConsumerKind`]; both kinds share the underlying
//! [`StateStore`] and differ only in key format and id normalization.

pub mod access;
pub mod preference;
pub mod usage;

pub use access::*;
pub use preference::*;
pub use usage::*;

// crates.io
use tokio::sync::broadcast;
// self
use crate::{_prelude::*, config::BrokerConfig, consumer::ConsumerKind, store::StateStore};

const EVENT_CAPACITY: usize = 64;

/// The three stores serving one consumer kind.
#[derive(Debug)]
pub struct KindPolicy {
	/// Allow-lists.
	pub access: AccessStore,
	/// Usage logs.
	pub usage: UsageStore,
	/// Account preferences.
	pub preference: PreferenceStore,
}

/// Policy stores for both consumer kinds plus their change streams.
pub struct PolicyStores {
	state: Arc<dyn StateStore>,
	extension: KindPolicy,
	mcp_server: KindPolicy,
	access_changes: broadcast::Sender<AccessChange>,
	preference_changes: broadcast::Sender<PreferenceChange>,
}
impl PolicyStores {
	/// Builds both kinds over `state` using the trust and inheritance settings in `config`.
	pub fn new(state: Arc<dyn StateStore>, config: &BrokerConfig) -> Self {
		let (access_changes, _) = broadcast::channel(EVENT_CAPACITY);
		let (preference_changes, _) = broadcast::channel(EVENT_CAPACITY);
		let extension = KindPolicy {
			access: AccessStore::new(
				ConsumerKind::Extension,
				state.clone(),
				config.trusted_extension_auth_access.clone(),
				access_changes.clone(),
			),
			usage: UsageStore::new(ConsumerKind::Extension, state.clone()),
			preference: PreferenceStore::new(
				ConsumerKind::Extension,
				state.clone(),
				&config.inherit_auth_account_preference,
				preference_changes.clone(),
			),
		};
		let mcp_server = KindPolicy {
			access: AccessStore::new(
				ConsumerKind::McpServer,
				state.clone(),
				config.trusted_mcp_auth_access.clone(),
				access_changes.clone(),
			),
			usage: UsageStore::new(ConsumerKind::McpServer, state.clone()),
			preference: PreferenceStore::new(
				ConsumerKind::McpServer,
				state.clone(),
				&HashMap::new(),
				preference_changes.clone(),
			),
		};

		Self { state, extension, mcp_server, access_changes, preference_changes }
	}

	/// Stores for `kind`.
	pub fn kind(&self, kind: ConsumerKind) -> &KindPolicy {
		match kind {
			ConsumerKind::Extension => &self.extension,
			ConsumerKind::McpServer => &self.mcp_server,
		}
	}

	/// Underlying state store.
	pub fn state(&self) -> &Arc<dyn StateStore> {
		&self.state
	}

	/// Subscribes to allow-list writes for both kinds.
	pub fn subscribe_access_changes(&self) -> broadcast::Receiver<AccessChange> {
		self.access_changes.subscribe()
	}

	/// Subscribes to preference writes for both kinds.
	pub fn subscribe_preference_changes(&self) -> broadcast::Receiver<PreferenceChange> {
		self.preference_changes.subscribe()
	}
}
impl Debug for PolicyStores {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PolicyStores")
			.field("extension", &self.extension)
			.field("mcp_server", &self.mcp_server)
			.finish_non_exhaustive()
	}
}
