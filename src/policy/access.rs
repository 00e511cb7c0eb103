//! Per-account consumer allow-lists with configuration-sourced trust.

// crates.io
use tokio::sync::broadcast;
// self
use crate::{
	_prelude::*,
	config::TrustedAccess,
	consumer::ConsumerKind,
	store::{self, StateStore, StorageScope},
};

/// One consumer's entry in an account allow-list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedConsumer {
	/// Normalized consumer id.
	pub id: String,
	/// Display name.
	pub name: String,
	/// Explicit decision; an entry without one counts as allowed.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub allowed: Option<bool>,
	/// Last use in milliseconds since the epoch.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_used: Option<i64>,
	/// Synthesized from configuration on read; never persisted.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub trusted: Option<bool>,
}
impl AllowedConsumer {
	/// Builds an entry with an explicit decision.
	pub fn new(id: impl Into<String>, name: impl Into<String>, allowed: bool) -> Self {
		Self { id: id.into(), name: name.into(), allowed: Some(allowed), last_used: None, trusted: None }
	}

	/// Returns `true` unless the entry records an explicit denial.
	pub fn is_allowed(&self) -> bool {
		self.allowed != Some(false)
	}

	/// Returns `true` for configuration-trusted entries.
	pub fn is_trusted(&self) -> bool {
		self.trusted == Some(true)
	}
}

/// Notification fired after an account allow-list is written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessChange {
	/// Consumer kind whose list changed.
	pub kind: ConsumerKind,
	/// Provider id.
	pub provider_id: String,
	/// Account label.
	pub account_label: String,
}

/// Allow-lists for one consumer kind.
pub struct AccessStore {
	kind: ConsumerKind,
	state: Arc<dyn StateStore>,
	trusted: TrustedAccess,
	changes: broadcast::Sender<AccessChange>,
}
impl AccessStore {
	/// Builds a store publishing writes on `changes`.
	pub fn new(
		kind: ConsumerKind,
		state: Arc<dyn StateStore>,
		trusted: TrustedAccess,
		changes: broadcast::Sender<AccessChange>,
	) -> Self {
		Self { kind, state, trusted, changes }
	}

	/// Consumer kind served by this store.
	pub fn kind(&self) -> ConsumerKind {
		self.kind
	}

	/// Decides whether `consumer_id` may use the account.
	///
	/// Configuration trust wins; otherwise the stored entry decides. `None` means no decision has
	/// been recorded yet.
	pub fn is_access_allowed(
		&self,
		provider_id: &str,
		account_label: &str,
		consumer_id: &str,
	) -> Option<bool> {
		let key = self.kind.normalize_id(consumer_id);

		if self.trusted.trusted_for(provider_id).iter().any(|id| self.kind.normalize_id(id) == key) {
			return Some(true);
		}

		self.read_stored(provider_id, account_label)
			.into_iter()
			.find(|entry| entry.id == key)
			.map(|entry| entry.is_allowed())
	}

	/// Reads the allow-list, trusted consumers first.
	pub fn read_allowed(&self, provider_id: &str, account_label: &str) -> Vec<AllowedConsumer> {
		let stored = self.read_stored(provider_id, account_label);
		let trusted_ids = self.trusted.trusted_for(provider_id);
		let mut list = trusted_ids
			.iter()
			.map(|id| {
				let id = self.kind.normalize_id(id);
				let existing = stored.iter().find(|entry| entry.id == id);

				AllowedConsumer {
					name: existing.map(|e| e.name.clone()).unwrap_or_else(|| id.clone()),
					last_used: existing.and_then(|e| e.last_used),
					allowed: Some(true),
					trusted: Some(true),
					id,
				}
			})
			.collect::<Vec<_>>();

		for entry in stored {
			if !list.iter().any(|t| t.id == entry.id) {
				list.push(entry);
			}
		}

		list
	}

	/// Merges `entries` into the stored list and persists it without trusted entries.
	pub fn update_allowed(
		&self,
		provider_id: &str,
		account_label: &str,
		entries: &[AllowedConsumer],
	) -> Result<()> {
		let mut list = self.read_stored(provider_id, account_label);

		for entry in entries {
			let id = self.kind.normalize_id(&entry.id);

			match list.iter_mut().find(|existing| existing.id == id) {
				Some(existing) => existing.allowed = entry.allowed,
				None => list.push(AllowedConsumer { id, ..entry.clone() }),
			}
		}

		list.retain(|entry| !entry.is_trusted());

		store::write_json(self.state.as_ref(), &self.key(provider_id, account_label), &list, StorageScope::Global)?;
		self.notify(provider_id, account_label);

		Ok(())
	}

	/// Drops the stored list for the account.
	pub fn remove_allowed(&self, provider_id: &str, account_label: &str) -> Result<()> {
		self.state.remove(&self.key(provider_id, account_label), StorageScope::Global)?;
		self.notify(provider_id, account_label);

		Ok(())
	}

	fn read_stored(&self, provider_id: &str, account_label: &str) -> Vec<AllowedConsumer> {
		store::read_json::<Vec<AllowedConsumer>>(
			self.state.as_ref(),
			&self.key(provider_id, account_label),
			StorageScope::Global,
		)
		.unwrap_or_default()
	}

	fn key(&self, provider_id: &str, account_label: &str) -> String {
		match self.kind {
			ConsumerKind::Extension => format!("{provider_id}-{account_label}"),
			ConsumerKind::McpServer => format!("mcpserver-{provider_id}-{account_label}"),
		}
	}

	fn notify(&self, provider_id: &str, account_label: &str) {
		let _ = self.changes.send(AccessChange {
			kind: self.kind,
			provider_id: provider_id.to_owned(),
			account_label: account_label.to_owned(),
		});
	}
}
impl Debug for AccessStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AccessStore").field("kind", &self.kind).finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::MemoryStateStore;

	fn access(kind: ConsumerKind, trusted: TrustedAccess) -> (AccessStore, Arc<MemoryStateStore>) {
		let state = Arc::new(MemoryStateStore::default());
		let (tx, _) = broadcast::channel(8);

		(AccessStore::new(kind, state.clone(), trusted, tx), state)
	}

	#[test]
	fn trusted_consumers_are_allowed_without_entries() {
		let (store, _) =
			access(ConsumerKind::Extension, TrustedAccess::Global(vec!["pub.trusted".into()]));

		assert_eq!(store.is_access_allowed("github", "alice", "Pub.Trusted"), Some(true));
		assert_eq!(store.is_access_allowed("github", "alice", "pub.other"), None);
	}

	#[test]
	fn writes_never_persist_trusted_entries() {
		let (store, state) =
			access(ConsumerKind::McpServer, TrustedAccess::Global(vec!["trusted".into()]));
		let mut forged = AllowedConsumer::new("forged", "Forged", true);

		forged.trusted = Some(true);

		let listed = store.read_allowed("github", "alice");

		store
			.update_allowed("github", "alice", &[listed[0].clone(), forged, AllowedConsumer::new("b", "B", false)])
			.expect("Allow-list write should succeed.");

		let raw = state
			.get("mcpserver-github-alice", StorageScope::Global)
			.expect("Read should succeed.")
			.expect("Allow-list should be stored.");
		let persisted: Vec<AllowedConsumer> =
			serde_json::from_str(&raw).expect("Persisted list should be JSON.");

		assert_eq!(persisted, vec![AllowedConsumer::new("b", "B", false)]);
		assert_eq!(store.is_access_allowed("github", "alice", "b"), Some(false));
		assert!(store.read_allowed("github", "alice")[0].is_trusted());
	}

	#[test]
	fn updates_merge_by_normalized_id() {
		let (store, _) = access(ConsumerKind::Extension, TrustedAccess::None);

		store
			.update_allowed("github", "alice", &[AllowedConsumer::new("Pub.Ext", "Ext", true)])
			.expect("Allow-list write should succeed.");
		store
			.update_allowed("github", "alice", &[AllowedConsumer::new("pub.ext", "Ext", false)])
			.expect("Allow-list write should succeed.");

		let list = store.read_allowed("github", "alice");

		assert_eq!(list.len(), 1);
		assert_eq!(list[0].allowed, Some(false));
	}

	#[test]
	fn legacy_entries_without_decision_are_allowed() {
		let (store, state) = access(ConsumerKind::Extension, TrustedAccess::None);

		state
			.store("github-alice", r#"[{"id":"pub.ext","name":"Ext"}]"#.into(), StorageScope::Global)
			.expect("Write should succeed.");

		assert_eq!(store.is_access_allowed("github", "alice", "pub.ext"), Some(true));
	}
}
