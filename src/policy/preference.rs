//! Preferred account per (consumer, provider), with preference inheritance.

// crates.io
use tokio::sync::broadcast;
// self
use crate::{
	_prelude::*,
	consumer::ConsumerKind,
	store::{StateStore, StorageScope},
};

/// Notification fired after a preference is set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreferenceChange {
	/// Consumer kind.
	pub kind: ConsumerKind,
	/// Provider id.
	pub provider_id: String,
	/// The consumer whose preference was written plus every consumer inheriting it.
	pub consumer_ids: Vec<String>,
}

/// Account preferences for one consumer kind.
///
/// Writes go to both scopes so a fresh workspace inherits the global choice; reads prefer the
/// workspace value.
pub struct PreferenceStore {
	kind: ConsumerKind,
	state: Arc<dyn StateStore>,
	parent_to_children: HashMap<String, Vec<String>>,
	child_to_parent: HashMap<String, String>,
	changes: broadcast::Sender<PreferenceChange>,
}
impl PreferenceStore {
	/// Builds a store; `inherit` maps a parent consumer to children sharing its preference.
	pub fn new(
		kind: ConsumerKind,
		state: Arc<dyn StateStore>,
		inherit: &HashMap<String, Vec<String>>,
		changes: broadcast::Sender<PreferenceChange>,
	) -> Self {
		let parent_to_children = inherit
			.iter()
			.map(|(parent, children)| {
				(
					kind.normalize_id(parent),
					children.iter().map(|c| kind.normalize_id(c)).collect::<Vec<_>>(),
				)
			})
			.collect::<HashMap<_, _>>();
		let child_to_parent = parent_to_children
			.iter()
			.flat_map(|(parent, children)| children.iter().map(move |c| (c.clone(), parent.clone())))
			.collect();

		Self { kind, state, parent_to_children, child_to_parent, changes }
	}

	/// Preferred account label, workspace value first.
	pub fn get(&self, consumer_id: &str, provider_id: &str) -> Option<String> {
		let key = self.key(consumer_id, provider_id);

		[StorageScope::Workspace, StorageScope::Global].into_iter().find_map(|scope| {
			self.state.get(&key, scope).unwrap_or_else(|e| {
				crate::obs::warn_event!(key, error = %e, "Preference read failed.");

				None
			})
		})
	}

	/// Stores the preference in both scopes and notifies.
	pub fn set(&self, consumer_id: &str, provider_id: &str, account_label: &str) -> Result<()> {
		let parent = self.resolve(consumer_id);
		let key = self.storage_key(&parent, provider_id);

		self.state.store(&key, account_label.to_owned(), StorageScope::Workspace)?;
		self.state.store(&key, account_label.to_owned(), StorageScope::Global)?;

		let mut consumer_ids = vec![parent.clone()];

		if let Some(children) = self.parent_to_children.get(&parent) {
			consumer_ids.extend(children.iter().cloned());
		}

		let _ = self.changes.send(PreferenceChange {
			kind: self.kind,
			provider_id: provider_id.to_owned(),
			consumer_ids,
		});

		Ok(())
	}

	/// Removes the preference from both scopes.
	pub fn remove(&self, consumer_id: &str, provider_id: &str) -> Result<()> {
		let key = self.key(consumer_id, provider_id);

		self.state.remove(&key, StorageScope::Workspace)?;
		self.state.remove(&key, StorageScope::Global)?;

		Ok(())
	}

	fn resolve(&self, consumer_id: &str) -> String {
		let id = self.kind.normalize_id(consumer_id);

		self.child_to_parent.get(&id).cloned().unwrap_or(id)
	}

	fn key(&self, consumer_id: &str, provider_id: &str) -> String {
		self.storage_key(&self.resolve(consumer_id), provider_id)
	}

	fn storage_key(&self, consumer_id: &str, provider_id: &str) -> String {
		match self.kind {
			ConsumerKind::Extension => format!("{consumer_id}-{provider_id}"),
			ConsumerKind::McpServer => format!("mcpserver-{consumer_id}-{provider_id}"),
		}
	}
}
impl Debug for PreferenceStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PreferenceStore").field("kind", &self.kind).finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::MemoryStateStore;

	fn store(
		inherit: &[(&str, &[&str])],
	) -> (PreferenceStore, Arc<MemoryStateStore>, broadcast::Receiver<PreferenceChange>) {
		let state = Arc::new(MemoryStateStore::default());
		let (tx, rx) = broadcast::channel(8);
		let inherit = inherit
			.iter()
			.map(|(p, c)| (p.to_string(), c.iter().map(|s| s.to_string()).collect()))
			.collect();

		(PreferenceStore::new(ConsumerKind::Extension, state.clone(), &inherit, tx), state, rx)
	}

	#[test]
	fn workspace_value_wins_over_global() {
		let (prefs, state, _rx) = store(&[]);

		prefs.set("pub.ext", "github", "alice").expect("Preference write should succeed.");

		assert_eq!(prefs.get("pub.ext", "github").as_deref(), Some("alice"));

		state
			.store("pub.ext-github", "bob".into(), StorageScope::Workspace)
			.expect("Write should succeed.");

		assert_eq!(prefs.get("pub.ext", "github").as_deref(), Some("bob"));

		state.remove("pub.ext-github", StorageScope::Workspace).expect("Remove should succeed.");

		assert_eq!(prefs.get("Pub.Ext", "github").as_deref(), Some("alice"));
	}

	#[test]
	fn children_inherit_parent_preference() {
		let (prefs, _state, mut rx) = store(&[("pub.parent", &["pub.child"])]);

		prefs.set("pub.child", "github", "alice").expect("Preference write should succeed.");

		assert_eq!(prefs.get("pub.parent", "github").as_deref(), Some("alice"));

		let change = rx.try_recv().expect("Preference change should be published.");

		assert_eq!(change.consumer_ids, vec!["pub.parent".to_owned(), "pub.child".to_owned()]);

		prefs.remove("pub.child", "github").expect("Preference removal should succeed.");

		assert_eq!(prefs.get("pub.parent", "github"), None);
	}
}
