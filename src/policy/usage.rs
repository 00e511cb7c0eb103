//! Per-account usage logs: which consumer used which scopes, and when.

// self
use crate::{
	_prelude::*,
	consumer::ConsumerKind,
	store::{self, StateStore, StorageScope},
};

/// One consumer's most recent use of an account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
	/// Normalized consumer id.
	#[serde(alias = "extensionId", alias = "mcpServerId")]
	pub consumer_id: String,
	/// Display name.
	#[serde(alias = "extensionName", alias = "mcpServerName")]
	pub consumer_name: String,
	/// Scopes used.
	#[serde(default)]
	pub scopes: Vec<String>,
	/// Milliseconds since the epoch.
	pub last_used: i64,
}

/// Usage logs for one consumer kind.
pub struct UsageStore {
	kind: ConsumerKind,
	state: Arc<dyn StateStore>,
}
impl UsageStore {
	/// Builds a store over `state`.
	pub fn new(kind: ConsumerKind, state: Arc<dyn StateStore>) -> Self {
		Self { kind, state }
	}

	/// Reads the account's usage log.
	pub fn read_usages(&self, provider_id: &str, account_label: &str) -> Vec<UsageEntry> {
		store::read_json(self.state.as_ref(), &self.key(provider_id, account_label), StorageScope::Global)
			.unwrap_or_default()
	}

	/// Drops the account's usage log.
	pub fn remove_usages(&self, provider_id: &str, account_label: &str) -> Result<()> {
		self.state.remove(&self.key(provider_id, account_label), StorageScope::Global)?;

		Ok(())
	}

	/// Records a use now, overwriting the consumer's previous entry.
	pub fn add_usage(
		&self,
		provider_id: &str,
		account_label: &str,
		scopes: &[String],
		consumer_id: &str,
		consumer_name: &str,
	) -> Result<()> {
		self.add_usage_at(provider_id, account_label, scopes, consumer_id, consumer_name, now_millis())
	}

	/// Records a use at `last_used` (milliseconds since the epoch).
	pub fn add_usage_at(
		&self,
		provider_id: &str,
		account_label: &str,
		scopes: &[String],
		consumer_id: &str,
		consumer_name: &str,
		last_used: i64,
	) -> Result<()> {
		let consumer_id = self.kind.normalize_id(consumer_id);
		let mut usages = self.read_usages(provider_id, account_label);

		match usages.iter_mut().find(|usage| usage.consumer_id == consumer_id) {
			Some(usage) => {
				usage.scopes = scopes.to_vec();
				usage.last_used = last_used;
			},
			None => usages.push(UsageEntry {
				consumer_id,
				consumer_name: consumer_name.to_owned(),
				scopes: scopes.to_vec(),
				last_used,
			}),
		}

		store::write_json(
			self.state.as_ref(),
			&self.key(provider_id, account_label),
			&usages,
			StorageScope::Global,
		)?;

		Ok(())
	}

	/// Replaces the whole log.
	pub fn write_usages(&self, provider_id: &str, account_label: &str, usages: &[UsageEntry]) -> Result<()> {
		if usages.is_empty() {
			return self.remove_usages(provider_id, account_label);
		}

		store::write_json(self.state.as_ref(), &self.key(provider_id, account_label), usages, StorageScope::Global)?;

		Ok(())
	}

	fn key(&self, provider_id: &str, account_label: &str) -> String {
		match self.kind {
			ConsumerKind::Extension => format!("{provider_id}-{account_label}-usages"),
			ConsumerKind::McpServer => format!("{provider_id}-{account_label}-mcpserver-usages"),
		}
	}
}
impl Debug for UsageStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("UsageStore").field("kind", &self.kind).finish_non_exhaustive()
	}
}

pub(crate) fn now_millis() -> i64 {
	i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::MemoryStateStore;

	#[test]
	fn repeated_use_overwrites_instead_of_appending() {
		let store = UsageStore::new(ConsumerKind::McpServer, Arc::new(MemoryStateStore::default()));

		store
			.add_usage_at("github", "alice", &["read".into()], "srv", "Server", 10)
			.expect("Usage write should succeed.");
		store
			.add_usage_at("github", "alice", &["read".into(), "write".into()], "srv", "Server", 20)
			.expect("Usage write should succeed.");
		store
			.add_usage_at("github", "alice", &[], "other", "Other", 15)
			.expect("Usage write should succeed.");

		let usages = store.read_usages("github", "alice");

		assert_eq!(usages.len(), 2);
		assert_eq!(usages[0].last_used, 20);
		assert_eq!(usages[0].scopes, vec!["read".to_owned(), "write".to_owned()]);
	}

	#[test]
	fn kinds_use_separate_keys() {
		let state = Arc::new(MemoryStateStore::default());
		let ext = UsageStore::new(ConsumerKind::Extension, state.clone());
		let mcp = UsageStore::new(ConsumerKind::McpServer, state.clone());

		ext.add_usage_at("github", "alice", &[], "Pub.Ext", "Ext", 1)
			.expect("Usage write should succeed.");

		assert!(mcp.read_usages("github", "alice").is_empty());
		assert!(state.get("github-alice-usages", StorageScope::Global).expect("Read should succeed.").is_some());
		assert_eq!(ext.read_usages("github", "alice")[0].consumer_id, "pub.ext");
	}

	#[test]
	fn legacy_field_names_are_read() {
		let state = Arc::new(MemoryStateStore::default());

		state
			.store(
				"github-alice-usages",
				r#"[{"extensionId":"pub.ext","extensionName":"Ext","scopes":["a"],"lastUsed":5}]"#.into(),
				StorageScope::Global,
			)
			.expect("Write should succeed.");

		let usages = UsageStore::new(ConsumerKind::Extension, state).read_usages("github", "alice");

		assert_eq!(usages[0].consumer_id, "pub.ext");
		assert_eq!(usages[0].last_used, 5);
	}
}
