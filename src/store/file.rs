//! Simple file-backed [`StateStore`] for lightweight deployments and CLIs.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	store::{StateStore, StorageScope, StoreError},
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Snapshot {
	#[serde(default)]
	workspace: BTreeMap<String, String>,
	#[serde(default)]
	global: BTreeMap<String, String>,
}
impl Snapshot {
	fn scope(&self, scope: StorageScope) -> &BTreeMap<String, String> {
		match scope {
			StorageScope::Workspace => &self.workspace,
			StorageScope::Global => &self.global,
		}
	}

	fn scope_mut(&mut self, scope: StorageScope) -> &mut BTreeMap<String, String> {
		match scope {
			StorageScope::Workspace => &mut self.workspace,
			StorageScope::Global => &mut self.global,
		}
	}
}

/// Persists both scopes to one JSON document after each mutation.
#[derive(Clone, Debug)]
pub struct FileStateStore {
	path: PathBuf,
	inner: Arc<RwLock<Snapshot>>,
}
impl FileStateStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	fn load_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
		if !path.exists() {
			return Ok(Snapshot::default());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.is_empty() {
			return Ok(Snapshot::default());
		}

		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist_locked(&self, contents: &Snapshot) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let serialized =
			serde_json::to_vec_pretty(contents).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}
}
impl StateStore for FileStateStore {
	fn get(&self, key: &str, scope: StorageScope) -> Result<Option<String>, StoreError> {
		Ok(self.inner.read().scope(scope).get(key).cloned())
	}

	fn store(&self, key: &str, value: String, scope: StorageScope) -> Result<(), StoreError> {
		let mut guard = self.inner.write();

		guard.scope_mut(scope).insert(key.to_owned(), value);

		self.persist_locked(&guard)
	}

	fn remove(&self, key: &str, scope: StorageScope) -> Result<(), StoreError> {
		let mut guard = self.inner.write();

		if guard.scope_mut(scope).remove(key).is_some() {
			self.persist_locked(&guard)?;
		}

		Ok(())
	}

	fn keys(&self, scope: StorageScope) -> Result<Vec<String>, StoreError> {
		Ok(self.inner.read().scope(scope).keys().cloned().collect())
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// self
	use super::*;

	fn temp_path() -> PathBuf {
		let unique = format!(
			"auth_provider_broker_state_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	#[test]
	fn store_and_reload_round_trip() {
		let path = temp_path();
		let store = FileStateStore::open(&path).expect("Failed to open file state store.");

		store
			.store("github-alice", "[]".into(), StorageScope::Global)
			.expect("Failed to write global entry.");
		store
			.store("ext-github", "alice".into(), StorageScope::Workspace)
			.expect("Failed to write workspace entry.");
		drop(store);

		let reopened = FileStateStore::open(&path).expect("Failed to reopen file state store.");

		assert_eq!(
			reopened.get("github-alice", StorageScope::Global).expect("Read should succeed."),
			Some("[]".into())
		);
		assert_eq!(
			reopened.get("ext-github", StorageScope::Workspace).expect("Read should succeed."),
			Some("alice".into())
		);
		assert_eq!(
			reopened.get("ext-github", StorageScope::Global).expect("Read should succeed."),
			None
		);

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary state store snapshot {}: {e}", path.display())
		});
	}
}
