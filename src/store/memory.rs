//! Thread-safe in-memory stores for local development and tests.

// crates.io
use tokio::sync::broadcast;
// self
use crate::{
	_prelude::*,
	store::{SecretStore, StateStore, StorageScope, StoreError, StoreFuture},
};

const SECRET_EVENT_CAPACITY: usize = 64;

type ScopedMap = HashMap<StorageScope, BTreeMap<String, String>>;

/// [`StateStore`] keeping both scopes in process memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryStateStore(Arc<RwLock<ScopedMap>>);
impl StateStore for MemoryStateStore {
	fn get(&self, key: &str, scope: StorageScope) -> Result<Option<String>, StoreError> {
		Ok(self.0.read().get(&scope).and_then(|map| map.get(key)).cloned())
	}

	fn store(&self, key: &str, value: String, scope: StorageScope) -> Result<(), StoreError> {
		self.0.write().entry(scope).or_default().insert(key.to_owned(), value);

		Ok(())
	}

	fn remove(&self, key: &str, scope: StorageScope) -> Result<(), StoreError> {
		if let Some(map) = self.0.write().get_mut(&scope) {
			map.remove(key);
		}

		Ok(())
	}

	fn keys(&self, scope: StorageScope) -> Result<Vec<String>, StoreError> {
		Ok(self.0.read().get(&scope).map(|map| map.keys().cloned().collect()).unwrap_or_default())
	}
}

/// [`SecretStore`] keeping secrets in process memory.
///
/// Every `set`/`delete` broadcasts the key, so tests can simulate an external token rotation by
/// writing through a second handle (clones share state).
#[derive(Clone, Debug)]
pub struct MemorySecretStore {
	secrets: Arc<RwLock<BTreeMap<String, String>>>,
	changes: broadcast::Sender<String>,
}
impl MemorySecretStore {
	fn notify(&self, key: &str) {
		// No subscribers is fine.
		let _ = self.changes.send(key.to_owned());
	}
}
impl Default for MemorySecretStore {
	fn default() -> Self {
		let (changes, _) = broadcast::channel(SECRET_EVENT_CAPACITY);

		Self { secrets: Default::default(), changes }
	}
}
impl SecretStore for MemorySecretStore {
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
		Box::pin(async move { Ok(self.secrets.read().get(key).cloned()) })
	}

	fn set<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.secrets.write().insert(key.to_owned(), value);
			self.notify(key);

			Ok(())
		})
	}

	fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let removed = self.secrets.write().remove(key).is_some();

			if removed {
				self.notify(key);
			}

			Ok(())
		})
	}

	fn keys(&self) -> StoreFuture<'_, Vec<String>> {
		Box::pin(async move { Ok(self.secrets.read().keys().cloned().collect()) })
	}

	fn subscribe(&self) -> broadcast::Receiver<String> {
		self.changes.subscribe()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn scopes_are_independent() {
		let store = MemoryStateStore::default();

		store.store("k", "w".into(), StorageScope::Workspace).expect("Write should succeed.");
		store.store("k", "g".into(), StorageScope::Global).expect("Write should succeed.");
		store.remove("k", StorageScope::Workspace).expect("Remove should succeed.");

		assert_eq!(store.get("k", StorageScope::Workspace).expect("Read should succeed."), None);
		assert_eq!(
			store.get("k", StorageScope::Global).expect("Read should succeed."),
			Some("g".into())
		);
		assert_eq!(store.keys(StorageScope::Global).expect("Keys should list."), vec!["k"]);
	}

	#[tokio::test]
	async fn secret_writes_are_broadcast() {
		let store = MemorySecretStore::default();
		let mut rx = store.subscribe();

		store.set("token", "v1".into()).await.expect("Secret write should succeed.");
		store.delete("token").await.expect("Secret delete should succeed.");
		store.delete("token").await.expect("Deleting a missing secret should succeed.");

		assert_eq!(rx.recv().await.expect("First change should be observed."), "token");
		assert_eq!(rx.recv().await.expect("Second change should be observed."), "token");
		assert!(rx.try_recv().is_err());
		assert_eq!(store.get("token").await.expect("Secret read should succeed."), None);
	}
}
