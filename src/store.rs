//! Persistence collaborators: a scoped key/value state store and an async secret store.
//!
//! The broker never owns a storage engine. Access lists, usage logs, preferences, and the
//! dynamic provider index go through [`StateStore`]; client secrets and token sets go through
//! [`SecretStore`], whose change stream lets the broker notice externally rotated tokens.

pub mod file;
pub mod memory;

pub use file::FileStateStore;
pub use memory::{MemorySecretStore, MemoryStateStore};

// crates.io
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
// self
use crate::_prelude::*;

/// Boxed future returned by [`SecretStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Scope a state value is stored under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageScope {
	/// Local to the current workspace.
	Workspace,
	/// Shared across every workspace.
	Global,
}

/// Synchronous scoped key/value store.
pub trait StateStore
where
	Self: Send + Sync,
{
	/// Reads the raw value stored under `key`.
	fn get(&self, key: &str, scope: StorageScope) -> Result<Option<String>, StoreError>;

	/// Stores `value` under `key`, replacing any previous value.
	fn store(&self, key: &str, value: String, scope: StorageScope) -> Result<(), StoreError>;

	/// Removes `key`; removing a missing key is not an error.
	fn remove(&self, key: &str, scope: StorageScope) -> Result<(), StoreError>;

	/// Lists every key stored in `scope`.
	fn keys(&self, scope: StorageScope) -> Result<Vec<String>, StoreError>;
}

/// Asynchronous secret store with change notifications.
pub trait SecretStore
where
	Self: Send + Sync,
{
	/// Reads the secret stored under `key`.
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

	/// Stores a secret and notifies subscribers.
	fn set<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()>;

	/// Deletes a secret and notifies subscribers.
	fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()>;

	/// Lists every stored key.
	fn keys(&self) -> StoreFuture<'_, Vec<String>>;

	/// Subscribes to keys whose secret changed, from any writer.
	fn subscribe(&self) -> broadcast::Receiver<String>;
}

/// Error type produced by [`StateStore`] and [`SecretStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Reads and decodes a JSON value, treating malformed or unreadable entries as absent.
pub(crate) fn read_json<T>(store: &dyn StateStore, key: &str, scope: StorageScope) -> Option<T>
where
	T: DeserializeOwned,
{
	let raw = match store.get(key, scope) {
		Ok(raw) => raw?,
		Err(e) => {
			crate::obs::warn_event!(key, error = %e, "State store read failed.");

			return None;
		},
	};

	match serde_json::from_str(&raw) {
		Ok(value) => Some(value),
		Err(e) => {
			crate::obs::warn_event!(key, error = %e, "Discarding malformed state entry.");

			None
		},
	}
}

/// Encodes `value` as JSON and stores it.
pub(crate) fn write_json<T>(
	store: &dyn StateStore,
	key: &str,
	value: &T,
	scope: StorageScope,
) -> Result<(), StoreError>
where
	T: ?Sized + Serialize,
{
	let raw = serde_json::to_string(value)
		.map_err(|e| StoreError::Serialization { message: e.to_string() })?;

	store.store(key, raw, scope)
}

#[cfg(test)]
mod tests {
	// std
	use std::error::Error as StdError;
	// self
	use super::*;

	#[test]
	fn store_error_converts_into_broker_error_with_source() {
		let store_error = StoreError::Backend { message: "database unreachable".into() };
		let broker_error: Error = store_error.clone().into();

		assert!(matches!(broker_error, Error::Storage(_)));
		assert!(broker_error.to_string().contains("database unreachable"));

		let source = StdError::source(&broker_error)
			.expect("Broker error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}

	#[test]
	fn malformed_json_reads_as_absent() {
		let store = MemoryStateStore::default();

		store
			.store("k", "{not json".into(), StorageScope::Global)
			.expect("Memory store write should succeed.");

		assert_eq!(read_json::<Vec<String>>(&store, "k", StorageScope::Global), None);

		write_json(&store, "k", &["a"], StorageScope::Global)
			.expect("Memory store write should succeed.");

		assert_eq!(
			read_json::<Vec<String>>(&store, "k", StorageScope::Global),
			Some(vec!["a".to_owned()])
		);
		assert_eq!(read_json::<Vec<String>>(&store, "k", StorageScope::Workspace), None);
	}
}
