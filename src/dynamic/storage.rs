//! Persistence for dynamic providers: the provider index, client secrets, and token sets.
//!
//! The index lives in the state store; secrets and token sets live in the secret store so the
//! host's encryption at rest applies to them.

// crates.io
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	auth::{StoredToken, TokenSecret},
	error::ConfigError,
	obs,
	store::{self, SecretStore, StateStore, StorageScope},
};

const PROVIDERS_KEY: &str = "dynamicAuthProviders";
const CLIENT_SECRET_PREFIX: &str = "dynamicAuthProvider:clientSecret:";
const TOKEN_EVENT_CAPACITY: usize = 32;

/// Index entry for a dynamic provider the user has interacted with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicProviderRecord {
	/// Derived provider id.
	pub provider_id: String,
	/// Display label.
	pub label: String,
	/// Authorization server the client is registered with.
	pub authorization_server: String,
	/// Registered client id.
	pub client_id: String,
}

/// Client credentials stored for a dynamic provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientRegistration {
	/// Client id.
	pub client_id: String,
	/// Client secret, for confidential clients.
	pub client_secret: Option<TokenSecret>,
}

/// Token sets of a dynamic provider changed in the secret store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenChange {
	/// Provider whose token sets changed.
	pub provider_id: String,
	/// Client the token sets were issued to.
	pub client_id: String,
	/// Current token sets; empty when they were deleted.
	pub tokens: Vec<StoredToken>,
}

// Field order is part of the key.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenKey {
	is_dynamic_auth_provider: bool,
	auth_provider_id: String,
	client_id: String,
}

/// Dynamic provider storage over a state store and a secret store.
pub struct DynamicProviderStorage {
	state: Arc<dyn StateStore>,
	secrets: Arc<dyn SecretStore>,
	token_changes: broadcast::Sender<TokenChange>,
}
impl DynamicProviderStorage {
	/// Builds the storage.
	pub fn new(state: Arc<dyn StateStore>, secrets: Arc<dyn SecretStore>) -> Self {
		let (token_changes, _) = broadcast::channel(TOKEN_EVENT_CAPACITY);

		Self { state, secrets, token_changes }
	}

	/// Secret store key holding the token sets of `provider_id` for `client_id`.
	pub fn token_key(provider_id: &str, client_id: &str) -> String {
		let key = TokenKey {
			is_dynamic_auth_provider: true,
			auth_provider_id: provider_id.to_owned(),
			client_id: client_id.to_owned(),
		};

		serde_json::to_string(&key).unwrap_or_default()
	}

	/// Every provider in the index.
	pub fn interacted_providers(&self) -> Vec<DynamicProviderRecord> {
		store::read_json(self.state.as_ref(), PROVIDERS_KEY, StorageScope::Global).unwrap_or_default()
	}

	/// Returns `true` when the index knows `provider_id`.
	pub fn has_provider(&self, provider_id: &str) -> bool {
		self.interacted_providers().iter().any(|r| r.provider_id == provider_id)
	}

	/// Stored client credentials for `provider_id`.
	pub async fn client_registration(&self, provider_id: &str) -> Result<Option<ClientRegistration>> {
		let Some(record) =
			self.interacted_providers().into_iter().find(|r| r.provider_id == provider_id)
		else {
			return Ok(None);
		};
		let client_secret =
			self.secrets.get(&client_secret_key(provider_id)).await?.map(TokenSecret::new);

		Ok(Some(ClientRegistration { client_id: record.client_id, client_secret }))
	}

	/// Records (or replaces) the client registration of `provider_id`.
	pub async fn store_client_registration(
		&self,
		provider_id: &str,
		authorization_server: &str,
		label: &str,
		registration: &ClientRegistration,
	) -> Result<()> {
		let mut records = self.interacted_providers();
		let record = DynamicProviderRecord {
			provider_id: provider_id.to_owned(),
			label: label.to_owned(),
			authorization_server: authorization_server.to_owned(),
			client_id: registration.client_id.clone(),
		};

		match records.iter_mut().find(|r| r.provider_id == provider_id) {
			Some(existing) => *existing = record,
			None => records.push(record),
		}

		store::write_json(self.state.as_ref(), PROVIDERS_KEY, &records, StorageScope::Global)?;

		match &registration.client_secret {
			Some(secret) =>
				self.secrets.set(&client_secret_key(provider_id), secret.expose().to_owned()).await?,
			None => self.secrets.delete(&client_secret_key(provider_id)).await?,
		}

		Ok(())
	}

	/// Persisted token sets for `provider_id` and `client_id`.
	pub async fn sessions(&self, provider_id: &str, client_id: &str) -> Result<Vec<StoredToken>> {
		read_tokens(self.secrets.as_ref(), &Self::token_key(provider_id, client_id)).await
	}

	/// Replaces the persisted token sets; an empty slice deletes them.
	pub async fn set_sessions(
		&self,
		provider_id: &str,
		client_id: &str,
		tokens: &[StoredToken],
	) -> Result<()> {
		let key = Self::token_key(provider_id, client_id);

		if tokens.is_empty() {
			self.secrets.delete(&key).await?;
		} else {
			let raw = serde_json::to_string(tokens).map_err(|e| ConfigError::InvalidConfig {
				path: "tokens".into(),
				message: e.to_string(),
			})?;

			self.secrets.set(&key, raw).await?;
		}

		Ok(())
	}

	/// Drops the index entry, client secret, and token sets of `provider_id`.
	pub async fn remove_provider(&self, provider_id: &str) -> Result<()> {
		let mut records = self.interacted_providers();
		let removed = records.iter().position(|r| r.provider_id == provider_id).map(|i| records.remove(i));

		if let Some(record) = &removed {
			store::write_json(self.state.as_ref(), PROVIDERS_KEY, &records, StorageScope::Global)?;
			self.secrets.delete(&Self::token_key(provider_id, &record.client_id)).await?;
		}

		self.secrets.delete(&client_secret_key(provider_id)).await?;

		Ok(())
	}

	/// Subscribes to token set changes observed in the secret store.
	pub fn subscribe_token_changes(&self) -> broadcast::Receiver<TokenChange> {
		self.token_changes.subscribe()
	}

	/// Spawns the secret-change listener on the current runtime.
	///
	/// Changes are handled one at a time, so two rotations of the same token set never
	/// interleave their reads.
	pub fn spawn_secret_listener(&self, cancel: CancellationToken) {
		let Ok(runtime) = tokio::runtime::Handle::try_current() else {
			obs::warn_event!("No async runtime; external token rotations will not be observed.");

			return;
		};
		let mut changes = self.secrets.subscribe();
		let secrets = self.secrets.clone();
		let sink = self.token_changes.clone();

		runtime.spawn(async move {
			loop {
				let key = tokio::select! {
					_ = cancel.cancelled() => break,
					key = changes.recv() => match key {
						Ok(key) => key,
						Err(RecvError::Lagged(_)) => continue,
						Err(RecvError::Closed) => break,
					},
				};
				let Ok(parsed) = serde_json::from_str::<TokenKey>(&key) else { continue };

				if !parsed.is_dynamic_auth_provider {
					continue;
				}

				match read_tokens(secrets.as_ref(), &key).await {
					Ok(tokens) => {
						let _ = sink.send(TokenChange {
							provider_id: parsed.auth_provider_id,
							client_id: parsed.client_id,
							tokens,
						});
					},
					Err(e) => {
						obs::warn_event!(
							provider = %parsed.auth_provider_id,
							error = %e,
							"Failed to read rotated token sets."
						);
					},
				}
			}
		});
	}
}
impl Debug for DynamicProviderStorage {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DynamicProviderStorage").finish_non_exhaustive()
	}
}

fn client_secret_key(provider_id: &str) -> String {
	format!("{CLIENT_SECRET_PREFIX}{provider_id}")
}

async fn read_tokens(secrets: &dyn SecretStore, key: &str) -> Result<Vec<StoredToken>> {
	let Some(raw) = secrets.get(key).await? else {
		return Ok(Vec::new());
	};

	match serde_json::from_str(&raw) {
		Ok(tokens) => Ok(tokens),
		Err(e) => {
			obs::warn_event!(error = %e, "Discarding malformed token sets.");

			Ok(Vec::new())
		},
	}
}
