//! Read/write views over access, usage, and preference data.
//!
//! Three entry axes hang off [`AuthQuery`]: a provider ([`AuthQuery::provider`]), a consumer
//! ([`AuthQuery::extension`] / [`AuthQuery::mcp_server`]), and an account
//! ([`AuthQuery::account`]). Each returns a short-lived view borrowing the query service; none of
//! them expose storage keys. Methods that list accounts go through the provider registry and
//! degrade to empty results when the provider cannot answer.

pub mod account;
pub mod consumer;
pub mod provider;

pub use account::*;
pub use consumer::*;
pub use provider::*;

// crates.io
use tokio::sync::broadcast;
// self
use crate::{
	_prelude::*,
	auth::{AccountInfo, ProviderId},
	consumer::ConsumerKind,
	error::ConfigError,
	policy::{AccessChange, KindPolicy, PolicyStores, PreferenceChange},
	registry::ProviderRegistry,
};

/// Provider ids starting with this prefix are internal and hidden by default.
pub const INTERNAL_PROVIDER_PREFIX: &str = "__";
/// Confirmation phrase required by [`AuthQuery::clear_all_data`].
pub const CLEAR_ALL_CONFIRMATION: &str = "CLEAR_ALL_AUTH_DATA";

/// Query service over the policy stores of both consumer kinds.
#[derive(Clone)]
pub struct AuthQuery {
	registry: Arc<ProviderRegistry>,
	policy: Arc<PolicyStores>,
}
impl AuthQuery {
	/// Builds the service.
	pub fn new(registry: Arc<ProviderRegistry>, policy: Arc<PolicyStores>) -> Self {
		Self { registry, policy }
	}

	/// Views one provider.
	pub fn provider(&self, provider_id: impl Into<String>) -> ProviderQuery<'_> {
		ProviderQuery::new(self, provider_id.into())
	}

	/// Views one account of a provider.
	pub fn account(
		&self,
		provider_id: impl Into<String>,
		account_label: impl Into<String>,
	) -> AccountQuery<'_> {
		AccountQuery::new(self, provider_id.into(), account_label.into())
	}

	/// Views one consumer of `kind` across providers.
	pub fn consumer(&self, kind: ConsumerKind, consumer_id: impl Into<String>) -> ConsumerQuery<'_> {
		ConsumerQuery::new(self, kind, consumer_id.into())
	}

	/// Views one extension across providers.
	pub fn extension(&self, extension_id: impl Into<String>) -> ConsumerQuery<'_> {
		self.consumer(ConsumerKind::Extension, extension_id)
	}

	/// Views one MCP server across providers.
	pub fn mcp_server(&self, mcp_server_id: impl Into<String>) -> ConsumerQuery<'_> {
		self.consumer(ConsumerKind::McpServer, mcp_server_id)
	}

	/// Registered provider ids, sorted; internal ones only when asked for.
	pub fn get_provider_ids(&self, include_internal: bool) -> Vec<ProviderId> {
		self.registry
			.provider_ids()
			.into_iter()
			.filter(|id| include_internal || !is_internal(id))
			.collect()
	}

	/// Wipes access and usage data of every account of every listed provider, for both kinds.
	///
	/// Fails with [`Error::ConfirmationRequired`] unless `confirmation` is
	/// [`CLEAR_ALL_CONFIRMATION`]. A provider whose accounts cannot be listed is skipped.
	pub async fn clear_all_data(&self, confirmation: &str, include_internal: bool) -> Result<()> {
		if confirmation != CLEAR_ALL_CONFIRMATION {
			return Err(Error::ConfirmationRequired);
		}

		for provider_id in self.get_provider_ids(include_internal) {
			let accounts = match self.registry.get_accounts(&provider_id).await {
				Ok(accounts) => accounts,
				Err(e) => {
					crate::obs::warn_event!(provider = %provider_id, error = %e, "Skipping provider while clearing data.");

					continue;
				},
			};

			for account in accounts {
				self.account(provider_id.as_str(), account.label).remove()?;
			}
		}

		crate::obs::debug_event!("All authentication data cleared.");

		Ok(())
	}

	/// Subscribes to preference writes for both kinds.
	pub fn subscribe_preference_changes(&self) -> broadcast::Receiver<PreferenceChange> {
		self.policy.subscribe_preference_changes()
	}

	/// Subscribes to allow-list writes for both kinds.
	pub fn subscribe_access_changes(&self) -> broadcast::Receiver<AccessChange> {
		self.policy.subscribe_access_changes()
	}

	fn policies(&self, kind: ConsumerKind) -> &KindPolicy {
		self.policy.kind(kind)
	}

	async fn accounts(&self, provider_id: &str) -> Result<Vec<AccountInfo>> {
		let id = ProviderId::new(provider_id).map_err(ConfigError::from)?;

		self.registry.get_accounts(&id).await
	}

	// Account listing that swallows failures, for read-only views.
	async fn accounts_or_empty(&self, provider_id: &str) -> Vec<AccountInfo> {
		self.accounts(provider_id).await.unwrap_or_else(|e| {
			crate::obs::debug_event!(provider = provider_id, error = %e, "Account listing failed.");

			Vec::new()
		})
	}
}
impl Debug for AuthQuery {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthQuery").finish_non_exhaustive()
	}
}

fn is_internal(provider_id: &str) -> bool {
	provider_id.starts_with(INTERNAL_PROVIDER_PREFIX)
}
