//! Provider-centred views.

// self
use crate::{
	_prelude::*,
	consumer::ConsumerKind,
	policy::KindPolicy,
	query::{AccountQuery, AuthQuery},
};

/// Consumers that used any account of a provider.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActiveEntities {
	/// Extension ids, first-seen order.
	pub extensions: Vec<String>,
	/// MCP server ids, first-seen order.
	pub mcp_servers: Vec<String>,
}

/// Activity of one account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountActivity {
	/// Account label.
	pub account_label: String,
	/// Latest use across both kinds, milliseconds since the epoch.
	pub last_used: i64,
	/// Number of usage entries across both kinds.
	pub usage_count: usize,
}

/// Provider-wide usage summary.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UsageStats {
	/// Usage entries across every account.
	pub total_sessions: usize,
	/// Accounts currently signed in.
	pub total_accounts: usize,
	/// Accounts with at least one use, most recent first.
	pub recent_activity: Vec<AccountActivity>,
}

/// One provider.
#[derive(Clone, Debug)]
pub struct ProviderQuery<'a> {
	query: &'a AuthQuery,
	provider_id: String,
}
impl<'a> ProviderQuery<'a> {
	pub(crate) fn new(query: &'a AuthQuery, provider_id: String) -> Self {
		Self { query, provider_id }
	}

	/// Views one account.
	pub fn account(&self, account_label: impl Into<String>) -> AccountQuery<'a> {
		AccountQuery::new(self.query, self.provider_id.clone(), account_label.into())
	}

	/// Crosses the provider with one consumer.
	pub fn consumer(&self, kind: ConsumerKind, consumer_id: impl Into<String>) -> ProviderConsumerQuery<'a> {
		ProviderConsumerQuery::new(self.query, kind, self.provider_id.clone(), consumer_id.into())
	}

	/// Crosses the provider with one extension.
	pub fn extension(&self, extension_id: impl Into<String>) -> ProviderConsumerQuery<'a> {
		self.consumer(ConsumerKind::Extension, extension_id)
	}

	/// Crosses the provider with one MCP server.
	pub fn mcp_server(&self, mcp_server_id: impl Into<String>) -> ProviderConsumerQuery<'a> {
		self.consumer(ConsumerKind::McpServer, mcp_server_id)
	}

	/// Consumers found in the usage logs of the provider's accounts.
	pub async fn get_active_entities(&self) -> ActiveEntities {
		let mut entities = ActiveEntities::default();

		for account in self.query.accounts_or_empty(&self.provider_id).await {
			for (kind, ids) in [
				(ConsumerKind::Extension, &mut entities.extensions),
				(ConsumerKind::McpServer, &mut entities.mcp_servers),
			] {
				for usage in self.query.policies(kind).usage.read_usages(&self.provider_id, &account.label) {
					if !ids.contains(&usage.consumer_id) {
						ids.push(usage.consumer_id);
					}
				}
			}
		}

		entities
	}

	/// Labels of the signed-in accounts.
	pub async fn get_account_names(&self) -> Vec<String> {
		self.query
			.accounts_or_empty(&self.provider_id)
			.await
			.into_iter()
			.map(|account| account.label)
			.collect()
	}

	/// Usage summary across both kinds.
	pub async fn get_usage_stats(&self) -> UsageStats {
		let accounts = self.query.accounts_or_empty(&self.provider_id).await;
		let mut recent_activity = Vec::new();

		for account in &accounts {
			let usages = ConsumerKind::ALL
				.into_iter()
				.flat_map(|kind| self.query.policies(kind).usage.read_usages(&self.provider_id, &account.label))
				.collect::<Vec<_>>();

			if usages.is_empty() {
				continue;
			}

			recent_activity.push(AccountActivity {
				account_label: account.label.clone(),
				last_used: usages.iter().map(|u| u.last_used).max().unwrap_or(0).max(0),
				usage_count: usages.len(),
			});
		}

		recent_activity.sort_by(|a, b| b.last_used.cmp(&a.last_used));

		UsageStats {
			total_sessions: recent_activity.iter().map(|a| a.usage_count).sum(),
			total_accounts: accounts.len(),
			recent_activity,
		}
	}

	/// Visits each signed-in account.
	pub async fn for_each_account<F>(&self, mut f: F)
	where
		F: FnMut(AccountQuery<'a>),
	{
		for account in self.query.accounts_or_empty(&self.provider_id).await {
			f(self.account(account.label));
		}
	}
}

/// One provider crossed with one consumer.
#[derive(Clone, Debug)]
pub struct ProviderConsumerQuery<'a> {
	query: &'a AuthQuery,
	kind: ConsumerKind,
	provider_id: String,
	consumer_id: String,
}
impl<'a> ProviderConsumerQuery<'a> {
	pub(crate) fn new(
		query: &'a AuthQuery,
		kind: ConsumerKind,
		provider_id: String,
		consumer_id: String,
	) -> Self {
		let consumer_id = kind.normalize_id(&consumer_id);

		Self { query, kind, provider_id, consumer_id }
	}

	/// Preferred account label.
	pub fn get_account_preference(&self) -> Option<String> {
		self.policies().preference.get(&self.consumer_id, &self.provider_id)
	}

	/// Stores the preferred account label.
	pub fn set_account_preference(&self, account_label: &str) -> Result<()> {
		self.policies().preference.set(&self.consumer_id, &self.provider_id, account_label)
	}

	/// Forgets the preference.
	pub fn remove_account_preference(&self) -> Result<()> {
		self.policies().preference.remove(&self.consumer_id, &self.provider_id)
	}

	/// Account the consumer used most recently.
	pub async fn get_last_used_account(&self) -> Option<String> {
		let mut latest: Option<(i64, String)> = None;

		for account in self.query.accounts_or_empty(&self.provider_id).await {
			for usage in self.usages_of(&account.label) {
				if latest.as_ref().is_none_or(|(at, _)| usage.last_used > *at) {
					latest = Some((usage.last_used, account.label.clone()));
				}
			}
		}

		latest.map(|(_, label)| label)
	}

	/// Accounts the consumer has used, in account order.
	pub async fn get_used_accounts(&self) -> Vec<String> {
		let mut used = Vec::new();

		for account in self.query.accounts_or_empty(&self.provider_id).await {
			if !self.usages_of(&account.label).is_empty() {
				used.push(account.label);
			}
		}

		used
	}

	fn usages_of(&self, account_label: &str) -> Vec<crate::policy::UsageEntry> {
		self.policies()
			.usage
			.read_usages(&self.provider_id, account_label)
			.into_iter()
			.filter(|usage| usage.consumer_id == self.consumer_id)
			.collect()
	}

	fn policies(&self) -> &KindPolicy {
		self.query.policies(self.kind)
	}
}
