//! Account-centred views: one account crossed with one consumer, all consumers of a kind, or
//! every consumer of either kind.

// std
use std::collections::BTreeSet;
// self
use crate::{
	_prelude::*,
	consumer::ConsumerKind,
	policy::{AllowedConsumer, KindPolicy, UsageEntry},
	query::AuthQuery,
};

/// One account of a provider.
#[derive(Clone, Debug)]
pub struct AccountQuery<'a> {
	query: &'a AuthQuery,
	provider_id: String,
	account_label: String,
}
impl<'a> AccountQuery<'a> {
	pub(crate) fn new(query: &'a AuthQuery, provider_id: String, account_label: String) -> Self {
		Self { query, provider_id, account_label }
	}

	/// Account label.
	pub fn label(&self) -> &str {
		&self.account_label
	}

	/// Crosses the account with one consumer.
	pub fn consumer(&self, kind: ConsumerKind, consumer_id: impl Into<String>) -> AccountConsumerQuery<'a> {
		AccountConsumerQuery {
			query: self.query,
			kind,
			provider_id: self.provider_id.clone(),
			account_label: self.account_label.clone(),
			consumer_id: kind.normalize_id(&consumer_id.into()),
		}
	}

	/// Crosses the account with one extension.
	pub fn extension(&self, extension_id: impl Into<String>) -> AccountConsumerQuery<'a> {
		self.consumer(ConsumerKind::Extension, extension_id)
	}

	/// Crosses the account with one MCP server.
	pub fn mcp_server(&self, mcp_server_id: impl Into<String>) -> AccountConsumerQuery<'a> {
		self.consumer(ConsumerKind::McpServer, mcp_server_id)
	}

	/// Every consumer of `kind` with a footprint on the account.
	pub fn consumers(&self, kind: ConsumerKind) -> AccountConsumersQuery<'a> {
		AccountConsumersQuery {
			query: self.query,
			kind,
			provider_id: self.provider_id.clone(),
			account_label: self.account_label.clone(),
		}
	}

	/// Every extension with a footprint on the account.
	pub fn extensions(&self) -> AccountConsumersQuery<'a> {
		self.consumers(ConsumerKind::Extension)
	}

	/// Every MCP server with a footprint on the account.
	pub fn mcp_servers(&self) -> AccountConsumersQuery<'a> {
		self.consumers(ConsumerKind::McpServer)
	}

	/// Kind-agnostic footprint of the account.
	pub fn entities(&self) -> AccountEntitiesQuery<'a> {
		AccountEntitiesQuery { account: self.clone() }
	}

	/// Drops allow-lists and usage logs of both kinds.
	pub fn remove(&self) -> Result<()> {
		for kind in ConsumerKind::ALL {
			let policies = self.query.policies(kind);

			policies.access.remove_allowed(&self.provider_id, &self.account_label)?;
			policies.usage.remove_usages(&self.provider_id, &self.account_label)?;
		}

		Ok(())
	}
}

/// One account crossed with one consumer.
#[derive(Clone, Debug)]
pub struct AccountConsumerQuery<'a> {
	query: &'a AuthQuery,
	kind: ConsumerKind,
	provider_id: String,
	account_label: String,
	consumer_id: String,
}
impl AccountConsumerQuery<'_> {
	/// Normalized consumer id.
	pub fn consumer_id(&self) -> &str {
		&self.consumer_id
	}

	/// Consumer kind.
	pub fn kind(&self) -> ConsumerKind {
		self.kind
	}

	/// Access decision; `None` when nothing is recorded and the consumer is not trusted.
	pub fn is_access_allowed(&self) -> Option<bool> {
		self.policies().access.is_access_allowed(&self.provider_id, &self.account_label, &self.consumer_id)
	}

	/// Records a decision; the id doubles as the name when none is given.
	pub fn set_access_allowed(&self, allowed: bool, consumer_name: Option<&str>) -> Result<()> {
		let name = consumer_name.unwrap_or(&self.consumer_id);

		self.policies().access.update_allowed(
			&self.provider_id,
			&self.account_label,
			&[AllowedConsumer::new(&self.consumer_id, name, allowed)],
		)
	}

	/// Records a use now.
	pub fn add_usage(&self, scopes: &[String], consumer_name: &str) -> Result<()> {
		self.policies().usage.add_usage(
			&self.provider_id,
			&self.account_label,
			scopes,
			&self.consumer_id,
			consumer_name,
		)
	}

	/// The consumer's usage entries.
	pub fn get_usage(&self) -> Vec<UsageEntry> {
		self.policies()
			.usage
			.read_usages(&self.provider_id, &self.account_label)
			.into_iter()
			.filter(|usage| usage.consumer_id == self.consumer_id)
			.collect()
	}

	/// Drops the consumer's usage entries, keeping everyone else's untouched.
	pub fn remove_usage(&self) -> Result<()> {
		let usage = &self.policies().usage;
		let mut usages = usage.read_usages(&self.provider_id, &self.account_label);

		usages.retain(|entry| entry.consumer_id != self.consumer_id);

		usage.write_usages(&self.provider_id, &self.account_label, &usages)
	}

	/// Makes the account the consumer's preference for the provider.
	pub fn set_as_preferred(&self) -> Result<()> {
		self.policies().preference.set(&self.consumer_id, &self.provider_id, &self.account_label)
	}

	/// Returns `true` when the account is the consumer's preference.
	pub fn is_preferred(&self) -> bool {
		self.policies().preference.get(&self.consumer_id, &self.provider_id).as_deref()
			== Some(self.account_label.as_str())
	}

	/// Returns `true` when configuration trusts the consumer for the provider.
	pub fn is_trusted(&self) -> bool {
		self.policies()
			.access
			.read_allowed(&self.provider_id, &self.account_label)
			.iter()
			.any(|entry| entry.id == self.consumer_id && entry.is_trusted())
	}

	fn policies(&self) -> &KindPolicy {
		self.query.policies(self.kind)
	}
}

/// One account crossed with every consumer of a kind.
#[derive(Clone, Debug)]
pub struct AccountConsumersQuery<'a> {
	query: &'a AuthQuery,
	kind: ConsumerKind,
	provider_id: String,
	account_label: String,
}
impl<'a> AccountConsumersQuery<'a> {
	/// Consumers not explicitly denied, with their latest use and trust filled in.
	pub fn get_allowed(&self) -> Vec<AllowedConsumer> {
		let policies = self.policies();
		let usages = policies.usage.read_usages(&self.provider_id, &self.account_label);

		policies
			.access
			.read_allowed(&self.provider_id, &self.account_label)
			.into_iter()
			.filter(AllowedConsumer::is_allowed)
			.map(|mut entry| {
				entry.last_used = usages
					.iter()
					.filter(|usage| usage.consumer_id == entry.id)
					.map(|usage| usage.last_used)
					.max();
				entry.trusted = Some(entry.is_trusted());

				entry
			})
			.collect()
	}

	/// Allows each listed consumer.
	pub fn allow_access(&self, consumer_ids: &[&str]) -> Result<()> {
		self.update(consumer_ids, true)
	}

	/// Denies each listed consumer.
	pub fn remove_access(&self, consumer_ids: &[&str]) -> Result<()> {
		self.update(consumer_ids, false)
	}

	/// Visits every consumer found in the usage log or the allow-list, once each.
	pub fn for_each<F>(&self, mut f: F)
	where
		F: FnMut(AccountConsumerQuery<'a>),
	{
		let account = AccountQuery::new(self.query, self.provider_id.clone(), self.account_label.clone());

		for id in self.consumer_ids(false) {
			f(account.consumer(self.kind, id));
		}
	}

	fn update(&self, consumer_ids: &[&str], allowed: bool) -> Result<()> {
		let entries =
			consumer_ids.iter().map(|id| AllowedConsumer::new(*id, *id, allowed)).collect::<Vec<_>>();

		self.policies().access.update_allowed(&self.provider_id, &self.account_label, &entries)
	}

	// Union of usage and allow-list ids, in first-seen order.
	fn consumer_ids(&self, allowed_only: bool) -> Vec<String> {
		let policies = self.policies();
		let mut seen = BTreeSet::new();
		let usage_ids = policies
			.usage
			.read_usages(&self.provider_id, &self.account_label)
			.into_iter()
			.map(|usage| usage.consumer_id);
		let access_ids = policies
			.access
			.read_allowed(&self.provider_id, &self.account_label)
			.into_iter()
			.filter(|entry| !allowed_only || entry.is_allowed())
			.map(|entry| entry.id);

		usage_ids.chain(access_ids).filter(|id| seen.insert(id.clone())).collect()
	}

	fn policies(&self) -> &KindPolicy {
		self.query.policies(self.kind)
	}
}

/// Consumer counts of an account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityCount {
	/// Extensions with usage or access.
	pub extensions: usize,
	/// MCP servers with usage or access.
	pub mcp_servers: usize,
	/// Sum of both.
	pub total: usize,
}

/// One account crossed with every consumer of either kind.
#[derive(Clone, Debug)]
pub struct AccountEntitiesQuery<'a> {
	account: AccountQuery<'a>,
}
impl AccountEntitiesQuery<'_> {
	/// Returns `true` when any consumer of either kind used or may use the account.
	pub fn has_any_usage(&self) -> bool {
		ConsumerKind::ALL.into_iter().any(|kind| {
			let policies = self.account.query.policies(kind);
			let (provider_id, label) = (&self.account.provider_id, &self.account.account_label);

			!policies.usage.read_usages(provider_id, label).is_empty()
				|| policies.access.read_allowed(provider_id, label).iter().any(AllowedConsumer::is_allowed)
		})
	}

	/// Counts consumers with usage or access, per kind.
	pub fn get_entity_count(&self) -> EntityCount {
		let extensions = self.account.extensions().consumer_ids(true).len();
		let mcp_servers = self.account.mcp_servers().consumer_ids(true).len();

		EntityCount { extensions, mcp_servers, total: extensions + mcp_servers }
	}

	/// Denies every currently allowed consumer of both kinds.
	pub fn remove_all_access(&self) -> Result<()> {
		for kind in ConsumerKind::ALL {
			let consumers = self.account.consumers(kind);
			let allowed = consumers.get_allowed();

			if allowed.is_empty() {
				continue;
			}

			let ids = allowed.iter().map(|entry| entry.id.as_str()).collect::<Vec<_>>();

			consumers.remove_access(&ids)?;
		}

		Ok(())
	}

	/// Visits every consumer of both kinds, extensions first.
	pub fn for_each<F>(&self, mut f: F)
	where
		F: FnMut(&str, ConsumerKind),
	{
		for kind in ConsumerKind::ALL {
			self.account.consumers(kind).for_each(|consumer| f(consumer.consumer_id(), kind));
		}
	}
}
