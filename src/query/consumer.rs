//! Consumer-centred views across every registered provider.

// self
use crate::{
	_prelude::*,
	auth::ProviderId,
	consumer::ConsumerKind,
	query::{AuthQuery, ProviderConsumerQuery},
};

/// One consumer across providers.
#[derive(Clone, Debug)]
pub struct ConsumerQuery<'a> {
	query: &'a AuthQuery,
	kind: ConsumerKind,
	consumer_id: String,
}
impl<'a> ConsumerQuery<'a> {
	pub(crate) fn new(query: &'a AuthQuery, kind: ConsumerKind, consumer_id: String) -> Self {
		let consumer_id = kind.normalize_id(&consumer_id);

		Self { query, kind, consumer_id }
	}

	/// Crosses the consumer with one provider.
	pub fn provider(&self, provider_id: impl Into<String>) -> ProviderConsumerQuery<'a> {
		ProviderConsumerQuery::new(self.query, self.kind, provider_id.into(), self.consumer_id.clone())
	}

	/// Providers where at least one signed-in account grants the consumer access.
	///
	/// Visits every account of every provider; providers that fail to list accounts are
	/// skipped.
	pub async fn get_providers_with_access(&self, include_internal: bool) -> Vec<ProviderId> {
		let access = &self.query.policies(self.kind).access;
		let mut providers = Vec::new();

		for provider_id in self.query.get_provider_ids(include_internal) {
			let Ok(accounts) = self.query.accounts(&provider_id).await else { continue };

			if accounts.iter().any(|account| {
				access.is_access_allowed(&provider_id, &account.label, &self.consumer_id) == Some(true)
			}) {
				providers.push(provider_id);
			}
		}

		providers
	}

	/// Provider id to preferred account label, for every listed provider with a preference.
	pub fn get_all_account_preferences(&self, include_internal: bool) -> BTreeMap<String, String> {
		let preference = &self.query.policies(self.kind).preference;

		self.query
			.get_provider_ids(include_internal)
			.into_iter()
			.filter_map(|id| {
				let label = preference.get(&self.consumer_id, &id)?;

				Some((id.to_string(), label))
			})
			.collect()
	}
}
