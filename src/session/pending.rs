//! Requests parked by passive resolutions until the user acts on them.

// self
use crate::{
	_prelude::*,
	auth::{Session, scopes_equal},
	consumer::Consumer,
	session::SessionRequest,
};

/// Parked request for a sign-in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignInRequest {
	/// What was asked for.
	pub request: SessionRequest,
	/// Consumers waiting, in arrival order.
	pub consumers: Vec<Consumer>,
}

/// Parked request for access to existing sessions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessRequest {
	/// Consumer asking.
	pub consumer: Consumer,
	/// What was asked for.
	pub request: SessionRequest,
	/// Sessions the consumer could be granted.
	pub possible_sessions: Vec<Session>,
}

#[derive(Default)]
struct PendingState {
	// provider id -> request key -> request
	sign_in: HashMap<String, BTreeMap<String, SignInRequest>>,
	// provider id -> consumer key -> request
	access: HashMap<String, BTreeMap<String, AccessRequest>>,
}

/// Pending sign-in and access requests for one consumer kind.
#[derive(Default)]
pub struct PendingRequests(RwLock<PendingState>);
impl PendingRequests {
	/// Parks a sign-in request; a consumer already waiting on the same key is not added twice.
	pub fn request_new_session(&self, provider_id: &str, request: &SessionRequest, consumer: &Consumer) {
		let mut state = self.0.write();
		let entry = state
			.sign_in
			.entry(provider_id.to_owned())
			.or_default()
			.entry(request.request_key())
			.or_insert_with(|| SignInRequest { request: request.clone(), consumers: Vec::new() });

		if !entry.consumers.iter().any(|c| c.key() == consumer.key()) {
			entry.consumers.push(consumer.clone());
		}
	}

	/// Parks an access request unless the consumer already has one for the provider.
	pub fn request_session_access(
		&self,
		provider_id: &str,
		request: &SessionRequest,
		consumer: &Consumer,
		possible_sessions: Vec<Session>,
	) {
		self.0
			.write()
			.access
			.entry(provider_id.to_owned())
			.or_default()
			.entry(consumer.key())
			.or_insert_with(|| AccessRequest {
				consumer: consumer.clone(),
				request: request.clone(),
				possible_sessions,
			});
	}

	/// Access request of `consumer_key` for the provider.
	pub fn access_request(&self, provider_id: &str, consumer_key: &str) -> Option<AccessRequest> {
		self.0.read().access.get(provider_id)?.get(consumer_key).cloned()
	}

	/// Sign-in requests for the provider.
	pub fn sign_in_requests(&self, provider_id: &str) -> Vec<SignInRequest> {
		self.0.read().sign_in.get(provider_id).map(|r| r.values().cloned().collect()).unwrap_or_default()
	}

	/// Drops an access request.
	pub fn remove_access_request(&self, provider_id: &str, consumer_key: &str) {
		let mut state = self.0.write();

		if let Some(requests) = state.access.get_mut(provider_id) {
			requests.remove(consumer_key);

			if requests.is_empty() {
				state.access.remove(provider_id);
			}
		}
	}

	/// Clears sign-in requests satisfied by `added` sessions.
	pub fn update_new_session_requests(&self, provider_id: &str, added: &[Session]) {
		let mut state = self.0.write();
		let Some(requests) = state.sign_in.get_mut(provider_id) else { return };

		requests.retain(|key, _| {
			let requested = key.split(' ').map(str::to_owned).collect::<Vec<_>>();

			!added.iter().any(|s| scopes_equal(Some(&s.scopes), Some(&requested)))
		});

		if requests.is_empty() {
			state.sign_in.remove(provider_id);
		}
	}

	/// Drops `removed` sessions from access requests; requests left without candidates go away.
	pub fn update_access_requests(&self, provider_id: &str, removed: &[Session]) {
		let mut state = self.0.write();
		let Some(requests) = state.access.get_mut(provider_id) else { return };

		for request in requests.values_mut() {
			request.possible_sessions.retain(|s| !removed.iter().any(|r| r.id == s.id));
		}

		requests.retain(|_, r| !r.possible_sessions.is_empty());

		if requests.is_empty() {
			state.access.remove(provider_id);
		}
	}

	/// Drops every access request for an unregistered provider.
	pub fn provider_unregistered(&self, provider_id: &str) {
		self.0.write().access.remove(provider_id);
	}

	/// Badge count: one per waiting sign-in consumer plus one per access request.
	pub fn count(&self) -> usize {
		let state = self.0.read();
		let sign_in = state
			.sign_in
			.values()
			.flat_map(BTreeMap::values)
			.map(|r| r.consumers.len())
			.sum::<usize>();
		let access = state.access.values().map(BTreeMap::len).sum::<usize>();

		sign_in + access
	}
}
impl Debug for PendingRequests {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PendingRequests").field("count", &self.count()).finish()
	}
}
