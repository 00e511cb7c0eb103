//! Host delegate minting [`DynamicAuthProvider`]s.

// std
use std::sync::Weak;
// crates.io
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	auth::ProviderId,
	dynamic::{
		DynamicAuthProvider, DynamicProviderEnv, TokenChange, acquire_client, dynamic_provider_id,
	},
	http::OAuthHttpClient,
	oauth::{AuthorizationServerMetadata, ProtectedResourceMetadata},
	obs,
	registry::{AuthenticationProvider, HostDelegate, ProviderFuture, ProviderRegistry},
};

/// Host delegate that registers OAuth clients and serves them as dynamic providers.
pub struct OAuthHostDelegate<C>
where
	C: OAuthHttpClient,
{
	env: DynamicProviderEnv<C>,
	priority: i32,
}
impl<C> OAuthHostDelegate<C>
where
	C: OAuthHttpClient,
{
	/// Builds a delegate ranked by `priority`.
	pub fn new(env: DynamicProviderEnv<C>, priority: i32) -> Self {
		Self { env, priority }
	}

	async fn create_provider(
		&self,
		registry: &ProviderRegistry,
		authorization_server: &Url,
		server_metadata: &AuthorizationServerMetadata,
		resource: Option<&ProtectedResourceMetadata>,
	) -> Result<ProviderId> {
		let id = dynamic_provider_id(authorization_server, resource.map(|r| r.resource.as_str()))?;

		if registry.is_registered(&id) {
			return Ok(id);
		}

		let storage = &self.env.storage;
		let (client, tokens) = match storage.client_registration(&id).await? {
			Some(client) => {
				let tokens = storage.sessions(&id, &client.client_id).await?;

				(client, tokens)
			},
			None => {
				let scopes = resource.and_then(|r| r.scopes_supported.as_deref());
				let client =
					acquire_client(&self.env, authorization_server, server_metadata, scopes, true)
						.await?;

				(client, Vec::new())
			},
		};
		let provider = Arc::new(DynamicAuthProvider::new(
			id.clone(),
			authorization_server.clone(),
			server_metadata.clone(),
			resource.cloned(),
			client.clone(),
			tokens,
			self.env.clone(),
		));

		match registry.register_dynamic_provider(provider.clone()) {
			Ok(()) => {},
			// A concurrent request for the same pair won the race.
			Err(Error::AlreadyRegistered { .. }) => return Ok(id),
			Err(e) => return Err(e),
		}

		storage
			.store_client_registration(
				&id,
				authorization_server.as_str(),
				&provider.info().label,
				&client,
			)
			.await?;

		forward_token_rotations(
			Arc::downgrade(&provider),
			storage.subscribe_token_changes(),
			registry.cancellation().child_token(),
		);

		Ok(id)
	}
}
impl<C> HostDelegate for OAuthHostDelegate<C>
where
	C: OAuthHttpClient,
{
	fn priority(&self) -> i32 {
		self.priority
	}

	fn create<'a>(
		&'a self,
		registry: &'a ProviderRegistry,
		authorization_server: &'a Url,
		server_metadata: &'a AuthorizationServerMetadata,
		resource: Option<&'a ProtectedResourceMetadata>,
	) -> ProviderFuture<'a, ProviderId> {
		Box::pin(self.create_provider(registry, authorization_server, server_metadata, resource))
	}
}

fn forward_token_rotations<C>(
	provider: Weak<DynamicAuthProvider<C>>,
	mut changes: broadcast::Receiver<TokenChange>,
	stop: CancellationToken,
) where
	C: OAuthHttpClient,
{
	let Ok(runtime) = tokio::runtime::Handle::try_current() else {
		obs::warn_event!("No async runtime; token rotations will not reach dynamic providers.");

		return;
	};

	runtime.spawn(async move {
		loop {
			let change = tokio::select! {
				_ = stop.cancelled() => break,
				change = changes.recv() => match change {
					Ok(change) => change,
					Err(RecvError::Lagged(_)) => continue,
					Err(RecvError::Closed) => break,
				},
			};
			let Some(provider) = provider.upgrade() else { break };

			if change.provider_id == provider.info().id.as_str()
				&& change.client_id == provider.client_id()
			{
				provider.replace_tokens(change.tokens).await;
			}
		}
	});
}
