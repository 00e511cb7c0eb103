//! Host delegates: collaborators able to mint dynamic providers.

// self
use crate::{
	_prelude::*,
	auth::ProviderId,
	oauth::{AuthorizationServerMetadata, ProtectedResourceMetadata},
	registry::{ProviderFuture, ProviderRegistry},
};

/// Mints a dynamic provider from discovered metadata and registers it.
///
/// The registry only picks the delegate; discovery reuse, client registration, and
/// persistence are the delegate's business.
pub trait HostDelegate
where
	Self: Send + Sync,
{
	/// Selection rank; the highest priority wins.
	fn priority(&self) -> i32;

	/// Creates (or reuses) the provider serving `authorization_server` and returns its id.
	fn create<'a>(
		&'a self,
		registry: &'a ProviderRegistry,
		authorization_server: &'a Url,
		server_metadata: &'a AuthorizationServerMetadata,
		resource: Option<&'a ProtectedResourceMetadata>,
	) -> ProviderFuture<'a, ProviderId>;
}

/// Handle returned by [`ProviderRegistry::register_host_delegate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DelegateHandle(pub(crate) u64);
