//! Dynamic providers: OAuth clients minted at runtime from discovered metadata.
//!
//! [`OAuthHostDelegate`] turns an authorization server (plus an optional protected resource)
//! into a registered [`DynamicAuthProvider`]. The provider id is derived from the server and
//! resource, so repeated requests for the same pair converge on one provider.

pub mod delegate;
pub mod provider;
pub mod storage;

pub use delegate::*;
pub use provider::*;
pub use storage::*;

// self
use crate::{
	_prelude::*,
	auth::{ProviderId, TokenSecret},
	error::ConfigError,
	http::OAuthHttpClient,
	oauth::{AuthorizationRequest, AuthorizationServerMetadata, ClientProfile, register_dynamic_client},
	obs,
	registry::ProviderFuture,
};

/// Code and state delivered to the redirect URI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationResponse {
	/// Authorization code.
	pub code: String,
	/// Returned state value.
	pub state: String,
}

/// Drives the user agent through the authorization endpoint.
pub trait AuthorizationHandler
where
	Self: Send + Sync,
{
	/// Redirect URI the code should be delivered to.
	fn redirect_uri(&self) -> Url;

	/// Opens `request.authorize_url` and waits for the redirect.
	fn authorize<'a>(
		&'a self,
		request: &'a AuthorizationRequest,
	) -> ProviderFuture<'a, AuthorizationResponse>;
}

/// Asks the user for a client registration when automatic registration is impossible.
pub trait ClientRegistrationPrompt
where
	Self: Send + Sync,
{
	/// Returns the entered credentials, or `None` when the user declined.
	fn prompt<'a>(
		&'a self,
		authorization_server: &'a Url,
		redirect_uris: &'a [String],
	) -> ProviderFuture<'a, Option<ClientRegistration>>;
}

/// Collaborators shared by every dynamic provider.
pub struct DynamicProviderEnv<C>
where
	C: OAuthHttpClient,
{
	/// Transport for discovery, registration, and token calls.
	pub http: Arc<C>,
	/// Persistence for registrations and token sets.
	pub storage: Arc<DynamicProviderStorage>,
	/// Browser round trip for the authorization code grant.
	pub handler: Arc<dyn AuthorizationHandler>,
	/// Manual registration fallback.
	pub prompt: Option<Arc<dyn ClientRegistrationPrompt>>,
	/// Client metadata sent with dynamic registration.
	pub profile: ClientProfile,
	/// Client id metadata document URL, used when the server supports it.
	pub client_id_metadata_url: Option<String>,
}
impl<C> Clone for DynamicProviderEnv<C>
where
	C: OAuthHttpClient,
{
	fn clone(&self) -> Self {
		Self {
			http: self.http.clone(),
			storage: self.storage.clone(),
			handler: self.handler.clone(),
			prompt: self.prompt.clone(),
			profile: self.profile.clone(),
			client_id_metadata_url: self.client_id_metadata_url.clone(),
		}
	}
}

/// Derives the provider id for an authorization server and optional resource.
pub fn dynamic_provider_id(authorization_server: &Url, resource: Option<&str>) -> Result<ProviderId> {
	let id = match resource {
		Some(resource) => format!("{authorization_server} {resource}"),
		None => authorization_server.to_string(),
	};

	Ok(ProviderId::new(id).map_err(ConfigError::from)?)
}

/// Obtains a client registration without consulting storage.
///
/// Order: the client id metadata document (when both sides support it), dynamic client
/// registration, then the manual prompt. A declined prompt is [`Error::ConsentDeclined`].
pub(crate) async fn acquire_client<C>(
	env: &DynamicProviderEnv<C>,
	authorization_server: &Url,
	server_metadata: &AuthorizationServerMetadata,
	scopes: Option<&[String]>,
	use_metadata_document: bool,
) -> Result<ClientRegistration>
where
	C: OAuthHttpClient,
{
	if use_metadata_document
		&& server_metadata.supports_client_id_metadata_document()
		&& let Some(url) = &env.client_id_metadata_url
	{
		return Ok(ClientRegistration { client_id: url.clone(), client_secret: None });
	}

	let registration_error =
		match register_dynamic_client(env.http.as_ref(), server_metadata, &env.profile, scopes).await {
			Ok(registration) =>
				return Ok(ClientRegistration {
					client_id: registration.client_id,
					client_secret: registration.client_secret,
				}),
			Err(e) => e,
		};

	obs::warn_event!(
		server = %authorization_server,
		error = %registration_error,
		"Dynamic client registration failed; falling back to the registration prompt."
	);

	let Some(prompt) = &env.prompt else {
		return Err(registration_error);
	};

	match prompt.prompt(authorization_server, &env.profile.redirect_uris).await? {
		Some(registration) => Ok(ClientRegistration {
			client_id: registration.client_id.trim().to_owned(),
			client_secret: registration
				.client_secret
				.filter(|s| !s.expose().trim().is_empty())
				.map(|s| TokenSecret::new(s.expose().trim())),
		}),
		None => Err(Error::ConsentDeclined { action: "provide client details" }),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn provider_ids_join_server_and_resource() {
		let server = Url::parse("https://auth.example.com/tenant").expect("URL should parse.");

		assert_eq!(
			dynamic_provider_id(&server, None).expect("Id should derive.").as_str(),
			"https://auth.example.com/tenant"
		);
		assert_eq!(
			dynamic_provider_id(&server, Some("https://api.example.com/mcp"))
				.expect("Id should derive.")
				.as_str(),
			"https://auth.example.com/tenant https://api.example.com/mcp"
		);
	}
}
