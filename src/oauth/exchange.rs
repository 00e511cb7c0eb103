//! Token endpoint calls (authorization code and refresh grants) built on `oauth2`.

// std
use std::borrow::Cow;
// crates.io
use oauth2::{
	AuthType, AuthorizationCode, Client, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
	ExtraTokenFields, HttpClientError, PkceCodeVerifier, RedirectUrl, RefreshToken,
	RequestTokenError, StandardRevocableToken, StandardTokenResponse, TokenResponse, TokenUrl,
	basic::{
		BasicErrorResponse, BasicErrorResponseType, BasicRevocationErrorResponse,
		BasicTokenIntrospectionResponse, BasicTokenType,
	},
};
// self
use crate::{
	_prelude::*,
	auth::{StoredToken, TokenSecret},
	error::{ConfigError, TransientError},
	http::{self, OAuthHttpClient},
	obs::{self, OpLabels, OperationKind},
};

/// Extra token response members the broker keeps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenFields {
	/// OpenID Connect ID token.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id_token: Option<String>,
}
impl ExtraTokenFields for IdTokenFields {}

type IdTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;
type ConfiguredClient = Client<
	BasicErrorResponse,
	IdTokenResponse,
	BasicTokenIntrospectionResponse,
	StandardRevocableToken,
	BasicRevocationErrorResponse,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointSet,
>;
type TokenRequestError<E> = RequestTokenError<HttpClientError<E>, BasicErrorResponse>;

/// Public-or-confidential client bound to one token endpoint.
///
/// Client credentials travel in the request body so public clients (no secret) still identify
/// themselves.
pub struct TokenClient<C>
where
	C: ?Sized + OAuthHttpClient,
{
	oauth_client: ConfiguredClient,
	http_client: Arc<C>,
	token_endpoint: String,
}
impl<C> TokenClient<C>
where
	C: ?Sized + OAuthHttpClient,
{
	/// Builds a client for `token_endpoint`.
	pub fn new(
		token_endpoint: &str,
		client_id: &str,
		client_secret: Option<&TokenSecret>,
		http_client: Arc<C>,
	) -> Result<Self> {
		let token_url = TokenUrl::new(token_endpoint.to_owned())
			.map_err(|source| ConfigError::InvalidEndpoint { endpoint: "token", source })?;
		let mut oauth_client = Client::new(ClientId::new(client_id.to_owned()))
			.set_token_uri(token_url)
			.set_auth_type(AuthType::RequestBody);

		if let Some(secret) = client_secret {
			oauth_client = oauth_client.set_client_secret(ClientSecret::new(secret.expose().to_owned()));
		}

		Ok(Self { oauth_client, http_client, token_endpoint: token_endpoint.to_owned() })
	}

	/// Redeems an authorization code with its PKCE verifier.
	pub async fn exchange_code(
		&self,
		code: &str,
		pkce_verifier: &str,
		redirect_uri: &Url,
		resource: Option<&str>,
	) -> Result<StoredToken> {
		obs::observe(OpLabels::new(OperationKind::TokenExchange, "exchange_code"), async move {
			let redirect_url = RedirectUrl::new(redirect_uri.to_string())
				.map_err(|source| ConfigError::InvalidEndpoint { endpoint: "redirect", source })?;
			let handle = self.http_client.handle();
			let mut request = self
				.oauth_client
				.exchange_code(AuthorizationCode::new(code.to_owned()))
				.set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_owned()))
				.set_redirect_uri(Cow::Owned(redirect_url));

			if let Some(resource) = resource {
				request = request.add_extra_param("resource", resource.to_owned());
			}

			let response =
				request.request_async(&handle).await.map_err(|e| self.map_request_error(e))?;

			Ok(map_token_response(response))
		})
		.await
	}

	/// Redeems a refresh token.
	///
	/// When the server omits a new refresh token or scope, the previous values are kept.
	pub async fn refresh(&self, current: &StoredToken, resource: Option<&str>) -> Result<StoredToken> {
		let refresh_token = current.refresh_token.as_ref().ok_or_else(|| Error::InvalidGrant {
			reason: "No refresh token is available".into(),
		})?;

		obs::observe(OpLabels::new(OperationKind::TokenRefresh, "refresh"), async move {
			let refresh_secret = RefreshToken::new(refresh_token.expose().to_owned());
			let handle = self.http_client.handle();
			let mut request = self.oauth_client.exchange_refresh_token(&refresh_secret);

			if let Some(resource) = resource {
				request = request.add_extra_param("resource", resource.to_owned());
			}

			let response =
				request.request_async(&handle).await.map_err(|e| self.map_request_error(e))?;
			let mut token = map_token_response(response);

			if token.refresh_token.is_none() {
				token.refresh_token = current.refresh_token.clone();
			}
			if token.scope.is_none() {
				token.scope = current.scope.clone();
			}
			if token.id_token.is_none() {
				token.id_token = current.id_token.clone();
			}

			Ok(token)
		})
		.await
	}

	fn map_request_error(&self, err: TokenRequestError<C::TransportError>) -> Error {
		match err {
			RequestTokenError::ServerResponse(response) => map_server_response_error(&response),
			RequestTokenError::Request(error) =>
				http::map_http_client_error(&self.token_endpoint, error),
			RequestTokenError::Parse(source, _body) =>
				TransientError::TokenResponseParse { source }.into(),
			RequestTokenError::Other(message) =>
				TransientError::TokenEndpoint { message, status: None }.into(),
		}
	}
}
impl<C> Debug for TokenClient<C>
where
	C: ?Sized + OAuthHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenClient").field("token_endpoint", &self.token_endpoint).finish()
	}
}

fn map_token_response(response: IdTokenResponse) -> StoredToken {
	let mut token =
		StoredToken::new(response.access_token().secret().to_owned(), response.token_type().as_ref());

	if let Some(expires_in) = response.expires_in() {
		token = token.with_expires_in(expires_in.as_secs());
	}
	if let Some(refresh) = response.refresh_token() {
		token = token.with_refresh_token(refresh.secret().to_owned());
	}
	if let Some(scopes) = response.scopes() {
		token = token.with_scope(scopes.iter().map(|scope| scope.as_str()).collect::<Vec<_>>().join(" "));
	}
	if let Some(id_token) = response.extra_fields().id_token.as_deref() {
		token = token.with_id_token(id_token);
	}

	token
}

fn map_server_response_error(response: &BasicErrorResponse) -> Error {
	let reason = match response.error_description() {
		Some(description) => format!("{}: {description}", response.error().as_ref()),
		None => response.error().as_ref().to_owned(),
	};

	match response.error() {
		BasicErrorResponseType::InvalidClient => Error::InvalidClient { reason },
		BasicErrorResponseType::InvalidGrant => Error::InvalidGrant { reason },
		_ => TransientError::TokenEndpoint {
			message: format!("Token endpoint returned an OAuth error: {reason}"),
			status: None,
		}
		.into(),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn error_response(json: &str) -> BasicErrorResponse {
		serde_json::from_str(json).expect("Error fixture should deserialize.")
	}

	#[test]
	fn invalid_client_and_grant_are_classified() {
		assert!(matches!(
			map_server_response_error(&error_response(r#"{"error":"invalid_client"}"#)),
			Error::InvalidClient { .. }
		));

		let err = map_server_response_error(&error_response(
			r#"{"error":"invalid_grant","error_description":"code expired"}"#,
		));

		assert!(matches!(&err, Error::InvalidGrant { reason } if reason == "invalid_grant: code expired"));
		assert!(matches!(
			map_server_response_error(&error_response(r#"{"error":"temporarily_unavailable"}"#)),
			Error::Transient(_)
		));
	}

	#[test]
	fn token_response_keeps_id_token() {
		let response: IdTokenResponse = serde_json::from_str(
			r#"{"access_token":"at","token_type":"Bearer","expires_in":3600,"refresh_token":"rt","scope":"read write","id_token":"header.payload.sig"}"#,
		)
		.expect("Token response fixture should deserialize.");
		let token = map_token_response(response);

		assert_eq!(token.access_token.expose(), "at");
		assert_eq!(token.expires_in, Some(3600));
		assert_eq!(token.refresh_token.as_ref().map(TokenSecret::expose), Some("rt"));
		assert_eq!(token.scope.as_deref(), Some("read write"));
		assert_eq!(token.id_token.as_ref().map(TokenSecret::expose), Some("header.payload.sig"));
	}
}
