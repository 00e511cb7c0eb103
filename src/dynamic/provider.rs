//! The OAuth provider minted for a discovered authorization server.

// crates.io
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
// self
use crate::{
	_prelude::*,
	auth::{AccountInfo, ProviderId, Session, SessionDelta, SessionId, StoredToken, scopes_equal},
	dynamic::{ClientRegistration, DynamicProviderEnv, acquire_client},
	error::ConfigError,
	http::OAuthHttpClient,
	oauth::{
		AuthorizationRequest, AuthorizationServerMetadata, ProtectedResourceMetadata, TokenClient,
		claim_scopes, claim_str, decode_jwt_claims,
	},
	obs,
	registry::{AuthenticationProvider, ProviderFuture, ProviderInfo, ProviderSessionOptions},
};

const SESSION_EVENT_CAPACITY: usize = 32;
const FALLBACK_ACCOUNT_ID: &str = "unknown";
const FALLBACK_ACCOUNT_LABEL: &str = "MCP";
const INVALID_CLIENT_REASON: &str = "Client ID was invalid, generated a new one. Please try again.";

fn refresh_window() -> Duration {
	Duration::minutes(5)
}

/// Multi-account provider backed by an OAuth client registered with one authorization server.
pub struct DynamicAuthProvider<C>
where
	C: OAuthHttpClient,
{
	info: ProviderInfo,
	authorization_server: Url,
	server_metadata: AuthorizationServerMetadata,
	resource: Option<ProtectedResourceMetadata>,
	client: RwLock<ClientRegistration>,
	tokens: AsyncMutex<Vec<StoredToken>>,
	env: DynamicProviderEnv<C>,
	changes: broadcast::Sender<SessionDelta>,
}
impl<C> DynamicAuthProvider<C>
where
	C: OAuthHttpClient,
{
	/// Builds a provider over `client` with previously persisted `tokens`.
	pub fn new(
		id: ProviderId,
		authorization_server: Url,
		server_metadata: AuthorizationServerMetadata,
		resource: Option<ProtectedResourceMetadata>,
		client: ClientRegistration,
		tokens: Vec<StoredToken>,
		env: DynamicProviderEnv<C>,
	) -> Self {
		let mut info = ProviderInfo::new(id, provider_label(&authorization_server, resource.as_ref()))
			.with_multiple_accounts()
			.with_authorization_server(authorization_server.as_str());

		if let Some(resource) = &resource {
			info = info.with_resource_server(resource.resource.clone());
		}

		let (changes, _) = broadcast::channel(SESSION_EVENT_CAPACITY);

		Self {
			info,
			authorization_server,
			server_metadata,
			resource,
			client: RwLock::new(client),
			tokens: AsyncMutex::new(tokens),
			env,
			changes,
		}
	}

	/// Client id currently in use.
	pub fn client_id(&self) -> String {
		self.client.read().client_id.clone()
	}

	/// Adopts token sets rotated by another writer; nothing is persisted.
	pub async fn replace_tokens(&self, replacement: Vec<StoredToken>) {
		let mut tokens = self.tokens.lock().await;
		let added = replacement
			.iter()
			.filter(|t| !tokens.iter().any(|o| o.access_token == t.access_token))
			.cloned()
			.collect::<Vec<_>>();
		let removed = tokens
			.iter()
			.filter(|o| !replacement.iter().any(|t| t.access_token == o.access_token))
			.cloned()
			.collect::<Vec<_>>();

		*tokens = replacement;

		drop(tokens);

		self.publish(&added, &removed);
	}

	fn resource_indicator(&self) -> Option<&str> {
		self.resource.as_ref().map(|r| r.resource.as_str())
	}

	fn token_client(&self) -> Result<TokenClient<C>> {
		let endpoint = self
			.server_metadata
			.token_endpoint
			.as_deref()
			.ok_or(ConfigError::MissingEndpoint { endpoint: "token" })?;
		let client = self.client.read().clone();

		TokenClient::new(endpoint, &client.client_id, client.client_secret.as_ref(), self.env.http.clone())
	}

	// Applies `added` and `removed` keyed by access token, persists, and publishes the delta.
	async fn update(
		&self,
		tokens: &mut Vec<StoredToken>,
		added: Vec<StoredToken>,
		removed: Vec<StoredToken>,
	) -> Result<()> {
		tokens.retain(|t| {
			!removed.iter().any(|r| r.access_token == t.access_token)
				&& !added.iter().any(|a| a.access_token == t.access_token)
		});
		tokens.extend(added.iter().cloned());

		self.env.storage.set_sessions(&self.info.id, &self.client_id(), tokens).await?;
		self.publish(&added, &removed);

		Ok(())
	}

	fn publish(&self, added: &[StoredToken], removed: &[StoredToken]) {
		let delta = SessionDelta {
			added: added.iter().filter_map(|t| session_for(t).ok()).collect(),
			removed: removed.iter().filter_map(|t| session_for(t).ok()).collect(),
			changed: Vec::new(),
		};

		if !delta.is_empty() {
			let _ = self.changes.send(delta);
		}
	}

	async fn sessions_matching(&self, scopes: Option<&[String]>) -> Result<Vec<Session>> {
		let mut tokens = self.tokens.lock().await;
		let Some(scopes) = scopes else {
			return tokens.iter().map(session_for).collect();
		};
		let matching =
			tokens.iter().filter(|t| token_matches(t, scopes)).cloned().collect::<Vec<_>>();
		let now = OffsetDateTime::now_utc();
		let mut added = Vec::new();
		let mut removed = Vec::new();

		for token in matching.into_iter().filter(|t| t.expires_within(refresh_window(), now)) {
			removed.push(token.clone());

			if token.refresh_token.is_none() {
				obs::warn_event!(provider = %self.info.id, "No refresh token available; discarding expiring token.");

				continue;
			}

			match self.token_client()?.refresh(&token, self.resource_indicator()).await {
				Ok(mut refreshed) => {
					let requested = scopes.join(" ");

					if refreshed.scope.as_deref() != Some(requested.as_str()) {
						refreshed.scope = Some(requested);
					}

					added.push(refreshed);
				},
				Err(e) => {
					obs::warn_event!(provider = %self.info.id, error = %e, "Failed to refresh token.");
				},
			}
		}

		if !added.is_empty() || !removed.is_empty() {
			self.update(&mut tokens, added, removed).await?;
		}

		tokens.iter().filter(|t| token_matches(t, scopes)).map(session_for).collect()
	}

	async fn authorize(&self, scopes: &[String]) -> Result<StoredToken> {
		let endpoint = self
			.server_metadata
			.authorization_endpoint
			.as_deref()
			.ok_or(ConfigError::MissingEndpoint { endpoint: "authorization" })?;
		let client_id = self.client_id();
		let request = AuthorizationRequest::new(
			endpoint,
			&client_id,
			self.env.handler.redirect_uri(),
			scopes,
			self.resource_indicator(),
		)?;
		let response = self.env.handler.authorize(&request).await?;

		if response.code.is_empty() {
			return Err(ConfigError::MissingAuthorizationCode.into());
		}

		request.validate_state(&response.state)?;

		let exchanged = self
			.token_client()?
			.exchange_code(
				&response.code,
				request.pkce().verifier(),
				&request.redirect_uri,
				self.resource_indicator(),
			)
			.await;

		match exchanged {
			Ok(token) => Ok(token),
			Err(Error::InvalidClient { .. }) => {
				self.regenerate_client().await?;

				Err(Error::InvalidClient { reason: INVALID_CLIENT_REASON.into() })
			},
			Err(e) => Err(e),
		}
	}

	async fn regenerate_client(&self) -> Result<()> {
		let scopes = self.resource.as_ref().and_then(|r| r.scopes_supported.as_deref());
		let registration = acquire_client(
			&self.env,
			&self.authorization_server,
			&self.server_metadata,
			scopes,
			false,
		)
		.await?;

		self.env
			.storage
			.store_client_registration(
				&self.info.id,
				self.authorization_server.as_str(),
				&self.info.label,
				&registration,
			)
			.await?;

		*self.client.write() = registration;

		Ok(())
	}
}
impl<C> AuthenticationProvider for DynamicAuthProvider<C>
where
	C: OAuthHttpClient,
{
	fn info(&self) -> &ProviderInfo {
		&self.info
	}

	fn get_sessions<'a>(
		&'a self,
		scopes: Option<&'a [String]>,
		_: &'a ProviderSessionOptions,
	) -> ProviderFuture<'a, Vec<Session>> {
		Box::pin(self.sessions_matching(scopes))
	}

	fn create_session<'a>(
		&'a self,
		scopes: &'a [String],
		_: &'a ProviderSessionOptions,
	) -> ProviderFuture<'a, Session> {
		Box::pin(async move {
			let mut token = self.authorize(scopes).await?;

			// An omitted scope means the requested scopes were granted.
			if token.scope.is_none() {
				token.scope = Some(scopes.join(" "));
			}

			let session = session_for(&token)?;
			let mut tokens = self.tokens.lock().await;

			self.update(&mut tokens, vec![token], Vec::new()).await?;

			Ok(session)
		})
	}

	fn remove_session<'a>(&'a self, session_id: &'a str) -> ProviderFuture<'a, ()> {
		Box::pin(async move {
			let mut tokens = self.tokens.lock().await;
			let Some(token) =
				tokens.iter().find(|t| session_hash(t) == session_id).cloned()
			else {
				obs::warn_event!(provider = %self.info.id, "Session to remove was not found.");

				return Ok(());
			};

			self.update(&mut tokens, Vec::new(), vec![token]).await
		})
	}

	fn session_changes(&self) -> Option<broadcast::Receiver<SessionDelta>> {
		Some(self.changes.subscribe())
	}
}
impl<C> Debug for DynamicAuthProvider<C>
where
	C: OAuthHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DynamicAuthProvider")
			.field("id", &self.info.id)
			.field("authorization_server", &self.authorization_server.as_str())
			.finish_non_exhaustive()
	}
}

/// Resource name, else the authority of the authorization server.
pub fn provider_label(authorization_server: &Url, resource: Option<&ProtectedResourceMetadata>) -> String {
	if let Some(name) = resource.and_then(|r| r.resource_name.as_deref()) {
		return name.to_owned();
	}

	let host = authorization_server.host_str().unwrap_or_default();

	match authorization_server.port() {
		Some(port) => format!("{host}:{port}"),
		None => host.to_owned(),
	}
}

/// Derives the session a token set represents.
///
/// Claims come from the ID token when present, else from the access token; opaque tokens yield
/// the fallback account.
pub fn session_for(token: &StoredToken) -> Result<Session> {
	let source = token.id_token.as_ref().unwrap_or(&token.access_token);
	let claims = decode_jwt_claims(source.expose()).unwrap_or_default();
	let account_id = claim_str(&claims, "sub").unwrap_or(FALLBACK_ACCOUNT_ID);
	let label = ["preferred_username", "name", "email"]
		.into_iter()
		.find_map(|claim| claim_str(&claims, claim))
		.unwrap_or(FALLBACK_ACCOUNT_LABEL);
	let scopes = match token.granted_scopes() {
		Some(scopes) => scopes.as_slice().to_vec(),
		None => claim_scopes(&claims).unwrap_or_default(),
	};
	let id = SessionId::new(session_hash(token)).map_err(ConfigError::from)?;
	let mut session =
		Session::new(id, token.access_token.expose(), AccountInfo::new(account_id, label), scopes);

	if let Some(id_token) = &token.id_token {
		session = session.with_id_token(id_token.expose());
	}

	Ok(session)
}

fn session_hash(token: &StoredToken) -> String {
	format!("{:x}", Sha256::digest(token.access_token.expose().as_bytes()))
}

fn token_matches(token: &StoredToken, scopes: &[String]) -> bool {
	session_for(token).is_ok_and(|s| scopes_equal(Some(&s.scopes), Some(scopes)))
}

#[cfg(test)]
mod tests {
	// crates.io
	use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
	// self
	use super::*;

	fn jwt(payload: &str) -> String {
		format!("e30.{}.sig", URL_SAFE_NO_PAD.encode(payload))
	}

	#[test]
	fn sessions_prefer_id_token_claims() {
		let token = StoredToken::new(jwt(r#"{"sub":"access"}"#), "Bearer")
			.with_id_token(jwt(r#"{"sub":"42","name":"Ada","email":"ada@example.com"}"#))
			.with_scope("read write");
		let session = session_for(&token).expect("Session should derive.");

		assert_eq!(session.account, AccountInfo::new("42", "Ada"));
		assert_eq!(session.scopes, vec!["read", "write"]);
		assert_eq!(session.id.len(), 64);
		assert!(session.id_token.is_some());
	}

	#[test]
	fn opaque_tokens_fall_back_to_defaults() {
		let session =
			session_for(&StoredToken::new("opaque", "Bearer")).expect("Session should derive.");

		assert_eq!(session.account, AccountInfo::new("unknown", "MCP"));
		assert!(session.scopes.is_empty());
	}

	#[test]
	fn claim_scopes_fill_in_when_the_token_has_none() {
		let token = StoredToken::new(jwt(r#"{"sub":"1","scope":"b a"}"#), "Bearer");

		assert!(token_matches(&token, &["a".into(), "b".into()]));
	}

	#[test]
	fn labels_prefer_resource_names() {
		let server = Url::parse("https://auth.example.com:8443/t").expect("URL should parse.");

		assert_eq!(provider_label(&server, None), "auth.example.com:8443");

		let resource = ProtectedResourceMetadata {
			resource: "https://api.example.com".into(),
			resource_name: Some("Example API".into()),
			authorization_servers: None,
			scopes_supported: None,
			bearer_methods_supported: None,
			extra: BTreeMap::new(),
		};

		assert_eq!(provider_label(&server, Some(&resource)), "Example API");
	}
}
