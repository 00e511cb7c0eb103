//! Provider implementations plugged into the registry and the metadata describing them.

// crates.io
use tokio::sync::broadcast;
// self
use crate::{
	_prelude::*,
	auth::{AccountInfo, ProviderId, Session, SessionDelta},
	oauth::{Challenge, parse_www_authenticate},
};

/// Boxed future returned by [`AuthenticationProvider`] and host delegate operations.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Static description of a registered provider.
///
/// The capability flags are the only thing the registry consults before dispatching a
/// challenge-based call; a provider without `supports_challenges` is never asked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderInfo {
	/// Provider identifier.
	pub id: ProviderId,
	/// Display label.
	pub label: String,
	/// Whether several accounts may be signed in at once.
	pub supports_multiple_accounts: bool,
	/// Whether the provider resolves sessions from `WWW-Authenticate` challenges.
	pub supports_challenges: bool,
	/// Authorization server URIs or glob patterns the provider serves.
	pub authorization_servers: Vec<String>,
	/// Resource server the provider is bound to.
	pub resource_server: Option<String>,
}
impl ProviderInfo {
	/// Describes a single-account provider without challenge support.
	pub fn new(id: ProviderId, label: impl Into<String>) -> Self {
		Self {
			id,
			label: label.into(),
			supports_multiple_accounts: false,
			supports_challenges: false,
			authorization_servers: Vec::new(),
			resource_server: None,
		}
	}

	/// Enables multiple accounts.
	pub fn with_multiple_accounts(mut self) -> Self {
		self.supports_multiple_accounts = true;

		self
	}

	/// Enables challenge-based session lookup and creation.
	pub fn with_challenges(mut self) -> Self {
		self.supports_challenges = true;

		self
	}

	/// Adds a served authorization server URI or glob.
	pub fn with_authorization_server(mut self, server: impl Into<String>) -> Self {
		self.authorization_servers.push(server.into());

		self
	}

	/// Binds the provider to a resource server.
	pub fn with_resource_server(mut self, resource: impl Into<String>) -> Self {
		self.resource_server = Some(resource.into());

		self
	}

	/// Returns `true` when the provider was minted for exactly this server and resource pair.
	pub fn is_minted_for(&self, authorization_server: &Url, resource: Option<&str>) -> bool {
		let server = trim_slash(authorization_server.as_str());

		self.authorization_servers.iter().any(|s| trim_slash(s) == server)
			&& match (&self.resource_server, resource) {
				(None, None) => true,
				(Some(bound), Some(requested)) =>
					trim_slash(bound).eq_ignore_ascii_case(trim_slash(requested)),
				_ => false,
			}
	}

	/// Returns `true` when the provider serves `authorization_server` for `resource`.
	///
	/// A provider bound to a resource server never matches another resource, nor a request
	/// without one.
	pub fn serves(&self, authorization_server: &Url, resource: Option<&Url>) -> bool {
		let server = trim_slash(authorization_server.as_str());
		let server_matches = self.authorization_servers.iter().any(|pattern| {
			let pattern = trim_slash(pattern);

			pattern == server || glob_match::glob_match(pattern, server)
		});

		if !server_matches {
			return false;
		}

		match (&self.resource_server, resource) {
			(None, _) => true,
			(Some(bound), Some(requested)) =>
				trim_slash(bound).eq_ignore_ascii_case(trim_slash(requested.as_str())),
			(Some(_), None) => false,
		}
	}
}

/// A request expressed as parsed `WWW-Authenticate` challenges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChallengeRequest {
	/// Raw header value the challenges were parsed from.
	pub www_authenticate: String,
	/// Parsed challenges.
	pub challenges: Vec<Challenge>,
	/// Scopes to use when the challenges name none.
	pub fallback_scopes: Option<Vec<String>>,
}
impl ChallengeRequest {
	/// Parses a header value.
	pub fn from_header(value: impl Into<String>, fallback_scopes: Option<Vec<String>>) -> Self {
		let www_authenticate = value.into();
		let challenges = parse_www_authenticate(&www_authenticate);

		Self { www_authenticate, challenges, fallback_scopes }
	}
}

/// Per-call options forwarded to the provider.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderSessionOptions {
	/// Account the caller wants the session for.
	pub account: Option<AccountInfo>,
	/// Authorization server the caller is targeting.
	pub authorization_server: Option<Url>,
}

/// A provider implementation: something that can list, mint, and drop sessions.
///
/// Implementations must tolerate concurrent calls; the registry does not serialize them.
pub trait AuthenticationProvider
where
	Self: Send + Sync,
{
	/// Static description and capability flags.
	fn info(&self) -> &ProviderInfo;

	/// Lists sessions; `None` lists every session.
	fn get_sessions<'a>(
		&'a self,
		scopes: Option<&'a [String]>,
		options: &'a ProviderSessionOptions,
	) -> ProviderFuture<'a, Vec<Session>>;

	/// Creates a session, usually through user interaction.
	fn create_session<'a>(
		&'a self,
		scopes: &'a [String],
		options: &'a ProviderSessionOptions,
	) -> ProviderFuture<'a, Session>;

	/// Removes a session.
	fn remove_session<'a>(&'a self, session_id: &'a str) -> ProviderFuture<'a, ()>;

	/// Lists sessions satisfying a challenge request.
	///
	/// Only called when [`ProviderInfo::supports_challenges`] is set.
	fn get_sessions_from_challenges<'a>(
		&'a self,
		request: &'a ChallengeRequest,
		options: &'a ProviderSessionOptions,
	) -> ProviderFuture<'a, Vec<Session>> {
		let _ = (request, options);
		let provider = self.info().id.to_string();

		Box::pin(async move {
			Err(Error::CapabilityMissing { provider, capability: "challenge-based sessions" })
		})
	}

	/// Creates a session satisfying a challenge request.
	///
	/// Only called when [`ProviderInfo::supports_challenges`] is set.
	fn create_session_from_challenges<'a>(
		&'a self,
		request: &'a ChallengeRequest,
		options: &'a ProviderSessionOptions,
	) -> ProviderFuture<'a, Session> {
		let _ = (request, options);
		let provider = self.info().id.to_string();

		Box::pin(async move {
			Err(Error::CapabilityMissing { provider, capability: "challenge-based sessions" })
		})
	}

	/// Stream of session changes, when the provider publishes one.
	fn session_changes(&self) -> Option<broadcast::Receiver<SessionDelta>> {
		None
	}
}

fn trim_slash(value: &str) -> &str {
	value.strip_suffix('/').unwrap_or(value)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn info() -> ProviderInfo {
		ProviderInfo::new(ProviderId::new("github").expect("Provider id should be valid."), "GitHub")
	}

	fn url(value: &str) -> Url {
		Url::parse(value).expect("URL fixture should parse.")
	}

	#[test]
	fn resource_binding_is_strict_and_case_insensitive() {
		let bound = info()
			.with_authorization_server("https://login.example.com/*")
			.with_resource_server("https://API.example.com/mcp");

		assert!(bound.serves(
			&url("https://login.example.com/tenant"),
			Some(&url("https://api.example.com/mcp"))
		));
		assert!(!bound.serves(
			&url("https://login.example.com/tenant"),
			Some(&url("https://api.example.com/other"))
		));
		assert!(!bound.serves(&url("https://login.example.com/tenant"), None));
	}

	#[test]
	fn unbound_providers_match_by_server_only() {
		let unbound = info().with_authorization_server("https://login.example.com");

		assert!(unbound.serves(&url("https://login.example.com/"), None));
		assert!(unbound.serves(
			&url("https://login.example.com"),
			Some(&url("https://api.example.com/"))
		));
		assert!(!unbound.serves(&url("https://evil.example.com/"), None));
	}

	#[test]
	fn challenge_requests_keep_the_raw_header() {
		let request = ChallengeRequest::from_header(
			r#"Bearer realm="x", scope="read write""#,
			Some(vec!["read".into()]),
		);

		assert_eq!(request.challenges.len(), 1);
		assert_eq!(request.challenges[0].param("scope"), Some("read write"));
	}
}
