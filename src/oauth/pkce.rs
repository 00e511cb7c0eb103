//! Authorization Code + PKCE handshake state.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, error::ConfigError};

const STATE_LEN: usize = 32;
const PKCE_VERIFIER_LEN: usize = 64;

/// Supported PKCE challenge methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkceCodeChallengeMethod {
	/// SHA-256 based PKCE (RFC 7636 S256).
	S256,
}
impl PkceCodeChallengeMethod {
	/// Returns the RFC 7636 identifier for the challenge method.
	pub fn as_str(self) -> &'static str {
		match self {
			PkceCodeChallengeMethod::S256 => "S256",
		}
	}
}

/// Verifier/challenge pair generated for one authorization attempt.
#[derive(Clone)]
pub struct PkcePair {
	verifier: String,
	challenge: String,
	method: PkceCodeChallengeMethod,
}
impl PkcePair {
	/// Generates a fresh random verifier and its S256 challenge.
	pub fn generate() -> Self {
		let verifier = random_string(PKCE_VERIFIER_LEN);
		let challenge = compute_pkce_challenge(&verifier);

		Self { verifier, challenge, method: PkceCodeChallengeMethod::S256 }
	}

	/// Secret verifier sent with the code exchange.
	pub fn verifier(&self) -> &str {
		&self.verifier
	}

	/// Challenge sent on the authorize URL.
	pub fn challenge(&self) -> &str {
		&self.challenge
	}

	/// Challenge method (always `S256`).
	pub fn method(&self) -> PkceCodeChallengeMethod {
		self.method
	}
}
impl Debug for PkcePair {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PkcePair")
			.field("verifier", &"<redacted>")
			.field("challenge", &self.challenge)
			.field("method", &self.method)
			.finish()
	}
}

/// Everything needed to send the user to the authorization endpoint and later redeem the code.
#[derive(Clone, Debug)]
pub struct AuthorizationRequest {
	/// Fully formed authorize URL.
	pub authorize_url: Url,
	/// Opaque state that must round-trip through the redirect.
	pub state: String,
	/// Redirect URI the code will be delivered to.
	pub redirect_uri: Url,
	/// Requested scopes, space-joined.
	pub scope: String,
	/// RFC 8707 resource indicator, when targeting a specific resource.
	pub resource: Option<String>,
	pkce: PkcePair,
}
impl AuthorizationRequest {
	/// Builds a request with fresh state and PKCE material.
	pub fn new(
		authorization_endpoint: &str,
		client_id: &str,
		redirect_uri: Url,
		scopes: &[String],
		resource: Option<&str>,
	) -> Result<Self> {
		let endpoint = Url::parse(authorization_endpoint).map_err(|source| {
			ConfigError::InvalidEndpoint { endpoint: "authorization", source }
		})?;
		let state = random_string(STATE_LEN);
		let pkce = PkcePair::generate();
		let scope = scopes.join(" ");
		let authorize_url =
			build_authorize_url(endpoint, client_id, &redirect_uri, &scope, resource, &state, &pkce);

		Ok(Self {
			authorize_url,
			state,
			redirect_uri,
			scope,
			resource: resource.map(str::to_owned),
			pkce,
		})
	}

	/// PKCE material for the code exchange.
	pub fn pkce(&self) -> &PkcePair {
		&self.pkce
	}

	/// Validates the `state` returned with the redirect.
	pub fn validate_state(&self, returned_state: &str) -> Result<()> {
		if returned_state == self.state { Ok(()) } else { Err(ConfigError::StateMismatch.into()) }
	}
}

fn build_authorize_url(
	mut url: Url,
	client_id: &str,
	redirect_uri: &Url,
	scope: &str,
	resource: Option<&str>,
	state: &str,
	pkce: &PkcePair,
) -> Url {
	let mut pairs = url.query_pairs_mut();

	pairs.append_pair("client_id", client_id);
	pairs.append_pair("response_type", "code");
	pairs.append_pair("state", state);
	pairs.append_pair("code_challenge", &pkce.challenge);
	pairs.append_pair("code_challenge_method", pkce.method.as_str());
	pairs.append_pair("redirect_uri", redirect_uri.as_str());

	if !scope.is_empty() {
		pairs.append_pair("scope", scope);
	}
	if let Some(resource) = resource {
		pairs.append_pair("resource", resource);
	}

	drop(pairs);

	url
}

pub(crate) fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

fn compute_pkce_challenge(verifier: &str) -> String {
	let mut hasher = Sha256::new();

	hasher.update(verifier.as_bytes());

	URL_SAFE_NO_PAD.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn request(resource: Option<&str>) -> AuthorizationRequest {
		AuthorizationRequest::new(
			"https://auth.example.com/authorize?tenant=1",
			"client-1",
			Url::parse("http://127.0.0.1:33418/").expect("Redirect fixture should parse."),
			&["read".into(), "write".into()],
			resource,
		)
		.expect("Authorization request should build.")
	}

	#[test]
	fn authorize_url_carries_pkce_and_resource() {
		let req = request(Some("https://api.example.com/mcp"));
		let pairs = req.authorize_url.query_pairs().into_owned().collect::<HashMap<_, _>>();

		assert_eq!(pairs["tenant"], "1");
		assert_eq!(pairs["client_id"], "client-1");
		assert_eq!(pairs["response_type"], "code");
		assert_eq!(pairs["code_challenge_method"], "S256");
		assert_eq!(pairs["code_challenge"], req.pkce().challenge());
		assert_eq!(pairs["scope"], "read write");
		assert_eq!(pairs["resource"], "https://api.example.com/mcp");
		assert_eq!(pairs["state"], req.state);
		assert_eq!(req.pkce().verifier().len(), PKCE_VERIFIER_LEN);
	}

	#[test]
	fn challenge_is_s256_of_verifier() {
		// RFC 7636 appendix B.
		assert_eq!(
			compute_pkce_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
			"E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
		);
	}

	#[test]
	fn state_validation_errors_on_mismatch() {
		let req = request(None);

		assert!(req.validate_state(&req.state.clone()).is_ok());
		assert!(matches!(
			req.validate_state("other"),
			Err(Error::Config(ConfigError::StateMismatch))
		));
		assert!(!req.authorize_url.as_str().contains("resource="));
	}
}
