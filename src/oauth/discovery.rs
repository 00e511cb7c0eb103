//! Well-known metadata discovery with ordered fallbacks.
//!
//! Each candidate URL is fetched with `GET` + `Accept: application/json`. A candidate fails on a
//! non-200 status, an unreadable body, a shape violation, or (for protected resources) a
//! `resource` value that does not match the target. Failures are collected in attempt order; the
//! first success short-circuits the chain.

// crates.io
use oauth2::http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header::ACCEPT};
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	error::ConfigError,
	http::{self, OAuthHttpClient},
	oauth::{
		AuthorizationServerMetadata, ProtectedResourceMetadata,
		metadata::{parse_authorization_server_metadata, parse_protected_resource_metadata},
	},
	obs::{self, OpLabels, OperationKind},
};

const PROTECTED_RESOURCE_WELL_KNOWN: &str = "/.well-known/oauth-protected-resource";
const AUTHORIZATION_SERVER_WELL_KNOWN: &str = "/.well-known/oauth-authorization-server";
const OPENID_WELL_KNOWN: &str = "/.well-known/openid-configuration";
const PROTECTED_RESOURCE_DOCUMENT: &str = "resource metadata";
const AUTHORIZATION_SERVER_DOCUMENT: &str = "authorization server metadata";

/// Failure recorded for a single discovery URL.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum CandidateError {
	/// The server answered with a status other than 200.
	#[error("Failed to fetch {document} from {url}: {status} {detail}")]
	Status {
		/// Document being discovered.
		document: &'static str,
		/// Attempted URL.
		url: String,
		/// HTTP status code.
		status: u16,
		/// Reason phrase or response body.
		detail: String,
	},
	/// The body was not JSON or failed shape validation.
	#[error("Invalid {document} from {url}: {reason}")]
	Malformed {
		/// Document being discovered.
		document: &'static str,
		/// Attempted URL.
		url: String,
		/// Validation failure.
		reason: String,
	},
	/// The protected resource metadata names a different resource.
	#[error(
		"Protected Resource Metadata resource property value \"{}\" (length: {}) does not match target server url \"{}\" (length: {}) at {}. These MUST match per https://datatracker.ietf.org/doc/html/rfc9728#PR-5.3",
		.actual,
		.actual.len(),
		.expected,
		.expected.len(),
		.url
	)]
	ResourceMismatch {
		/// Attempted URL.
		url: String,
		/// Normalized target resource.
		expected: String,
		/// Normalized resource value returned by the server.
		actual: String,
	},
	/// The request never produced a response.
	#[error("Request to {url} failed: {message}")]
	Request {
		/// Attempted URL.
		url: String,
		/// Transport failure chain.
		message: String,
	},
}
impl CandidateError {
	/// URL the failed attempt targeted.
	pub fn url(&self) -> &str {
		match self {
			Self::Status { url, .. }
			| Self::Malformed { url, .. }
			| Self::ResourceMismatch { url, .. }
			| Self::Request { url, .. } => url,
		}
	}
}

/// Renders the aggregate message for [`Error::DiscoveryExhausted`].
pub fn render_exhausted(target: &str, attempts: &[CandidateError]) -> String {
	let mut message = format!("Failed to fetch {target} from all attempted URLs");

	for attempt in attempts {
		message.push_str("\n  - ");
		message.push_str(&attempt.to_string());
	}

	message
}

/// Candidate URLs for protected resource metadata, most specific first.
pub fn protected_resource_candidates(target: &Url) -> Vec<Url> {
	let origin = target.origin().ascii_serialization();
	let path = target.path();
	let mut candidates = Vec::with_capacity(2);

	if !path.is_empty() && path != "/" {
		push_parsed(&mut candidates, format!("{origin}{PROTECTED_RESOURCE_WELL_KNOWN}{path}"));
	}

	push_parsed(&mut candidates, format!("{origin}{PROTECTED_RESOURCE_WELL_KNOWN}"));

	candidates
}

/// Candidate URLs for authorization server metadata in RFC 8414 / OpenID fallback order.
///
/// Duplicates (a root issuer makes the two OpenID forms identical) are tried once.
pub fn authorization_server_candidates(issuer: &Url) -> Vec<Url> {
	let origin = issuer.origin().ascii_serialization();
	let path = issuer.path().trim_end_matches('/');
	let mut candidates = Vec::with_capacity(3);

	for raw in [
		format!("{origin}{AUTHORIZATION_SERVER_WELL_KNOWN}{path}"),
		format!("{origin}{OPENID_WELL_KNOWN}{path}"),
		format!("{origin}{path}{OPENID_WELL_KNOWN}"),
	] {
		push_parsed(&mut candidates, raw);
	}

	candidates
}

/// Discovers protected resource metadata for `target` (RFC 9728).
///
/// With `explicit_url` (usually a `resource_metadata` challenge parameter) only that URL is
/// tried and its failure is returned directly as [`Error::Candidate`]. Otherwise the
/// [`protected_resource_candidates`] are tried in order. `headers` are forwarded only to URLs
/// sharing the target's scheme, host, and port.
pub async fn discover_protected_resource_metadata<C>(
	client: &C,
	target: &Url,
	explicit_url: Option<&Url>,
	headers: &HeaderMap,
) -> Result<ProtectedResourceMetadata>
where
	C: ?Sized + OAuthHttpClient,
{
	let candidates = match explicit_url {
		Some(url) => vec![url.clone()],
		None => protected_resource_candidates(target),
	};
	let labels =
		OpLabels::new(OperationKind::Discovery, "protected_resource").server(target.host_str());

	obs::observe(labels, async move {
		let expected = normalize_resource(target.as_str());
		let mut attempts = Vec::with_capacity(candidates.len());

		for candidate in &candidates {
			let forwarded = if same_origin(candidate, target) { Some(headers) } else { None };
			let outcome = fetch_candidate(client, candidate, PROTECTED_RESOURCE_DOCUMENT, forwarded)
				.await?
				.and_then(|value| {
					parse_protected_resource_metadata(value).map_err(|reason| {
						CandidateError::Malformed {
							document: PROTECTED_RESOURCE_DOCUMENT,
							url: candidate.to_string(),
							reason,
						}
					})
				})
				.and_then(|metadata| {
					let actual = normalize_resource(&metadata.resource);

					if actual == expected {
						Ok(metadata)
					} else {
						Err(CandidateError::ResourceMismatch {
							url: candidate.to_string(),
							expected: expected.clone(),
							actual,
						})
					}
				});

			match outcome {
				Ok(metadata) => return Ok(metadata),
				Err(e) => {
					obs::debug_event!(url = %candidate, error = %e, "Protected resource candidate failed.");

					attempts.push(e);
				},
			}
		}

		Err(exhausted(PROTECTED_RESOURCE_DOCUMENT, attempts))
	})
	.await
}

/// Discovers authorization server metadata for `issuer`.
///
/// Tries OAuth metadata with path insertion, OpenID discovery with path insertion, then OpenID
/// discovery with the well-known suffix appended. `headers` are sent with every attempt.
pub async fn discover_authorization_server_metadata<C>(
	client: &C,
	issuer: &Url,
	headers: &HeaderMap,
) -> Result<AuthorizationServerMetadata>
where
	C: ?Sized + OAuthHttpClient,
{
	let candidates = authorization_server_candidates(issuer);
	let labels =
		OpLabels::new(OperationKind::Discovery, "authorization_server").server(issuer.host_str());

	obs::observe(labels, async move {
		let mut attempts = Vec::with_capacity(candidates.len());

		for candidate in &candidates {
			let outcome =
				fetch_candidate(client, candidate, AUTHORIZATION_SERVER_DOCUMENT, Some(headers))
					.await?
					.and_then(|value| {
						parse_authorization_server_metadata(value).map_err(|reason| {
							CandidateError::Malformed {
								document: AUTHORIZATION_SERVER_DOCUMENT,
								url: candidate.to_string(),
								reason,
							}
						})
					});

			match outcome {
				Ok(metadata) => return Ok(metadata),
				Err(e) => {
					obs::debug_event!(url = %candidate, error = %e, "Authorization server candidate failed.");

					attempts.push(e);
				},
			}
		}

		Err(exhausted(AUTHORIZATION_SERVER_DOCUMENT, attempts))
	})
	.await
}

/// Normalizes a resource identifier for comparison: scheme and host are lowercased and
/// default ports dropped. Unparseable values compare verbatim.
pub fn normalize_resource(value: &str) -> String {
	Url::parse(value).map(String::from).unwrap_or_else(|_| value.to_owned())
}

/// Returns `true` when both URLs share scheme, host, and effective port.
pub fn same_origin(a: &Url, b: &Url) -> bool {
	a.scheme() == b.scheme()
		&& a.host_str() == b.host_str()
		&& a.port_or_known_default() == b.port_or_known_default()
}

// Outer `Result` is a hard failure (request could not be built); inner is the candidate outcome.
async fn fetch_candidate<C>(
	client: &C,
	url: &Url,
	document: &'static str,
	headers: Option<&HeaderMap>,
) -> Result<Result<Value, CandidateError>>
where
	C: ?Sized + OAuthHttpClient,
{
	let mut builder = Request::builder()
		.method(Method::GET)
		.uri(url.as_str())
		.header(ACCEPT, HeaderValue::from_static("application/json"));

	if let Some(headers) = headers {
		for (name, value) in headers.iter().filter(|(name, _)| **name != ACCEPT) {
			builder = builder.header(name, value);
		}
	}

	let request = builder.body(Vec::new()).map_err(ConfigError::from)?;
	let response = match http::execute(client, url.as_str(), request).await {
		Ok(response) => response,
		Err(e) =>
			return Ok(Err(CandidateError::Request { url: url.to_string(), message: error_chain(&e) })),
	};

	if response.status() != StatusCode::OK {
		let body = String::from_utf8_lossy(response.body()).trim().to_owned();
		let detail = if body.is_empty() { http::status_text(&response).to_owned() } else { body };

		return Ok(Err(CandidateError::Status {
			document,
			url: url.to_string(),
			status: response.status().as_u16(),
			detail,
		}));
	}

	Ok(serde_json::from_slice::<Value>(response.body()).map_err(|e| CandidateError::Malformed {
		document,
		url: url.to_string(),
		reason: format!("Response is not valid JSON: {e}"),
	}))
}

fn exhausted(document: &'static str, mut attempts: Vec<CandidateError>) -> Error {
	if attempts.len() == 1
		&& let Some(only) = attempts.pop()
	{
		return Error::Candidate(only);
	}

	Error::DiscoveryExhausted { target: document, attempts }
}

fn push_parsed(candidates: &mut Vec<Url>, raw: String) {
	if let Ok(url) = Url::parse(&raw)
		&& !candidates.contains(&url)
	{
		candidates.push(url);
	}
}

pub(crate) fn error_chain(err: &dyn StdError) -> String {
	let mut message = err.to_string();
	let mut source = err.source();

	while let Some(inner) = source {
		message.push_str(": ");
		message.push_str(&inner.to_string());
		source = inner.source();
	}

	message
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url(raw: &str) -> Url {
		Url::parse(raw).expect("Fixture URL should parse.")
	}

	#[test]
	fn protected_resource_candidates_try_path_then_root() {
		let candidates = protected_resource_candidates(&url("https://api.example.com/mcp"));

		assert_eq!(
			candidates.iter().map(Url::as_str).collect::<Vec<_>>(),
			vec![
				"https://api.example.com/.well-known/oauth-protected-resource/mcp",
				"https://api.example.com/.well-known/oauth-protected-resource",
			]
		);
		assert_eq!(protected_resource_candidates(&url("https://api.example.com/")).len(), 1);
	}

	#[test]
	fn authorization_server_candidates_follow_fallback_order() {
		let candidates = authorization_server_candidates(&url("https://auth.example.com/tenant1/"));

		assert_eq!(
			candidates.iter().map(Url::as_str).collect::<Vec<_>>(),
			vec![
				"https://auth.example.com/.well-known/oauth-authorization-server/tenant1",
				"https://auth.example.com/.well-known/openid-configuration/tenant1",
				"https://auth.example.com/tenant1/.well-known/openid-configuration",
			]
		);

		let root = authorization_server_candidates(&url("https://auth.example.com"));

		assert_eq!(
			root.iter().map(Url::as_str).collect::<Vec<_>>(),
			vec![
				"https://auth.example.com/.well-known/oauth-authorization-server",
				"https://auth.example.com/.well-known/openid-configuration",
			]
		);
	}

	#[test]
	fn resource_normalization_ignores_host_case_and_default_port() {
		assert_eq!(normalize_resource("https://EXAMPLE.COM/api"), normalize_resource("https://example.com/api"));
		assert_eq!(
			normalize_resource("https://example.com:443/api"),
			normalize_resource("https://example.com/api")
		);
		assert_ne!(normalize_resource("https://example.com/api"), normalize_resource("https://example.com/other"));
	}

	#[test]
	fn origin_comparison_includes_scheme_and_port() {
		assert!(same_origin(&url("https://a.example.com/x"), &url("https://a.example.com:443/y")));
		assert!(!same_origin(&url("https://a.example.com/x"), &url("https://a.example.com:8443/x")));
		assert!(!same_origin(&url("https://a.example.com/x"), &url("http://a.example.com/x")));
	}

	#[test]
	fn mismatch_message_names_both_values_and_lengths() {
		let err = CandidateError::ResourceMismatch {
			url: "https://example.com/.well-known/oauth-protected-resource".into(),
			expected: "https://example.com/api".into(),
			actual: "https://different.com/other".into(),
		};
		let message = err.to_string();

		assert!(message.contains("length: 27"));
		assert!(message.contains("https://different.com/other"));
		assert!(message.contains("https://example.com/api"));
	}

	#[test]
	fn single_failure_is_not_aggregated() {
		let only = CandidateError::Request { url: "https://a/".into(), message: "dns".into() };

		assert!(matches!(exhausted("resource metadata", vec![only.clone()]), Error::Candidate(_)));

		let err = exhausted("resource metadata", vec![only.clone(), only]);

		assert!(matches!(err, Error::DiscoveryExhausted { ref attempts, .. } if attempts.len() == 2));
		assert!(err.to_string().starts_with("Failed to fetch resource metadata from all attempted URLs"));
	}
}
