//! Broker-level error types shared across discovery, registry, stores, and session policy.

// self
use crate::_prelude::*;

/// Broker-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical broker error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// JWT payload could not be decoded.
	#[error(transparent)]
	Jwt(#[from] crate::oauth::JwtError),
	/// Dynamic client registration failed.
	#[error(transparent)]
	Registration(#[from] crate::oauth::RegistrationError),
	/// A single discovery candidate failed and no fallback was allowed.
	#[error(transparent)]
	Candidate(#[from] crate::oauth::CandidateError),

	/// Metadata document failed shape validation.
	#[error("Malformed metadata: {reason}.")]
	MalformedMetadata {
		/// Validation failure description.
		reason: String,
	},
	/// Every discovery candidate failed.
	#[error("{}", crate::oauth::render_exhausted(.target, .attempts))]
	DiscoveryExhausted {
		/// Human-readable label of the document being discovered.
		target: &'static str,
		/// Failure recorded for each attempted URL, in attempt order.
		attempts: Vec<crate::oauth::CandidateError>,
	},
	/// Provider lacks a capability the request depends on.
	#[error("Authentication provider `{provider}` does not support {capability}.")]
	CapabilityMissing {
		/// Provider identifier.
		provider: String,
		/// Missing capability label.
		capability: &'static str,
	},
	/// Mutually exclusive request options were combined.
	#[error(
		"Invalid combination of options. Please remove one of the following: {first}, {second}."
	)]
	OptionConflict {
		/// First conflicting option name.
		first: &'static str,
		/// Second conflicting option name.
		second: &'static str,
	},
	/// User declined the consent prompt.
	#[error("User did not consent to {action}.")]
	ConsentDeclined {
		/// Action the user declined.
		action: &'static str,
	},
	/// User cancelled an interactive step.
	#[error("Operation was cancelled.")]
	Cancelled,
	/// Provider did not register before the wait bound elapsed.
	#[error("Timed out after {waited_ms}ms waiting for authentication provider `{provider}` to register.")]
	RegistrationTimeout {
		/// Provider identifier.
		provider: String,
		/// Elapsed bound in milliseconds.
		waited_ms: u64,
	},
	/// No provider is registered under the identifier.
	#[error("No authentication provider `{provider}` is currently registered.")]
	NotRegistered {
		/// Provider identifier.
		provider: String,
	},
	/// No host delegate can mint dynamic providers.
	#[error("No authentication provider host delegate is registered.")]
	NoHostDelegate,
	/// A declared provider was rejected.
	#[error("Invalid authentication provider declaration: {reason}.")]
	InvalidDeclaration {
		/// Rejection reason.
		reason: String,
	},
	/// A provider with the same id is already registered.
	#[error("An authentication provider with id `{provider}` is already registered.")]
	AlreadyRegistered {
		/// Provider identifier.
		provider: String,
	},
	/// The broker was disposed while the operation was pending.
	#[error("Authentication broker has been disposed.")]
	Disposed,
	/// A destructive call was made without its confirmation string.
	#[error("Must provide confirmation string to clear all authentication data")]
	ConfirmationRequired,
	/// Failure of an in-flight resolution shared by several identical requests.
	#[error(transparent)]
	Shared(Arc<Error>),

	/// Provider rejected the grant (e.g., bad code or refresh token).
	#[error("Provider rejected the grant: {reason}.")]
	InvalidGrant {
		/// Provider- or broker-supplied reason string.
		reason: String,
	},
	/// Client authentication failed or the client registration is unknown.
	#[error("Client authentication failed: {reason}.")]
	InvalidClient {
		/// Provider- or broker-supplied reason string.
		reason: String,
	},
}
impl Error {
	/// Returns `true` when the failure is a user-level refusal that callers should not retry
	/// automatically.
	pub fn is_user_refusal(&self) -> bool {
		matches!(self.root(), Self::ConsentDeclined { .. } | Self::Cancelled)
	}

	/// Returns the underlying error, looking through [`Error::Shared`].
	pub fn root(&self) -> &Error {
		match self {
			Self::Shared(inner) => inner.root(),
			other => other,
		}
	}
}

/// Configuration and validation failures raised by the broker.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Endpoint URL cannot be parsed.
	#[error("Endpoint `{endpoint}` is not a valid URL.")]
	InvalidEndpoint {
		/// Endpoint label.
		endpoint: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Server metadata omits an endpoint the operation needs.
	#[error("Server metadata does not provide the {endpoint} endpoint.")]
	MissingEndpoint {
		/// Endpoint label.
		endpoint: &'static str,
	},
	/// Identifier validation failed.
	#[error(transparent)]
	Identifier(#[from] crate::auth::IdentifierError),
	/// Scope validation failed.
	#[error(transparent)]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Broker configuration document could not be parsed.
	#[error("Broker configuration is invalid at `{path}`: {message}")]
	InvalidConfig {
		/// JSON path of the offending field.
		path: String,
		/// Parser message.
		message: String,
	},
	/// Broker configuration file could not be read.
	#[error("Broker configuration could not be read.")]
	ConfigIo(#[source] std::io::Error),
	/// Authorization redirect did not carry a code.
	#[error("Authentication failed: No authorization code received.")]
	MissingAuthorizationCode,
	/// Authorization redirect returned an unexpected state value.
	#[error("Authorization state mismatch.")]
	StateMismatch,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Token endpoint returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Broker-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling {endpoint}.")]
	Network {
		/// Endpoint label or URL the request targeted.
		endpoint: String,
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred during transport.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(
		endpoint: impl Into<String>,
		src: impl 'static + Send + Sync + std::error::Error,
	) -> Self {
		Self::Network { endpoint: endpoint.into(), source: Box::new(src) }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn option_conflict_names_both_options() {
		let err = Error::OptionConflict { first: "forceNewSession", second: "createIfNone" };

		assert_eq!(
			err.to_string(),
			"Invalid combination of options. Please remove one of the following: forceNewSession, createIfNone."
		);
	}

	#[test]
	fn refusals_are_distinguished_from_failures() {
		assert!(Error::ConsentDeclined { action: "login" }.is_user_refusal());
		assert!(Error::Cancelled.is_user_refusal());
		assert!(!Error::NotRegistered { provider: "github".into() }.is_user_refusal());
		assert!(!Error::Disposed.is_user_refusal());
		assert!(Error::Shared(Arc::new(Error::Cancelled)).is_user_refusal());
	}
}
