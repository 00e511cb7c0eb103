//! Metadata documents and the shape validators that guard them.
//!
//! Validation runs on the raw JSON before typed deserialization so malformed documents are
//! rejected with a precise reason instead of being coerced.

// crates.io
use serde_json::Value;
// self
use crate::{_prelude::*, auth::TokenSecret};

const SERVER_URI_FIELDS: [&str; 5] =
	["issuer", "authorization_endpoint", "token_endpoint", "registration_endpoint", "jwks_uri"];

/// OAuth 2.0 Authorization Server Metadata (RFC 8414) or OpenID Provider Metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
	/// Issuer identifier.
	pub issuer: String,
	/// Authorization endpoint.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub authorization_endpoint: Option<String>,
	/// Token endpoint.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token_endpoint: Option<String>,
	/// Dynamic client registration endpoint (RFC 7591).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub registration_endpoint: Option<String>,
	/// JSON Web Key Set document.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub jwks_uri: Option<String>,
	/// Device authorization endpoint (RFC 8628).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub device_authorization_endpoint: Option<String>,
	/// Supported response types.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub response_types_supported: Option<Vec<String>>,
	/// Supported grant types.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub grant_types_supported: Option<Vec<String>>,
	/// Supported scopes.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub scopes_supported: Option<Vec<String>>,
	/// Supported PKCE methods.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub code_challenge_methods_supported: Option<Vec<String>>,
	/// Whether the server accepts a URL-formatted client id pointing to a metadata document.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_id_metadata_document_supported: Option<bool>,
	/// Fields the broker does not model, preserved for round-tripping.
	#[serde(flatten)]
	pub extra: BTreeMap<String, Value>,
}
impl AuthorizationServerMetadata {
	/// Validates and converts a raw JSON document.
	pub fn from_value(value: Value) -> Result<Self> {
		parse_authorization_server_metadata(value)
			.map_err(|reason| Error::MalformedMetadata { reason })
	}

	/// Returns `true` when the server advertises client-id metadata document support.
	pub fn supports_client_id_metadata_document(&self) -> bool {
		self.client_id_metadata_document_supported.unwrap_or(false)
	}

	/// Returns `true` when the server advertises the grant type (or advertises nothing).
	pub fn supports_grant(&self, grant: &str) -> bool {
		self.grant_types_supported.as_ref().is_none_or(|grants| grants.iter().any(|g| g == grant))
	}
}

/// OAuth 2.0 Protected Resource Metadata (RFC 9728).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
	/// Resource identifier; must match the URL the caller queried for.
	pub resource: String,
	/// Human-readable resource name.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub resource_name: Option<String>,
	/// Authorization servers able to issue tokens for the resource.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub authorization_servers: Option<Vec<String>>,
	/// Scopes the resource understands.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub scopes_supported: Option<Vec<String>>,
	/// Supported bearer token presentation methods.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub bearer_methods_supported: Option<Vec<String>>,
	/// Fields the broker does not model, preserved for round-tripping.
	#[serde(flatten)]
	pub extra: BTreeMap<String, Value>,
}
impl ProtectedResourceMetadata {
	/// Validates and converts a raw JSON document.
	pub fn from_value(value: Value) -> Result<Self> {
		parse_protected_resource_metadata(value)
			.map_err(|reason| Error::MalformedMetadata { reason })
	}
}

/// Successful dynamic client registration response (RFC 7591 section 3.2.1).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicClientRegistration {
	/// Issued client identifier.
	pub client_id: String,
	/// Issued client secret, for confidential clients.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_secret: Option<TokenSecret>,
	/// Client name echoed back by the server.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_name: Option<String>,
	/// Client URI echoed back by the server.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_uri: Option<String>,
	/// Issue time in seconds since the epoch.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_id_issued_at: Option<i64>,
	/// Secret expiry in seconds since the epoch (`0` = never).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_secret_expires_at: Option<i64>,
}

/// OAuth 2.0 error response body (RFC 6749 section 5.2).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthErrorResponse {
	/// Error code.
	pub error: String,
	/// Human-readable description.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error_description: Option<String>,
	/// Page describing the error.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error_uri: Option<String>,
}
impl OAuthErrorResponse {
	/// Renders `error: description`, or only the code when no description is present.
	pub fn summary(&self) -> String {
		match &self.error_description {
			Some(description) => format!("{}: {description}", self.error),
			None => self.error.clone(),
		}
	}
}

/// Builds the conventional metadata for servers that publish no discovery document.
pub fn default_metadata_for_url(url: &Url) -> AuthorizationServerMetadata {
	let origin = url.origin().ascii_serialization();

	AuthorizationServerMetadata {
		issuer: format!("{origin}/"),
		authorization_endpoint: Some(format!("{origin}/authorize")),
		token_endpoint: Some(format!("{origin}/token")),
		registration_endpoint: Some(format!("{origin}/register")),
		jwks_uri: None,
		device_authorization_endpoint: None,
		response_types_supported: Some(vec![
			"code".into(),
			"id_token".into(),
			"id_token token".into(),
		]),
		grant_types_supported: None,
		scopes_supported: None,
		code_challenge_methods_supported: None,
		client_id_metadata_document_supported: None,
		extra: BTreeMap::new(),
	}
}

/// Validates an authorization server metadata document without converting it.
///
/// `issuer` is required; every populated URI field must be an `http://` or `https://` string.
pub fn validate_authorization_server_metadata(value: &Value) -> Result<(), String> {
	let Some(object) = value.as_object() else {
		return Err("Authorization server metadata must be a JSON object".into());
	};

	if !is_populated(object.get("issuer")) {
		return Err("Authorization server metadata must have an issuer".into());
	}

	for field in SERVER_URI_FIELDS {
		let Some(raw) = object.get(field).filter(|v| is_populated(Some(v))) else {
			continue;
		};
		let Some(uri) = raw.as_str() else {
			return Err(format!("Authorization server metadata '{field}' must be a string"));
		};

		if !(uri.starts_with("http://") || uri.starts_with("https://")) {
			return Err(format!(
				"Authorization server metadata '{field}' must start with http:// or https://"
			));
		}
	}

	Ok(())
}

/// Returns `true` when `value` has the protected resource metadata shape.
pub fn is_protected_resource_metadata(value: &Value) -> bool {
	let Some(object) = value.as_object() else {
		return false;
	};

	object.get("resource").is_some_and(Value::is_string)
		&& object.get("scopes_supported").is_none_or(|v| v.is_array() || v.is_null())
}

/// Returns `true` when `value` has the dynamic client registration response shape.
pub fn is_dynamic_client_registration_response(value: &Value) -> bool {
	has_strings(value, &["client_id"])
}

/// Returns `true` when `value` has the authorization redirect response shape.
pub fn is_authorization_response(value: &Value) -> bool {
	has_strings(value, &["code", "state"])
}

/// Returns `true` when `value` has the token response shape.
pub fn is_token_response(value: &Value) -> bool {
	has_strings(value, &["access_token", "token_type"])
}

/// Returns `true` when `value` has the device authorization response shape (RFC 8628).
pub fn is_device_authorization_response(value: &Value) -> bool {
	has_strings(value, &["device_code", "user_code", "verification_uri"])
		&& value.get("expires_in").is_some_and(Value::is_number)
}

/// Returns `true` when `value` has the OAuth error response shape.
pub fn is_error_response(value: &Value) -> bool {
	has_strings(value, &["error"])
}

pub(crate) fn parse_authorization_server_metadata(
	value: Value,
) -> Result<AuthorizationServerMetadata, String> {
	validate_authorization_server_metadata(&value)?;

	serde_path_to_error::deserialize(value).map_err(|e| {
		format!("Authorization server metadata is invalid at '{}': {}", e.path(), e.inner())
	})
}

pub(crate) fn parse_protected_resource_metadata(
	value: Value,
) -> Result<ProtectedResourceMetadata, String> {
	const SHAPE: &str = "Invalid resource metadata. Expected to follow shape of \
		ProtectedResourceMetadata (is scopes_supported an array? Is resource a string?)";

	if !is_protected_resource_metadata(&value) {
		return Err(SHAPE.into());
	}

	serde_path_to_error::deserialize(value)
		.map_err(|e| format!("{SHAPE} Failed at '{}'.", e.path()))
}

// Mirrors JSON truthiness for the values metadata documents carry.
fn is_populated(value: Option<&Value>) -> bool {
	match value {
		None | Some(Value::Null) | Some(Value::Bool(false)) => false,
		Some(Value::String(s)) => !s.is_empty(),
		Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
		Some(_) => true,
	}
}

fn has_strings(value: &Value, fields: &[&str]) -> bool {
	value.as_object().is_some_and(|object| {
		fields.iter().all(|field| object.get(*field).is_some_and(Value::is_string))
	})
}
