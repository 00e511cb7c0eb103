//! Dynamic client registration (RFC 7591).

// crates.io
use oauth2::http::{
	HeaderValue, Method, Request,
	header::{ACCEPT, CONTENT_TYPE},
};
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	error::ConfigError,
	http::{self, OAuthHttpClient},
	oauth::{
		AuthorizationServerMetadata, DynamicClientRegistration, OAuthErrorResponse,
		is_dynamic_client_registration_response,
	},
	obs::{self, OpLabels, OperationKind},
};

/// Loopback port kept stable across runs so registered redirect URIs keep matching.
pub const DEFAULT_AUTH_FLOW_PORT: u16 = 33418;
/// Grant types requested at registration, before intersecting with server support.
pub const DEFAULT_GRANT_TYPES: [&str; 3] =
	["authorization_code", "refresh_token", "urn:ietf:params:oauth:grant-type:device_code"];

/// Errors raised by [`register_dynamic_client`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum RegistrationError {
	/// Server metadata has no `registration_endpoint`.
	#[error("Server does not support dynamic registration")]
	Unsupported,
	/// Server answered with a non-2xx status.
	#[error("Registration to {url} failed: {detail}")]
	Rejected {
		/// Registration endpoint.
		url: String,
		/// HTTP status code.
		status: u16,
		/// `error: error_description` from the body, or the raw body.
		detail: String,
	},
	/// The 2xx body is not a registration response.
	#[error("Invalid authorization dynamic client registration response")]
	InvalidResponse,
}

/// Client metadata sent with every registration request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProfile {
	/// `client_name` shown on consent screens.
	pub client_name: String,
	/// `client_uri` describing the client.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_uri: Option<String>,
	/// Redirect URIs the client may use.
	pub redirect_uris: Vec<String>,
}
impl Default for ClientProfile {
	fn default() -> Self {
		Self {
			client_name: "Auth Provider Broker".into(),
			client_uri: None,
			redirect_uris: default_redirect_uris(),
		}
	}
}

#[derive(Serialize)]
struct RegistrationBody<'a> {
	client_name: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	client_uri: Option<&'a str>,
	grant_types: Vec<&'a str>,
	response_types: [&'static str; 1],
	redirect_uris: &'a [String],
	token_endpoint_auth_method: &'static str,
	application_type: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	scope: Option<String>,
}

/// Redirect URIs registered by default, including the fixed loopback port.
pub fn default_redirect_uris() -> Vec<String> {
	vec![
		"https://insiders.vscode.dev/redirect".into(),
		"https://vscode.dev/redirect".into(),
		"http://127.0.0.1/".into(),
		format!("http://127.0.0.1:{DEFAULT_AUTH_FLOW_PORT}/"),
	]
}

/// Registers a public native client with the server's registration endpoint.
///
/// `scopes` of `None` omits the `scope` member; `Some(&[])` sends an empty string.
pub async fn register_dynamic_client<C>(
	client: &C,
	server: &AuthorizationServerMetadata,
	profile: &ClientProfile,
	scopes: Option<&[String]>,
) -> Result<DynamicClientRegistration>
where
	C: ?Sized + OAuthHttpClient,
{
	let endpoint =
		server.registration_endpoint.as_deref().ok_or(RegistrationError::Unsupported)?.to_owned();
	let grant_types = match &server.grant_types_supported {
		Some(supported) =>
			DEFAULT_GRANT_TYPES.into_iter().filter(|g| supported.iter().any(|s| s == g)).collect(),
		None => DEFAULT_GRANT_TYPES.to_vec(),
	};
	let body = RegistrationBody {
		client_name: &profile.client_name,
		client_uri: profile.client_uri.as_deref(),
		grant_types,
		response_types: ["code"],
		redirect_uris: &profile.redirect_uris,
		token_endpoint_auth_method: "none",
		application_type: "native",
		scope: scopes.map(|s| s.join(" ")),
	};
	let payload = serde_json::to_vec(&body).map_err(|e| ConfigError::InvalidConfig {
		path: "registration".into(),
		message: e.to_string(),
	})?;
	let request = Request::builder()
		.method(Method::POST)
		.uri(endpoint.as_str())
		.header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
		.header(ACCEPT, HeaderValue::from_static("application/json"))
		.body(payload)
		.map_err(ConfigError::from)?;
	let host = Url::parse(&endpoint).ok();
	let labels = OpLabels::new(OperationKind::Registration, "register_dynamic_client")
		.server(host.as_ref().and_then(Url::host_str));

	obs::observe(labels, async move {
		let response = http::execute(client, &endpoint, request).await?;

		if !response.status().is_success() {
			let text = String::from_utf8_lossy(response.body()).into_owned();
			let detail = match serde_json::from_str::<OAuthErrorResponse>(&text) {
				Ok(error) => error.summary(),
				Err(_) if text.trim().is_empty() => http::status_text(&response).to_owned(),
				Err(_) => text,
			};

			return Err(RegistrationError::Rejected {
				url: endpoint,
				status: response.status().as_u16(),
				detail,
			}
			.into());
		}

		let value = serde_json::from_slice::<Value>(response.body())
			.map_err(|_| RegistrationError::InvalidResponse)?;

		if !is_dynamic_client_registration_response(&value) {
			return Err(RegistrationError::InvalidResponse.into());
		}

		serde_json::from_value(value).map_err(|_| RegistrationError::InvalidResponse.into())
	})
	.await
}
