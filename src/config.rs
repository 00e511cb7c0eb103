//! Product-level broker configuration.

// std
use std::{fs, path::Path};
// crates.io
use serde_json::Value;
// self
use crate::{_prelude::*, error::ConfigError, oauth::default_redirect_uris};

const DEFAULT_REGISTRATION_TIMEOUT_MS: u64 = 5_000;

/// Consumers trusted to use accounts without an access prompt.
///
/// The array form trusts consumers for every provider; the object form maps provider ids to
/// trusted consumers. Any other JSON shape is tolerated and trusts nobody.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrustedAccess {
	/// No trusted consumers.
	#[default]
	None,
	/// Trusted for every provider.
	Global(Vec<String>),
	/// Trusted per provider id.
	PerProvider(HashMap<String, Vec<String>>),
	/// Unrecognized shape, kept for round-tripping.
	Unrecognized(Value),
}
impl TrustedAccess {
	/// Returns `true` when `consumer_id` is trusted for `provider_id`.
	///
	/// `consumer_id` must already be normalized for its consumer kind.
	pub fn is_trusted(&self, provider_id: &str, consumer_id: &str) -> bool {
		self.trusted_for(provider_id).iter().any(|id| id.as_str() == consumer_id)
	}

	/// Trusted consumer ids that apply to `provider_id`.
	pub fn trusted_for(&self, provider_id: &str) -> &[String] {
		match self {
			Self::Global(ids) => ids,
			Self::PerProvider(map) => map.get(provider_id).map(Vec::as_slice).unwrap_or_default(),
			Self::None | Self::Unrecognized(_) => &[],
		}
	}
}

/// Broker configuration document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
	/// Client name sent with dynamic client registration.
	pub app_name: String,
	/// Client URI sent with dynamic client registration.
	pub client_uri: Option<String>,
	/// Redirect URIs sent with dynamic client registration.
	pub redirect_uris: Vec<String>,
	/// Extensions trusted without a prompt.
	pub trusted_extension_auth_access: TrustedAccess,
	/// MCP servers trusted without a prompt.
	pub trusted_mcp_auth_access: TrustedAccess,
	/// Parent consumer id to the child consumer ids that inherit its account preference.
	pub inherit_auth_account_preference: HashMap<String, Vec<String>>,
	/// Client id metadata document URL used as the client id when a server supports it.
	pub auth_client_id_metadata_url: Option<String>,
	/// Bound for waiting on a provider to register, in milliseconds.
	pub provider_registration_timeout_ms: u64,
}
impl BrokerConfig {
	/// Parses a JSON document, reporting the path of any invalid field.
	pub fn from_json_str(raw: &str) -> Result<Self> {
		let de = &mut serde_json::Deserializer::from_str(raw);

		serde_path_to_error::deserialize(de).map_err(|e| {
			ConfigError::InvalidConfig { path: e.path().to_string(), message: e.inner().to_string() }
				.into()
		})
	}

	/// Reads and parses a JSON file.
	pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
		let raw = fs::read_to_string(path).map_err(ConfigError::ConfigIo)?;

		Self::from_json_str(&raw)
	}

	/// Registration wait bound as a [`std::time::Duration`].
	pub fn registration_timeout(&self) -> std::time::Duration {
		std::time::Duration::from_millis(self.provider_registration_timeout_ms)
	}
}
impl Default for BrokerConfig {
	fn default() -> Self {
		Self {
			app_name: "Auth Provider Broker".into(),
			client_uri: None,
			redirect_uris: default_redirect_uris(),
			trusted_extension_auth_access: TrustedAccess::None,
			trusted_mcp_auth_access: TrustedAccess::None,
			inherit_auth_account_preference: HashMap::new(),
			auth_client_id_metadata_url: None,
			provider_registration_timeout_ms: DEFAULT_REGISTRATION_TIMEOUT_MS,
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn defaults_fill_missing_fields() {
		let config = BrokerConfig::from_json_str(r#"{ "app_name": "Editor" }"#)
			.expect("Partial config should parse.");

		assert_eq!(config.app_name, "Editor");
		assert_eq!(config.provider_registration_timeout_ms, 5_000);
		assert_eq!(config.redirect_uris.len(), 4);
		assert_eq!(config.trusted_extension_auth_access, TrustedAccess::None);
	}

	#[test]
	fn trusted_access_accepts_both_shapes_and_tolerates_others() {
		let config = BrokerConfig::from_json_str(
			r#"{
				"trusted_extension_auth_access": ["pub.ext"],
				"trusted_mcp_auth_access": { "github": ["server-a"] }
			}"#,
		)
		.expect("Trusted access config should parse.");

		assert!(config.trusted_extension_auth_access.is_trusted("anything", "pub.ext"));
		assert!(config.trusted_mcp_auth_access.is_trusted("github", "server-a"));
		assert!(!config.trusted_mcp_auth_access.is_trusted("microsoft", "server-a"));

		let odd = BrokerConfig::from_json_str(r#"{ "trusted_extension_auth_access": 42 }"#)
			.expect("Unrecognized trusted access shape should be tolerated.");

		assert!(!odd.trusted_extension_auth_access.is_trusted("github", "42"));
	}

	#[test]
	fn invalid_fields_report_their_path() {
		let err = BrokerConfig::from_json_str(r#"{ "provider_registration_timeout_ms": "soon" }"#)
			.expect_err("String timeout should be rejected.");

		assert!(matches!(
			err,
			Error::Config(ConfigError::InvalidConfig { ref path, .. })
				if path == "provider_registration_timeout_ms"
		));
	}
}
