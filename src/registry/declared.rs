//! Providers declared ahead of registration.

// self
use crate::{_prelude::*, auth::ProviderId};

/// Metadata for a provider that may register later, once activated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredProvider {
	/// Provider identifier.
	pub id: String,
	/// Display label.
	pub label: String,
	/// Authorization server globs the provider is expected to serve.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub authorization_server_globs: Vec<String>,
}
impl DeclaredProvider {
	/// Builds a declaration without server globs.
	pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
		Self { id: id.into(), label: label.into(), authorization_server_globs: Vec::new() }
	}

	/// Adds an authorization server glob.
	pub fn with_authorization_server_glob(mut self, glob: impl Into<String>) -> Self {
		self.authorization_server_globs.push(glob.into());

		self
	}

	/// Checks the declaration and returns its typed id.
	pub fn validate(&self) -> Result<ProviderId> {
		if self.id.trim().is_empty() {
			return Err(Error::InvalidDeclaration {
				reason: "property `id` is missing or empty".into(),
			});
		}
		if self.label.trim().is_empty() {
			return Err(Error::InvalidDeclaration {
				reason: format!("property `label` of provider `{}` is missing or empty", self.id),
			});
		}

		ProviderId::new(&self.id).map_err(|e| Error::InvalidDeclaration { reason: e.to_string() })
	}

	/// Returns `true` when any glob matches `issuer`.
	pub fn matches_issuer(&self, issuer: &Url) -> bool {
		let issuer = issuer.as_str();
		let trimmed = issuer.strip_suffix('/').unwrap_or(issuer);

		self.authorization_server_globs.iter().any(|glob| {
			glob_match::glob_match(glob, issuer) || glob_match::glob_match(glob, trimmed)
		})
	}
}

/// Activation event fired for a provider that is not registered yet.
pub fn activation_event(provider_id: &str) -> String {
	format!("onAuthenticationRequest:{provider_id}")
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn empty_ids_and_labels_are_rejected() {
		assert!(matches!(
			DeclaredProvider::new("", "GitHub").validate(),
			Err(Error::InvalidDeclaration { .. })
		));
		assert!(matches!(
			DeclaredProvider::new("github", " ").validate(),
			Err(Error::InvalidDeclaration { .. })
		));
		assert!(DeclaredProvider::new("github", "GitHub").validate().is_ok());
	}

	#[test]
	fn globs_match_issuers_with_or_without_trailing_slash() {
		let declared = DeclaredProvider::new("entra", "Entra")
			.with_authorization_server_glob("https://login.microsoftonline.com/*");
		let issuer =
			Url::parse("https://login.microsoftonline.com/tenant").expect("Issuer should parse.");

		assert!(declared.matches_issuer(&issuer));
		assert!(!declared.matches_issuer(
			&Url::parse("https://login.example.com/tenant").expect("Issuer should parse.")
		));
		assert_eq!(activation_event("github"), "onAuthenticationRequest:github");
	}
}
