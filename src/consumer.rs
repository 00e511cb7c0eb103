//! Consumers: the two parallel kinds of token requesters.

// self
use crate::{_prelude::*, auth::ConsumerId};

/// Kind of consumer asking for sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsumerKind {
	/// Editor extension; ids compare case-insensitively.
	Extension,
	/// MCP server; ids compare verbatim.
	McpServer,
}
impl ConsumerKind {
	/// Both kinds, in display order.
	pub const ALL: [ConsumerKind; 2] = [ConsumerKind::Extension, ConsumerKind::McpServer];

	/// Returns a stable label.
	pub const fn as_str(self) -> &'static str {
		match self {
			ConsumerKind::Extension => "extension",
			ConsumerKind::McpServer => "mcpServer",
		}
	}

	/// Storage key form of a consumer id.
	pub fn normalize_id(self, id: &str) -> String {
		match self {
			ConsumerKind::Extension => id.to_ascii_lowercase(),
			ConsumerKind::McpServer => id.to_owned(),
		}
	}
}
impl Display for ConsumerKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// A concrete consumer: kind, id, and display name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Consumer {
	/// Consumer kind.
	pub kind: ConsumerKind,
	/// Consumer identifier.
	pub id: ConsumerId,
	/// Human-readable name shown in prompts.
	pub name: String,
}
impl Consumer {
	/// Builds an extension consumer.
	pub fn extension(id: ConsumerId, name: impl Into<String>) -> Self {
		Self { kind: ConsumerKind::Extension, id, name: name.into() }
	}

	/// Builds an MCP server consumer.
	pub fn mcp_server(id: ConsumerId, name: impl Into<String>) -> Self {
		Self { kind: ConsumerKind::McpServer, id, name: name.into() }
	}

	/// Storage key form of the id.
	pub fn key(&self) -> String {
		self.kind.normalize_id(&self.id)
	}
}
