//! OAuth 2.0 / OpenID Connect protocol toolkit.
//!
//! Everything here is stateless: metadata validation, challenge parsing, JWT claim decoding,
//! well-known discovery, dynamic client registration, PKCE, and token endpoint calls. The
//! registry and dynamic providers compose these pieces; nothing in this module knows about
//! consumers or stores.

pub mod challenge;
pub mod discovery;
pub mod exchange;
pub mod jwt;
pub mod metadata;
pub mod pkce;
pub mod registration;

pub use challenge::*;
pub use discovery::*;
pub use exchange::*;
pub use jwt::*;
pub use metadata::*;
pub use oauth2;
pub use pkce::*;
pub use registration::*;
