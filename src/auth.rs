//! Auth-domain identifiers, scope lists, token sets, and session models.

pub mod id;
pub mod scope;
pub mod session;
pub mod token;

pub use id::*;
pub use scope::*;
pub use session::*;
pub use token::*;
