//! Consumer-facing session resolution.
//!
//! One [`SessionOrchestrator`] exists per consumer kind. Each resolution runs its steps in
//! sequence: list sessions, apply preference and access policy, prompt when allowed, then record
//! access, preference, and usage.

pub mod interaction;
pub mod options;
pub mod orchestrator;
pub mod pending;
pub mod singler;

pub use interaction::*;
pub use options::*;
pub use orchestrator::*;
pub use pending::*;
pub use singler::*;
