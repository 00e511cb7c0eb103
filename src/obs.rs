//! Optional observability helpers for broker operations.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `auth_broker.op` carrying the
//!   `operation`, `stage`, `provider`, `consumer_kind` and `server` fields, plus warnings for
//!   recoverable anomalies.
//! - Enable `metrics` to increment the `auth_broker_op_total` counter for every
//!   attempt/success/failure, labeled by `operation`, `provider`, `consumer_kind` and
//!   `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::{_prelude::*, consumer::ConsumerKind};

/// Emits a `tracing` warning when the feature is enabled; expands to nothing otherwise.
macro_rules! warn_event {
	($($arg:tt)*) => {
		#[cfg(feature = "tracing")]
		{
			::tracing::warn!($($arg)*);
		}
	};
}
pub(crate) use warn_event;

/// Emits a `tracing` debug event when the feature is enabled; expands to nothing otherwise.
macro_rules! debug_event {
	($($arg:tt)*) => {
		#[cfg(feature = "tracing")]
		{
			::tracing::debug!($($arg)*);
		}
	};
}
pub(crate) use debug_event;

/// Broker operations observed by spans and counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
	/// Protected-resource or authorization-server metadata discovery.
	Discovery,
	/// Dynamic client registration.
	Registration,
	/// Authorization code exchange.
	TokenExchange,
	/// Refresh token grant.
	TokenRefresh,
	/// Consumer-facing session resolution.
	SessionResolution,
	/// Waiting for a provider to register.
	ProviderActivation,
}
impl OperationKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OperationKind::Discovery => "discovery",
			OperationKind::Registration => "registration",
			OperationKind::TokenExchange => "token_exchange",
			OperationKind::TokenRefresh => "token_refresh",
			OperationKind::SessionResolution => "session_resolution",
			OperationKind::ProviderActivation => "provider_activation",
		}
	}
}
impl Display for OperationKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Entry to a broker operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Labels describing one observed broker operation.
///
/// `provider` and `consumer_kind` are filled wherever the caller knows them; `server` is the
/// host a network operation talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpLabels<'a> {
	/// Operation being observed.
	pub operation: OperationKind,
	/// Call site within the operation.
	pub stage: &'static str,
	/// Provider the operation serves.
	pub provider: Option<&'a str>,
	/// Kind of consumer the operation runs for.
	pub consumer_kind: Option<ConsumerKind>,
	/// Remote host contacted.
	pub server: Option<&'a str>,
}
impl<'a> OpLabels<'a> {
	/// Labels with only the operation and stage set.
	pub const fn new(operation: OperationKind, stage: &'static str) -> Self {
		Self { operation, stage, provider: None, consumer_kind: None, server: None }
	}

	/// Sets the provider label.
	pub fn provider(mut self, provider: &'a str) -> Self {
		self.provider = Some(provider);

		self
	}

	/// Sets the consumer kind label.
	pub fn consumer_kind(mut self, kind: ConsumerKind) -> Self {
		self.consumer_kind = Some(kind);

		self
	}

	/// Sets the remote host label.
	pub fn server(mut self, server: Option<&'a str>) -> Self {
		self.server = server;

		self
	}
}

/// Runs `fut` inside an [`OpSpan`] and records attempt plus success/failure counters.
pub(crate) async fn observe<T, F>(labels: OpLabels<'_>, fut: F) -> Result<T>
where
	F: Future<Output = Result<T>>,
{
	let span = OpSpan::new(&labels);

	record_op_outcome(&labels, OpOutcome::Attempt);

	let result = span.instrument(fut).await;

	record_op_outcome(&labels, if result.is_ok() { OpOutcome::Success } else { OpOutcome::Failure });

	result
}
