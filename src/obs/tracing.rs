// self
use crate::{_prelude::*, obs::OpLabels};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedOp<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedOp<F> = F;

/// `auth_broker.op` span for one broker operation.
#[derive(Clone, Debug)]
pub struct OpSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl OpSpan {
	/// Opens the span; unknown provider, consumer kind or server fields stay empty.
	pub fn new(labels: &OpLabels<'_>) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!(
				"auth_broker.op",
				operation = labels.operation.as_str(),
				stage = labels.stage,
				provider = labels.provider,
				consumer_kind = labels.consumer_kind.map(|k| k.as_str()),
				server = labels.server,
			);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = labels;

			Self {}
		}
	}

	/// Instruments a future without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedOp<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{consumer::ConsumerKind, obs::OperationKind};

	#[tokio::test]
	async fn session_spans_pass_output_through() {
		let labels = OpLabels::new(OperationKind::SessionResolution, "get_session")
			.provider("github")
			.consumer_kind(ConsumerKind::McpServer);
		let value = OpSpan::new(&labels).instrument(async { 42 }).await;

		assert_eq!(value, 42);
	}
}
