// self
use crate::obs::{OpLabels, OpOutcome};

/// Label value used when a provider or consumer kind is not known at the call site.
pub const UNLABELED: &str = "none";

/// Increments `auth_broker_op_total` for `outcome` (when the `metrics` feature is enabled).
pub fn record_op_outcome(labels: &OpLabels<'_>, outcome: OpOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"auth_broker_op_total",
			"operation" => labels.operation.as_str(),
			"provider" => labels.provider.unwrap_or(UNLABELED).to_owned(),
			"consumer_kind" => labels.consumer_kind.map_or(UNLABELED, |k| k.as_str()),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (labels, outcome);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::obs::OperationKind;

	#[test]
	fn outcomes_record_without_a_recorder() {
		let labels = OpLabels::new(OperationKind::ProviderActivation, "ensure_provider").provider("github");

		record_op_outcome(&labels, OpOutcome::Attempt);
		record_op_outcome(&labels, OpOutcome::Failure);
	}
}
