//! Optional observability helpers for proxy flows.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `tracker_proxy.flow` with the `flow`
//!   and `stage` (call site) fields.
//! - Enable `metrics` to increment the `tracker_proxy_flow_total` counter for every
//!   attempt/success/failure, labeled by `flow` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Operations observed by the proxy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Authorization redirect, callback, and code exchange.
	Authorize,
	/// Refresh token flow.
	Refresh,
	/// Tenant discovery through the accessible-resources endpoint.
	Resources,
	/// Authenticated tracker REST call.
	ApiCall,
	/// Paginated search aggregation.
	Search,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Authorize => "authorize",
			FlowKind::Refresh => "refresh",
			FlowKind::Resources => "resources",
			FlowKind::ApiCall => "api_call",
			FlowKind::Search => "search",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a proxy operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Runs `fut` inside a [`FlowSpan`] and records attempt plus success/failure outcomes.
pub(crate) async fn observe<T, F>(kind: FlowKind, stage: &'static str, fut: F) -> Result<T>
where
	F: Future<Output = Result<T>>,
{
	let span = FlowSpan::new(kind, stage);

	record_flow_outcome(kind, FlowOutcome::Attempt);

	let result = span.instrument(fut).await;

	let outcome = match &result {
		Ok(_) => FlowOutcome::Success,
		Err(_err) => {
			obs_event!(debug, flow = kind.as_str(), stage, error = %_err, "Flow failed.");

			FlowOutcome::Failure
		},
	};

	span.record_outcome(outcome);
	record_flow_outcome(kind, outcome);

	result
}
