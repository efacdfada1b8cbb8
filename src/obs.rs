//! Optional observability helpers for client calls.
//!
//! # Feature Flags
//!
//! - `tracing` (default): spans named `travel_api.call` with `operation` and `stage` fields, plus
//!   `debug`/`warn` events for responses, retries, refreshes, throttling, and storage failures.
//! - `metrics`: increments the `travel_api_call_total` counter for every attempt/success/failure,
//!   labeled by `operation` + `outcome`.
//!
//! With both features disabled every helper compiles to a no-op.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Operations observed by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallKind {
	/// Outbound API request through the pipeline.
	Request,
	/// Access-token refresh.
	Refresh,
	/// Rate limiter admission.
	RateLimit,
	/// Cache lookup.
	Cache,
}
impl CallKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CallKind::Request => "request",
			CallKind::Refresh => "refresh",
			CallKind::RateLimit => "rate_limit",
			CallKind::Cache => "cache",
		}
	}
}
impl Display for CallKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallOutcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion (cache hit for [`CallKind::Cache`]).
	Success,
	/// Failure propagated back to the caller (cache miss for [`CallKind::Cache`]).
	Failure,
}
impl CallOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CallOutcome::Attempt => "attempt",
			CallOutcome::Success => "success",
			CallOutcome::Failure => "failure",
		}
	}
}
impl Display for CallOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
