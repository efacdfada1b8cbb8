// self
use crate::{
	_prelude::*,
	http::RequestDescriptor,
	obs::CallKind,
	store::StoreError,
};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedCall<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedCall<F> = F;

/// A span builder used around client operations.
#[derive(Clone, Debug)]
pub struct CallSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl CallSpan {
	/// Creates a new span tagged with the provided operation kind + stage.
	pub fn new(kind: CallKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("travel_api.call", operation = kind.as_str(), stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedCall<Fut>
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

/// Logs a completed response together with its latency.
pub fn log_response(request: &RequestDescriptor, status: u16, latency: Duration) {
	#[cfg(feature = "tracing")]
	{
		tracing::debug!(
			method = request.method.as_str(),
			path = %request.path,
			request_id = %request.request_id,
			status,
			latency_ms = latency.as_millis() as u64,
			"API response received."
		);
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (request, status, latency);
	}
}

/// Logs a failed call after classification.
pub fn log_request_failure(request: &RequestDescriptor, error: &Error, latency: Duration) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(
			method = request.method.as_str(),
			path = %request.path,
			request_id = %request.request_id,
			code = %error.code(),
			latency_ms = latency.as_millis() as u64,
			"API request failed: {}",
			error.message()
		);
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (request, error, latency);
	}
}

/// Logs a scheduled retry.
pub fn log_retry(next_attempt: u32, max_attempts: u32, delay: Duration, error: &dyn Display) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(
			next_attempt,
			max_attempts,
			delay_ms = delay.as_millis() as u64,
			"Attempt failed: {error}. Retrying."
		);
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (next_attempt, max_attempts, delay, error);
	}
}

/// Logs a refresh failure; the session is cleared right after.
pub fn log_refresh_failure(error: &Error) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(code = %error.code(), "Token refresh failed: {}", error.message());
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = error;
	}
}

/// Logs that the session ended and logout listeners are being notified.
pub fn log_logout(listeners: usize) {
	#[cfg(feature = "tracing")]
	{
		tracing::info!(listeners, "Session ended; notifying logout listeners.");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = listeners;
	}
}

/// Logs a drain-loop wait for the next token.
pub fn log_throttled(wait: Duration, queued: usize) {
	#[cfg(feature = "tracing")]
	{
		tracing::debug!(
			wait_ms = wait.as_millis() as u64,
			queued,
			"Rate limiter waiting for a token."
		);
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (wait, queued);
	}
}

/// Logs a rejected admission.
pub fn log_queue_full(bound: usize) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(bound, "Rate limiter queue is full; rejecting call.");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = bound;
	}
}

/// Logs a best-effort storage failure that was swallowed.
pub fn log_storage_failure(operation: &'static str, key: &str, error: &StoreError) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(operation, key, "Storage operation failed: {error}");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (operation, key, error);
	}
}

/// Logs a cache lookup.
pub fn log_cache_lookup(key: &str, hit: bool) {
	#[cfg(feature = "tracing")]
	{
		tracing::debug!(key, hit, "Cache lookup.");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (key, hit);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[cfg(feature = "tracing")]
	#[tokio::test]
	async fn instrument_wraps_future() {
		let span = CallSpan::new(CallKind::Refresh, "instrument_wraps_future");
		let value = span.instrument(async { 42 }).await;

		assert_eq!(value, 42);
	}

	#[test]
	fn storage_failure_logging_accepts_any_backend_error() {
		log_storage_failure("set", "auth_token", &StoreError::Backend {
			message: "read-only".into(),
		});
		log_cache_lookup("api_cache:GET:/stays:", false);
	}
}
