//! Bounded, classified retry with exponential backoff.

// crates.io
use rand::Rng;
// self
use crate::{_prelude::*, config::duration_ms, obs};

/// Backoff schedule applied by [`execute_with_retry`].
///
/// The delay before attempt `k` (`k >= 2`) is `base_delay * 2^(k-2)`, capped at `max_delay` when
/// set. With `jitter` enabled the delay is drawn uniformly from `[0, computed]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
	/// Total attempts including the first one.
	pub max_attempts: u32,
	/// Delay before the second attempt.
	#[serde(with = "duration_ms")]
	pub base_delay: Duration,
	/// Upper bound for any single delay.
	#[serde(with = "duration_ms::option")]
	pub max_delay: Option<Duration>,
	/// Randomizes each delay within `[0, computed]`.
	pub jitter: bool,
}
impl RetryPolicy {
	/// Creates a policy with the provided attempt budget and base delay.
	pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
		Self { max_attempts, base_delay, max_delay: None, jitter: false }
	}

	/// Policy performing exactly one attempt.
	pub fn disabled() -> Self {
		Self::new(1, Duration::ZERO)
	}

	/// Caps every delay at `max_delay`.
	pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
		self.max_delay = Some(max_delay);

		self
	}

	/// Enables full jitter.
	pub fn with_jitter(mut self) -> Self {
		self.jitter = true;

		self
	}

	/// Delay scheduled before `attempt` (1-based); zero for the first attempt.
	pub fn delay_for(&self, attempt: u32) -> Duration {
		if attempt < 2 {
			return Duration::ZERO;
		}

		let factor = 2_u32.checked_pow(attempt - 2).unwrap_or(u32::MAX);
		let mut delay = self.base_delay.checked_mul(factor).unwrap_or(Duration::MAX);

		if let Some(cap) = self.max_delay {
			delay = delay.min(cap);
		}
		if self.jitter && !delay.is_zero() {
			delay = rand::rng().random_range(Duration::ZERO..=delay);
		}

		delay
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self::new(3, Duration::from_millis(1_000))
	}
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or the attempt budget
/// is spent.
///
/// The error of the final attempt is returned unchanged.
pub async fn execute_with_retry<F, Fut, T>(mut operation: F, policy: &RetryPolicy) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let max_attempts = policy.max_attempts.max(1);
	let mut attempt = 1;

	loop {
		let error = match operation().await {
			Ok(value) => return Ok(value),
			Err(e) => e,
		};

		if attempt >= max_attempts || !error.is_retryable() {
			return Err(error);
		}

		attempt += 1;

		let delay = policy.delay_for(attempt);

		obs::log_retry(attempt, max_attempts, delay, &error);
		tokio::time::sleep(delay).await;
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicU32, Ordering};
	// self
	use super::*;

	#[test]
	fn delays_double_from_the_second_attempt() {
		let policy = RetryPolicy::new(5, Duration::from_millis(100));

		assert_eq!(policy.delay_for(1), Duration::ZERO);
		assert_eq!(policy.delay_for(2), Duration::from_millis(100));
		assert_eq!(policy.delay_for(3), Duration::from_millis(200));
		assert_eq!(policy.delay_for(4), Duration::from_millis(400));
		assert_eq!(
			policy.with_max_delay(Duration::from_millis(250)).delay_for(4),
			Duration::from_millis(250)
		);
	}

	#[test]
	fn jitter_stays_within_the_computed_delay() {
		let policy = RetryPolicy::new(4, Duration::from_millis(100)).with_jitter();

		for _ in 0..64 {
			assert!(policy.delay_for(3) <= Duration::from_millis(200));
		}
	}

	#[tokio::test(start_paused = true)]
	async fn transient_failures_are_retried_with_backoff() {
		let calls = AtomicU32::new(0);
		let policy = RetryPolicy::new(3, Duration::from_millis(100));
		let started = tokio::time::Instant::now();
		let value = execute_with_retry(
			|| async {
				match calls.fetch_add(1, Ordering::SeqCst) {
					0 | 1 => Err(Error::new(ErrorCode::Http(503), "unavailable")),
					_ => Ok("booked"),
				}
			},
			&policy,
		)
		.await
		.expect("Third attempt should succeed.");

		assert_eq!(value, "booked");
		assert_eq!(calls.load(Ordering::SeqCst), 3);
		assert!(started.elapsed() >= Duration::from_millis(300));
	}

	#[tokio::test(start_paused = true)]
	async fn client_errors_are_not_retried() {
		let calls = AtomicU32::new(0);
		let err = execute_with_retry(
			|| async {
				calls.fetch_add(1, Ordering::SeqCst);

				Err::<(), _>(Error::new(ErrorCode::Http(404), "missing"))
			},
			&RetryPolicy::new(3, Duration::from_millis(100)),
		)
		.await
		.expect_err("404 should surface.");

		assert_eq!(err.code(), ErrorCode::Http(404));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn exhausted_budget_returns_the_last_error() {
		let calls = AtomicU32::new(0);
		let err = execute_with_retry(
			|| async {
				let n = calls.fetch_add(1, Ordering::SeqCst);

				Err::<(), _>(Error::new(ErrorCode::Network, format!("reset {n}")))
			},
			&RetryPolicy::new(2, Duration::from_millis(10)),
		)
		.await
		.expect_err("Budget should run out.");

		assert_eq!(err.message(), "reset 1");
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}
}
