//! Token-bucket admission control with a bounded, optionally prioritized queue.
//!
//! A call that finds an empty queue and a whole token is dispatched immediately. Otherwise it
//! joins the queue (or is rejected with [`ErrorCode::QueueFull`] when the queue is at its bound)
//! and a single drain task per limiter releases queued calls as tokens refill. Tokens arrive in
//! whole `refill_amount` batches once per elapsed `refill_interval`. The drain task exits once the
//! queue is empty and the next queued call starts a new one.
//!
//! Admitted operations run on their own Tokio task, so a caller that stops awaiting does not
//! cancel its operation and a slow operation never delays the next admission.

// std
use std::{
	cmp::{Ordering, Reverse},
	collections::BinaryHeap,
};
// crates.io
use tokio::{sync::oneshot, time::Instant};
// self
use crate::{
	_prelude::*,
	config::duration_ms,
	error::ConfigError,
	obs::{self, CallKind, CallOutcome},
};

type Job = Box<dyn FnOnce() + Send>;

/// Token-bucket parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
	/// Maximum (and initial) number of tokens.
	pub capacity: u32,
	/// Tokens added per `refill_interval`.
	pub refill_amount: u32,
	/// Interval after which another `refill_amount` tokens are added.
	#[serde(with = "duration_ms")]
	pub refill_interval: Duration,
	/// Upper bound on calls waiting for a token.
	#[serde(default = "default_max_queue_size")]
	pub max_queue_size: usize,
	/// Releases waiting calls by descending priority instead of arrival order.
	#[serde(default)]
	pub prioritized: bool,
}
impl RateLimitConfig {
	/// Default bound for the waiting queue.
	pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;

	/// Creates a FIFO configuration with the default queue bound.
	pub fn new(capacity: u32, refill_amount: u32, refill_interval: Duration) -> Self {
		Self {
			capacity,
			refill_amount,
			refill_interval,
			max_queue_size: Self::DEFAULT_MAX_QUEUE_SIZE,
			prioritized: false,
		}
	}

	/// Overrides the queue bound.
	pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
		self.max_queue_size = max_queue_size;

		self
	}

	/// Enables priority ordering of waiting calls.
	pub fn with_priority(mut self) -> Self {
		self.prioritized = true;

		self
	}

	/// Rejects zero-valued parameters.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.capacity == 0 {
			return Err(ConfigError::InvalidRateLimit { field: "capacity" });
		}
		if self.refill_amount == 0 {
			return Err(ConfigError::InvalidRateLimit { field: "refill_amount" });
		}
		if self.refill_interval.is_zero() {
			return Err(ConfigError::InvalidRateLimit { field: "refill_interval" });
		}
		if self.max_queue_size == 0 {
			return Err(ConfigError::InvalidRateLimit { field: "max_queue_size" });
		}

		Ok(())
	}
}

/// Shared token-bucket limiter; clones share one bucket and one queue.
#[derive(Clone)]
pub struct RateLimiter {
	shared: Arc<LimiterShared>,
}
impl RateLimiter {
	/// Creates a limiter with a full bucket.
	pub fn new(config: RateLimitConfig) -> Result<Self, ConfigError> {
		config.validate()?;

		let state = BucketState {
			tokens: f64::from(config.capacity),
			last_refill: Instant::now(),
			queue: BinaryHeap::new(),
			next_seq: 0,
			draining: false,
		};

		Ok(Self { shared: Arc::new(LimiterShared { config, state: Mutex::new(state) }) })
	}

	/// Limiter settings.
	pub fn config(&self) -> &RateLimitConfig {
		&self.shared.config
	}

	/// Tokens currently available after applying elapsed refill.
	pub fn available_tokens(&self) -> f64 {
		let mut state = self.shared.state.lock();

		state.refill(&self.shared.config, Instant::now());

		state.tokens
	}

	/// Number of calls waiting for a token.
	pub fn queue_len(&self) -> usize {
		self.shared.state.lock().queue.len()
	}

	/// Admits `operation` now or queues it.
	///
	/// Admission is decided when this method is called, not when the returned future is first
	/// polled: a full queue fails the returned future with [`ErrorCode::QueueFull`] without
	/// waiting. `priority` only matters when the limiter is prioritized; higher values go first
	/// and equal priorities keep arrival order.
	pub fn execute<F, Fut, T>(
		&self,
		priority: i32,
		operation: F,
	) -> impl Future<Output = Result<T>> + Send + 'static
	where
		F: 'static + Send + FnOnce() -> Fut,
		Fut: 'static + Send + Future<Output = Result<T>>,
		T: 'static + Send,
	{
		let (tx, rx) = oneshot::channel();
		let job: Job = Box::new(move || {
			tokio::spawn(async move {
				let _ = tx.send(operation().await);
			});
		});
		let admitted = self.admit(priority, job);

		async move {
			admitted?;

			rx.await.map_err(|_| {
				Error::new(ErrorCode::Request, "Rate-limited operation ended without a result.")
			})?
		}
	}

	fn admit(&self, priority: i32, job: Job) -> Result<()> {
		let config = &self.shared.config;
		let mut state = self.shared.state.lock();

		obs::record_call_outcome(CallKind::RateLimit, CallOutcome::Attempt);
		state.refill(config, Instant::now());

		if state.queue.is_empty() && state.tokens >= 1.0 {
			state.tokens -= 1.0;
			drop(state);
			obs::record_call_outcome(CallKind::RateLimit, CallOutcome::Success);
			job();

			return Ok(());
		}
		if state.queue.len() >= config.max_queue_size {
			obs::log_queue_full(config.max_queue_size);
			obs::record_call_outcome(CallKind::RateLimit, CallOutcome::Failure);

			return Err(Error::new(
				ErrorCode::QueueFull,
				format!("Rate limiter queue is full ({} waiting).", config.max_queue_size),
			));
		}

		let seq = state.next_seq;

		state.next_seq += 1;
		state.queue.push(Pending {
			priority: if config.prioritized { priority } else { 0 },
			seq,
			job,
		});

		if !state.draining {
			state.draining = true;

			tokio::spawn(drain(self.shared.clone()));
		}

		Ok(())
	}
}
impl Debug for RateLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let state = self.shared.state.lock();

		f.debug_struct("RateLimiter")
			.field("config", &self.shared.config)
			.field("tokens", &state.tokens)
			.field("queued", &state.queue.len())
			.field("draining", &state.draining)
			.finish()
	}
}

struct LimiterShared {
	config: RateLimitConfig,
	state: Mutex<BucketState>,
}

struct BucketState {
	tokens: f64,
	last_refill: Instant,
	queue: BinaryHeap<Pending>,
	next_seq: u64,
	draining: bool,
}
impl BucketState {
	/// Credits one `refill_amount` per whole interval elapsed; partial intervals carry over.
	fn refill(&mut self, config: &RateLimitConfig, now: Instant) {
		let elapsed = now.saturating_duration_since(self.last_refill);
		let intervals = elapsed.as_nanos() / config.refill_interval.as_nanos();

		if intervals == 0 {
			return;
		}

		let capacity = f64::from(config.capacity);
		let added = intervals as f64 * f64::from(config.refill_amount);

		self.tokens = (self.tokens + added).min(capacity);

		// A full bucket banks no credit for the time it spent full.
		match u32::try_from(intervals).ok().and_then(|n| config.refill_interval.checked_mul(n)) {
			Some(step) if self.tokens < capacity => self.last_refill += step,
			_ => self.last_refill = now,
		}
	}

	/// Time until the next refill batch lands.
	fn wait_for_token(&self, config: &RateLimitConfig, now: Instant) -> Duration {
		let elapsed = now.saturating_duration_since(self.last_refill);

		config.refill_interval.saturating_sub(elapsed).max(Duration::from_millis(1))
	}
}

struct Pending {
	priority: i32,
	seq: u64,
	job: Job,
}
impl Pending {
	fn rank(&self) -> (i32, Reverse<u64>) {
		(self.priority, Reverse(self.seq))
	}
}
impl PartialEq for Pending {
	fn eq(&self, other: &Self) -> bool {
		self.rank() == other.rank()
	}
}
impl Eq for Pending {}
impl PartialOrd for Pending {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
impl Ord for Pending {
	fn cmp(&self, other: &Self) -> Ordering {
		self.rank().cmp(&other.rank())
	}
}

enum DrainStep {
	Run(Job),
	Wait(Duration, usize),
	Idle,
}

async fn drain(shared: Arc<LimiterShared>) {
	loop {
		let step = {
			let mut state = shared.state.lock();

			let now = Instant::now();

			state.refill(&shared.config, now);

			if state.queue.is_empty() {
				state.draining = false;

				DrainStep::Idle
			} else if state.tokens >= 1.0 {
				state.tokens -= 1.0;

				match state.queue.pop() {
					Some(pending) => DrainStep::Run(pending.job),
					None => DrainStep::Idle,
				}
			} else {
				DrainStep::Wait(state.wait_for_token(&shared.config, now), state.queue.len())
			}
		};

		match step {
			DrainStep::Run(job) => {
				obs::record_call_outcome(CallKind::RateLimit, CallOutcome::Success);
				job();
			},
			DrainStep::Wait(wait, queued) => {
				obs::log_throttled(wait, queued);
				tokio::time::sleep(wait).await;
			},
			DrainStep::Idle => return,
		}
	}
}

fn default_max_queue_size() -> usize {
	RateLimitConfig::DEFAULT_MAX_QUEUE_SIZE
}
