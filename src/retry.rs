//! Retry policy and backoff progression for failing loaders.

// std
use std::cell::RefCell;
// crates.io
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use tokio::time;
// self
use crate::_prelude::*;

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Supported jitter strategies for retry policies.
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
	/// No jitter; deterministic backoff schedule.
	None,
	/// Full jitter; randomize delay between 0 and current backoff.
	#[default]
	Full,
	/// Decorrelated jitter per AWS architecture guidance.
	Decorrelated,
}

/// Retry configuration for a failing idempotent operation.
///
/// Stateless across calls; a [`RetryExecutor`] is created per loader
/// invocation. Every failure is treated as retryable up to the attempt cap.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Total number of attempts permitted, including the initial one.
	pub max_attempts: u32,
	/// Delay before the first retry.
	pub initial_backoff: Duration,
	/// Upper bound applied to exponential backoff growth.
	pub max_backoff: Duration,
	/// Strategy used to randomize the computed backoff.
	#[serde(default)]
	pub jitter: JitterStrategy,
}
impl RetryPolicy {
	/// Validate invariants for retry configuration.
	pub fn validate(&self) -> Result<()> {
		if self.max_attempts == 0 {
			return Err(Error::Validation {
				field: "retry_policy.max_attempts",
				reason: "Must be at least 1.".into(),
			});
		}
		if self.initial_backoff.is_zero() {
			return Err(Error::Validation {
				field: "retry_policy.initial_backoff",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_backoff < self.initial_backoff {
			return Err(Error::Validation {
				field: "retry_policy.max_backoff",
				reason: "Must be greater than or equal to initial_backoff.".into(),
			});
		}

		Ok(())
	}

	/// Compute backoff for a retry attempt using the selected jitter strategy.
	///
	/// `attempt` is 1-based: the delay slept after the n-th failed attempt.
	pub fn compute_backoff(&self, attempt: u32) -> Duration {
		let exponent = attempt.saturating_sub(1).min(32);
		let base = self.initial_backoff.mul_f64(2f64.powi(exponent as i32));
		let bounded = base.min(self.max_backoff).max(self.initial_backoff);

		self.apply_jitter(bounded, attempt)
	}

	fn apply_jitter(&self, bounded: Duration, attempt: u32) -> Duration {
		match self.jitter {
			JitterStrategy::None => bounded,
			JitterStrategy::Full => {
				let lower = bounded.mul_f64(0.8).max(self.initial_backoff);
				let upper = bounded.min(self.max_backoff);

				random_within(lower, upper)
			},
			JitterStrategy::Decorrelated => {
				let prev = if attempt <= 1 { self.initial_backoff } else { bounded };
				let ceiling = self.max_backoff.min(prev.mul_f64(3.0));

				random_within(self.initial_backoff, ceiling.max(self.initial_backoff))
			},
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 5,
			initial_backoff: Duration::from_millis(250),
			max_backoff: Duration::from_secs(10),
			jitter: JitterStrategy::Full,
		}
	}
}

/// Controls retry backoff progression and attempt bookkeeping for one load.
#[derive(Debug)]
pub struct RetryExecutor<'a> {
	policy: &'a RetryPolicy,
	attempts_used: u32,
}
impl<'a> RetryExecutor<'a> {
	/// Create a new executor respecting the supplied retry policy.
	pub fn new(policy: &'a RetryPolicy) -> Self {
		Self { policy, attempts_used: 0 }
	}

	/// Whether another attempt is permitted under the policy.
	pub fn can_retry(&self) -> bool {
		self.attempts_used < self.policy.max_attempts
	}

	/// Number of attempts that have already failed.
	pub fn attempts_used(&self) -> u32 {
		self.attempts_used
	}

	/// Record a failed attempt and compute the delay before the next one.
	///
	/// Returns `None` once the attempt cap is reached.
	pub fn next_backoff(&mut self) -> Option<Duration> {
		self.attempts_used = self.attempts_used.saturating_add(1);

		if !self.can_retry() {
			tracing::debug!(attempts = self.attempts_used, "retry budget exhausted");

			return None;
		}

		let delay = self.policy.compute_backoff(self.attempts_used);

		tracing::debug!(attempt = self.attempts_used + 1, ?delay, "retry backoff computed");

		Some(delay)
	}

	/// Sleep for the computed backoff window if retrying is permitted.
	///
	/// Returns whether another attempt may be made.
	pub async fn sleep_backoff(&mut self) -> bool {
		if let Some(delay) = self.next_backoff() {
			if !delay.is_zero() {
				time::sleep(delay).await;
			}

			true
		} else {
			false
		}
	}
}

fn random_within(min: Duration, max: Duration) -> Duration {
	if max <= min {
		return max;
	}

	SMALL_RNG.with(|cell| {
		let mut rng = cell.borrow_mut();
		let nanos = max.as_nanos() - min.as_nanos();
		let jitter = rng.random_range(0..=nanos.min(u64::MAX as u128));

		min + Duration::from_nanos(jitter as u64)
	})
}
