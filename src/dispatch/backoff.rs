//! Exponential backoff schedule with jitter for retryable dispatch failures.

// crates.io
use rand::Rng;
// self
use crate::{_prelude::*, config::RetryConfig};

/// Exponential backoff doubling per retry, jittered to avoid synchronized
/// retry storms, capped at the configured maximum.
#[derive(Clone, Debug)]
pub(crate) struct Backoff {
	base: Duration,
	max: Duration,
}
impl Backoff {
	// Past this the doubling has long hit the cap; keeps the shift in range.
	const MAX_EXPONENT: u32 = 16;

	pub fn new(config: &RetryConfig) -> Self {
		Self { base: config.backoff_base, max: config.max_backoff }
	}

	/// Delay before retry number `retry` (zero-based), drawn from
	/// `[full/2, full]` where `full = base * 2^retry`, capped at the maximum.
	pub fn delay_for(&self, retry: u32) -> Duration {
		let exponent = retry.min(Self::MAX_EXPONENT);
		let full = (self.base.as_seconds_f64() * 2_f64.powi(exponent as i32))
			.min(self.max.as_seconds_f64());
		let jitter = rand::rng().random_range(0.5..=1.0);

		Duration::seconds_f64(full * jitter)
	}
}
