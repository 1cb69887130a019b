//! Structured configuration for the gatekeeper core.
//!
//! Only the knobs the core actually reads are exposed: token safety margins and
//! lock budgets, the sliding-window geometry, and the retry schedule. Defaults
//! match a 200-requests-per-minute API with a 30-second expiry margin.

// self
use crate::{_prelude::*, error::ConfigError};

/// Top-level configuration consumed by [`Dispatcher`](crate::dispatch::Dispatcher).
#[derive(Clone, Debug, Default)]
pub struct GatekeeperConfig {
	/// Token lifecycle and refresh-lock settings.
	pub auth: AuthConfig,
	/// Sliding-window rate limiter settings.
	pub rate: RateConfig,
	/// Retry and backoff settings.
	pub retry: RetryConfig,
}
impl GatekeeperConfig {
	/// Validates every section, failing on the first rejected value.
	pub fn validate(&self) -> Result<(), ConfigError> {
		self.auth.validate()?;
		self.rate.validate()?;
		self.retry.validate()
	}
}

/// Token lifecycle settings consumed by [`TokenManager`](crate::manager::TokenManager).
#[derive(Clone, Debug)]
pub struct AuthConfig {
	/// Remaining lifetime below which a token is refreshed instead of served.
	pub safety_margin: Duration,
	/// Key under which the refresh lock is acquired.
	pub lock_key: String,
	/// TTL stamped onto the refresh lock; the backstop if a holder dies mid-refresh.
	pub lock_ttl: Duration,
	/// How long a caller keeps trying to win the refresh lock.
	pub lock_wait: Duration,
	/// How long a losing caller polls for a token refreshed by the lock holder.
	pub refresh_wait: Duration,
	/// Pause between lock attempts and store polls while waiting.
	pub poll_interval: Duration,
	/// Cache key for the fast token entry.
	pub cache_key: String,
}
impl AuthConfig {
	/// Overrides the expiry safety margin.
	pub fn with_safety_margin(mut self, margin: Duration) -> Self {
		self.safety_margin = margin;

		self
	}

	/// Overrides the lock TTL and wait budget together.
	pub fn with_lock_budget(mut self, ttl: Duration, wait: Duration) -> Self {
		self.lock_ttl = ttl;
		self.lock_wait = wait;

		self
	}

	/// Overrides the waiter poll interval.
	pub fn with_poll_interval(mut self, interval: Duration) -> Self {
		self.poll_interval = interval;

		self
	}

	/// Overrides the secondary wait for a token refreshed by another holder.
	pub fn with_refresh_wait(mut self, wait: Duration) -> Self {
		self.refresh_wait = wait;

		self
	}

	fn validate(&self) -> Result<(), ConfigError> {
		// A waiter that outlives the lock TTL could observe a lock the backend
		// already reclaimed, so the wait budget must fit inside the TTL.
		if self.lock_wait > self.lock_ttl {
			return Err(ConfigError::LockWaitExceedsTtl {
				wait: self.lock_wait,
				ttl: self.lock_ttl,
			});
		}

		Ok(())
	}
}
impl Default for AuthConfig {
	fn default() -> Self {
		Self {
			safety_margin: Duration::seconds(30),
			lock_key: "oauth-refresh".into(),
			lock_ttl: Duration::seconds(10),
			lock_wait: Duration::seconds(5),
			refresh_wait: Duration::seconds(5),
			poll_interval: Duration::milliseconds(250),
			cache_key: "gatekeeper.token".into(),
		}
	}
}

/// Sliding-window settings consumed by [`SlidingWindowLimiter`](crate::limiter::SlidingWindowLimiter).
#[derive(Clone, Debug)]
pub struct RateConfig {
	/// Trailing window length.
	pub window: Duration,
	/// Request ceiling per window.
	pub limit: u32,
	/// Usage fraction at which smooth throttling begins.
	pub throttle_threshold: f64,
	/// Delay applied at 100% usage; interpolated from zero at the threshold.
	pub max_throttle_delay: Duration,
	/// Largest single delay the dispatcher will sleep instead of failing.
	pub max_rate_delay: Duration,
}
impl RateConfig {
	/// Overrides the window geometry.
	pub fn with_window(mut self, window: Duration, limit: u32) -> Self {
		self.window = window;
		self.limit = limit;

		self
	}

	/// Overrides the throttle threshold fraction.
	pub fn with_throttle_threshold(mut self, threshold: f64) -> Self {
		self.throttle_threshold = threshold;

		self
	}

	/// Overrides the maximum smooth-throttle delay.
	pub fn with_max_throttle_delay(mut self, delay: Duration) -> Self {
		self.max_throttle_delay = delay;

		self
	}

	/// Overrides the largest delay the dispatcher tolerates before failing.
	pub fn with_max_rate_delay(mut self, delay: Duration) -> Self {
		self.max_rate_delay = delay;

		self
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if !(0.0..=1.0).contains(&self.throttle_threshold) {
			return Err(ConfigError::ThresholdOutOfRange { value: self.throttle_threshold });
		}
		if self.limit == 0 || !self.window.is_positive() {
			return Err(ConfigError::EmptyRateWindow);
		}

		Ok(())
	}
}
impl Default for RateConfig {
	fn default() -> Self {
		Self {
			window: Duration::seconds(60),
			limit: 200,
			throttle_threshold: 0.7,
			max_throttle_delay: Duration::seconds(2),
			max_rate_delay: Duration::seconds(15),
		}
	}
}

/// Retry schedule consumed by the dispatcher's backoff policy.
#[derive(Clone, Debug)]
pub struct RetryConfig {
	/// Retries permitted per logical call before the failure surfaces.
	pub max_retries: u32,
	/// First backoff delay; doubled on every retry.
	pub backoff_base: Duration,
	/// Ceiling applied to the exponential schedule.
	pub max_backoff: Duration,
}
impl RetryConfig {
	/// Overrides the retry budget.
	pub fn with_max_retries(mut self, retries: u32) -> Self {
		self.max_retries = retries;

		self
	}

	/// Overrides the backoff schedule.
	pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
		self.backoff_base = base;
		self.max_backoff = max;

		self
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if !self.backoff_base.is_positive() {
			return Err(ConfigError::NonPositiveBackoff);
		}

		Ok(())
	}
}
impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_retries: 3,
			backoff_base: Duration::milliseconds(500),
			max_backoff: Duration::seconds(30),
		}
	}
}
