//! Sliding-window rate limiter with smooth throttling and server reconciliation.
//!
//! The window tracks the instants of recent requests and prunes lazily on each
//! evaluation, so stale entries never accumulate. Remaining capacity is the
//! more conservative of the local count and the last server-reported value;
//! once usage crosses the configured threshold the limiter hands out growing
//! delays instead of a cliff-edge stop, and at zero remaining it waits for the
//! window (or the server's reset instant) to free a slot.

// std
use std::collections::VecDeque;
// self
use crate::{_prelude::*, clock::Clock, config::RateConfig};

/// Result of a single [`SlidingWindowLimiter::allow`] evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
	/// The request may proceed immediately.
	Proceed,
	/// The request should wait for the provided duration before proceeding.
	Delay(Duration),
}
impl Decision {
	/// Whether the caller may proceed without waiting.
	pub fn is_proceed(&self) -> bool {
		matches!(self, Self::Proceed)
	}

	/// The wait this decision asks for; zero for [`Decision::Proceed`].
	pub fn delay(&self) -> Duration {
		match self {
			Self::Proceed => Duration::ZERO,
			Self::Delay(delay) => *delay,
		}
	}
}

/// Read-only usage snapshot for status reporting.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowStats {
	/// Requests recorded within the trailing window.
	pub requests_made: u32,
	/// Conservative remaining capacity.
	pub remaining: u32,
	/// Usage as a percentage of the ceiling.
	pub usage_percentage: f64,
	/// Time until the binding constraint frees a slot.
	pub reset_in: Duration,
}

struct WindowState {
	timestamps: VecDeque<OffsetDateTime>,
	server_remaining: Option<u32>,
	server_reset_at: Option<OffsetDateTime>,
}
impl WindowState {
	fn prune(&mut self, horizon: OffsetDateTime) {
		while let Some(oldest) = self.timestamps.front() {
			if *oldest > horizon {
				break;
			}

			self.timestamps.pop_front();
		}
	}
}

/// Process-wide sliding-window limiter shared by all dispatched calls.
pub struct SlidingWindowLimiter {
	config: RateConfig,
	clock: Arc<dyn Clock>,
	state: Mutex<WindowState>,
}
impl SlidingWindowLimiter {
	/// Creates a limiter with the provided window geometry.
	pub fn new(config: RateConfig, clock: Arc<dyn Clock>) -> Self {
		Self {
			config,
			clock,
			state: Mutex::new(WindowState {
				timestamps: VecDeque::new(),
				server_remaining: None,
				server_reset_at: None,
			}),
		}
	}

	/// Evaluates whether the next request may proceed, and if not, how long to wait.
	pub fn allow(&self) -> Decision {
		let now = self.clock.now();
		let mut state = self.state.lock();

		state.prune(now - self.config.window);

		let used = state.timestamps.len() as u32;
		let local_remaining = self.config.limit.saturating_sub(used);
		let remaining =
			state.server_remaining.map_or(local_remaining, |server| server.min(local_remaining));

		if remaining == 0 {
			return Decision::Delay(self.exhausted_delay(&state, now).max(Duration::ZERO));
		}

		let threshold = self.config.throttle_threshold;

		if threshold >= 1.0 {
			return Decision::Proceed;
		}

		let used_fraction =
			f64::from(self.config.limit - remaining) / f64::from(self.config.limit);

		if used_fraction < threshold {
			return Decision::Proceed;
		}

		let ramp = ((used_fraction - threshold) / (1.0 - threshold)).clamp(0.0, 1.0);
		let delay =
			Duration::seconds_f64(self.config.max_throttle_delay.as_seconds_f64() * ramp);

		if delay.is_positive() { Decision::Delay(delay) } else { Decision::Proceed }
	}

	/// Records a dispatched request at the current instant.
	///
	/// Called immediately before the request goes on the wire so concurrent
	/// in-flight calls all count against the window.
	pub fn record_request(&self) {
		let now = self.clock.now();
		let mut state = self.state.lock();

		state.timestamps.push_back(now);

		// Age the server estimate between observations so it stays conservative.
		if let Some(server) = state.server_remaining.as_mut() {
			*server = server.saturating_sub(1);
		}
	}

	/// Reconciles server-reported limit headers into the window state.
	///
	/// The server is trusted over the local estimate until the next observation.
	pub fn observe_response_headers(
		&self,
		remaining: Option<u32>,
		reset_at: Option<OffsetDateTime>,
	) {
		if remaining.is_none() && reset_at.is_none() {
			return;
		}

		let mut state = self.state.lock();

		if remaining.is_some() {
			state.server_remaining = remaining;
		}
		if reset_at.is_some() {
			state.server_reset_at = reset_at;
		}
	}

	/// Read-only usage snapshot.
	pub fn stats(&self) -> WindowStats {
		let now = self.clock.now();
		let mut state = self.state.lock();

		state.prune(now - self.config.window);

		let used = state.timestamps.len() as u32;
		let local_remaining = self.config.limit.saturating_sub(used);
		let remaining =
			state.server_remaining.map_or(local_remaining, |server| server.min(local_remaining));
		let usage_percentage =
			f64::from(self.config.limit - remaining) / f64::from(self.config.limit) * 100.0;
		let reset_in = if remaining == 0 {
			self.exhausted_delay(&state, now)
		} else {
			state
				.timestamps
				.front()
				.map(|oldest| *oldest + self.config.window - now)
				.unwrap_or(Duration::ZERO)
		}
		.max(Duration::ZERO);

		WindowStats { requests_made: used, remaining, usage_percentage, reset_in }
	}

	fn exhausted_delay(&self, state: &WindowState, now: OffsetDateTime) -> Duration {
		// Server-reported exhaustion waits for the server's reset instant;
		// local exhaustion waits for the oldest entry to slide out.
		if state.server_remaining == Some(0)
			&& let Some(reset_at) = state.server_reset_at
			&& reset_at > now
		{
			return reset_at - now;
		}

		match state.timestamps.front() {
			Some(oldest) => *oldest + self.config.window - now,
			None => self.config.window,
		}
	}
}
impl Debug for SlidingWindowLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let stats = self.stats();

		f.debug_struct("SlidingWindowLimiter")
			.field("limit", &self.config.limit)
			.field("window", &self.config.window)
			.field("requests_made", &stats.requests_made)
			.field("remaining", &stats.remaining)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::clock::ManualClock;

	fn build_limiter(limit: u32, threshold: f64) -> (Arc<ManualClock>, SlidingWindowLimiter) {
		let clock = Arc::new(ManualClock::starting_now());
		let config = RateConfig::default()
			.with_window(Duration::seconds(60), limit)
			.with_throttle_threshold(threshold)
			.with_max_throttle_delay(Duration::seconds(2));

		(clock.clone(), SlidingWindowLimiter::new(config, clock))
	}

	fn record_n(limiter: &SlidingWindowLimiter, n: u32) {
		for _ in 0..n {
			limiter.record_request();
		}
	}

	#[test]
	fn entries_outside_the_window_are_pruned() {
		let (clock, limiter) = build_limiter(5, 1.0);

		record_n(&limiter, 5);

		assert!(!limiter.allow().is_proceed(), "A full window must not proceed.");

		clock.advance(Duration::seconds(61));

		assert!(limiter.allow().is_proceed());
		assert_eq!(limiter.stats().requests_made, 0);
	}

	#[test]
	fn throttle_delay_is_monotonically_non_decreasing() {
		let (_, limiter) = build_limiter(10, 0.5);
		let mut previous = Duration::ZERO;

		for _ in 0..9 {
			limiter.record_request();

			let delay = limiter.allow().delay();

			assert!(delay >= previous, "Delay must not shrink as usage grows.");

			previous = delay;
		}

		assert!(previous.is_positive(), "Delay should be positive near the ceiling.");
	}

	#[test]
	fn usage_below_threshold_proceeds_without_delay() {
		let (_, limiter) = build_limiter(10, 0.7);

		record_n(&limiter, 6);

		assert_eq!(limiter.allow(), Decision::Proceed);
	}

	#[test]
	fn exhausted_window_waits_for_the_oldest_entry() {
		let (clock, limiter) = build_limiter(2, 1.0);

		limiter.record_request();
		clock.advance(Duration::seconds(10));
		limiter.record_request();
		clock.advance(Duration::seconds(10));

		// Oldest entry sits at t-20s in a 60s window: 40s until it slides out.
		assert_eq!(limiter.allow(), Decision::Delay(Duration::seconds(40)));
	}

	#[test]
	fn server_remaining_overrides_a_larger_local_estimate() {
		let (_, limiter) = build_limiter(200, 0.7);

		limiter.record_request();
		limiter.observe_response_headers(Some(1), None);

		// Locally almost nothing is used, but the server says one slot is left.
		match limiter.allow() {
			Decision::Delay(delay) => assert!(delay.is_positive()),
			Decision::Proceed => panic!("Server-reported scarcity must throttle."),
		}

		assert_eq!(limiter.stats().remaining, 1);
	}

	#[test]
	fn server_exhaustion_waits_for_the_reported_reset() {
		let (clock, limiter) = build_limiter(200, 0.7);
		let reset_at = clock.now() + Duration::seconds(30);

		limiter.observe_response_headers(Some(0), Some(reset_at));

		assert_eq!(limiter.allow(), Decision::Delay(Duration::seconds(30)));
	}

	#[test]
	fn recording_ages_the_server_estimate() {
		let (_, limiter) = build_limiter(200, 1.0);

		limiter.observe_response_headers(Some(2), None);
		record_n(&limiter, 2);

		assert!(!limiter.allow().is_proceed(), "Aged server estimate should exhaust.");
	}

	#[test]
	fn stats_reflect_window_contents() {
		let (clock, limiter) = build_limiter(10, 1.0);

		record_n(&limiter, 4);
		clock.advance(Duration::seconds(15));

		let stats = limiter.stats();

		assert_eq!(stats.requests_made, 4);
		assert_eq!(stats.remaining, 6);
		assert!((stats.usage_percentage - 40.0).abs() < f64::EPSILON);
		assert_eq!(stats.reset_in, Duration::seconds(45));
	}
}
