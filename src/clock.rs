//! Injectable time source used for every expiry check and bounded wait.
//!
//! All shared state in the gatekeeper is evaluated against an explicit "now"
//! supplied by a [`Clock`], and every delay (rate throttling, lock polling,
//! retry backoff) sleeps through the same handle. Production code uses
//! [`SystemClock`]; tests inject a [`ManualClock`] and advance it
//! deterministically instead of waiting in real time.

// self
use crate::_prelude::*;

/// Boxed future returned by [`Clock::sleep`].
pub type SleepFuture<'a> = Pin<Box<dyn Future<Output = ()> + 'a + Send>>;

/// Time source abstraction over "now" and suspension.
pub trait Clock
where
	Self: Send + Sync,
{
	/// Returns the current instant.
	fn now(&self) -> OffsetDateTime;

	/// Suspends the caller for the provided duration.
	///
	/// Non-positive durations must resolve immediately.
	fn sleep(&self, duration: Duration) -> SleepFuture<'_>;
}

/// Production clock backed by the system time and the tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> OffsetDateTime {
		OffsetDateTime::now_utc()
	}

	fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
		let duration = std::time::Duration::try_from(duration).unwrap_or_default();

		Box::pin(tokio::time::sleep(duration))
	}
}

/// Deterministic clock for tests.
///
/// [`Clock::sleep`] advances the clock by the requested duration and resolves
/// immediately, so waits that would block for seconds in production complete
/// instantly while still being observable through [`ManualClock::now`].
#[derive(Debug)]
pub struct ManualClock {
	now: Mutex<OffsetDateTime>,
}
impl ManualClock {
	/// Creates a clock frozen at the provided instant.
	pub fn new(start: OffsetDateTime) -> Self {
		Self { now: Mutex::new(start) }
	}

	/// Creates a clock frozen at the current system time.
	pub fn starting_now() -> Self {
		Self::new(OffsetDateTime::now_utc())
	}

	/// Moves the clock forward by the provided duration.
	pub fn advance(&self, duration: Duration) {
		let mut now = self.now.lock();

		*now += duration;
	}

	/// Overwrites the current instant.
	pub fn set(&self, instant: OffsetDateTime) {
		*self.now.lock() = instant;
	}
}
impl Clock for ManualClock {
	fn now(&self) -> OffsetDateTime {
		*self.now.lock()
	}

	fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
		if duration.is_positive() {
			self.advance(duration);
		}

		Box::pin(async {})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn manual_clock_advances_on_sleep() {
		let start = OffsetDateTime::now_utc();
		let clock = ManualClock::new(start);

		clock.sleep(Duration::seconds(5)).await;

		assert_eq!(clock.now(), start + Duration::seconds(5));

		clock.sleep(Duration::seconds(-1)).await;

		assert_eq!(clock.now(), start + Duration::seconds(5));
	}

	#[test]
	fn manual_clock_set_overwrites_now() {
		let clock = ManualClock::starting_now();
		let target = OffsetDateTime::from_unix_timestamp(1_700_000_000)
			.expect("Fixture timestamp should be valid.");

		clock.set(target);

		assert_eq!(clock.now(), target);
	}
}
