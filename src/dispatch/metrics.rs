// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for dispatched calls.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
	dispatched: AtomicU64,
	retries: AtomicU64,
	throttle_waits: AtomicU64,
	auth_retries: AtomicU64,
}
impl DispatchMetrics {
	/// Returns the total number of dispatched logical calls.
	pub fn dispatched(&self) -> u64 {
		self.dispatched.load(Ordering::Relaxed)
	}

	/// Returns the number of backoff retries across all calls (429/5xx/network).
	pub fn retries(&self) -> u64 {
		self.retries.load(Ordering::Relaxed)
	}

	/// Returns the number of local throttle waits taken before sends.
	pub fn throttle_waits(&self) -> u64 {
		self.throttle_waits.load(Ordering::Relaxed)
	}

	/// Returns the number of forced refreshes taken after a 401.
	pub fn auth_retries(&self) -> u64 {
		self.auth_retries.load(Ordering::Relaxed)
	}

	pub(crate) fn record_dispatch(&self) {
		self.dispatched.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_retry(&self) {
		self.retries.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_throttle_wait(&self) {
		self.throttle_waits.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_auth_retry(&self) {
		self.auth_retries.fetch_add(1, Ordering::Relaxed);
	}
}
