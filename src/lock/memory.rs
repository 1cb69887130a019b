//! In-process [`RefreshLock`] backend with TTL takeover, for single-instance
//! deployments and tests.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	clock::Clock,
	lock::{LockFuture, LockLease, RefreshLock},
};

struct Holder {
	fencing_token: u64,
	expires_at: OffsetDateTime,
}

/// Thread-safe in-process lock honoring lease TTLs against an injected clock.
pub struct MemoryLock {
	holders: Mutex<HashMap<String, Holder>>,
	next_token: AtomicU64,
	clock: Arc<dyn Clock>,
}
impl MemoryLock {
	/// Creates an empty lock table evaluating TTLs against the provided clock.
	pub fn new(clock: Arc<dyn Clock>) -> Self {
		Self { holders: Default::default(), next_token: AtomicU64::new(1), clock }
	}

	fn acquire_now(&self, key: &str, ttl: Duration) -> Option<LockLease> {
		let now = self.clock.now();
		let mut holders = self.holders.lock();

		if let Some(holder) = holders.get(key)
			&& holder.expires_at > now
		{
			return None;
		}

		let fencing_token = self.next_token.fetch_add(1, Ordering::Relaxed);

		holders.insert(key.to_owned(), Holder { fencing_token, expires_at: now + ttl });

		Some(LockLease::new(key, fencing_token, now, ttl))
	}

	fn release_now(&self, lease: &LockLease) -> bool {
		let mut holders = self.holders.lock();

		match holders.get(lease.key()) {
			Some(holder) if holder.fencing_token == lease.fencing_token() => {
				holders.remove(lease.key());

				true
			},
			// A different fencing token means the TTL lapsed and the key was
			// handed to a newer holder; the stale release must not evict it.
			_ => false,
		}
	}
}
impl RefreshLock for MemoryLock {
	fn try_acquire<'a>(&'a self, key: &'a str, ttl: Duration) -> LockFuture<'a, Option<LockLease>> {
		Box::pin(async move { Ok(self.acquire_now(key, ttl)) })
	}

	fn release(&self, lease: LockLease) -> LockFuture<'_, bool> {
		Box::pin(async move { Ok(self.release_now(&lease)) })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::clock::ManualClock;

	const TTL: Duration = Duration::seconds(10);

	fn build_lock() -> (Arc<ManualClock>, MemoryLock) {
		let clock = Arc::new(ManualClock::starting_now());

		(clock.clone(), MemoryLock::new(clock))
	}

	#[tokio::test]
	async fn second_acquire_fails_until_release() {
		let (_, lock) = build_lock();
		let lease = lock
			.try_acquire("refresh", TTL)
			.await
			.expect("Acquire should succeed.")
			.expect("First acquire should win the lock.");

		assert!(
			lock.try_acquire("refresh", TTL).await.expect("Acquire should succeed.").is_none(),
			"Held lock must not be re-acquired.",
		);
		assert!(lock.release(lease).await.expect("Release should succeed."));
		assert!(
			lock.try_acquire("refresh", TTL).await.expect("Acquire should succeed.").is_some(),
			"Released lock should be acquirable again.",
		);
	}

	#[tokio::test]
	async fn expired_leases_are_taken_over() {
		let (clock, lock) = build_lock();
		let stale = lock
			.try_acquire("refresh", TTL)
			.await
			.expect("Acquire should succeed.")
			.expect("First acquire should win the lock.");

		clock.advance(TTL + Duration::seconds(1));

		let fresh = lock
			.try_acquire("refresh", TTL)
			.await
			.expect("Acquire should succeed.")
			.expect("Expired lease should be taken over.");

		assert!(fresh.fencing_token() > stale.fencing_token());
		// The stale holder's late release must not evict the new holder.
		assert!(!lock.release(stale).await.expect("Release should succeed."));
		assert!(
			lock.try_acquire("refresh", TTL).await.expect("Acquire should succeed.").is_none(),
			"New holder must survive a stale release.",
		);
	}

	#[tokio::test]
	async fn distinct_keys_do_not_contend() {
		let (_, lock) = build_lock();
		let _refresh = lock
			.try_acquire("refresh", TTL)
			.await
			.expect("Acquire should succeed.")
			.expect("First key should be acquirable.");

		assert!(
			lock.try_acquire("other", TTL).await.expect("Acquire should succeed.").is_some(),
			"Unrelated keys must not contend.",
		);
	}
}
