//! Distributed mutual-exclusion contract guarding token refreshes.
//!
//! Any backend with atomic compare-and-set semantics can satisfy
//! [`RefreshLock`] — Redis, etcd, a database row, or the in-process
//! [`MemoryLock`] for single-instance deployments. Leases carry a fencing
//! token so a backend can reject releases from holders whose TTL already
//! lapsed and whose lock was handed to someone else.

pub mod memory;

pub use memory::MemoryLock;

// self
use crate::_prelude::*;

/// Boxed future returned by lock operations.
pub type LockFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LockError>> + 'a + Send>>;

/// Short-lived mutual-exclusion contract keyed by name.
pub trait RefreshLock
where
	Self: Send + Sync,
{
	/// Attempts to take the lock for `key`, valid for `ttl`.
	///
	/// Returns `None` without blocking when another holder owns the key.
	fn try_acquire<'a>(&'a self, key: &'a str, ttl: Duration) -> LockFuture<'a, Option<LockLease>>;

	/// Releases a previously acquired lease.
	///
	/// Returns `false` when the lease was no longer current (its TTL lapsed and
	/// the key moved on); that outcome is informational, not an error.
	fn release(&self, lease: LockLease) -> LockFuture<'_, bool>;
}

/// Handle proving ownership of an acquired lock.
#[derive(Clone, Debug)]
pub struct LockLease {
	key: String,
	fencing_token: u64,
	acquired_at: OffsetDateTime,
	ttl: Duration,
}
impl LockLease {
	/// Builds a lease; intended for [`RefreshLock`] implementations.
	pub fn new(
		key: impl Into<String>,
		fencing_token: u64,
		acquired_at: OffsetDateTime,
		ttl: Duration,
	) -> Self {
		Self { key: key.into(), fencing_token, acquired_at, ttl }
	}

	/// Key this lease holds.
	pub fn key(&self) -> &str {
		&self.key
	}

	/// Monotonically increasing token distinguishing successive holders.
	pub fn fencing_token(&self) -> u64 {
		self.fencing_token
	}

	/// Instant the lease was granted.
	pub fn acquired_at(&self) -> OffsetDateTime {
		self.acquired_at
	}

	/// Instant the backend may reclaim the lease.
	pub fn expires_at(&self) -> OffsetDateTime {
		self.acquired_at + self.ttl
	}
}

/// Error type produced by [`RefreshLock`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum LockError {
	/// Backend-level failure for the lock provider.
	#[error("Lock backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
