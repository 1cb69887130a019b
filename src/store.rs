//! Storage contracts and built-in backends for the current token record.
//!
//! Two tiers cooperate: a durable [`TokenStore`] holding the single current
//! record, and a fast [`TokenCache`] with a TTL. The manager writes the store
//! first and the cache second, and treats a cache miss as a fallthrough to the
//! store, never as "unauthenticated" — the cache is an accelerator, not the
//! source of truth.

pub mod file;
pub mod memory;

pub use file::FileTokenStore;
pub use memory::{MemoryTokenCache, MemoryTokenStore};

// self
use crate::{_prelude::*, auth::TokenRecord};

/// Boxed future returned by store and cache operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Durable persistence contract for the current token record.
///
/// Only the holder of the refresh lock may call [`save`](Self::save) or
/// [`delete`](Self::delete) during a refresh; reads are unrestricted.
pub trait TokenStore
where
	Self: Send + Sync,
{
	/// Persists or replaces the current record.
	fn save(&self, record: TokenRecord) -> StoreFuture<'_, ()>;

	/// Fetches the current record, if present.
	fn load(&self) -> StoreFuture<'_, Option<TokenRecord>>;

	/// Removes the current record.
	fn delete(&self) -> StoreFuture<'_, ()>;
}

/// Best-effort cache contract fronting a [`TokenStore`].
pub trait TokenCache
where
	Self: Send + Sync,
{
	/// Stores a record under `key` for at most `ttl`.
	fn put<'a>(&'a self, key: &'a str, record: TokenRecord, ttl: Duration) -> StoreFuture<'a, ()>;

	/// Fetches the record under `key`, if present and unexpired.
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<TokenRecord>>;

	/// Drops the record under `key`.
	fn forget<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()>;
}

/// Error type produced by [`TokenStore`] and [`TokenCache`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
