//! Thread-safe in-memory store and cache backends for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::TokenRecord,
	clock::Clock,
	store::{StoreFuture, TokenCache, TokenStore},
};

/// Thread-safe in-memory [`TokenStore`] holding the single current record.
#[derive(Clone, Debug, Default)]
pub struct MemoryTokenStore(Arc<RwLock<Option<TokenRecord>>>);
impl TokenStore for MemoryTokenStore {
	fn save(&self, record: TokenRecord) -> StoreFuture<'_, ()> {
		let slot = self.0.clone();

		Box::pin(async move {
			*slot.write() = Some(record);

			Ok(())
		})
	}

	fn load(&self) -> StoreFuture<'_, Option<TokenRecord>> {
		let slot = self.0.clone();

		Box::pin(async move { Ok(slot.read().clone()) })
	}

	fn delete(&self) -> StoreFuture<'_, ()> {
		let slot = self.0.clone();

		Box::pin(async move {
			*slot.write() = None;

			Ok(())
		})
	}
}

struct CacheEntry {
	record: TokenRecord,
	expires_at: OffsetDateTime,
}

/// Thread-safe in-memory [`TokenCache`] with TTL eviction on read.
#[derive(Clone)]
pub struct MemoryTokenCache {
	entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
	clock: Arc<dyn Clock>,
}
impl MemoryTokenCache {
	/// Creates an empty cache evaluating TTLs against the provided clock.
	pub fn new(clock: Arc<dyn Clock>) -> Self {
		Self { entries: Default::default(), clock }
	}
}
impl TokenCache for MemoryTokenCache {
	fn put<'a>(&'a self, key: &'a str, record: TokenRecord, ttl: Duration) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			if !ttl.is_positive() {
				return Ok(());
			}

			let expires_at = self.clock.now() + ttl;

			self.entries.write().insert(key.to_owned(), CacheEntry { record, expires_at });

			Ok(())
		})
	}

	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<TokenRecord>> {
		Box::pin(async move {
			let now = self.clock.now();
			let mut entries = self.entries.write();

			match entries.get(key) {
				Some(entry) if entry.expires_at > now => Ok(Some(entry.record.clone())),
				Some(_) => {
					entries.remove(key);

					Ok(None)
				},
				None => Ok(None),
			}
		})
	}

	fn forget<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.entries.write().remove(key);

			Ok(())
		})
	}
}
