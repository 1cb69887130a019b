//! Client-side gatekeeper for rate-limited OAuth APIs—refresh-safe token lifecycles,
//! sliding-window throttling, and retry-aware dispatch in one crate built for production.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod limiter;
pub mod lock;
pub mod manager;
pub mod oauth;
pub mod obs;
pub mod store;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		clock::{Clock, ManualClock},
		config::GatekeeperConfig,
		dispatch::Dispatcher,
		http::ReqwestTransport,
		limiter::SlidingWindowLimiter,
		lock::{MemoryLock, RefreshLock},
		manager::TokenManager,
		oauth::TokenEndpoint,
		store::{MemoryTokenCache, MemoryTokenStore, TokenCache, TokenStore},
	};

	/// Dispatcher type alias used by reqwest-backed integration tests.
	pub type ReqwestTestDispatcher = Dispatcher<ReqwestTransport>;

	/// Handles to the shared backends behind a test gatekeeper stack.
	pub struct TestStack {
		/// Dispatcher wired to the mock server.
		pub dispatcher: ReqwestTestDispatcher,
		/// Token manager shared with the dispatcher.
		pub manager: Arc<TokenManager<ReqwestTransport>>,
		/// Durable store backend.
		pub store: Arc<MemoryTokenStore>,
		/// Cache backend.
		pub cache: Arc<MemoryTokenCache>,
		/// Refresh lock backend.
		pub lock: Arc<MemoryLock>,
		/// Manual clock driving every wait.
		pub clock: Arc<ManualClock>,
	}

	/// Builds a full in-memory gatekeeper stack pointed at a mock server.
	///
	/// Every sleep goes through the returned [`ManualClock`], so tests advance time
	/// instead of waiting in real time.
	pub fn build_reqwest_test_stack(
		base_url: &str,
		token_url: &str,
		client_id: &str,
		config: GatekeeperConfig,
	) -> TestStack {
		let clock: Arc<ManualClock> = Arc::new(ManualClock::starting_now());
		let clock_handle: Arc<dyn Clock> = clock.clone();
		let store_backend = Arc::new(MemoryTokenStore::default());
		let store: Arc<dyn TokenStore> = store_backend.clone();
		let cache_backend = Arc::new(MemoryTokenCache::new(clock_handle.clone()));
		let cache: Arc<dyn TokenCache> = cache_backend.clone();
		let lock_backend = Arc::new(MemoryLock::new(clock_handle.clone()));
		let lock: Arc<dyn RefreshLock> = lock_backend.clone();
		let transport = Arc::new(ReqwestTransport::default());
		let endpoint = TokenEndpoint::new(
			Url::parse(token_url).expect("Mock token endpoint should parse successfully."),
			client_id,
			transport.clone(),
		);
		let manager = Arc::new(TokenManager::new(
			store,
			cache,
			lock,
			endpoint,
			clock_handle.clone(),
			config.auth.clone(),
		));
		let limiter =
			Arc::new(SlidingWindowLimiter::new(config.rate.clone(), clock_handle.clone()));
		let dispatcher = Dispatcher::new(
			transport,
			manager.clone(),
			limiter,
			clock_handle,
			Url::parse(base_url).expect("Mock base URL should parse successfully."),
			config,
		);

		TestStack {
			dispatcher,
			manager,
			store: store_backend,
			cache: cache_backend,
			lock: lock_backend,
			clock,
		}
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use {api_gatekeeper as _, color_eyre as _, httpmock as _};
