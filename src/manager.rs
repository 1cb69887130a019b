//! Token lifecycle orchestration with refresh locking and store/cache tiering.
//!
//! [`TokenManager`] owns the single current [`TokenRecord`]. Reads come from
//! the cache and fall back to the durable store; writes land in the store
//! first and the cache second, so a crash mid-write can leave the cache stale
//! but never ahead of the store. Refreshes are collapsed twice: an in-process
//! singleflight guard absorbs concurrent tasks, and a distributed
//! [`RefreshLock`] serializes across processes. Callers that lose the lock
//! poll for the winner's token and fail fast with a timeout rather than serve
//! a stale credential into guaranteed 401s.

mod metrics;

pub use metrics::RefreshMetrics;

// self
use crate::{
	_prelude::*,
	auth::TokenRecord,
	clock::Clock,
	config::AuthConfig,
	error::{AuthError, ConfigError},
	http::ApiTransport,
	lock::RefreshLock,
	oauth::{TokenEndpoint, TokenGrant},
	obs::{self, CallKind, CallOutcome, CallSpan},
	store::{TokenCache, TokenStore},
};

/// Owns the current token record and coordinates refreshes across callers.
pub struct TokenManager<T>
where
	T: ?Sized + ApiTransport,
{
	store: Arc<dyn TokenStore>,
	cache: Arc<dyn TokenCache>,
	lock: Arc<dyn RefreshLock>,
	endpoint: TokenEndpoint<T>,
	clock: Arc<dyn Clock>,
	config: AuthConfig,
	refresh_guard: AsyncMutex<()>,
	metrics: Arc<RefreshMetrics>,
}
impl<T> TokenManager<T>
where
	T: ?Sized + ApiTransport,
{
	/// Creates a manager over the provided backends.
	pub fn new(
		store: Arc<dyn TokenStore>,
		cache: Arc<dyn TokenCache>,
		lock: Arc<dyn RefreshLock>,
		endpoint: TokenEndpoint<T>,
		clock: Arc<dyn Clock>,
		config: AuthConfig,
	) -> Self {
		Self {
			store,
			cache,
			lock,
			endpoint,
			clock,
			config,
			refresh_guard: AsyncMutex::new(()),
			metrics: Default::default(),
		}
	}

	/// Returns an access token valid beyond the safety margin, refreshing on demand.
	pub async fn get_valid_access_token(&self) -> Result<String> {
		self.acquire_access_token(false).await
	}

	/// Refreshes regardless of the recorded expiry and returns the new token.
	///
	/// Used after a 401 proves the current token dead before its clock says so.
	pub async fn force_refresh_access_token(&self) -> Result<String> {
		self.acquire_access_token(true).await
	}

	/// Atomically replaces the current record from raw token material.
	///
	/// The durable store is written before the cache. An omitted refresh token
	/// preserves the previous one, matching providers that do not rotate.
	pub async fn set_tokens(
		&self,
		access_token: impl Into<String>,
		refresh_token: Option<String>,
		token_type: impl Into<String>,
		expires_in: Duration,
	) -> Result<TokenRecord> {
		let previous = self.store.load().await?;
		let grant = TokenGrant {
			access_token: access_token.into(),
			refresh_token,
			token_type: token_type.into(),
			expires_in,
		};

		self.persist_grant(grant, previous.as_ref()).await
	}

	/// Removes the token from store and cache.
	///
	/// Subsequent token requests fail with [`AuthError::Unauthenticated`] until
	/// a new authorization exchange completes.
	pub async fn clear(&self) -> Result<()> {
		self.store.delete().await?;
		self.cache.forget(&self.config.cache_key).await?;

		Ok(())
	}

	/// Redeems an authorization code and stores the resulting record.
	pub async fn exchange_authorization_code(
		&self,
		code: &str,
		redirect_uri: &Url,
	) -> Result<TokenRecord> {
		const KIND: CallKind = CallKind::Exchange;

		let span = CallSpan::new(KIND, "exchange_authorization_code");

		obs::record_call_outcome(KIND, CallOutcome::Attempt);

		let result = span
			.instrument(async move {
				match self.endpoint.exchange_authorization_code(code, redirect_uri).await {
					Ok(grant) => self.persist_grant(grant, None).await,
					Err(err) => {
						let status = err.status();

						Err(AuthError::RefreshFailed { reason: err.to_string(), status }.into())
					},
				}
			})
			.await;

		match &result {
			Ok(_) => obs::record_call_outcome(KIND, CallOutcome::Success),
			Err(_) => obs::record_call_outcome(KIND, CallOutcome::Failure),
		}

		result
	}

	/// Whether a current token record exists (valid or refreshable).
	pub async fn is_authenticated(&self) -> Result<bool> {
		Ok(self.read_current().await?.is_some())
	}

	/// Returns the current record without triggering a refresh.
	pub async fn current_record(&self) -> Result<Option<TokenRecord>> {
		self.read_current().await
	}

	/// Shared refresh counters.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.metrics
	}

	async fn acquire_access_token(&self, force: bool) -> Result<String> {
		if !force
			&& let Some(record) = self.read_current().await?
			&& record.is_fresh_at(self.clock.now(), self.config.safety_margin)
		{
			return Ok(record.access_token.expose().to_owned());
		}

		let record = self.refresh_current(force).await?;

		Ok(record.access_token.expose().to_owned())
	}

	async fn refresh_current(&self, force: bool) -> Result<TokenRecord> {
		const KIND: CallKind = CallKind::Refresh;

		let span = CallSpan::new(KIND, "refresh_current");

		obs::record_call_outcome(KIND, CallOutcome::Attempt);

		let result = span.instrument(self.refresh_current_inner(force)).await;

		match &result {
			Ok(_) => obs::record_call_outcome(KIND, CallOutcome::Success),
			Err(_) => obs::record_call_outcome(KIND, CallOutcome::Failure),
		}

		result
	}

	async fn refresh_current_inner(&self, force: bool) -> Result<TokenRecord> {
		// Collapse concurrent in-process callers before touching the shared lock.
		let _singleflight = self.refresh_guard.lock().await;
		let current = self.read_current().await?;

		// A concurrent caller may have already refreshed while we queued.
		if !force
			&& let Some(record) = &current
			&& record.is_fresh_at(self.clock.now(), self.config.safety_margin)
		{
			return Ok(record.clone());
		}

		match &current {
			None => return Err(AuthError::Unauthenticated.into()),
			Some(record) if record.refresh_token.is_none() =>
				return Err(AuthError::NoRefreshToken.into()),
			_ => {},
		}

		self.metrics.record_attempt();

		// Under force the current access token is known-dead even if its expiry
		// says otherwise; a waiter must not accept it back from the store.
		let stale_access =
			force.then(|| current.map(|r| r.access_token.expose().to_owned())).flatten();
		let lock_deadline = self.clock.now() + self.config.lock_wait;

		loop {
			match self.lock.try_acquire(&self.config.lock_key, self.config.lock_ttl).await? {
				Some(lease) => {
					let result = self.refresh_holding_lock(stale_access.as_deref()).await;

					// Always hand the lock back before surfacing the outcome; the
					// TTL is the backstop if the backend drops the release.
					let _ = self.lock.release(lease).await;

					match &result {
						Ok(_) => self.metrics.record_success(),
						Err(_) => self.metrics.record_failure(),
					}

					return result;
				},
				None => {
					// Another holder is presumably refreshing; serve its result.
					if let Some(record) = self.fresh_from_store(stale_access.as_deref()).await? {
						self.metrics.record_success();

						return Ok(record);
					}
					if self.clock.now() >= lock_deadline {
						break;
					}

					self.clock.sleep(self.config.poll_interval).await;
				},
			}
		}

		// The lock never came free within the budget: poll for the holder's
		// token until the secondary budget lapses, then fail fast instead of
		// serving a stale credential into guaranteed 401s.
		let refresh_deadline = self.clock.now() + self.config.refresh_wait;

		while self.clock.now() < refresh_deadline {
			self.clock.sleep(self.config.poll_interval).await;

			if let Some(record) = self.fresh_from_store(stale_access.as_deref()).await? {
				self.metrics.record_success();

				return Ok(record);
			}
		}

		self.metrics.record_timeout();
		self.metrics.record_failure();

		Err(AuthError::RefreshTimeout {
			waited: self.config.lock_wait + self.config.refresh_wait,
		}
		.into())
	}

	async fn refresh_holding_lock(&self, stale_access: Option<&str>) -> Result<TokenRecord> {
		// Re-read the durable store: another process may have refreshed while
		// this one was waiting on the lock.
		let current = self.store.load().await?;

		if let Some(record) = &current
			&& record.is_fresh_at(self.clock.now(), self.config.safety_margin)
			&& stale_access.is_none_or(|stale| record.access_token.expose() != stale)
		{
			self.write_cache(record).await?;

			return Ok(record.clone());
		}

		let Some(current) = current else { return Err(AuthError::Unauthenticated.into()) };
		let Some(refresh_token) = current.refresh_token.as_ref() else {
			return Err(AuthError::NoRefreshToken.into());
		};

		match self.endpoint.refresh(refresh_token.expose()).await {
			Ok(grant) => self.persist_grant(grant, Some(&current)).await,
			Err(err) if err.is_invalid_grant() => {
				// The refresh secret is dead; keeping the record would feed
				// every subsequent call into a guaranteed 401.
				self.clear().await?;

				Err(AuthError::ReauthorizationRequired.into())
			},
			Err(err) => {
				let status = err.status();

				Err(AuthError::RefreshFailed { reason: err.to_string(), status }.into())
			},
		}
	}

	/// Polls the durable store for a token refreshed by another holder.
	///
	/// Reads bypass the cache here: a peer process refreshes store-first, so the
	/// local cache may still hold the stale entry it wrote earlier.
	async fn fresh_from_store(&self, stale_access: Option<&str>) -> Result<Option<TokenRecord>> {
		let Some(record) = self.store.load().await? else { return Ok(None) };

		if !record.is_fresh_at(self.clock.now(), self.config.safety_margin) {
			return Ok(None);
		}
		if let Some(stale) = stale_access
			&& record.access_token.expose() == stale
		{
			return Ok(None);
		}

		self.write_cache(&record).await?;

		Ok(Some(record))
	}

	async fn read_current(&self) -> Result<Option<TokenRecord>> {
		if let Some(record) = self.cache.get(&self.config.cache_key).await? {
			return Ok(Some(record));
		}

		// A cache miss is never "unauthenticated"; the store stays authoritative.
		let loaded = self.store.load().await?;

		if let Some(record) = &loaded {
			self.write_cache(record).await?;
		}

		Ok(loaded)
	}

	async fn persist_grant(
		&self,
		grant: TokenGrant,
		previous: Option<&TokenRecord>,
	) -> Result<TokenRecord> {
		let now = self.clock.now();
		let inherited_refresh = grant
			.refresh_token
			.or_else(|| {
				previous
					.and_then(|record| record.refresh_token.as_ref())
					.map(|secret| secret.expose().to_owned())
			});
		let mut builder = TokenRecord::builder()
			.access_token(grant.access_token)
			.maybe_refresh_token(inherited_refresh)
			.token_type(grant.token_type)
			.expires_in(grant.expires_in)
			.issued_at(now);

		if let Some(previous) = previous {
			builder = builder.created_at(previous.created_at);
		}

		let record = builder.build().map_err(ConfigError::from)?;

		// Store first, cache second: a crash between the two leaves the cache
		// stale, never ahead of the durable record.
		self.store.save(record.clone()).await?;
		self.write_cache(&record).await?;

		Ok(record)
	}

	async fn write_cache(&self, record: &TokenRecord) -> Result<()> {
		let ttl = record.remaining_at(self.clock.now());

		if ttl.is_positive() {
			self.cache.put(&self.config.cache_key, record.clone(), ttl).await?;
		}

		Ok(())
	}
}
impl<T> Debug for TokenManager<T>
where
	T: ?Sized + ApiTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenManager")
			.field("endpoint", &self.endpoint)
			.field("lock_key", &self.config.lock_key)
			.field("cache_key", &self.config.cache_key)
			.finish()
	}
}
