//! Retry-aware request dispatch: the single policy layer every outbound call
//! passes through.
//!
//! Each dispatched call walks a bounded state machine: acquire a valid token,
//! consult the rate limiter (sleeping through smooth-throttle delays), send,
//! then interpret the response. A first 401 forces exactly one token refresh;
//! 429s honor `Retry-After` against an exponential backoff with jitter; 5xx
//! and network failures retry idempotent calls within the configured budget;
//! anything else surfaces as a structured error. Resource wrappers only ever
//! see [`Dispatcher::dispatch`] — token and rate-limit mechanics stay inside.

mod backoff;
mod metrics;

pub use metrics::DispatchMetrics;

use backoff::Backoff;

// self
use crate::{
	_prelude::*,
	clock::Clock,
	config::{GatekeeperConfig, RetryConfig},
	error::{ApiErrorBody, AuthError, ConfigError},
	http::{ApiTransport, HttpMethod, TransportRequest, TransportResponse},
	limiter::{Decision, SlidingWindowLimiter, WindowStats},
	manager::TokenManager,
	obs::{self, CallKind, CallOutcome, CallSpan},
};

/// A single logical API call, addressed relative to the dispatcher's base URL.
#[derive(Clone, Debug)]
pub struct ApiCall {
	/// HTTP method.
	pub method: HttpMethod,
	/// Path relative to the base URL.
	pub path: String,
	/// Query parameters appended to the resolved URL.
	pub query: Vec<(String, String)>,
	/// JSON request body, if any.
	pub body: Option<serde_json::Value>,
	/// Overrides the method-derived idempotency used for 5xx/network retries.
	pub idempotent: Option<bool>,
	/// Overall budget for the call, covering every internal wait and retry.
	pub deadline: Option<Duration>,
}
impl ApiCall {
	/// Creates a call with the provided method and relative path.
	pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
		Self {
			method,
			path: path.into(),
			query: Vec::new(),
			body: None,
			idempotent: None,
			deadline: None,
		}
	}

	/// Convenience constructor for GET calls.
	pub fn get(path: impl Into<String>) -> Self {
		Self::new(HttpMethod::Get, path)
	}

	/// Convenience constructor for POST calls.
	pub fn post(path: impl Into<String>) -> Self {
		Self::new(HttpMethod::Post, path)
	}

	/// Convenience constructor for PUT calls.
	pub fn put(path: impl Into<String>) -> Self {
		Self::new(HttpMethod::Put, path)
	}

	/// Convenience constructor for PATCH calls.
	pub fn patch(path: impl Into<String>) -> Self {
		Self::new(HttpMethod::Patch, path)
	}

	/// Convenience constructor for DELETE calls.
	pub fn delete(path: impl Into<String>) -> Self {
		Self::new(HttpMethod::Delete, path)
	}

	/// Appends a query parameter.
	pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.push((key.into(), value.into()));

		self
	}

	/// Attaches a JSON body.
	pub fn with_json(mut self, body: serde_json::Value) -> Self {
		self.body = Some(body);

		self
	}

	/// Overrides whether 5xx/network failures may be retried.
	pub fn with_idempotency(mut self, idempotent: bool) -> Self {
		self.idempotent = Some(idempotent);

		self
	}

	/// Bounds the whole call, including throttle waits and retry backoff.
	pub fn with_deadline(mut self, budget: Duration) -> Self {
		self.deadline = Some(budget);

		self
	}
}

/// Orchestrates token acquisition, rate limiting, and retries per call.
pub struct Dispatcher<T>
where
	T: ?Sized + ApiTransport,
{
	transport: Arc<T>,
	manager: Arc<TokenManager<T>>,
	limiter: Arc<SlidingWindowLimiter>,
	clock: Arc<dyn Clock>,
	base_url: Url,
	retry: RetryConfig,
	max_rate_delay: Duration,
	backoff: Backoff,
	metrics: Arc<DispatchMetrics>,
}
impl<T> Dispatcher<T>
where
	T: ?Sized + ApiTransport,
{
	/// Creates a dispatcher over the provided collaborators.
	pub fn new(
		transport: impl Into<Arc<T>>,
		manager: Arc<TokenManager<T>>,
		limiter: Arc<SlidingWindowLimiter>,
		clock: Arc<dyn Clock>,
		mut base_url: Url,
		config: GatekeeperConfig,
	) -> Self {
		// `Url::join` replaces the last segment of slash-less bases, so pin one.
		if !base_url.path().ends_with('/') {
			let path = format!("{}/", base_url.path());

			base_url.set_path(&path);
		}

		let backoff = Backoff::new(&config.retry);

		Self {
			transport: transport.into(),
			manager,
			limiter,
			clock,
			base_url,
			retry: config.retry,
			max_rate_delay: config.rate.max_rate_delay,
			backoff,
			metrics: Default::default(),
		}
	}

	/// Executes one logical call through the full policy pipeline.
	pub async fn dispatch(&self, call: ApiCall) -> Result<TransportResponse> {
		const KIND: CallKind = CallKind::Dispatch;

		let span = CallSpan::new(KIND, "dispatch");

		obs::record_call_outcome(KIND, CallOutcome::Attempt);
		self.metrics.record_dispatch();

		let result = span.instrument(self.dispatch_inner(&call)).await;

		match &result {
			Ok(_) => obs::record_call_outcome(KIND, CallOutcome::Success),
			Err(_) => obs::record_call_outcome(KIND, CallOutcome::Failure),
		}

		result
	}

	/// Read-only rate window snapshot for status reporting.
	pub fn stats(&self) -> WindowStats {
		self.limiter.stats()
	}

	/// Whether a current token record exists.
	pub async fn is_authenticated(&self) -> Result<bool> {
		self.manager.is_authenticated().await
	}

	/// Shared dispatch counters.
	pub fn metrics(&self) -> &DispatchMetrics {
		&self.metrics
	}

	async fn dispatch_inner(&self, call: &ApiCall) -> Result<TransportResponse> {
		let url = build_url(&self.base_url, call)?;
		let body = call
			.body
			.as_ref()
			.map(serde_json::to_vec)
			.transpose()
			.map_err(|source| ConfigError::BodySerialization { source })?;
		let idempotent = call.idempotent.unwrap_or(call.method.is_idempotent());
		let deadline = call.deadline.map(|budget| self.clock.now() + budget);
		let mut retries = 0_u32;
		let mut refreshed_after_401 = false;
		let mut force_refresh = false;

		loop {
			// TokenAcquire: failures here are terminal — an auth failure with no
			// way to obtain a token will not resolve by retrying.
			let token = if force_refresh {
				self.manager.force_refresh_access_token().await?
			} else {
				self.manager.get_valid_access_token().await?
			};

			force_refresh = false;

			// RateCheck.
			self.wait_for_capacity(deadline).await?;

			// Send: the request counts against the window before it is on the
			// wire so concurrent in-flight calls are all accounted for.
			self.limiter.record_request();

			let mut request = TransportRequest::new(call.method, url.clone())
				.with_header("authorization", format!("Bearer {token}"))
				.with_header("accept", "application/json");

			if let Some(bytes) = &body {
				request = request
					.with_header("content-type", "application/json")
					.with_body(bytes.clone());
			}

			// Interpret.
			match self.transport.send(request).await {
				Ok(response) => match response.status {
					_ if response.is_success() => {
						self.observe_rate_headers(&response);

						return Ok(response);
					},
					401 => {
						if refreshed_after_401 {
							return Err(AuthError::Unauthorized.into());
						}

						// Exactly one forced refresh per logical call; a second
						// consecutive 401 is terminal.
						refreshed_after_401 = true;
						force_refresh = true;

						self.metrics.record_auth_retry();
					},
					429 => {
						self.observe_rate_headers(&response);

						let header_wait = response.retry_after(self.clock.now());

						if retries >= self.retry.max_retries {
							return Err(Error::RateLimited { retries, retry_after: header_wait });
						}

						let wait = header_wait
							.unwrap_or(Duration::ZERO)
							.max(self.backoff.delay_for(retries));

						if self.exceeds_deadline(wait, deadline) {
							return Err(Error::RateLimited { retries, retry_after: Some(wait) });
						}

						retries += 1;

						self.metrics.record_retry();
						self.clock.sleep(wait).await;
					},
					status if status >= 500 => {
						if !idempotent || retries >= self.retry.max_retries {
							return Err(Error::Transient {
								retries,
								status: Some(status),
								source: None,
							});
						}

						let wait = self.backoff.delay_for(retries);

						if self.exceeds_deadline(wait, deadline) {
							return Err(Error::Transient {
								retries,
								status: Some(status),
								source: None,
							});
						}

						retries += 1;

						self.metrics.record_retry();
						self.clock.sleep(wait).await;
					},
					status => {
						return Err(Error::Api {
							status,
							body: ApiErrorBody::from_bytes(&response.body),
						});
					},
				},
				Err(err) => {
					if !idempotent || retries >= self.retry.max_retries {
						return Err(Error::transient_transport(retries, err));
					}

					let wait = self.backoff.delay_for(retries);

					if self.exceeds_deadline(wait, deadline) {
						return Err(Error::transient_transport(retries, err));
					}

					retries += 1;

					self.metrics.record_retry();
					self.clock.sleep(wait).await;
				},
			}
		}
	}

	/// Sleeps through at most two limiter delays, then proceeds: a bounded
	/// re-check instead of infinite deferral.
	async fn wait_for_capacity(&self, deadline: Option<OffsetDateTime>) -> Result<()> {
		for _ in 0..2 {
			let delay = match self.limiter.allow() {
				Decision::Proceed => return Ok(()),
				Decision::Delay(delay) => delay,
			};

			if delay > self.max_rate_delay || self.exceeds_deadline(delay, deadline) {
				return Err(Error::RateLimited { retries: 0, retry_after: Some(delay) });
			}

			self.metrics.record_throttle_wait();
			self.clock.sleep(delay).await;
		}

		Ok(())
	}

	fn exceeds_deadline(&self, wait: Duration, deadline: Option<OffsetDateTime>) -> bool {
		deadline.is_some_and(|deadline| self.clock.now() + wait > deadline)
	}

	fn observe_rate_headers(&self, response: &TransportResponse) {
		let now = self.clock.now();

		self.limiter
			.observe_response_headers(response.rate_limit_remaining(), response.rate_limit_reset(now));
	}
}
impl<T> Debug for Dispatcher<T>
where
	T: ?Sized + ApiTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Dispatcher")
			.field("base_url", &self.base_url.as_str())
			.field("max_retries", &self.retry.max_retries)
			.finish()
	}
}

fn build_url(base: &Url, call: &ApiCall) -> Result<Url> {
	let mut url = base
		.join(call.path.trim_start_matches('/'))
		.map_err(|source| ConfigError::InvalidPath { path: call.path.clone(), source })?;

	if !call.query.is_empty() {
		url.query_pairs_mut()
			.extend_pairs(call.query.iter().map(|(key, value)| (key.as_str(), value.as_str())));
	}

	Ok(url)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn base() -> Url {
		Url::parse("https://api.example.com/v3/").expect("Base fixture URL should parse.")
	}

	#[test]
	fn build_url_joins_relative_and_absolute_paths() {
		let joined = build_url(&base(), &ApiCall::get("companies"))
			.expect("Relative path should join onto the base.");

		assert_eq!(joined.as_str(), "https://api.example.com/v3/companies");

		let slashed = build_url(&base(), &ApiCall::get("/companies/42"))
			.expect("Leading slash should not escape the base path.");

		assert_eq!(slashed.as_str(), "https://api.example.com/v3/companies/42");
	}

	#[test]
	fn build_url_appends_query_pairs() {
		let call = ApiCall::get("companies").with_query("page", "2").with_query("limit", "50");
		let url = build_url(&base(), &call).expect("Query pairs should append.");

		assert_eq!(url.query(), Some("page=2&limit=50"));
	}

	#[test]
	fn idempotency_defaults_follow_the_method() {
		assert!(ApiCall::get("x").idempotent.is_none());
		assert!(HttpMethod::Get.is_idempotent());
		assert!(!HttpMethod::Post.is_idempotent());
		assert_eq!(ApiCall::post("x").with_idempotency(true).idempotent, Some(true));
	}
}
