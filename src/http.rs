//! Transport primitives for outbound API calls.
//!
//! [`ApiTransport`] is the gatekeeper's only dependency on an HTTP stack: one
//! `send` taking a method, URL, headers, and body, returning a status, headers,
//! and body. Both dispatched resource calls and token-endpoint exchanges go
//! through the same trait, so a single injected transport covers everything.
//! A reqwest-backed implementation ships behind the `reqwest` feature.

// crates.io
use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, error::TransportError};

/// Boxed future returned by [`ApiTransport::send`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + 'a + Send>>;

/// Abstraction over HTTP transports capable of executing gatekeeper requests.
///
/// Implementations must be `Send + Sync + 'static` so they can be shared behind
/// `Arc` across the manager and dispatcher without additional wrappers.
pub trait ApiTransport
where
	Self: 'static + Send + Sync,
{
	/// Executes the request, resolving with the full response or a transport failure.
	///
	/// Non-2xx statuses are NOT transport failures; they resolve as responses and
	/// are classified by the caller.
	fn send(&self, request: TransportRequest) -> TransportFuture<'_>;
}

/// Outbound HTTP methods the gatekeeper issues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
	/// HTTP GET.
	Get,
	/// HTTP POST.
	Post,
	/// HTTP PUT.
	Put,
	/// HTTP PATCH.
	Patch,
	/// HTTP DELETE.
	Delete,
	/// HTTP HEAD.
	Head,
}
impl HttpMethod {
	/// Returns the canonical wire spelling.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Get => "GET",
			Self::Post => "POST",
			Self::Put => "PUT",
			Self::Patch => "PATCH",
			Self::Delete => "DELETE",
			Self::Head => "HEAD",
		}
	}

	/// Whether the method is safe to retry without caller opt-in.
	pub const fn is_idempotent(self) -> bool {
		!matches!(self, Self::Post | Self::Patch)
	}
}
impl Display for HttpMethod {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// A fully resolved outbound request.
#[derive(Clone, Debug)]
pub struct TransportRequest {
	/// HTTP method.
	pub method: HttpMethod,
	/// Absolute request URL.
	pub url: Url,
	/// Header name/value pairs, applied in order.
	pub headers: Vec<(String, String)>,
	/// Raw request body, if any.
	pub body: Option<Vec<u8>>,
}
impl TransportRequest {
	/// Creates a bodiless request.
	pub fn new(method: HttpMethod, url: Url) -> Self {
		Self { method, url, headers: Vec::new(), body: None }
	}

	/// Appends a header pair.
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));

		self
	}

	/// Attaches a raw body.
	pub fn with_body(mut self, body: Vec<u8>) -> Self {
		self.body = Some(body);

		self
	}
}

/// A fully buffered response.
#[derive(Clone, Debug)]
pub struct TransportResponse {
	/// HTTP status code.
	pub status: u16,
	/// Header name/value pairs as received.
	pub headers: Vec<(String, String)>,
	/// Raw response body.
	pub body: Vec<u8>,
}
impl TransportResponse {
	/// Returns the first header matching `name`, compared case-insensitively.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}

	/// Whether the status is in the 2xx range.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Parses a `Retry-After` header as either delta-seconds or an HTTP-date.
	pub fn retry_after(&self, now: OffsetDateTime) -> Option<Duration> {
		let raw = self.header("retry-after")?.trim();

		if let Ok(secs) = raw.parse::<u64>() {
			return Some(Duration::seconds(secs as i64));
		}
		if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
			let delta = moment - now;

			if delta.is_positive() {
				return Some(delta);
			}
		}

		None
	}

	/// Parses the server's `X-RateLimit-Remaining` header.
	pub fn rate_limit_remaining(&self) -> Option<u32> {
		self.header("x-ratelimit-remaining")?.trim().parse().ok()
	}

	/// Parses the server's `X-RateLimit-Reset` header.
	///
	/// Values at epoch scale are absolute timestamps; smaller values are
	/// relative seconds from `now`.
	pub fn rate_limit_reset(&self, now: OffsetDateTime) -> Option<OffsetDateTime> {
		const EPOCH_SCALE: i64 = 100_000_000;

		let raw = self.header("x-ratelimit-reset")?.trim();
		let value = raw.parse::<i64>().ok()?;

		if value >= EPOCH_SCALE {
			OffsetDateTime::from_unix_timestamp(value).ok()
		} else {
			Some(now + Duration::seconds(value))
		}
	}

	/// Deserializes the body as JSON.
	pub fn json<T>(&self) -> Result<T, serde_json::Error>
	where
		T: serde::de::DeserializeOwned,
	{
		serde_json::from_slice(&self.body)
	}
}

/// Thin wrapper around [`ReqwestClient`] implementing [`ApiTransport`].
#[cfg(feature = "reqwest")]
#[derive(Clone, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl ApiTransport for ReqwestTransport {
	fn send(&self, request: TransportRequest) -> TransportFuture<'_> {
		let client = self.0.clone();

		Box::pin(async move {
			let method = match request.method {
				HttpMethod::Get => reqwest::Method::GET,
				HttpMethod::Post => reqwest::Method::POST,
				HttpMethod::Put => reqwest::Method::PUT,
				HttpMethod::Patch => reqwest::Method::PATCH,
				HttpMethod::Delete => reqwest::Method::DELETE,
				HttpMethod::Head => reqwest::Method::HEAD,
			};
			let mut builder = client.request(method, request.url);

			for (name, value) in &request.headers {
				builder = builder.header(name, value);
			}
			if let Some(body) = request.body {
				builder = builder.body(body);
			}

			let response = builder.send().await.map_err(TransportError::from)?;
			let status = response.status().as_u16();
			let headers = response
				.headers()
				.iter()
				.map(|(name, value)| {
					(name.as_str().to_owned(), String::from_utf8_lossy(value.as_bytes()).into_owned())
				})
				.collect();
			let body = response.bytes().await.map_err(TransportError::from)?.to_vec();

			Ok(TransportResponse { status, headers, body })
		})
	}
}


#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn response_with(headers: Vec<(String, String)>) -> TransportResponse {
		TransportResponse { status: 200, headers, body: Vec::new() }
	}

	#[test]
	fn header_lookup_is_case_insensitive() {
		let response = response_with(vec![("X-RateLimit-Remaining".into(), "17".into())]);

		assert_eq!(response.header("x-ratelimit-remaining"), Some("17"));
		assert_eq!(response.rate_limit_remaining(), Some(17));
	}

	#[test]
	fn retry_after_parses_delta_seconds() {
		let response = response_with(vec![("Retry-After".into(), "5".into())]);

		assert_eq!(
			response.retry_after(OffsetDateTime::now_utc()),
			Some(Duration::seconds(5)),
		);
	}

	#[test]
	fn retry_after_parses_http_dates() {
		let now = macros::datetime!(2025-01-01 12:00 UTC);
		let response =
			response_with(vec![("Retry-After".into(), "Wed, 01 Jan 2025 12:00:30 GMT".into())]);

		assert_eq!(response.retry_after(now), Some(Duration::seconds(30)));
	}

	#[test]
	fn retry_after_in_the_past_is_ignored() {
		let now = macros::datetime!(2025-01-01 12:01 UTC);
		let response =
			response_with(vec![("Retry-After".into(), "Wed, 01 Jan 2025 12:00:30 GMT".into())]);

		assert_eq!(response.retry_after(now), None);
	}

	#[test]
	fn rate_limit_reset_handles_epoch_and_relative_values() {
		let now = macros::datetime!(2025-01-01 12:00 UTC);
		let epoch = response_with(vec![("X-RateLimit-Reset".into(), "1735732860".into())]);

		assert_eq!(
			epoch.rate_limit_reset(now),
			OffsetDateTime::from_unix_timestamp(1_735_732_860).ok(),
		);

		let relative = response_with(vec![("X-RateLimit-Reset".into(), "42".into())]);

		assert_eq!(relative.rate_limit_reset(now), Some(now + Duration::seconds(42)));
	}

	#[test]
	fn post_and_patch_are_not_idempotent() {
		assert!(HttpMethod::Get.is_idempotent());
		assert!(HttpMethod::Put.is_idempotent());
		assert!(HttpMethod::Delete.is_idempotent());
		assert!(!HttpMethod::Post.is_idempotent());
		assert!(!HttpMethod::Patch.is_idempotent());
	}
}
