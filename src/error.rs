//! Gatekeeper-level error types shared across the manager, limiter, and dispatcher.

// self
use crate::_prelude::*;

/// Gatekeeper-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical gatekeeper error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Lock-provider failure.
	#[error("{0}")]
	Lock(
		#[from]
		#[source]
		crate::lock::LockError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Authentication or token-lifecycle failure.
	#[error(transparent)]
	Auth(#[from] AuthError),

	/// Local throttling or server 429s exhausted the retry budget.
	#[error("Rate limit exceeded after {retries} retries.")]
	RateLimited {
		/// Retries attempted before giving up.
		retries: u32,
		/// Wait hint derived from the limiter or a Retry-After header.
		retry_after: Option<Duration>,
	},
	/// Network failure or 5xx exhausted the retry budget.
	#[error("Transient upstream failure after {retries} retries.")]
	Transient {
		/// Retries attempted before giving up.
		retries: u32,
		/// Last HTTP status observed, when one was received.
		status: Option<u16>,
		/// Underlying transport failure, when the wire never produced a status.
		#[source]
		source: Option<BoxError>,
	},
	/// Non-2xx API response outside the retryable classes.
	#[error("API call failed with status {status}.")]
	Api {
		/// HTTP status returned by the remote API.
		status: u16,
		/// Parsed error payload.
		body: ApiErrorBody,
	},
}
impl Error {
	/// Wraps a transport failure that exhausted the retry budget.
	pub(crate) fn transient_transport(retries: u32, source: TransportError) -> Self {
		Self::Transient { retries, status: None, source: Some(Box::new(source)) }
	}
}

/// Authentication and token-lifecycle failures surfaced to callers.
///
/// Serving a request without a valid token produces worse downstream behavior
/// than failing fast, so none of these are swallowed internally.
#[derive(Debug, ThisError)]
pub enum AuthError {
	/// No token record exists; an authorization exchange must run first.
	#[error("No token is available; complete an authorization exchange first.")]
	Unauthenticated,
	/// The stored record has no refresh token to redeem.
	#[error("Stored token record has no refresh token.")]
	NoRefreshToken,
	/// A token-endpoint exchange was rejected or could not complete.
	#[error("Token exchange failed: {reason}.")]
	RefreshFailed {
		/// Provider- or transport-supplied failure summary.
		reason: String,
		/// HTTP status of the rejection, when one was received.
		status: Option<u16>,
	},
	/// The refresh lock could not be won and no fresh token appeared in time.
	#[error("Timed out after {waited} waiting for a concurrent refresh to finish.")]
	RefreshTimeout {
		/// Total wait budget that elapsed.
		waited: Duration,
	},
	/// The refresh token is no longer honored; a new authorization is required.
	#[error("Refresh token is no longer valid; a new authorization is required.")]
	ReauthorizationRequired,
	/// The API rejected a request with 401 even after a forced refresh.
	#[error("Request was rejected with 401 after a forced token refresh.")]
	Unauthorized,
}

/// Configuration and validation failures raised by the gatekeeper.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Request path cannot be joined onto the configured base URL.
	#[error("Request path `{path}` is not valid relative to the base URL.")]
	InvalidPath {
		/// Offending path value.
		path: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Throttle threshold must be a fraction.
	#[error("throttle_threshold {value} must lie within [0, 1].")]
	ThresholdOutOfRange {
		/// Rejected threshold value.
		value: f64,
	},
	/// Window length and request ceiling must be positive.
	#[error("Rate window and request ceiling must both be positive.")]
	EmptyRateWindow,
	/// Lock waiters must give up before the lock itself can expire.
	#[error("Lock wait budget {wait} must not exceed the lock TTL {ttl}.")]
	LockWaitExceedsTtl {
		/// Configured wait budget.
		wait: Duration,
		/// Configured lock TTL.
		ttl: Duration,
	},
	/// Backoff base must be positive for the retry schedule to advance.
	#[error("Retry backoff base must be positive.")]
	NonPositiveBackoff,
	/// Request body could not be serialized to JSON.
	#[error("Request body could not be serialized.")]
	BodySerialization {
		/// Underlying serialization failure.
		#[source]
		source: serde_json::Error,
	},
	/// Token record builder validation failed.
	#[error("Unable to build token record.")]
	TokenBuild(#[from] crate::auth::TokenRecordBuilderError),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while sending the request.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while sending the request.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

/// Parsed error payload extracted from a non-2xx API response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
	/// Human-readable message when the payload carried one.
	pub message: Option<String>,
	/// Full decoded payload for callers that need provider-specific fields.
	pub details: Option<serde_json::Value>,
}
impl ApiErrorBody {
	/// Extracts a structured error body from raw response bytes.
	///
	/// JSON payloads keep their decoded form in `details` and surface the first of
	/// `message`, `error_description`, or `error` as the message. Anything else is
	/// preserved as trimmed text.
	pub fn from_bytes(bytes: &[u8]) -> Self {
		match serde_json::from_slice::<serde_json::Value>(bytes) {
			Ok(value) => {
				let message = ["message", "error_description", "error"]
					.iter()
					.find_map(|key| value.get(key).and_then(|v| v.as_str()))
					.map(ToOwned::to_owned);

				Self { message, details: Some(value) }
			},
			Err(_) => {
				let text = String::from_utf8_lossy(bytes).trim().to_owned();

				Self { message: (!text.is_empty()).then_some(text), details: None }
			},
		}
	}
}
impl Display for ApiErrorBody {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match &self.message {
			Some(message) => f.write_str(message),
			None => f.write_str("<no error body>"),
		}
	}
}
