//! Normalized error model shared by every client component.
//!
//! Every failure a caller can observe is an [`Error`]: a value carrying an [`ErrorCode`] from a
//! small fixed vocabulary plus the request context it was raised for. Construction-time problems
//! use [`ConfigError`], and transports report dispatch failures through [`TransportError`] before
//! the classifier folds them into [`Error`].

// self
use crate::{_prelude::*, http::Method};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Fixed vocabulary of normalized error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
	/// The server answered with a non-success HTTP status.
	Http(u16),
	/// The request was sent but no response arrived (connect failure, timeout).
	Network,
	/// The request could not be built or dispatched.
	Request,
	/// The credential refresh failed; the session must re-authenticate.
	AuthExpired,
	/// The rate limiter queue reached its bound.
	QueueFull,
	/// The response body did not match the expected envelope.
	InvalidResponse,
}
impl ErrorCode {
	/// Returns the HTTP status for [`ErrorCode::Http`] codes.
	pub const fn status(self) -> Option<u16> {
		match self {
			Self::Http(status) => Some(status),
			_ => None,
		}
	}
}
impl Display for ErrorCode {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Http(status) => write!(f, "HTTP_{status}"),
			Self::Network => f.write_str("NETWORK_ERROR"),
			Self::Request => f.write_str("REQUEST_ERROR"),
			Self::AuthExpired => f.write_str("AUTH_EXPIRED"),
			Self::QueueFull => f.write_str("QUEUE_FULL"),
			Self::InvalidResponse => f.write_str("INVALID_RESPONSE"),
		}
	}
}
impl Serialize for ErrorCode {
	fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.collect_str(self)
	}
}

/// Normalized error returned by every public client operation.
///
/// Values are built once by the classifier (or by the component that rejected the call) and are
/// read-only afterwards; the `with_*` helpers consume the value and are meant for construction.
#[derive(Clone, Debug, ThisError)]
#[error("{code}: {message}")]
pub struct Error {
	code: ErrorCode,
	message: String,
	details: Option<serde_json::Value>,
	timestamp: OffsetDateTime,
	path: Option<String>,
	method: Option<Method>,
	request_id: Option<String>,
	retry_after: Option<Duration>,
}
impl Error {
	/// Creates an error stamped with the current time.
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
			details: None,
			timestamp: OffsetDateTime::now_utc(),
			path: None,
			method: None,
			request_id: None,
			retry_after: None,
		}
	}

	/// Attaches structured details (usually the decoded response body).
	pub fn with_details(mut self, details: serde_json::Value) -> Self {
		self.details = Some(details);

		self
	}

	/// Attaches the method and path of the request that failed.
	pub fn with_request(mut self, method: Method, path: impl Into<String>) -> Self {
		self.method = Some(method);
		self.path = Some(path.into());

		self
	}

	/// Attaches the `X-Request-ID` of the failing request.
	pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
		self.request_id = Some(request_id.into());

		self
	}

	/// Attaches a `Retry-After` hint reported by the server.
	pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
		self.retry_after = retry_after;

		self
	}

	/// Normalized error code.
	pub fn code(&self) -> ErrorCode {
		self.code
	}

	/// Human-readable message (server supplied when available).
	pub fn message(&self) -> &str {
		&self.message
	}

	/// Structured details, such as the decoded error body.
	pub fn details(&self) -> Option<&serde_json::Value> {
		self.details.as_ref()
	}

	/// Instant the error was constructed.
	pub fn timestamp(&self) -> OffsetDateTime {
		self.timestamp
	}

	/// Relative path of the request that failed.
	pub fn path(&self) -> Option<&str> {
		self.path.as_deref()
	}

	/// Method of the request that failed.
	pub fn method(&self) -> Option<Method> {
		self.method
	}

	/// `X-Request-ID` of the request that failed.
	pub fn request_id(&self) -> Option<&str> {
		self.request_id.as_deref()
	}

	/// Server supplied `Retry-After` hint.
	pub fn retry_after(&self) -> Option<Duration> {
		self.retry_after
	}

	/// HTTP status carried by the error, if a response was received.
	pub fn status(&self) -> Option<u16> {
		self.code.status()
	}

	/// Whether the failure may succeed when attempted again.
	///
	/// Client errors (`[400, 500)`) other than 429 are final, as are the locally decided
	/// `AUTH_EXPIRED` and `QUEUE_FULL` codes and `INVALID_RESPONSE`, since an undecodable body
	/// decodes the same way on every attempt. Everything else is transient.
	pub fn is_retryable(&self) -> bool {
		match self.code {
			ErrorCode::Http(429) => true,
			ErrorCode::Http(status) => !(400..500).contains(&status),
			ErrorCode::AuthExpired | ErrorCode::QueueFull | ErrorCode::InvalidResponse => false,
			ErrorCode::Network | ErrorCode::Request => true,
		}
	}
}

/// Configuration and validation failures raised while constructing a client.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Base URL cannot be parsed.
	#[error("Base URL is invalid.")]
	InvalidBaseUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Base URL uses a scheme other than HTTP(S).
	#[error("Base URL must use http or https: {url}.")]
	UnsupportedScheme {
		/// Offending URL.
		url: String,
	},
	/// Refresh endpoint path must be relative to the base URL.
	#[error("Refresh path must start with `/`: {path}.")]
	InvalidRefreshPath {
		/// Offending path.
		path: String,
	},
	/// Retry policy must allow at least one attempt.
	#[error("Retry policy must allow at least one attempt.")]
	ZeroAttempts,
	/// Rate limiter settings are unusable.
	#[error("Rate limiter {field} must be greater than zero.")]
	InvalidRateLimit {
		/// Name of the offending field.
		field: &'static str,
	},
	/// Storage keys for the credential pair must be distinct and non-empty.
	#[error("Credential storage keys must be non-empty and distinct.")]
	InvalidStorageKeys,
	/// Cache namespace must be non-empty.
	#[error("Cache namespace must not be empty.")]
	EmptyCacheNamespace,
	/// Configuration document could not be parsed.
	#[error("Configuration document is malformed.")]
	Parse(#[from] serde_path_to_error::Error<serde_json::Error>),
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

/// Failures reported by an [`HttpTransport`](crate::http::HttpTransport) before any response
/// status is known.
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// The request went out but no response came back (connect refused, timeout, reset).
	#[error("No response received: {source}")]
	NoResponse {
		/// Transport-specific failure.
		#[source]
		source: BoxError,
	},
	/// The request could not be constructed or handed to the network.
	#[error("Request could not be dispatched: {source}")]
	Request {
		/// Transport-specific failure.
		#[source]
		source: BoxError,
	},
}
impl TransportError {
	/// Wraps a failure that happened after dispatch.
	pub fn no_response(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::NoResponse { source: Box::new(src) }
	}

	/// Wraps a failure that happened while building the request.
	pub fn request(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Request { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_builder() { Self::request(e) } else { Self::no_response(e) }
	}
}
