//! Transport primitives for outbound API calls.
//!
//! [`HttpTransport`] is the client's only dependency on an HTTP stack. The pipeline hands it a
//! fully decorated [`RequestDescriptor`] and expects either an [`HttpResponse`] (any status) or a
//! [`TransportError`] when no status could be obtained. Status interpretation, retries, and
//! credential recovery all happen above this seam, so custom transports stay small.

// std
use std::{
	sync::atomic::{AtomicU64, Ordering},
	time::Instant,
};
// crates.io
use rand::{Rng, distr::Alphanumeric};
#[cfg(feature = "reqwest")]
use reqwest::{
	header::{HeaderMap, RETRY_AFTER},
	multipart::{Form, Part},
};
#[cfg(feature = "reqwest")] use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, auth::Secret, error::TransportError};

/// Boxed future returned by [`HttpTransport::send`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + 'a + Send>>;

/// Header carrying the per-call correlation id.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

const REQUEST_ID_SUFFIX_LEN: usize = 9;

static REQUEST_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Abstraction over HTTP stacks able to execute decorated API requests.
///
/// Implementations must be `Send + Sync + 'static` so a single transport can be shared by the
/// client, its refresh hook, and rate-limited tasks. Non-2xx statuses are *responses*, not
/// errors: return them as [`HttpResponse`] values so the classifier can read their bodies.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Executes `request` exactly once.
	fn send<'a>(&'a self, request: &'a RequestDescriptor) -> TransportFuture<'a>;
}

/// HTTP verbs used by the API surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
	/// `GET`
	Get,
	/// `POST`
	Post,
	/// `PUT`
	Put,
	/// `PATCH`
	Patch,
	/// `DELETE`
	Delete,
}
impl Method {
	/// Returns the canonical upper-case verb.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Get => "GET",
			Self::Post => "POST",
			Self::Put => "PUT",
			Self::Patch => "PATCH",
			Self::Delete => "DELETE",
		}
	}
}
impl Display for Method {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
#[cfg(feature = "reqwest")]
impl From<Method> for reqwest::Method {
	fn from(method: Method) -> Self {
		match method {
			Method::Get => Self::GET,
			Method::Post => Self::POST,
			Method::Put => Self::PUT,
			Method::Patch => Self::PATCH,
			Method::Delete => Self::DELETE,
		}
	}
}

/// One file part of a multipart upload.
#[derive(Clone, PartialEq, Eq)]
pub struct MultipartFile {
	/// Form field name the file is attached under.
	pub field: String,
	/// File name reported to the server.
	pub file_name: String,
	/// MIME type, when known.
	pub content_type: Option<String>,
	/// Raw file contents.
	pub bytes: Vec<u8>,
}
impl MultipartFile {
	/// Creates a file part with no explicit content type.
	pub fn new(
		field: impl Into<String>,
		file_name: impl Into<String>,
		bytes: impl Into<Vec<u8>>,
	) -> Self {
		Self {
			field: field.into(),
			file_name: file_name.into(),
			content_type: None,
			bytes: bytes.into(),
		}
	}

	/// Sets the MIME type of the part.
	pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
		self.content_type = Some(content_type.into());

		self
	}
}
impl Debug for MultipartFile {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("MultipartFile")
			.field("field", &self.field)
			.field("file_name", &self.file_name)
			.field("content_type", &self.content_type)
			.field("len", &self.bytes.len())
			.finish()
	}
}

/// Request payload variants.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum RequestBody {
	/// No body.
	#[default]
	Empty,
	/// JSON document.
	Json(serde_json::Value),
	/// Multipart form with text fields and file parts.
	Multipart {
		/// Plain text form fields.
		fields: BTreeMap<String, String>,
		/// File parts.
		files: Vec<MultipartFile>,
	},
}

/// Fully decorated outbound request, created per dispatch and discarded afterwards.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
	/// HTTP verb.
	pub method: Method,
	/// Absolute URL, query string included.
	pub url: Url,
	/// Path relative to the configured base URL.
	pub path: String,
	/// Query parameters already encoded into `url`.
	pub params: BTreeMap<String, String>,
	/// Payload.
	pub body: RequestBody,
	/// Outbound headers.
	pub headers: BTreeMap<String, String>,
	/// Unique correlation id, mirrored in the `X-Request-ID` header.
	pub request_id: String,
	/// Dispatch instant used for latency measurement.
	pub start_time: Instant,
}
impl RequestDescriptor {
	/// Creates a descriptor with a fresh request id and start time.
	pub fn new(method: Method, url: Url, path: impl Into<String>) -> Self {
		let request_id = next_request_id();
		let mut headers = BTreeMap::new();

		headers.insert(REQUEST_ID_HEADER.to_owned(), request_id.clone());

		Self {
			method,
			url,
			path: path.into(),
			params: BTreeMap::new(),
			body: RequestBody::Empty,
			headers,
			request_id,
			start_time: Instant::now(),
		}
	}

	/// Appends query parameters to the URL.
	pub fn with_params(mut self, params: &BTreeMap<String, String>) -> Self {
		if !params.is_empty() {
			self.url.query_pairs_mut().extend_pairs(params.iter());
			self.params.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
		}

		self
	}

	/// Sets the payload.
	pub fn with_body(mut self, body: RequestBody) -> Self {
		self.body = body;

		self
	}

	/// Sets (or replaces) a header.
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.insert(name.into(), value.into());

		self
	}

	/// Attaches `Authorization: Bearer <token>`.
	pub fn with_bearer(self, token: &Secret) -> Self {
		self.with_header("Authorization", token.bearer())
	}

	/// Returns a header value by case-insensitive name.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}

	/// Time elapsed since the descriptor was created.
	pub fn elapsed(&self) -> Duration {
		self.start_time.elapsed()
	}
}

/// Raw response returned by a transport.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpResponse {
	/// HTTP status code.
	pub status: u16,
	/// Response body bytes.
	pub body: Vec<u8>,
	/// Parsed `Retry-After` hint, when the server supplied one.
	pub retry_after: Option<Duration>,
}
impl HttpResponse {
	/// Creates a response with the provided status and body.
	pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
		Self { status, body: body.into(), retry_after: None }
	}

	/// Whether the status is in `[200, 300)`.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}
}

/// Generates `req_<unix-millis>_<sequence>_<random>` identifiers.
pub fn next_request_id() -> String {
	let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
	let sequence = REQUEST_SEQUENCE.fetch_add(1, Ordering::Relaxed);
	let suffix: String = rand::rng()
		.sample_iter(&Alphanumeric)
		.take(REQUEST_ID_SUFFIX_LEN)
		.map(char::from)
		.collect();

	format!("req_{millis}_{sequence}_{suffix}")
}

/// Reqwest-backed [`HttpTransport`].
///
/// Redirects and timeouts follow whatever the wrapped [`ReqwestClient`] was configured with;
/// [`ReqwestTransport::from_settings`] applies the client configuration's timeout and user agent.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds a client honoring the provided timeout and optional user agent.
	pub fn from_settings(
		timeout: Duration,
		user_agent: Option<&str>,
	) -> Result<Self, crate::error::ConfigError> {
		let mut builder = ReqwestClient::builder().timeout(timeout);

		if let Some(agent) = user_agent {
			builder = builder.user_agent(agent);
		}

		Ok(Self(builder.build()?))
	}

	async fn execute(&self, request: &RequestDescriptor) -> Result<HttpResponse, TransportError> {
		let mut builder = self.0.request(request.method.into(), request.url.clone());

		for (name, value) in &request.headers {
			builder = builder.header(name.as_str(), value.as_str());
		}

		builder = match &request.body {
			RequestBody::Empty => builder,
			RequestBody::Json(value) => builder.json(value),
			RequestBody::Multipart { fields, files } =>
				builder.multipart(build_form(fields, files)?),
		};

		let response = builder.send().await?;
		let status = response.status().as_u16();
		let retry_after = parse_retry_after(response.headers());
		let body = response.bytes().await?.to_vec();

		Ok(HttpResponse { status, body, retry_after })
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
	fn send<'a>(&'a self, request: &'a RequestDescriptor) -> TransportFuture<'a> {
		Box::pin(self.execute(request))
	}
}

#[cfg(feature = "reqwest")]
fn build_form(
	fields: &BTreeMap<String, String>,
	files: &[MultipartFile],
) -> Result<Form, TransportError> {
	let mut form = Form::new();

	for (name, value) in fields {
		form = form.text(name.clone(), value.clone());
	}
	for file in files {
		let mut part = Part::bytes(file.bytes.clone()).file_name(file.file_name.clone());

		if let Some(content_type) = &file.content_type {
			part = part.mime_str(content_type).map_err(TransportError::request)?;
		}

		form = form.part(file.field.clone(), part);
	}

	Ok(form)
}

#[cfg(feature = "reqwest")]
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::from_secs(secs));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Duration::try_from(delta).ok();
		}
	}

	None
}
