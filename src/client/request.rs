// self
use crate::{
	_prelude::*,
	http::{Method, MultipartFile, RequestBody},
};

/// Caller-facing description of one API call, before decoration.
///
/// The pipeline turns it into a fresh [`RequestDescriptor`](crate::http::RequestDescriptor) for
/// every attempt, so each attempt and each replay gets its own request id and start time.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
	/// HTTP verb.
	pub method: Method,
	/// Path relative to the base URL.
	pub path: String,
	/// Query parameters.
	pub params: BTreeMap<String, String>,
	/// Payload.
	pub body: RequestBody,
	/// Rate limiter priority; ignored unless the limiter is prioritized.
	pub priority: i32,
}
impl ApiRequest {
	/// Creates a request without parameters or body.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self {
			method,
			path: path.into(),
			params: BTreeMap::new(),
			body: RequestBody::Empty,
			priority: 0,
		}
	}

	/// Adds query parameters.
	pub fn with_params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
	where
		K: Into<String>,
		V: Into<String>,
	{
		self.params.extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));

		self
	}

	/// Serializes `body` as the JSON payload.
	pub fn with_json<B>(mut self, body: &B) -> Result<Self>
	where
		B: ?Sized + Serialize,
	{
		let value = serde_json::to_value(body).map_err(|e| {
			Error::new(ErrorCode::Request, format!("Request body could not be serialized: {e}"))
				.with_request(self.method, self.path.clone())
		})?;

		self.body = RequestBody::Json(value);

		Ok(self)
	}

	/// Sets a multipart payload.
	pub fn with_multipart<K, V>(
		mut self,
		fields: impl IntoIterator<Item = (K, V)>,
		files: Vec<MultipartFile>,
	) -> Self
	where
		K: Into<String>,
		V: Into<String>,
	{
		let fields = fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect();

		self.body = RequestBody::Multipart { fields, files };

		self
	}

	/// Sets the rate limiter priority.
	pub fn with_priority(mut self, priority: i32) -> Self {
		self.priority = priority;

		self
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn builder_collects_params_and_body() {
		let request = ApiRequest::new(Method::Post, "/bookings")
			.with_params([("currency", "EUR")])
			.with_json(&serde_json::json!({ "stayId": 7 }))
			.expect("JSON bodies should serialize.")
			.with_priority(3);

		assert_eq!(request.params.get("currency").map(String::as_str), Some("EUR"));
		assert_eq!(request.body, RequestBody::Json(serde_json::json!({ "stayId": 7 })));
		assert_eq!(request.priority, 3);
	}
}
