//! Success envelope wrapping every JSON API response.

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{_prelude::*, http::HttpResponse};

/// Standard `{success, data, message?, timestamp, requestId}` wrapper.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope<T> {
	/// Whether the server considers the call successful.
	#[serde(default = "default_success")]
	pub success: bool,
	/// Payload; absent fields decode as `None`.
	pub data: Option<T>,
	/// Optional human-readable message.
	#[serde(default)]
	pub message: Option<String>,
	/// Server timestamp, kept verbatim.
	#[serde(default)]
	pub timestamp: Option<serde_json::Value>,
	/// Server-side request id.
	#[serde(default)]
	pub request_id: Option<String>,
	/// Error object or string returned alongside `success: false`.
	#[serde(default)]
	pub error: Option<serde_json::Value>,
}
impl<T> ApiEnvelope<T>
where
	T: DeserializeOwned,
{
	/// Decodes a successful response body and unwraps its payload.
	///
	/// A missing `data` field decodes as JSON `null`, so `()` and `Option<_>` payloads work for
	/// endpoints that return nothing. `success: false` becomes an [`ErrorCode::Http`] error
	/// carrying the envelope message.
	pub fn decode(response: &HttpResponse) -> Result<T> {
		let body: &[u8] = if response.body.is_empty() { b"{}" } else { &response.body };
		let envelope: ApiEnvelope<T> = serde_json::from_slice(body).map_err(|e| {
			Error::new(
				ErrorCode::InvalidResponse,
				format!("Response body is not a valid envelope: {e}"),
			)
		})?;

		envelope.into_data(response.status)
	}

	/// Returns `data`, or an error when the envelope reports failure or lacks a usable payload.
	pub fn into_data(self, status: u16) -> Result<T> {
		if !self.success {
			let message =
				self.message.unwrap_or_else(|| "Server reported an unsuccessful response.".into());
			let mut error = Error::new(ErrorCode::Http(status), message);

			if let Some(details) = self.error {
				error = error.with_details(details);
			}

			return Err(error);
		}

		match self.data {
			Some(data) => Ok(data),
			None => serde_json::from_value(serde_json::Value::Null).map_err(|_| {
				Error::new(ErrorCode::InvalidResponse, "Response envelope is missing `data`.")
			}),
		}
	}
}

fn default_success() -> bool {
	true
}
