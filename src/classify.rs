//! Folds raw transport outcomes into the normalized [`Error`] shape.

// self
use crate::{
	_prelude::*,
	error::TransportError,
	http::{HttpResponse, RequestDescriptor},
};

const BODY_PREVIEW_LIMIT: usize = 512;

/// Failure shapes the classifier understands.
#[derive(Clone, Copy, Debug)]
pub enum RawFailure<'a> {
	/// A response arrived with a non-success status (or an unusable body).
	Response(&'a HttpResponse),
	/// No status was obtained.
	Transport(&'a TransportError),
}

/// Maps a raw failure observed for `request` into an [`Error`] carrying its request context.
pub fn classify(failure: RawFailure<'_>, request: &RequestDescriptor) -> Error {
	let error = match failure {
		RawFailure::Response(response) => classify_response(response),
		RawFailure::Transport(TransportError::NoResponse { source }) =>
			Error::new(ErrorCode::Network, format!("No response received from server: {source}")),
		RawFailure::Transport(TransportError::Request { source }) =>
			Error::new(ErrorCode::Request, format!("Request could not be sent: {source}")),
	};

	error.with_request(request.method, request.path.clone()).with_request_id(&request.request_id)
}

/// Short, user-facing text for an error, falling back to its own message.
pub fn friendly_message(error: &Error) -> &str {
	match error.code() {
		ErrorCode::Http(401) => "Your session has expired. Please sign in again.",
		ErrorCode::Http(403) => "You do not have permission to perform this action.",
		ErrorCode::Http(404) => "The requested resource was not found.",
		ErrorCode::Http(429) => "Too many requests. Please wait a moment and try again.",
		ErrorCode::Http(500) => "Something went wrong on our end. Please try again later.",
		ErrorCode::Network => "Unable to reach the server. Check your connection and try again.",
		ErrorCode::AuthExpired => "Your session has ended. Please sign in again.",
		ErrorCode::QueueFull => "Too many pending requests. Please try again shortly.",
		_ => error.message(),
	}
}

fn classify_response(response: &HttpResponse) -> Error {
	let status = response.status;
	let (message, details) = match serde_json::from_slice::<serde_json::Value>(&response.body) {
		Ok(body) => (server_message(&body), Some(body)),
		Err(_) if response.body.is_empty() => (None, None),
		Err(_) => (None, Some(serde_json::Value::String(preview(&response.body)))),
	};
	let message = message.unwrap_or_else(|| format!("Request failed with status {status}."));
	let error = Error::new(ErrorCode::Http(status), message).with_retry_after(response.retry_after);

	match details {
		Some(details) => error.with_details(details),
		None => error,
	}
}

fn server_message(body: &serde_json::Value) -> Option<String> {
	["message", "error"]
		.into_iter()
		.filter_map(|field| body.get(field))
		.find_map(|value| match value {
			serde_json::Value::String(text) if !text.is_empty() => Some(text.clone()),
			serde_json::Value::Object(inner) =>
				inner.get("message").and_then(|m| m.as_str()).map(ToOwned::to_owned),
			_ => None,
		})
}

fn preview(body: &[u8]) -> String {
	let text = String::from_utf8_lossy(body);

	match text.char_indices().nth(BODY_PREVIEW_LIMIT) {
		Some((cut, _)) => format!("{}...", &text[..cut]),
		None => text.into_owned(),
	}
}
