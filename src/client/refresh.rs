// self
use crate::{
	_prelude::*,
	auth::{RefreshFuture, RefreshedTokens, Secret, TokenRefresher},
	classify::{self, RawFailure},
	envelope::ApiEnvelope,
	http::{HttpTransport, Method, RequestBody, RequestDescriptor},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshPayload {
	access_token: String,
	#[serde(default)]
	refresh_token: Option<String>,
}

/// [`TokenRefresher`] posting `{refreshToken}` to the configured refresh endpoint.
///
/// The call goes straight to the transport: it is not rate limited, retried, or subject to
/// 401 recovery.
pub struct HttpTokenRefresher<T>
where
	T: ?Sized + HttpTransport,
{
	transport: Arc<T>,
	url: Url,
	path: String,
}
impl<T> HttpTokenRefresher<T>
where
	T: ?Sized + HttpTransport,
{
	/// Creates a refresher for `url`, reporting `path` in errors and logs.
	pub fn new(transport: Arc<T>, url: Url, path: impl Into<String>) -> Self {
		Self { transport, url, path: path.into() }
	}

	async fn exchange(&self, refresh_token: &Secret) -> Result<RefreshedTokens> {
		let request = RequestDescriptor::new(Method::Post, self.url.clone(), self.path.clone())
			.with_header("Accept", "application/json")
			.with_header("Content-Type", "application/json")
			.with_body(RequestBody::Json(
				serde_json::json!({ "refreshToken": refresh_token.expose() }),
			));
		let response = self
			.transport
			.send(&request)
			.await
			.map_err(|e| classify::classify(RawFailure::Transport(&e), &request))?;

		if !response.is_success() {
			return Err(classify::classify(RawFailure::Response(&response), &request));
		}

		let payload = ApiEnvelope::<RefreshPayload>::decode(&response)
			.map_err(|e| {
				e.with_request(request.method, request.path.clone())
					.with_request_id(&request.request_id)
			})?;

		if payload.access_token.is_empty() {
			return Err(Error::new(
				ErrorCode::InvalidResponse,
				"Refresh response did not contain an access token.",
			)
			.with_request(request.method, request.path.clone())
			.with_request_id(&request.request_id));
		}

		Ok(RefreshedTokens {
			access_token: Secret::new(payload.access_token),
			refresh_token: payload.refresh_token.filter(|token| !token.is_empty()).map(Secret::new),
		})
	}
}
impl<T> TokenRefresher for HttpTokenRefresher<T>
where
	T: ?Sized + HttpTransport,
{
	fn refresh<'a>(&'a self, refresh_token: &'a Secret) -> RefreshFuture<'a> {
		Box::pin(self.exchange(refresh_token))
	}
}
impl<T> Debug for HttpTokenRefresher<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HttpTokenRefresher").field("url", &self.url.as_str()).finish()
	}
}
