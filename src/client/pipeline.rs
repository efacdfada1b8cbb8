// self
use crate::{
	_prelude::*,
	auth::TokenManager,
	cache::ResponseCache,
	classify::{self, RawFailure},
	client::{ApiRequest, LogoutListeners},
	config::ClientConfig,
	http::{HttpResponse, HttpTransport, RequestBody, RequestDescriptor},
	obs,
	rate_limit::RateLimiter,
	retry,
};

/// Successful response together with the request id of the attempt that produced it.
#[derive(Debug)]
pub(crate) struct Delivered {
	pub(crate) response: HttpResponse,
	pub(crate) request_id: String,
}

/// State shared by every clone of one client.
pub(crate) struct ClientInner<T>
where
	T: ?Sized + HttpTransport,
{
	pub(crate) config: ClientConfig,
	pub(crate) transport: Arc<T>,
	pub(crate) session: TokenManager,
	pub(crate) limiter: Option<RateLimiter>,
	pub(crate) cache: ResponseCache,
	pub(crate) logout: LogoutListeners,
}
impl<T> ClientInner<T>
where
	T: ?Sized + HttpTransport,
{
	/// Runs `request` through retry, admission, and one attempt per admission.
	pub(crate) async fn dispatch(
		self: &Arc<Self>,
		request: Arc<ApiRequest>,
	) -> Result<Delivered> {
		retry::execute_with_retry(|| self.admit(request.clone()), &self.config.retry).await
	}

	async fn admit(self: &Arc<Self>, request: Arc<ApiRequest>) -> Result<Delivered> {
		match self.limiter.as_ref() {
			Some(limiter) => {
				let inner = self.clone();
				let priority = request.priority;

				limiter
					.execute(priority, move || async move { inner.attempt(&request).await })
					.await
			},
			None => self.attempt(&request).await,
		}
	}

	/// One attempt: decorate, send, and recover a 401 with a single refresh-then-replay.
	async fn attempt(&self, request: &ApiRequest) -> Result<Delivered> {
		let descriptor = self.decorate(request)?;

		match self.send_once(&descriptor).await {
			Err(e) if e.status() == Some(401) && request.path != self.config.refresh_path =>
				self.recover_unauthorized(request, e).await,
			outcome => outcome,
		}
	}

	/// Builds a descriptor with a fresh request id, start time, and the current bearer token.
	pub(crate) fn decorate(&self, request: &ApiRequest) -> Result<RequestDescriptor> {
		let url = self
			.config
			.endpoint(&request.path)
			.map_err(|e| e.with_request(request.method, request.path.clone()))?;
		let mut descriptor = RequestDescriptor::new(request.method, url, request.path.clone())
			.with_params(&request.params)
			.with_header("Accept", "application/json")
			.with_body(request.body.clone());

		if matches!(request.body, RequestBody::Json(_)) {
			descriptor = descriptor.with_header("Content-Type", "application/json");
		}
		if let Some(token) = self.session.access_token() {
			descriptor = descriptor.with_bearer(&token);
		}

		Ok(descriptor)
	}

	/// Sends once, logs the outcome, and classifies anything that is not a 2xx response.
	async fn send_once(&self, descriptor: &RequestDescriptor) -> Result<Delivered> {
		let outcome = self.transport.send(descriptor).await;
		let latency = descriptor.elapsed();

		match outcome {
			Ok(response) if response.is_success() => {
				obs::log_response(descriptor, response.status, latency);

				Ok(Delivered { response, request_id: descriptor.request_id.clone() })
			},
			Ok(response) => {
				let error = classify::classify(RawFailure::Response(&response), descriptor);

				obs::log_response(descriptor, response.status, latency);
				obs::log_request_failure(descriptor, &error, latency);

				Err(error)
			},
			Err(e) => {
				let error = classify::classify(RawFailure::Transport(&e), descriptor);

				obs::log_request_failure(descriptor, &error, latency);

				Err(error)
			},
		}
	}

	/// Refreshes and replays once; a refresh failure ends the session and surfaces `original`.
	async fn recover_unauthorized(
		&self,
		request: &ApiRequest,
		original: Error,
	) -> Result<Delivered> {
		if self.session.refresh_access_token().await.is_err() {
			self.logout.notify();

			return Err(original);
		}

		let replay = self.decorate(request)?;

		self.send_once(&replay).await
	}
}
