//! High-level API client tying the session, limiter, retry policy, and cache together.
//!
//! Every envelope-returning operation follows the same path: the call is wrapped in the retry
//! policy, each attempt is admitted by the rate limiter (when configured), decorated with a fresh
//! request id and the current bearer token, sent once, and, on a 401, recovered with a single
//! refresh-then-replay. Successful bodies are unwrapped from [`ApiEnvelope`]; everything else is a
//! normalized [`Error`].

mod logout;
mod pipeline;
mod refresh;
mod request;

pub use logout::LogoutListenerId;
pub use refresh::HttpTokenRefresher;
pub use request::ApiRequest;

pub(crate) use logout::LogoutListeners;

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::{CredentialPair, Secret, TokenManager},
	cache::ResponseCache,
	config::ClientConfig,
	envelope::ApiEnvelope,
	error::ConfigError,
	http::{HttpTransport, Method, MultipartFile},
	obs::{self, CallKind, CallOutcome, CallSpan},
	rate_limit::RateLimiter,
	store::KeyValueStore,
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestTransport;
use pipeline::{ClientInner, Delivered};

#[cfg(feature = "reqwest")]
/// Client specialized for the crate's default reqwest transport.
pub type ReqwestApiClient = ApiClient<ReqwestTransport>;

/// Resilient API client; clones share one session, limiter, cache, and listener registry.
pub struct ApiClient<T>
where
	T: ?Sized + HttpTransport,
{
	inner: Arc<ClientInner<T>>,
}
impl<T> ApiClient<T>
where
	T: ?Sized + HttpTransport,
{
	/// Creates a client over a caller-provided transport.
	///
	/// The session starts empty; call [`ApiClient::restore_session`] to load persisted
	/// credentials.
	pub fn with_transport(
		config: ClientConfig,
		transport: Arc<T>,
		store: Arc<dyn KeyValueStore>,
	) -> Result<Self, ConfigError> {
		config.validate()?;

		let refresh_url = config.endpoint(&config.refresh_path).map_err(|_| {
			ConfigError::InvalidRefreshPath { path: config.refresh_path.clone() }
		})?;
		let refresher =
			HttpTokenRefresher::new(transport.clone(), refresh_url, config.refresh_path.clone());
		let session =
			TokenManager::new(store.clone(), Arc::new(refresher), config.credential_keys());
		let limiter = config.rate_limit.clone().map(RateLimiter::new).transpose()?;
		let cache = ResponseCache::new(store, config.cache.clone());

		Ok(Self {
			inner: Arc::new(ClientInner {
				config,
				transport,
				session,
				limiter,
				cache,
				logout: LogoutListeners::default(),
			}),
		})
	}

	/// Client configuration.
	pub fn config(&self) -> &ClientConfig {
		&self.inner.config
	}

	/// Session holding the credential pair.
	pub fn session(&self) -> &TokenManager {
		&self.inner.session
	}

	/// Response cache.
	pub fn cache(&self) -> &ResponseCache {
		&self.inner.cache
	}

	/// Rate limiter, when configured.
	pub fn rate_limiter(&self) -> Option<&RateLimiter> {
		self.inner.limiter.as_ref()
	}

	/// Loads persisted credentials into the session.
	pub async fn restore_session(&self) -> CredentialPair {
		self.inner.session.restore().await
	}

	/// Stores credentials obtained from a sign-in.
	pub async fn set_session(
		&self,
		access_token: impl Into<Secret>,
		refresh_token: Option<Secret>,
	) {
		self.inner.session.set_tokens(access_token.into(), refresh_token).await;
	}

	/// Clears credentials and notifies logout listeners.
	pub async fn logout(&self) {
		self.inner.session.clear_tokens().await;
		self.inner.logout.notify();
	}

	/// Registers a callback fired whenever the session ends (explicit logout or failed refresh).
	pub fn on_logout<F>(&self, listener: F) -> LogoutListenerId
	where
		F: 'static + Send + Sync + Fn(),
	{
		self.inner.logout.register(Arc::new(listener))
	}

	/// Removes a logout callback; returns whether it was registered.
	pub fn remove_logout_listener(&self, id: LogoutListenerId) -> bool {
		self.inner.logout.remove(id)
	}

	/// Runs `request` and unwraps the envelope payload.
	///
	/// Envelope failures carry the same request context as transport and status failures.
	pub async fn execute<R>(&self, request: ApiRequest) -> Result<R>
	where
		R: DeserializeOwned,
	{
		let (method, path) = (request.method, request.path.clone());
		let Delivered { response, request_id } = self.send(request, "execute").await?;

		ApiEnvelope::decode(&response)
			.map_err(|e| e.with_request(method, path).with_request_id(request_id))
	}

	/// `GET path?params`.
	pub async fn get<R>(&self, path: &str, params: &[(&str, &str)]) -> Result<R>
	where
		R: DeserializeOwned,
	{
		self.execute(ApiRequest::new(Method::Get, path).with_params(params.iter().copied())).await
	}

	/// `POST path` with a JSON body.
	pub async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
	where
		B: ?Sized + Serialize,
		R: DeserializeOwned,
	{
		self.execute(ApiRequest::new(Method::Post, path).with_json(body)?).await
	}

	/// `PUT path` with a JSON body.
	pub async fn put<B, R>(&self, path: &str, body: &B) -> Result<R>
	where
		B: ?Sized + Serialize,
		R: DeserializeOwned,
	{
		self.execute(ApiRequest::new(Method::Put, path).with_json(body)?).await
	}

	/// `PATCH path` with a JSON body.
	pub async fn patch<B, R>(&self, path: &str, body: &B) -> Result<R>
	where
		B: ?Sized + Serialize,
		R: DeserializeOwned,
	{
		self.execute(ApiRequest::new(Method::Patch, path).with_json(body)?).await
	}

	/// `DELETE path`.
	pub async fn delete<R>(&self, path: &str) -> Result<R>
	where
		R: DeserializeOwned,
	{
		self.execute(ApiRequest::new(Method::Delete, path)).await
	}

	/// Multipart `POST` of one file plus text fields.
	pub async fn upload<R>(
		&self,
		path: &str,
		file: MultipartFile,
		fields: &[(&str, &str)],
	) -> Result<R>
	where
		R: DeserializeOwned,
	{
		self.execute(
			ApiRequest::new(Method::Post, path).with_multipart(fields.iter().copied(), vec![file]),
		)
		.await
	}

	/// Multipart `POST` of several files under one field name plus text fields.
	pub async fn upload_multiple<R>(
		&self,
		path: &str,
		field: &str,
		files: Vec<MultipartFile>,
		fields: &[(&str, &str)],
	) -> Result<R>
	where
		R: DeserializeOwned,
	{
		let files = files
			.into_iter()
			.map(|file| MultipartFile { field: field.to_owned(), ..file })
			.collect();
		let request =
			ApiRequest::new(Method::Post, path).with_multipart(fields.iter().copied(), files);

		self.execute(request).await
	}

	/// `GET path?params` returning the raw body without envelope decoding.
	pub async fn download(&self, path: &str, params: &[(&str, &str)]) -> Result<Vec<u8>> {
		let request = ApiRequest::new(Method::Get, path).with_params(params.iter().copied());

		Ok(self.send(request, "download").await?.response.body)
	}

	/// Cache-aside `GET`: serves a fresh cached payload or fetches and caches a new one.
	///
	/// `ttl` defaults to the cache's configured TTL.
	pub async fn get_cached<R>(
		&self,
		path: &str,
		params: &[(&str, &str)],
		ttl: Option<Duration>,
	) -> Result<R>
	where
		R: DeserializeOwned + Serialize,
	{
		let request = ApiRequest::new(Method::Get, path).with_params(params.iter().copied());
		let cache = &self.inner.cache;
		let key = cache.cache_key(request.method, &request.path, &request.params);

		if let Some(hit) = cache.get::<R>(&key).await {
			return Ok(hit);
		}

		let value: R = self.execute(request).await?;

		cache.set(&key, &value, ttl).await;

		Ok(value)
	}

	async fn send(&self, request: ApiRequest, stage: &'static str) -> Result<Delivered> {
		let span = CallSpan::new(CallKind::Request, stage);
		let inner = self.inner.clone();
		let outcome = span
			.instrument(async move {
				obs::record_call_outcome(CallKind::Request, CallOutcome::Attempt);

				inner.dispatch(Arc::new(request)).await
			})
			.await;

		obs::record_result(CallKind::Request, &outcome);

		outcome
	}
}
#[cfg(feature = "reqwest")]
impl ApiClient<ReqwestTransport> {
	/// Creates a client with a reqwest transport honoring the configured timeout and user agent.
	pub fn new(config: ClientConfig, store: Arc<dyn KeyValueStore>) -> Result<Self, ConfigError> {
		let transport =
			ReqwestTransport::from_settings(config.timeout, config.user_agent.as_deref())?;

		Self::with_transport(config, Arc::new(transport), store)
	}

	/// [`ApiClient::new`] followed by [`ApiClient::restore_session`].
	pub async fn connect(
		config: ClientConfig,
		store: Arc<dyn KeyValueStore>,
	) -> Result<Self, ConfigError> {
		let client = Self::new(config, store)?;

		client.restore_session().await;

		Ok(client)
	}
}
impl<T> Clone for ApiClient<T>
where
	T: ?Sized + HttpTransport,
{
	fn clone(&self) -> Self {
		Self { inner: self.inner.clone() }
	}
}
impl<T> Debug for ApiClient<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ApiClient")
			.field("base_url", &self.inner.config.base_url.as_str())
			.field("session", &self.inner.session)
			.field("rate_limited", &self.inner.limiter.is_some())
			.field("logout_listeners", &self.inner.logout.len())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{
		collections::VecDeque,
		sync::atomic::{AtomicUsize, Ordering},
	};
	// self
	use super::*;
	use crate::{
		error::TransportError,
		http::{HttpResponse, RequestDescriptor, TransportFuture},
		retry::RetryPolicy,
		store::MemoryStore,
	};

	#[derive(Default)]
	struct ScriptedTransport {
		responses: Mutex<VecDeque<HttpResponse>>,
		seen: Mutex<Vec<RequestDescriptor>>,
	}
	impl ScriptedTransport {
		fn push(&self, status: u16, body: serde_json::Value) {
			self.push_raw(status, &body.to_string());
		}

		fn push_raw(&self, status: u16, body: &str) {
			self.responses.lock().push_back(HttpResponse::new(status, body));
		}
	}
	impl HttpTransport for ScriptedTransport {
		fn send<'a>(&'a self, request: &'a RequestDescriptor) -> TransportFuture<'a> {
			Box::pin(async move {
				self.seen.lock().push(request.clone());

				self.responses.lock().pop_front().ok_or_else(|| {
					TransportError::no_response(std::io::Error::other("script exhausted"))
				})
			})
		}
	}

	fn client(
		transport: Arc<ScriptedTransport>,
	) -> (ApiClient<ScriptedTransport>, Arc<MemoryStore>) {
		let store = Arc::new(MemoryStore::default());
		let config = ClientConfig::builder("https://api.example.com/v1")
			.retry(RetryPolicy::disabled())
			.build()
			.expect("Test configuration should validate.");
		let client = ApiClient::with_transport(config, transport, store.clone())
			.expect("Client should build.");

		(client, store)
	}

	#[tokio::test]
	async fn unauthorized_calls_refresh_once_and_replay() {
		let transport = Arc::new(ScriptedTransport::default());
		let (client, store) = client(transport.clone());

		client.set_session("stale", Some(Secret::new("refresh-1"))).await;
		transport.push(401, serde_json::json!({ "message": "expired" }));
		transport.push(200, serde_json::json!({ "data": { "accessToken": "fresh" } }));
		transport.push(200, serde_json::json!({ "success": true, "data": { "id": 7 } }));

		let stay: serde_json::Value =
			client.get("/stays/7", &[]).await.expect("Replay should succeed.");
		let seen = transport.seen.lock();

		assert_eq!(stay["id"], 7);
		assert_eq!(seen.len(), 3);
		assert_eq!(seen[0].header("authorization"), Some("Bearer stale"));
		assert_eq!(seen[1].path, "/auth/refresh");
		assert_eq!(seen[2].header("authorization"), Some("Bearer fresh"));
		assert_ne!(seen[0].request_id, seen[2].request_id);
		assert_eq!(store.get_now("auth_token").as_deref(), Some("fresh"));
		assert_eq!(store.get_now("refresh_token").as_deref(), Some("refresh-1"));
	}

	#[tokio::test]
	async fn failed_refresh_logs_out_and_surfaces_the_original_401() {
		let transport = Arc::new(ScriptedTransport::default());
		let (client, store) = client(transport.clone());
		let logouts = Arc::new(AtomicUsize::new(0));

		{
			let logouts = logouts.clone();

			client.on_logout(move || {
				logouts.fetch_add(1, Ordering::SeqCst);
			});
		}

		client.set_session("stale", Some(Secret::new("revoked"))).await;
		transport.push(401, serde_json::json!({ "message": "expired" }));
		transport.push(401, serde_json::json!({ "message": "refresh revoked" }));

		let err = client
			.get::<serde_json::Value>("/stays", &[])
			.await
			.expect_err("Call should fail.");

		assert_eq!(err.code(), ErrorCode::Http(401));
		assert_eq!(err.message(), "expired");
		assert_eq!(logouts.load(Ordering::SeqCst), 1);
		assert!(client.session().credentials().is_empty());
		assert!(store.is_empty());
	}

	#[tokio::test]
	async fn second_unauthorized_response_is_surfaced() {
		let transport = Arc::new(ScriptedTransport::default());
		let (client, _) = client(transport.clone());

		client.set_session("stale", Some(Secret::new("refresh"))).await;
		transport.push(401, serde_json::json!({ "message": "expired" }));
		transport.push(200, serde_json::json!({ "data": { "accessToken": "fresh" } }));
		transport.push(401, serde_json::json!({ "message": "still expired" }));

		let err = client
			.get::<serde_json::Value>("/stays", &[])
			.await
			.expect_err("Second 401 should surface.");

		assert_eq!(err.message(), "still expired");
		assert_eq!(transport.seen.lock().len(), 3);
	}

	#[tokio::test]
	async fn json_bodies_are_decorated() {
		let transport = Arc::new(ScriptedTransport::default());
		let (client, _) = client(transport.clone());

		transport.push(201, serde_json::json!({ "success": true, "data": null }));

		client
			.post::<_, ()>("/bookings", &serde_json::json!({ "stayId": 7 }))
			.await
			.expect("Booking should succeed.");

		let seen = transport.seen.lock();

		assert_eq!(seen[0].header("content-type"), Some("application/json"));
		assert_eq!(seen[0].header("accept"), Some("application/json"));
		assert!(seen[0].header("authorization").is_none());
		assert!(seen[0].request_id.starts_with("req_"));
	}

	#[tokio::test]
	async fn envelope_failures_carry_request_context() {
		let transport = Arc::new(ScriptedTransport::default());
		let (client, _) = client(transport.clone());

		transport.push_raw(200, "<html/>");
		transport
			.push(200, serde_json::json!({ "success": false, "message": "Dates unavailable" }));

		let invalid = client
			.get::<serde_json::Value>("/stays", &[("city", "Porto")])
			.await
			.expect_err("Markup bodies should not decode.");
		let rejected = client
			.post::<_, serde_json::Value>("/bookings", &serde_json::json!({ "stayId": 7 }))
			.await
			.expect_err("Unsuccessful envelopes should fail.");
		let seen = transport.seen.lock();

		assert_eq!(invalid.code(), ErrorCode::InvalidResponse);
		assert_eq!(invalid.method(), Some(Method::Get));
		assert_eq!(invalid.path(), Some("/stays"));
		assert_eq!(invalid.request_id(), Some(seen[0].request_id.as_str()));
		assert_eq!(rejected.code(), ErrorCode::Http(200));
		assert_eq!(rejected.method(), Some(Method::Post));
		assert_eq!(rejected.path(), Some("/bookings"));
		assert_eq!(rejected.request_id(), Some(seen[1].request_id.as_str()));
	}

	#[tokio::test]
	async fn transport_type_is_inferred_from_the_arc() {
		let config = ClientConfig::builder("https://api.example.com/v1")
			.build()
			.expect("Test configuration should validate.");
		let transport = Arc::new(ScriptedTransport::default());
		let client =
			ApiClient::with_transport(config, transport, Arc::new(MemoryStore::default()))
				.expect("Client should build.");

		assert!(client.rate_limiter().is_none());
	}
}
