//! Session object owning the credential pair and its single-flight refresh.
//!
//! [`TokenManager`] is constructed explicitly by the client and shared behind `Arc`. At most one
//! refresh runs at a time: the first caller starts a shared future and every concurrent caller
//! awaits the same future, so N callers cost one network call and observe one outcome. The future
//! releases its slot as soon as it settles, before any waiter sees the result, so the next refresh
//! after a settled one always starts fresh.

// crates.io
use futures::future::{BoxFuture, FutureExt, Shared};
// self
use crate::{
	_prelude::*,
	auth::{CredentialKeys, CredentialPair, RefreshStats, Secret},
	obs::{self, CallKind, CallOutcome, CallSpan},
	store::KeyValueStore,
};

/// Boxed future returned by [`TokenRefresher::refresh`].
pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = Result<RefreshedTokens>> + 'a + Send>>;

type SharedRefresh = Shared<BoxFuture<'static, Result<Secret>>>;

/// Performs the network exchange of a refresh token for new credentials.
pub trait TokenRefresher
where
	Self: Send + Sync,
{
	/// Exchanges `refresh_token` for a new access token (and optionally a rotated refresh token).
	fn refresh<'a>(&'a self, refresh_token: &'a Secret) -> RefreshFuture<'a>;
}

/// Credentials returned by a successful refresh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshedTokens {
	/// New bearer token.
	pub access_token: Secret,
	/// Rotated refresh token; `None` keeps the current one.
	pub refresh_token: Option<Secret>,
}

/// Owns the credential pair, persists it, and coordinates refreshes.
pub struct TokenManager {
	state: Arc<SessionState>,
}
impl TokenManager {
	/// Creates an empty session backed by `store` and `refresher`.
	pub fn new(
		store: Arc<dyn KeyValueStore>,
		refresher: Arc<dyn TokenRefresher>,
		keys: CredentialKeys,
	) -> Self {
		Self {
			state: Arc::new(SessionState {
				store,
				refresher,
				keys,
				credentials: Default::default(),
				in_flight: Default::default(),
				stats: Default::default(),
			}),
		}
	}

	/// Loads the credential pair from storage, replacing whatever is held in memory.
	///
	/// Read failures are logged and leave the corresponding token unset.
	pub async fn restore(&self) -> CredentialPair {
		let state = &self.state;
		let access_token = state.load(&state.keys.access_token).await;
		let refresh_token = state.load(&state.keys.refresh_token).await;
		let pair = CredentialPair::new(access_token, refresh_token);

		*state.credentials.write() = pair.clone();

		pair
	}

	/// Current bearer token, if any.
	pub fn access_token(&self) -> Option<Secret> {
		self.state.credentials.read().access_token.clone()
	}

	/// Whether a refresh token is held.
	pub fn has_refresh_token(&self) -> bool {
		self.state.credentials.read().refresh_token.is_some()
	}

	/// Snapshot of the credential pair.
	pub fn credentials(&self) -> CredentialPair {
		self.state.credentials.read().clone()
	}

	/// Replaces the credential pair and persists it.
	///
	/// Storage failures are logged; the in-memory pair is updated regardless.
	pub async fn set_tokens(&self, access_token: Secret, refresh_token: Option<Secret>) {
		self.state.replace(CredentialPair::new(Some(access_token), refresh_token)).await;
	}

	/// Drops both tokens from memory and storage.
	pub async fn clear_tokens(&self) {
		self.state.replace(CredentialPair::default()).await;
	}

	/// Whether a refresh is currently in flight.
	pub fn is_refreshing(&self) -> bool {
		self.state.in_flight.lock().current.is_some()
	}

	/// Refresh counters for this session.
	pub fn stats(&self) -> &RefreshStats {
		&self.state.stats
	}

	/// Obtains a new access token, joining a refresh that is already in flight.
	///
	/// Fails with [`ErrorCode::AuthExpired`] when no refresh token is held or the refresh call
	/// fails; in both cases the credential pair has been cleared before the error is returned.
	pub async fn refresh_access_token(&self) -> Result<Secret> {
		self.join_or_start().await
	}

	fn join_or_start(&self) -> SharedRefresh {
		let mut slot = self.state.in_flight.lock();

		if let Some(current) = slot.current.as_ref() {
			self.state.stats.record_coalesced();

			return current.clone();
		}

		slot.generation = slot.generation.wrapping_add(1);

		let generation = slot.generation;
		let state = self.state.clone();
		let span = CallSpan::new(CallKind::Refresh, "refresh_access_token");
		let refresh = span
			.instrument(async move {
				obs::record_call_outcome(CallKind::Refresh, CallOutcome::Attempt);

				let outcome = run_refresh(&state).await;

				state.settle(generation);
				obs::record_result(CallKind::Refresh, &outcome);

				outcome
			})
			.boxed()
			.shared();

		slot.current = Some(refresh.clone());

		refresh
	}
}
impl Debug for TokenManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let credentials = self.state.credentials.read();

		f.debug_struct("TokenManager")
			.field("keys", &self.state.keys)
			.field("access_token_set", &credentials.access_token.is_some())
			.field("refresh_token_set", &credentials.refresh_token.is_some())
			.finish()
	}
}

#[derive(Default)]
struct RefreshSlot {
	generation: u64,
	current: Option<SharedRefresh>,
}

struct SessionState {
	store: Arc<dyn KeyValueStore>,
	refresher: Arc<dyn TokenRefresher>,
	keys: CredentialKeys,
	credentials: RwLock<CredentialPair>,
	in_flight: Mutex<RefreshSlot>,
	stats: RefreshStats,
}
impl SessionState {
	fn settle(&self, generation: u64) {
		let mut slot = self.in_flight.lock();

		if slot.generation == generation {
			slot.current = None;
		}
	}

	async fn load(&self, key: &str) -> Option<Secret> {
		match self.store.get(key).await {
			Ok(value) => value.map(Secret::from),
			Err(e) => {
				obs::log_storage_failure("get", key, &e);

				None
			},
		}
	}

	async fn replace(&self, pair: CredentialPair) {
		*self.credentials.write() = pair.clone();

		self.persist(&self.keys.access_token, pair.access_token.as_ref()).await;
		self.persist(&self.keys.refresh_token, pair.refresh_token.as_ref()).await;
	}

	async fn persist(&self, key: &str, value: Option<&Secret>) {
		let (operation, result) = match value {
			Some(secret) => ("set", self.store.set(key, secret.expose().to_owned()).await),
			None => ("remove", self.store.remove(key).await),
		};

		if let Err(e) = result {
			obs::log_storage_failure(operation, key, &e);
		}
	}
}

async fn run_refresh(state: &SessionState) -> Result<Secret> {
	state.stats.record_attempt();

	let current = state.credentials.read().refresh_token.clone();
	let Some(refresh_token) = current else {
		state.replace(CredentialPair::default()).await;
		state.stats.record_failure();

		return Err(Error::new(
			ErrorCode::AuthExpired,
			"No refresh token is available; sign in again.",
		));
	};

	match state.refresher.refresh(&refresh_token).await {
		Ok(RefreshedTokens { access_token, refresh_token: rotated }) => {
			let refresh_token = rotated.unwrap_or(refresh_token);
			let pair = CredentialPair::new(Some(access_token.clone()), Some(refresh_token));

			state.replace(pair).await;
			state.stats.record_success();

			Ok(access_token)
		},
		Err(e) => {
			obs::log_refresh_failure(&e);
			state.replace(CredentialPair::default()).await;
			state.stats.record_failure();

			let mut details = serde_json::Map::new();

			details.insert("cause".into(), e.code().to_string().into());

			if let Some(status) = e.status() {
				details.insert("status".into(), status.into());
			}

			Err(Error::new(ErrorCode::AuthExpired, format!("Token refresh failed: {}", e.message()))
				.with_details(details.into()))
		},
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use super::*;
	use crate::store::{MemoryStore, StoreError, StoreFuture};

	struct CountingRefresher {
		calls: AtomicUsize,
		delay: Duration,
		fail_with: Option<u16>,
		rotate: bool,
	}
	impl CountingRefresher {
		fn ok(delay: Duration) -> Self {
			Self { calls: AtomicUsize::new(0), delay, fail_with: None, rotate: true }
		}

		fn failing(status: u16) -> Self {
			Self {
				calls: AtomicUsize::new(0),
				delay: Duration::ZERO,
				fail_with: Some(status),
				rotate: true,
			}
		}

		fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}
	}
	impl TokenRefresher for CountingRefresher {
		fn refresh<'a>(&'a self, refresh_token: &'a Secret) -> RefreshFuture<'a> {
			Box::pin(async move {
				let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

				tokio::time::sleep(self.delay).await;

				if let Some(status) = self.fail_with {
					return Err(Error::new(ErrorCode::Http(status), "refresh rejected"));
				}

				Ok(RefreshedTokens {
					access_token: Secret::new(format!("access-{call}")),
					refresh_token: self
						.rotate
						.then(|| Secret::new(format!("{}-rotated", refresh_token.expose()))),
				})
			})
		}
	}

	struct BrokenStore;
	impl KeyValueStore for BrokenStore {
		fn get<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, Option<String>> {
			Box::pin(async { Err(StoreError::Backend { message: "offline".into() }) })
		}

		fn set<'a>(&'a self, _key: &'a str, _value: String) -> StoreFuture<'a, ()> {
			Box::pin(async { Err(StoreError::Backend { message: "offline".into() }) })
		}

		fn remove<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, ()> {
			Box::pin(async { Err(StoreError::Backend { message: "offline".into() }) })
		}

		fn keys(&self) -> StoreFuture<'_, Vec<String>> {
			Box::pin(async { Err(StoreError::Backend { message: "offline".into() }) })
		}
	}

	fn manager(store: Arc<dyn KeyValueStore>, refresher: Arc<CountingRefresher>) -> TokenManager {
		TokenManager::new(store, refresher, CredentialKeys::default())
	}

	#[tokio::test(start_paused = true)]
	async fn concurrent_refreshes_share_one_call() {
		let store = Arc::new(MemoryStore::default());
		let refresher = Arc::new(CountingRefresher::ok(Duration::from_millis(50)));
		let session = manager(store.clone(), refresher.clone());

		session.set_tokens(Secret::new("stale"), Some(Secret::new("refresh"))).await;

		let (a, b, c, d) = tokio::join!(
			session.refresh_access_token(),
			session.refresh_access_token(),
			session.refresh_access_token(),
			session.refresh_access_token(),
		);

		assert_eq!(refresher.calls(), 1);

		for outcome in [a, b, c, d] {
			assert_eq!(outcome.expect("Shared refresh should succeed.").expose(), "access-1");
		}

		assert_eq!(session.stats().coalesced(), 3);
		assert!(!session.is_refreshing());
		assert_eq!(store.get_now("auth_token").as_deref(), Some("access-1"));
		assert_eq!(store.get_now("refresh_token").as_deref(), Some("refresh-rotated"));
	}

	#[tokio::test(start_paused = true)]
	async fn settled_refresh_does_not_block_the_next_one() {
		let refresher = Arc::new(CountingRefresher::ok(Duration::from_millis(10)));
		let session = manager(Arc::new(MemoryStore::default()), refresher.clone());

		session.set_tokens(Secret::new("stale"), Some(Secret::new("refresh"))).await;

		let first = session.refresh_access_token().await.expect("First refresh should succeed.");
		let second = session.refresh_access_token().await.expect("Second refresh should succeed.");

		assert_eq!(first.expose(), "access-1");
		assert_eq!(second.expose(), "access-2");
		assert_eq!(refresher.calls(), 2);
	}

	#[tokio::test]
	async fn failed_refresh_clears_the_session() {
		let store = Arc::new(MemoryStore::default());
		let refresher = Arc::new(CountingRefresher::failing(401));
		let session = manager(store.clone(), refresher.clone());

		session.set_tokens(Secret::new("stale"), Some(Secret::new("refresh"))).await;

		let err = session.refresh_access_token().await.expect_err("Refresh should fail.");

		assert_eq!(err.code(), ErrorCode::AuthExpired);
		assert!(session.credentials().is_empty());
		assert!(store.is_empty());
		assert_eq!(session.stats().failures(), 1);
		assert!(!session.is_refreshing());
	}

	#[tokio::test]
	async fn missing_refresh_token_fails_without_network() {
		let refresher = Arc::new(CountingRefresher::ok(Duration::ZERO));
		let session = manager(Arc::new(MemoryStore::default()), refresher.clone());

		session.set_tokens(Secret::new("access-only"), None).await;

		let err = session.refresh_access_token().await.expect_err("Refresh should fail.");

		assert_eq!(err.code(), ErrorCode::AuthExpired);
		assert_eq!(refresher.calls(), 0);
		assert!(session.access_token().is_none());
	}

	#[tokio::test]
	async fn unrotated_refresh_keeps_existing_refresh_token() {
		let refresher =
			Arc::new(CountingRefresher { rotate: false, ..CountingRefresher::ok(Duration::ZERO) });
		let session = manager(Arc::new(MemoryStore::default()), refresher);

		session.set_tokens(Secret::new("stale"), Some(Secret::new("keep-me"))).await;
		session.refresh_access_token().await.expect("Refresh should succeed.");

		let pair = session.credentials();

		assert_eq!(pair.refresh_token.as_ref().map(Secret::expose), Some("keep-me"));
	}

	#[tokio::test]
	async fn storage_failures_do_not_roll_back_memory() {
		let refresher = Arc::new(CountingRefresher::ok(Duration::ZERO));
		let session = manager(Arc::new(BrokenStore), refresher);

		session.set_tokens(Secret::new("access"), Some(Secret::new("refresh"))).await;

		assert_eq!(session.access_token().as_ref().map(Secret::expose), Some("access"));

		let restored = session.restore().await;

		assert!(restored.is_empty());
	}

	#[tokio::test]
	async fn restore_hydrates_from_storage() {
		let store = Arc::new(MemoryStore::default());

		store.set_now("auth_token", "persisted-access");
		store.set_now("refresh_token", "persisted-refresh");

		let session = manager(store, Arc::new(CountingRefresher::ok(Duration::ZERO)));
		let pair = session.restore().await;

		assert_eq!(pair.access_token.as_ref().map(Secret::expose), Some("persisted-access"));
		assert!(session.has_refresh_token());
	}
}
