//! TTL cache of successful responses on top of a [`KeyValueStore`].
//!
//! Entries are stored as JSON `{data, timestamp, ttl}` (milliseconds) under
//! `<namespace>:<METHOD>:<path>:<query>` keys. Expired or undecodable entries are deleted on the
//! read that finds them and reported as misses. Storage failures are logged and behave like a
//! miss (reads) or a no-op (writes).

// crates.io
use serde::de::DeserializeOwned;
use url::form_urlencoded;
// self
use crate::{
	_prelude::*,
	config::duration_ms,
	http::Method,
	obs::{self, CallKind, CallOutcome},
	store::{KeyValueStore, StoreError},
};

/// Cache settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
	/// Key prefix separating cache entries from other stored values.
	pub namespace: String,
	/// TTL used when a write does not specify one.
	#[serde(with = "duration_ms")]
	pub default_ttl: Duration,
}
impl Default for CacheConfig {
	fn default() -> Self {
		Self { namespace: "api_cache".into(), default_ttl: Duration::from_secs(5 * 60) }
	}
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
	data: serde_json::Value,
	timestamp: i64,
	ttl: u64,
}
impl CacheEntry {
	fn is_fresh_at(&self, now_ms: i64) -> bool {
		u64::try_from(now_ms.saturating_sub(self.timestamp)).is_ok_and(|age| age < self.ttl)
	}
}

/// Namespaced response cache.
#[derive(Clone)]
pub struct ResponseCache {
	store: Arc<dyn KeyValueStore>,
	config: CacheConfig,
}
impl ResponseCache {
	/// Creates a cache writing through `store`.
	pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
		Self { store, config }
	}

	/// Cache settings.
	pub fn config(&self) -> &CacheConfig {
		&self.config
	}

	/// Derives the key for a call; parameters are ordered by name.
	pub fn cache_key(
		&self,
		method: Method,
		path: &str,
		params: &BTreeMap<String, String>,
	) -> String {
		let query =
			form_urlencoded::Serializer::new(String::new()).extend_pairs(params.iter()).finish();

		format!("{}:{method}:{path}:{query}", self.config.namespace)
	}

	/// Returns the cached payload if it is still fresh.
	pub async fn get<T>(&self, key: &str) -> Option<T>
	where
		T: DeserializeOwned,
	{
		self.get_at(key, OffsetDateTime::now_utc()).await
	}

	/// [`ResponseCache::get`] evaluated at `now`.
	pub async fn get_at<T>(&self, key: &str, now: OffsetDateTime) -> Option<T>
	where
		T: DeserializeOwned,
	{
		let raw = match self.store.get(key).await {
			Ok(raw) => raw,
			Err(e) => {
				obs::log_storage_failure("get", key, &e);

				None
			},
		};
		let hit = lookup(raw.as_deref(), unix_millis(now));
		let value = match hit {
			Lookup::Hit(value) => Some(value),
			Lookup::Miss => None,
			Lookup::Expired | Lookup::Corrupt => {
				self.invalidate(key).await;

				None
			},
		};

		obs::log_cache_lookup(key, value.is_some());
		obs::record_call_outcome(
			CallKind::Cache,
			if value.is_some() { CallOutcome::Success } else { CallOutcome::Failure },
		);

		value
	}

	/// Stores `payload` under `key`, replacing any previous entry.
	pub async fn set<T>(&self, key: &str, payload: &T, ttl: Option<Duration>)
	where
		T: ?Sized + Serialize,
	{
		self.set_at(key, payload, ttl, OffsetDateTime::now_utc()).await
	}

	/// [`ResponseCache::set`] stamped at `now`.
	pub async fn set_at<T>(
		&self,
		key: &str,
		payload: &T,
		ttl: Option<Duration>,
		now: OffsetDateTime,
	) where
		T: ?Sized + Serialize,
	{
		let data = match serde_json::to_value(payload) {
			Ok(data) => data,
			Err(e) => {
				obs::log_storage_failure("set", key, &StoreError::Serialization {
					message: e.to_string(),
				});

				return;
			},
		};
		let entry = CacheEntry {
			data,
			timestamp: unix_millis(now),
			ttl: u64::try_from(ttl.unwrap_or(self.config.default_ttl).as_millis())
				.unwrap_or(u64::MAX),
		};
		let result = match serde_json::to_string(&entry) {
			Ok(raw) => self.store.set(key, raw).await,
			Err(e) => Err(StoreError::Serialization { message: e.to_string() }),
		};

		if let Err(e) = result {
			obs::log_storage_failure("set", key, &e);
		}
	}

	/// Removes one exact key.
	pub async fn invalidate(&self, key: &str) {
		if let Err(e) = self.store.remove(key).await {
			obs::log_storage_failure("remove", key, &e);
		}
	}

	/// Removes namespace entries whose key contains `pattern`, or the whole namespace for
	/// `None`; returns the number of removed entries.
	pub async fn clear(&self, pattern: Option<&str>) -> usize {
		let prefix = format!("{}:", self.config.namespace);
		let keys = match self.store.keys().await {
			Ok(keys) => keys,
			Err(e) => {
				obs::log_storage_failure("keys", &prefix, &e);

				return 0;
			},
		};
		let mut removed = 0;

		for key in keys
			.iter()
			.filter(|key| key.starts_with(&prefix))
			.filter(|key| pattern.is_none_or(|pattern| key.contains(pattern)))
		{
			match self.store.remove(key).await {
				Ok(()) => removed += 1,
				Err(e) => obs::log_storage_failure("remove", key, &e),
			}
		}

		removed
	}
}
impl Debug for ResponseCache {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ResponseCache").field("config", &self.config).finish()
	}
}

enum Lookup<T> {
	Hit(T),
	Miss,
	Expired,
	Corrupt,
}

fn lookup<T>(raw: Option<&str>, now_ms: i64) -> Lookup<T>
where
	T: DeserializeOwned,
{
	let Some(raw) = raw else {
		return Lookup::Miss;
	};
	let Ok(entry) = serde_json::from_str::<CacheEntry>(raw) else {
		return Lookup::Corrupt;
	};

	if !entry.is_fresh_at(now_ms) {
		return Lookup::Expired;
	}

	serde_json::from_value(entry.data).map_or(Lookup::Corrupt, Lookup::Hit)
}

fn unix_millis(at: OffsetDateTime) -> i64 {
	i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}
