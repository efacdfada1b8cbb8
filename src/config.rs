//! Client configuration, its builder, and validation.
//!
//! [`ClientConfig`] can be assembled in code through [`ClientConfig::builder`] or loaded from JSON
//! via [`ClientConfig::from_json`]; both paths run the same validation and report
//! [`ConfigError`] before any client is constructed. Durations are expressed in milliseconds on
//! the wire.

// self
use crate::{
	_prelude::*,
	auth::CredentialKeys,
	cache::CacheConfig,
	error::ConfigError,
	rate_limit::RateLimitConfig,
	retry::RetryPolicy,
};

/// Settings shared by every component of an [`ApiClient`](crate::client::ApiClient).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
	/// Base URL every request path is appended to.
	pub base_url: Url,
	/// Per-request transport timeout.
	#[serde(default = "default_timeout", with = "duration_ms")]
	pub timeout: Duration,
	/// Path of the credential refresh endpoint.
	#[serde(default = "default_refresh_path")]
	pub refresh_path: String,
	/// Storage key of the access token.
	#[serde(default = "default_access_token_key")]
	pub access_token_key: String,
	/// Storage key of the refresh token.
	#[serde(default = "default_refresh_token_key")]
	pub refresh_token_key: String,
	/// Retry policy applied to every call.
	#[serde(default)]
	pub retry: RetryPolicy,
	/// Token-bucket limiter; `None` disables throttling.
	#[serde(default)]
	pub rate_limit: Option<RateLimitConfig>,
	/// Response cache settings.
	#[serde(default)]
	pub cache: CacheConfig,
	/// Optional `User-Agent` for the default transport.
	#[serde(default)]
	pub user_agent: Option<String>,
}
impl ClientConfig {
	/// Default per-request timeout.
	pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
	/// Default refresh endpoint path.
	pub const DEFAULT_REFRESH_PATH: &'static str = "/auth/refresh";

	/// Starts a builder for the provided base URL.
	pub fn builder(base_url: impl Into<String>) -> ClientConfigBuilder {
		ClientConfigBuilder::new(base_url)
	}

	/// Parses and validates a JSON configuration document.
	pub fn from_json(document: &str) -> Result<Self, ConfigError> {
		let mut de = serde_json::Deserializer::from_str(document);
		let config: Self = serde_path_to_error::deserialize(&mut de)?;

		config.validate()?;

		Ok(config)
	}

	/// Storage keys the credential pair is persisted under.
	pub fn credential_keys(&self) -> CredentialKeys {
		CredentialKeys {
			access_token: self.access_token_key.clone(),
			refresh_token: self.refresh_token_key.clone(),
		}
	}

	/// Resolves a relative API path against the base URL, keeping any base path prefix.
	pub fn endpoint(&self, path: &str) -> Result<Url> {
		let base = self.base_url.as_str().trim_end_matches('/');
		let joined =
			if path.starts_with('/') { format!("{base}{path}") } else { format!("{base}/{path}") };

		Url::parse(&joined).map_err(|e| {
			Error::new(ErrorCode::Request, format!("Request URL is invalid: {e}"))
				.with_details(serde_json::Value::String(joined))
		})
	}

	/// Checks invariants shared by the builder and the JSON loader.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if !matches!(self.base_url.scheme(), "http" | "https") {
			return Err(ConfigError::UnsupportedScheme { url: self.base_url.to_string() });
		}
		if !self.refresh_path.starts_with('/') {
			return Err(ConfigError::InvalidRefreshPath { path: self.refresh_path.clone() });
		}
		if self.retry.max_attempts == 0 {
			return Err(ConfigError::ZeroAttempts);
		}
		if self.access_token_key.is_empty()
			|| self.refresh_token_key.is_empty()
			|| self.access_token_key == self.refresh_token_key
		{
			return Err(ConfigError::InvalidStorageKeys);
		}
		if self.cache.namespace.is_empty() {
			return Err(ConfigError::EmptyCacheNamespace);
		}
		if let Some(limits) = self.rate_limit.as_ref() {
			limits.validate()?;
		}

		Ok(())
	}
}

/// Builder for [`ClientConfig`] values.
#[derive(Clone, Debug)]
pub struct ClientConfigBuilder {
	base_url: String,
	timeout: Duration,
	refresh_path: String,
	keys: CredentialKeys,
	retry: RetryPolicy,
	rate_limit: Option<RateLimitConfig>,
	cache: CacheConfig,
	user_agent: Option<String>,
}
impl ClientConfigBuilder {
	/// Creates a builder with default settings.
	pub fn new(base_url: impl Into<String>) -> Self {
		Self {
			base_url: base_url.into(),
			timeout: ClientConfig::DEFAULT_TIMEOUT,
			refresh_path: ClientConfig::DEFAULT_REFRESH_PATH.into(),
			keys: CredentialKeys::default(),
			retry: RetryPolicy::default(),
			rate_limit: None,
			cache: CacheConfig::default(),
			user_agent: None,
		}
	}

	/// Overrides the per-request timeout.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;

		self
	}

	/// Overrides the refresh endpoint path.
	pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
		self.refresh_path = path.into();

		self
	}

	/// Overrides the credential storage keys.
	pub fn credential_keys(mut self, keys: CredentialKeys) -> Self {
		self.keys = keys;

		self
	}

	/// Overrides the retry policy.
	pub fn retry(mut self, policy: RetryPolicy) -> Self {
		self.retry = policy;

		self
	}

	/// Enables the token-bucket rate limiter.
	pub fn rate_limit(mut self, limits: RateLimitConfig) -> Self {
		self.rate_limit = Some(limits);

		self
	}

	/// Overrides the cache settings.
	pub fn cache(mut self, cache: CacheConfig) -> Self {
		self.cache = cache;

		self
	}

	/// Sets the `User-Agent` used by the default transport.
	pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
		self.user_agent = Some(agent.into());

		self
	}

	/// Consumes the builder and validates the resulting configuration.
	pub fn build(self) -> Result<ClientConfig, ConfigError> {
		let base_url =
			Url::parse(&self.base_url).map_err(|source| ConfigError::InvalidBaseUrl { source })?;
		let config = ClientConfig {
			base_url,
			timeout: self.timeout,
			refresh_path: self.refresh_path,
			access_token_key: self.keys.access_token,
			refresh_token_key: self.keys.refresh_token,
			retry: self.retry,
			rate_limit: self.rate_limit,
			cache: self.cache,
			user_agent: self.user_agent,
		};

		config.validate()?;

		Ok(config)
	}
}

/// Serde helpers encoding [`Duration`] as integer milliseconds.
pub mod duration_ms {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use crate::_prelude::*;

	/// Serializes a duration as whole milliseconds.
	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
	}

	/// Deserializes whole milliseconds into a duration.
	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		u64::deserialize(deserializer).map(Duration::from_millis)
	}

	/// Same encoding for optional durations.
	pub mod option {
		// crates.io
		use serde::{Deserializer, Serializer};
		// self
		use crate::_prelude::*;

		/// Serializes an optional duration as whole milliseconds or `null`.
		pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
		where
			S: Serializer,
		{
			match value {
				Some(duration) => super::serialize(duration, serializer),
				None => serializer.serialize_none(),
			}
		}

		/// Deserializes whole milliseconds or `null`.
		pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
		where
			D: Deserializer<'de>,
		{
			Option::<u64>::deserialize(deserializer).map(|millis| millis.map(Duration::from_millis))
		}
	}
}

fn default_timeout() -> Duration {
	ClientConfig::DEFAULT_TIMEOUT
}

fn default_refresh_path() -> String {
	ClientConfig::DEFAULT_REFRESH_PATH.into()
}

fn default_access_token_key() -> String {
	CredentialKeys::default().access_token
}

fn default_refresh_token_key() -> String {
	CredentialKeys::default().refresh_token
}
