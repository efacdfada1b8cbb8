//! Resilient API client core: single-flight credential refresh, classified retries, token-bucket
//! throttling, and TTL response caching behind one async client.
//!
//! # Overview
//!
//! [`ApiClient`](client::ApiClient) sends every call through the same pipeline: retry policy,
//! rate limiter admission, request decoration (`X-Request-ID`, bearer token), one transport call,
//! and a single refresh-then-replay when the server answers 401. Failures surface as the
//! normalized [`Error`] with an [`ErrorCode`] from a small fixed vocabulary.
//!
//! Credentials and cached responses live behind the [`KeyValueStore`](store::KeyValueStore)
//! seam; HTTP lives behind [`HttpTransport`](http::HttpTransport), with a reqwest implementation
//! enabled by default.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod cache;
pub mod classify;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod http;
pub mod obs;
pub mod rate_limit;
pub mod retry;
pub mod store;

mod _prelude {
	pub use std::{
		collections::BTreeMap,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
		time::Duration,
	};

	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::OffsetDateTime;
	pub use url::Url;

	pub use crate::error::{Error, ErrorCode, Result};
}

pub use error::{Error, ErrorCode, Result};
#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
