//! Shared fixtures for the reqwest-backed integration tests.

#![allow(dead_code)]

// std
use std::{sync::Arc, time::Duration};
// crates.io
use httpmock::prelude::*;
use serde_json::{Value, json};
// self
use travel_api_client::{
	client::ReqwestApiClient,
	config::{ClientConfig, ClientConfigBuilder},
	retry::RetryPolicy,
	store::{KeyValueStore, MemoryStore},
};

/// Config pointed at the mock server's `/v1` prefix with retries disabled.
pub fn config(server: &MockServer) -> ClientConfigBuilder {
	ClientConfig::builder(server.url("/v1"))
		.timeout(Duration::from_secs(5))
		.retry(RetryPolicy::disabled())
}

/// Builds a reqwest client over a fresh in-memory store.
pub fn build_client(config: ClientConfigBuilder) -> (ReqwestApiClient, Arc<MemoryStore>) {
	let store = Arc::new(MemoryStore::default());
	let client = build_client_with_store(config, store.clone());

	(client, store)
}

/// Builds a reqwest client over the provided store.
pub fn build_client_with_store(
	config: ClientConfigBuilder,
	store: Arc<dyn KeyValueStore>,
) -> ReqwestApiClient {
	let config = config.build().expect("Integration test configuration should validate.");

	ReqwestApiClient::new(config, store).expect("Reqwest client should build.")
}

/// Success envelope wrapping `data`.
pub fn envelope(data: Value) -> String {
	json!({ "success": true, "data": data, "timestamp": "2026-10-18T09:00:00Z" }).to_string()
}
