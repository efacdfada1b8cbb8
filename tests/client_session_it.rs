#![cfg(feature = "reqwest")]

mod common;

// std
use std::{
	env, fs, process,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};
// crates.io
use futures::future;
use httpmock::prelude::*;
use serde_json::{Value, json};
// self
use common::*;
use travel_api_client::{
	ErrorCode,
	auth::Secret,
	client::ReqwestApiClient,
	store::{FileStore, KeyValueStore},
};

#[tokio::test]
async fn expired_access_token_is_refreshed_and_the_call_replayed() {
	let server = MockServer::start_async().await;
	let (client, store) = build_client(config(&server));
	let stale = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/stays/7").header("authorization", "Bearer stale");
			then.status(401)
				.header("content-type", "application/json")
				.body(r#"{"success":false,"message":"Token expired"}"#);
		})
		.await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/v1/auth/refresh")
				.json_body(json!({ "refreshToken": "refresh-1" }));
			then.status(200)
				.header("content-type", "application/json")
				.body(envelope(json!({ "accessToken": "fresh", "refreshToken": "refresh-2" })));
		})
		.await;
	let fresh = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/stays/7").header("authorization", "Bearer fresh");
			then.status(200)
				.header("content-type", "application/json")
				.body(envelope(json!({ "id": 7, "city": "Lisbon" })));
		})
		.await;

	client.set_session("stale", Some(Secret::new("refresh-1"))).await;

	let stay: Value = client.get("/stays/7", &[]).await.expect("Replayed call should succeed.");

	assert_eq!(stay["city"], "Lisbon");
	stale.assert_calls_async(1).await;
	refresh.assert_calls_async(1).await;
	fresh.assert_calls_async(1).await;
	assert_eq!(store.get_now("auth_token").as_deref(), Some("fresh"));
	assert_eq!(store.get_now("refresh_token").as_deref(), Some("refresh-2"));
	assert_eq!(client.session().stats().successes(), 1);
}

#[tokio::test]
async fn concurrent_unauthorized_calls_share_one_refresh() {
	let server = MockServer::start_async().await;
	let (client, store) = build_client(config(&server));
	let stale = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/bookings").header("authorization", "Bearer stale");
			then.status(401).body(r#"{"message":"Token expired"}"#);
		})
		.await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/v1/auth/refresh")
				.json_body(json!({ "refreshToken": "refresh-1" }));
			then.status(200)
				.delay(Duration::from_millis(250))
				.header("content-type", "application/json")
				.body(envelope(json!({ "accessToken": "fresh", "refreshToken": "refresh-2" })));
		})
		.await;
	let fresh = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/bookings").header("authorization", "Bearer fresh");
			then.status(200)
				.header("content-type", "application/json")
				.body(envelope(json!([{ "id": 1 }, { "id": 2 }])));
		})
		.await;

	client.set_session("stale", Some(Secret::new("refresh-1"))).await;

	let calls = (0..5).map(|_| client.get::<Vec<Value>>("/bookings", &[]));
	let results = future::join_all(calls).await;

	for result in results {
		assert_eq!(result.expect("Every caller should see the replayed response.").len(), 2);
	}

	stale.assert_calls_async(5).await;
	refresh.assert_calls_async(1).await;
	fresh.assert_calls_async(5).await;
	assert_eq!(client.session().stats().attempts(), 1);
	assert_eq!(client.session().stats().coalesced(), 4);
	assert_eq!(store.get_now("refresh_token").as_deref(), Some("refresh-2"));
}

#[tokio::test]
async fn rejected_refresh_ends_the_session() {
	let server = MockServer::start_async().await;
	let (client, store) = build_client(config(&server));
	let logouts = Arc::new(AtomicUsize::new(0));
	let stale = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/profile");
			then.status(401).body(r#"{"message":"Token expired"}"#);
		})
		.await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/v1/auth/refresh");
			then.status(401).body(r#"{"message":"Refresh token revoked"}"#);
		})
		.await;

	{
		let logouts = logouts.clone();

		client.on_logout(move || {
			logouts.fetch_add(1, Ordering::SeqCst);
		});
	}

	client.set_session("stale", Some(Secret::new("revoked"))).await;

	let err = client.get::<Value>("/profile", &[]).await.expect_err("Call should fail.");

	assert_eq!(err.code(), ErrorCode::Http(401));
	assert_eq!(err.message(), "Token expired");
	assert_eq!(err.path(), Some("/profile"));
	stale.assert_calls_async(1).await;
	refresh.assert_calls_async(1).await;
	assert_eq!(logouts.load(Ordering::SeqCst), 1);
	assert!(store.is_empty());
	assert!(!client.session().has_refresh_token());
}

#[tokio::test]
async fn unauthorized_without_refresh_token_does_not_call_the_refresh_endpoint() {
	let server = MockServer::start_async().await;
	let (client, _) = build_client(config(&server));
	let unauthorized = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/profile");
			then.status(401).body(r#"{"message":"Sign in required"}"#);
		})
		.await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/v1/auth/refresh");
			then.status(200);
		})
		.await;

	let err = client.get::<Value>("/profile", &[]).await.expect_err("Call should fail.");

	assert_eq!(err.code(), ErrorCode::Http(401));
	unauthorized.assert_calls_async(1).await;
	refresh.assert_calls_async(0).await;
}

#[tokio::test]
async fn file_backed_sessions_survive_a_new_client() {
	let server = MockServer::start_async().await;
	let path = env::temp_dir().join(format!("travel_api_session_{}.json", process::id()));

	let _ = fs::remove_file(&path);

	let profile = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/profile").header("authorization", "Bearer persisted");
			then.status(200)
				.header("content-type", "application/json")
				.body(envelope(json!({ "name": "Ada" })));
		})
		.await;

	{
		let store: Arc<dyn KeyValueStore> =
			Arc::new(FileStore::open(&path).expect("File store should open."));
		let client = build_client_with_store(config(&server), store);

		client.set_session("persisted", Some(Secret::new("refresh-1"))).await;
	}

	let store: Arc<dyn KeyValueStore> =
		Arc::new(FileStore::open(&path).expect("File store should reopen."));
	let settings =
		config(&server).build().expect("Integration test configuration should validate.");
	let client =
		ReqwestApiClient::connect(settings, store).await.expect("Client should connect.");
	let me: Value = client.get("/profile", &[]).await.expect("Profile should load.");

	assert_eq!(me["name"], "Ada");
	assert!(client.session().has_refresh_token());
	profile.assert_calls_async(1).await;

	let _ = fs::remove_file(&path);
}
