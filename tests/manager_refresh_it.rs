#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
// self
use api_gatekeeper::{
	_preludet::*,
	clock::Clock,
	config::GatekeeperConfig,
	error::AuthError,
	lock::RefreshLock,
	store::{TokenCache, TokenStore},
};

const REFRESH_RESPONSE: &str = r#"{"access_token":"access-new","refresh_token":"refresh-new","token_type":"bearer","expires_in":1800}"#;

async fn build_stack(server: &MockServer) -> TestStack {
	let stack = build_reqwest_test_stack(
		&server.url("/api/"),
		&server.url("/oauth/token"),
		"client-it",
		GatekeeperConfig::default(),
	);

	stack
		.manager
		.set_tokens("access-old", Some("refresh-old".into()), "Bearer", Duration::seconds(10))
		.await
		.expect("Seeding the expiring token should succeed.");

	stack
}

#[tokio::test]
async fn concurrent_callers_share_a_single_refresh() {
	let server = MockServer::start_async().await;
	let stack = build_stack(&server).await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token").body_includes("grant_type=refresh_token");
			then.status(200).header("content-type", "application/json").body(REFRESH_RESPONSE);
		})
		.await;
	let handles: Vec<_> = (0..8)
		.map(|_| {
			let manager = stack.manager.clone();

			tokio::spawn(async move { manager.get_valid_access_token().await })
		})
		.collect();

	for handle in handles {
		let token = handle
			.await
			.expect("Caller task should not panic.")
			.expect("Every caller should receive a refreshed token.");

		assert_eq!(token, "access-new");
	}

	assert_eq!(mock.hits_async().await, 1, "Exactly one remote refresh should fire.");
	assert_eq!(stack.manager.metrics().attempts(), 1);
	assert_eq!(stack.manager.metrics().successes(), 1);
}

#[tokio::test]
async fn failed_refresh_releases_the_lock_before_surfacing() {
	let server = MockServer::start_async().await;
	let stack = build_stack(&server).await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(500)
				.header("content-type", "application/json")
				.body(r#"{"error":"server_error"}"#);
		})
		.await;
	let err = stack
		.manager
		.get_valid_access_token()
		.await
		.expect_err("Rejected refresh should surface.");

	assert!(matches!(err, Error::Auth(AuthError::RefreshFailed { status: Some(500), .. })));
	mock.assert_async().await;

	// A second caller must be able to take the lock immediately.
	let lease = stack
		.lock
		.try_acquire("oauth-refresh", Duration::seconds(10))
		.await
		.expect("Lock acquire should succeed.");

	assert!(lease.is_some(), "Failed refresh must not leave the lock held.");
}

#[tokio::test]
async fn waiter_times_out_when_the_lock_never_frees() {
	let server = MockServer::start_async().await;
	let stack = build_stack(&server).await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200).header("content-type", "application/json").body(REFRESH_RESPONSE);
		})
		.await;
	// Simulate another process holding the refresh lock well past our budget.
	let _held = stack
		.lock
		.try_acquire("oauth-refresh", Duration::minutes(5))
		.await
		.expect("Lock acquire should succeed.")
		.expect("External holder should win the lock.");
	let before = stack.clock.now();
	let err = stack
		.manager
		.get_valid_access_token()
		.await
		.expect_err("A waiter with no token to serve should time out.");

	assert!(matches!(err, Error::Auth(AuthError::RefreshTimeout { .. })));
	assert_eq!(mock.hits_async().await, 0, "A losing waiter must not call the endpoint.");
	assert!(
		stack.clock.now() - before >= Duration::seconds(10),
		"The waiter should exhaust the lock and poll budgets before failing.",
	);
	assert_eq!(stack.manager.metrics().timeouts(), 1);
}

#[tokio::test]
async fn waiter_adopts_a_token_refreshed_by_another_process() {
	let server = MockServer::start_async().await;
	let stack = build_stack(&server).await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200).header("content-type", "application/json").body(REFRESH_RESPONSE);
		})
		.await;
	// Another process holds the lock and refreshes store-first; this process
	// still has the stale entry in its local cache.
	let _held = stack
		.lock
		.try_acquire("oauth-refresh", Duration::minutes(5))
		.await
		.expect("Lock acquire should succeed.")
		.expect("External holder should win the lock.");
	let peer_record = api_gatekeeper::auth::TokenRecord::builder()
		.access_token("access-peer")
		.refresh_token("refresh-peer")
		.issued_at(stack.clock.now())
		.expires_in(Duration::seconds(1800))
		.build()
		.expect("Peer record fixture should build successfully.");

	stack.store.save(peer_record).await.expect("Peer store write should succeed.");

	let token = stack
		.manager
		.get_valid_access_token()
		.await
		.expect("The waiter should adopt the peer's fresh token.");

	assert_eq!(token, "access-peer");
	assert_eq!(mock.hits_async().await, 0, "The waiter must not refresh on its own.");

	// The adopted record lands back in the local cache.
	let cached = stack
		.cache
		.get("gatekeeper.token")
		.await
		.expect("Cache get should succeed.")
		.expect("Adopted record should be cached.");

	assert_eq!(cached.access_token.expose(), "access-peer");
}

#[tokio::test]
async fn authorization_code_exchange_stores_the_first_record() {
	let server = MockServer::start_async().await;
	let stack = build_reqwest_test_stack(
		&server.url("/api/"),
		&server.url("/oauth/token"),
		"client-it",
		GatekeeperConfig::default(),
	);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token").body_includes("grant_type=authorization_code");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"access_token":"access-first","refresh_token":"refresh-first","expires_in":3600}"#);
		})
		.await;

	assert!(
		!stack.manager.is_authenticated().await.expect("is_authenticated should succeed."),
		"A fresh stack starts unauthenticated.",
	);

	let redirect =
		Url::parse("https://app.example.com/callback").expect("Redirect URL should parse.");
	let record = stack
		.manager
		.exchange_authorization_code("auth-code-1", &redirect)
		.await
		.expect("Code exchange should succeed.");

	mock.assert_async().await;

	assert_eq!(record.access_token.expose(), "access-first");
	assert!(stack.manager.is_authenticated().await.expect("is_authenticated should succeed."));

	let stored = stack
		.store
		.load()
		.await
		.expect("Store load should succeed.")
		.expect("Exchange should persist a durable record.");

	assert_eq!(stored.access_token.expose(), "access-first");
}
