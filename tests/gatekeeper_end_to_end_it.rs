#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
// self
use api_gatekeeper::{_preludet::*, config::GatekeeperConfig, dispatch::ApiCall};

#[tokio::test]
async fn expiring_token_with_two_concurrent_calls_refreshes_once() {
	let server = MockServer::start_async().await;
	let stack = build_reqwest_test_stack(
		&server.url("/api/"),
		&server.url("/oauth/token"),
		"client-e2e",
		GatekeeperConfig::default(),
	);

	// Token expires in 10s against a 30s margin: both calls must refresh-or-wait.
	stack
		.manager
		.set_tokens("access-short", Some("refresh-short".into()), "Bearer", Duration::seconds(10))
		.await
		.expect("Seeding the expiring token should succeed.");

	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token").body_includes("grant_type=refresh_token");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"access_token":"access-fresh","refresh_token":"refresh-fresh","expires_in":1800}"#);
		})
		.await;
	let api_mock = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/api/companies")
				.header("authorization", "Bearer access-fresh");
			then.status(200)
				.header("content-type", "application/json")
				.header("x-ratelimit-remaining", "198")
				.body(r#"[{"id":1},{"id":2}]"#);
		})
		.await;
	let dispatcher = Arc::new(stack.dispatcher);
	let handles: Vec<_> = (0..2)
		.map(|_| {
			let dispatcher = dispatcher.clone();

			tokio::spawn(async move { dispatcher.dispatch(ApiCall::get("companies")).await })
		})
		.collect();

	for handle in handles {
		let response = handle
			.await
			.expect("Dispatch task should not panic.")
			.expect("Both concurrent calls should succeed.");

		assert!(response.is_success());

		let companies: Vec<serde_json::Value> =
			response.json().expect("Response body should decode.");

		assert_eq!(companies.len(), 2);
	}

	assert_eq!(token_mock.hits_async().await, 1, "Exactly one refresh for both callers.");
	assert_eq!(api_mock.hits_async().await, 2, "Both calls reach the API with the new token.");

	let stats = dispatcher.stats();

	assert_eq!(stats.requests_made, 2);
	assert!(dispatcher.is_authenticated().await.expect("is_authenticated should succeed."));
}
