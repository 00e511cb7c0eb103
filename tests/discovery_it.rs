#![cfg(all(feature = "reqwest", feature = "test"))]

// crates.io
use httpmock::prelude::*;
// self
use auth_provider_broker::{
	_preludet::*,
	oauth::{
		CandidateError, discover_authorization_server_metadata, discover_protected_resource_metadata,
		oauth2::http::HeaderMap,
	},
};

fn url(value: &str) -> Url {
	Url::parse(value).expect("Mock URL should parse.")
}

fn server_metadata(server: &MockServer) -> String {
	serde_json::json!({
		"issuer": server.url("/tenant"),
		"authorization_endpoint": server.url("/authorize"),
		"token_endpoint": server.url("/token"),
		"registration_endpoint": server.url("/register"),
	})
	.to_string()
}

#[tokio::test]
async fn protected_resource_discovery_falls_back_from_path_to_root() {
	let server = MockServer::start_async().await;
	let client = test_reqwest_http_client();
	let target = url(&server.url("/mcp"));
	let path_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/.well-known/oauth-protected-resource/mcp");
			then.status(404);
		})
		.await;
	let root_mock = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/.well-known/oauth-protected-resource")
				.header("accept", "application/json");
			then.status(200).header("content-type", "application/json").body(
				serde_json::json!({
					"resource": server.url("/mcp"),
					"resource_name": "Mock MCP",
					"authorization_servers": [server.url("/tenant")],
				})
				.to_string(),
			);
		})
		.await;
	let metadata = discover_protected_resource_metadata(&client, &target, None, &HeaderMap::new())
		.await
		.expect("Root candidate should be accepted.");

	path_mock.assert_async().await;
	root_mock.assert_async().await;

	assert_eq!(metadata.resource_name.as_deref(), Some("Mock MCP"));
	assert_eq!(metadata.authorization_servers, Some(vec![server.url("/tenant")]));
}

#[tokio::test]
async fn mismatched_resources_are_rejected_with_every_attempt_listed() {
	let server = MockServer::start_async().await;
	let client = test_reqwest_http_client();
	let target = url(&server.url("/mcp"));

	server
		.mock_async(|when, then| {
			when.method(GET).path("/.well-known/oauth-protected-resource/mcp");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"resource":"https://elsewhere.example.com/mcp"}"#);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/.well-known/oauth-protected-resource");
			then.status(500).body("boom");
		})
		.await;

	let err = discover_protected_resource_metadata(&client, &target, None, &HeaderMap::new())
		.await
		.expect_err("Mismatched metadata should be rejected.");
	let Error::DiscoveryExhausted { attempts, .. } = &err else {
		panic!("Expected an aggregated discovery failure, got {err:?}.");
	};

	assert_eq!(attempts.len(), 2);
	assert!(matches!(attempts[0], CandidateError::ResourceMismatch { .. }));
	assert!(matches!(attempts[1], CandidateError::Status { status: 500, .. }));

	let message = err.to_string();

	assert!(message.contains("https://elsewhere.example.com/mcp"));
	assert!(message.contains("boom"));
}

#[tokio::test]
async fn explicit_metadata_urls_are_tried_alone_and_headers_stay_on_origin() {
	let server = MockServer::start_async().await;
	let client = test_reqwest_http_client();
	let target = url(&server.url("/mcp"));
	let explicit = url(&server.url("/custom/prm"));
	let mut headers = HeaderMap::new();

	headers.insert("x-session", "abc".parse().expect("Header value should parse."));

	let explicit_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/custom/prm").header("x-session", "abc");
			then.status(200)
				.header("content-type", "application/json")
				.body(serde_json::json!({ "resource": server.url("/mcp") }).to_string());
		})
		.await;
	let well_known = server
		.mock_async(|when, then| {
			when.method(GET).path_includes("/.well-known/");
			then.status(500);
		})
		.await;
	let metadata =
		discover_protected_resource_metadata(&client, &target, Some(&explicit), &headers)
			.await
			.expect("Explicit candidate should be accepted.");

	explicit_mock.assert_async().await;
	well_known.assert_calls_async(0).await;

	assert_eq!(metadata.resource, server.url("/mcp"));
}

#[tokio::test]
async fn authorization_server_discovery_follows_the_fallback_order() {
	let server = MockServer::start_async().await;
	let client = test_reqwest_http_client();
	let issuer = url(&server.url("/tenant"));
	let oauth_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/.well-known/oauth-authorization-server/tenant");
			then.status(404);
		})
		.await;
	let openid_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/.well-known/openid-configuration/tenant");
			then.status(200).header("content-type", "application/json").body(server_metadata(&server));
		})
		.await;
	let suffix_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/tenant/.well-known/openid-configuration");
			then.status(200).header("content-type", "application/json").body(server_metadata(&server));
		})
		.await;
	let metadata = discover_authorization_server_metadata(&client, &issuer, &HeaderMap::new())
		.await
		.expect("OpenID candidate should be accepted.");

	oauth_mock.assert_async().await;
	openid_mock.assert_async().await;
	suffix_mock.assert_calls_async(0).await;

	assert_eq!(metadata.issuer, server.url("/tenant"));
	assert_eq!(metadata.registration_endpoint, Some(server.url("/register")));
}

#[tokio::test]
async fn malformed_server_metadata_counts_as_a_failed_attempt() {
	let server = MockServer::start_async().await;
	let client = test_reqwest_http_client();
	let issuer = url(&server.url("/"));

	server
		.mock_async(|when, then| {
			when.method(GET).path("/.well-known/oauth-authorization-server");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"token_endpoint":"ftp://example.com/token"}"#);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/.well-known/openid-configuration");
			then.status(404);
		})
		.await;

	let err = discover_authorization_server_metadata(&client, &issuer, &HeaderMap::new())
		.await
		.expect_err("Every candidate should fail.");
	let Error::DiscoveryExhausted { attempts, .. } = err else {
		panic!("Expected an aggregated discovery failure.");
	};

	assert_eq!(attempts.len(), 2);
	assert!(matches!(attempts[0], CandidateError::Malformed { .. }));
}
