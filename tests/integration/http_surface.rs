//! Integration tests for the gateway, admin, and authentication HTTP surfaces.

// std
use std::{
	sync::{Arc, LazyLock},
	time::Duration,
};
// crates.io
use axum::{
	Router,
	body::Body,
	http::{HeaderMap, Request, StatusCode, header},
};
use cache_gateway::{
	App, GatewayConfig, Principal, Result, SigningKeys,
	config::OriginConfig,
	server::{auth_router, gateway_router},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

static KEYS: LazyLock<Arc<SigningKeys>> =
	LazyLock::new(|| Arc::new(SigningKeys::derive("http-surface").expect("keys")));

struct Reply {
	status: StatusCode,
	headers: HeaderMap,
	body: Value,
}

async fn app(server: &MockServer, access_secs: u64) -> Result<App> {
	let _ = tracing_subscriber::fmt::try_init();

	let mut config = GatewayConfig::new("http-surface", OriginConfig::new(server.uri())?);

	config.metadata.database_url = "sqlite::memory:".into();
	config.gateway.protected_prefixes = vec!["/private".into()];
	config.jwt.access_token_validity_in_seconds = access_secs;
	config.users = vec![Principal { email: "ada@example.com".into(), authorities: Vec::new() }];

	App::bootstrap_with_keys(config, KEYS.clone()).await
}

async fn call(router: &Router, request: Request<Body>) -> Reply {
	let response = router.clone().oneshot(request).await.expect("router is infallible");
	let status = response.status();
	let headers = response.headers().clone();
	let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
	let body = serde_json::from_slice(&bytes).expect("json envelope");

	Reply { status, headers, body }
}

fn request(method: &str, uri: &str) -> Request<Body> {
	Request::builder().method(method).uri(uri).body(Body::empty()).expect("request")
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
	Request::builder()
		.method(method)
		.uri(uri)
		.header(header::CONTENT_TYPE, "application/json")
		.body(Body::from(body.to_string()))
		.expect("request")
}

fn bearer(method: &str, uri: &str, token: &str) -> Request<Body> {
	Request::builder()
		.method(method)
		.uri(uri)
		.header(header::AUTHORIZATION, format!("Bearer {token}"))
		.body(Body::empty())
		.expect("request")
}

#[tokio::test]
async fn reads_are_enveloped_and_tagged() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/users/42"))
		.respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id":42}"#))
		.expect(1)
		.mount(&server)
		.await;

	let app = app(&server, 60).await?;
	let router = gateway_router(app);
	let cold = call(&router, request("GET", "/users/42")).await;
	let warm = call(&router, request("GET", "/users/42?")).await;

	assert_eq!(cold.status, StatusCode::OK);
	assert_eq!(cold.headers["x-cache"], "MISS");
	assert_eq!(warm.headers["x-cache"], "HIT");
	assert_eq!(warm.body, json!({ "status": 200, "result": { "id": 42 } }));

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn writes_are_forwarded_then_invalidate() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/orders/9"))
		.respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"pending"}"#))
		.expect(2)
		.mount(&server)
		.await;
	Mock::given(method("PUT"))
		.and(path("/orders/9"))
		.respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"shipped"}"#))
		.expect(1)
		.mount(&server)
		.await;

	let app = app(&server, 60).await?;
	let router = gateway_router(app);

	call(&router, request("GET", "/orders/9")).await;

	let written =
		call(&router, json_request("PUT", "/orders/9", json!({ "status": "shipped" }))).await;
	let reread = call(&router, request("GET", "/orders/9")).await;

	assert_eq!(written.body, json!({ "status": 200, "result": { "status": "shipped" } }));
	assert_eq!(reread.headers["x-cache"], "MISS");

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn origin_failures_use_error_envelopes() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/down"))
		.respond_with(ResponseTemplate::new(503))
		.mount(&server)
		.await;

	let app = app(&server, 60).await?;
	let reply = call(&gateway_router(app), request("GET", "/down")).await;

	assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
	assert_eq!(reply.body, json!({ "status": 502, "message": "Origin responded with 503." }));

	Ok(())
}

#[tokio::test]
async fn protected_paths_signal_refresh_only_for_expired_tokens() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/private/report"))
		.respond_with(ResponseTemplate::new(200).set_body_string("\"report\""))
		.expect(1)
		.mount(&server)
		.await;

	let app = app(&server, 1).await?;
	let pair = app.tokens().issue("ada@example.com", Vec::new())?;
	let router = gateway_router(app);
	let anonymous = call(&router, request("GET", "/private/report")).await;
	let allowed = call(&router, bearer("GET", "/private/report", &pair.access_token)).await;

	assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
	assert!(!anonymous.headers.contains_key("x-token-refresh"));
	assert!(!anonymous.headers.contains_key(header::WWW_AUTHENTICATE));
	assert_eq!(allowed.body, json!({ "status": 200, "result": "report" }));

	tokio::time::sleep(Duration::from_millis(2_100)).await;

	let expired = call(&router, bearer("GET", "/private/report", &pair.access_token)).await;

	assert_eq!(expired.status, StatusCode::UNAUTHORIZED);
	assert_eq!(expired.headers["x-token-refresh"], "required");
	assert_eq!(
		expired.headers[header::WWW_AUTHENTICATE],
		r#"Bearer error="invalid_token", error_description="token expired""#
	);
	assert_eq!(expired.body, json!({ "status": 401, "message": "Access token expired." }));

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn metadata_administration() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.respond_with(ResponseTemplate::new(200).set_body_string("[]"))
		.mount(&server)
		.await;

	let app = app(&server, 60).await?;
	let router = gateway_router(app);

	call(&router, request("GET", "/api/users/1")).await;

	let upserted = call(
		&router,
		json_request("PUT", "/admin/metadata", json!({ "url": "/api", "ttl-seconds": 10 })),
	)
	.await;

	assert_eq!(upserted.status, StatusCode::OK);
	assert_eq!(upserted.body["result"]["url-pattern"], "/api");
	assert_eq!(upserted.body["result"]["ttl-seconds"], 10);
	// The prefix was invalidated so the new TTL applies on the next miss.
	assert_eq!(call(&router, request("GET", "/api/users/1")).await.headers["x-cache"], "MISS");

	let single = call(&router, request("GET", "/admin/metadata?url=/api")).await;
	let listed = call(&router, request("GET", "/admin/metadata")).await;
	let missing = call(&router, request("GET", "/admin/metadata?url=/nope")).await;

	assert_eq!(single.body["result"]["ttl-seconds"], 10);
	assert_eq!(listed.body["result"].as_array().map(Vec::len), Some(1));
	assert_eq!(missing.status, StatusCode::NOT_FOUND);

	let rejected = call(
		&router,
		json_request("PUT", "/admin/metadata", json!({ "url": "/api", "ttl-seconds": 0 })),
	)
	.await;

	assert_eq!(rejected.status, StatusCode::BAD_REQUEST);

	let deleted = call(&router, request("DELETE", "/admin/metadata?url=/api")).await;
	let deleted_again = call(&router, request("DELETE", "/admin/metadata?url=/api")).await;

	assert_eq!(deleted.status, StatusCode::OK);
	assert_eq!(deleted_again.status, StatusCode::NOT_FOUND);

	Ok(())
}

#[tokio::test]
async fn cache_administration() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.respond_with(ResponseTemplate::new(200).set_body_string("1"))
		.mount(&server)
		.await;

	let app = app(&server, 60).await?;
	let router = gateway_router(app);

	call(&router, request("GET", "/items/1")).await;
	call(&router, request("GET", "/items/2")).await;

	let refreshed = call(&router, request("POST", "/admin/cache/refresh?path=/items/1")).await;

	assert_eq!(refreshed.headers["x-cache"], "MISS");
	assert_eq!(call(&router, request("GET", "/items/1")).await.headers["x-cache"], "HIT");

	let stats = call(&router, request("GET", "/admin/cache/stats")).await;

	assert_eq!(stats.body["result"]["hits"], 1);
	assert_eq!(stats.body["result"]["misses"], 2);
	assert_eq!(stats.body["result"]["stores"], 3);
	assert_eq!(stats.body["result"]["in-flight"], 0);
	assert!(stats.body["result"]["hit-rate"].as_f64().is_some_and(|rate| rate > 0.3));

	let invalidated = call(&router, request("DELETE", "/admin/cache?prefix=/items")).await;

	assert_eq!(invalidated.body["result"]["invalidated"], 2);
	assert_eq!(call(&router, request("GET", "/items/2")).await.headers["x-cache"], "MISS");
	assert_eq!(
		call(&router, request("DELETE", "/admin/cache")).await.status,
		StatusCode::BAD_REQUEST
	);

	Ok(())
}

#[tokio::test]
async fn auth_endpoints_cover_the_token_lifecycle() -> Result<()> {
	let server = MockServer::start().await;
	let app = app(&server, 60).await?;
	let router = auth_router(app.clone());
	let issued = call(
		&router,
		json_request("POST", "/auth/issue", json!({ "email": "ada@example.com", "roles": ["ops"] })),
	)
	.await;
	let access = issued.body["result"]["access-token"].as_str().unwrap_or_default().to_owned();
	let refresh = issued.body["result"]["refresh-token"].as_str().unwrap_or_default().to_owned();

	assert_eq!(issued.status, StatusCode::OK);
	assert!(!access.is_empty() && !refresh.is_empty());

	let renewed = call(
		&router,
		json_request(
			"POST",
			"/auth/refresh",
			json!({ "access-token": access, "refresh-token": refresh }),
		),
	)
	.await;

	assert_eq!(renewed.status, StatusCode::OK);
	assert!(renewed.body["result"]["access-token"].is_string());

	let logged_out =
		call(&router, json_request("POST", "/auth/logout", json!({ "access-token": access }))).await;

	assert_eq!(logged_out.status, StatusCode::OK);
	assert!(app.gateway().tokens().check_access(&access).await.is_err());

	let revoked =
		call(&router, json_request("POST", "/auth/revoke", json!({ "refresh-token": refresh }))).await;
	let refused = call(
		&router,
		json_request(
			"POST",
			"/auth/refresh",
			json!({ "access-token": access, "refresh-token": refresh }),
		),
	)
	.await;

	assert_eq!(revoked.status, StatusCode::OK);
	assert_eq!(refused.status, StatusCode::UNAUTHORIZED);
	assert_eq!(refused.body, json!({ "status": 401, "message": "Invalid token." }));

	let key = call(&router, request("GET", "/auth/public-key")).await;

	assert_eq!(key.body["result"], app.tokens().public_key());

	let malformed = call(&router, json_request("POST", "/auth/issue", json!({ "roles": [] }))).await;

	assert_eq!(malformed.status, StatusCode::BAD_REQUEST);

	Ok(())
}
