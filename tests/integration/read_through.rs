//! Integration tests for read-through caching, single-flight, TTL policy, and write invalidation.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use bytes::Bytes;
use cache_gateway::{
	CacheEngine, CacheKey, CacheSource, MemoryStore, MetadataStore, OriginClient, Result,
	SqliteMetadataStore,
	config::{CacheConfig, OriginConfig},
};
use http::{HeaderMap, Method};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{body_string, method, path},
};

struct Harness {
	engine: CacheEngine,
	metadata: Arc<SqliteMetadataStore>,
}

async fn harness(server: &MockServer, max_entry_bytes: usize) -> Result<Harness> {
	let _ = tracing_subscriber::fmt::try_init();

	let store = Arc::new(MemoryStore::new(4 * 1_048_576));
	let metadata = Arc::new(SqliteMetadataStore::in_memory(Duration::from_secs(60)).await?);
	let origin = OriginClient::new(&OriginConfig::new(server.uri())?)?;
	let config = CacheConfig { max_entry_bytes, ..CacheConfig::default() };
	let engine = CacheEngine::new(store, metadata.clone(), origin, &config);

	Ok(Harness { engine, metadata })
}

#[tokio::test]
async fn cold_read_then_warm_read() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/users/42"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_string(r#"{"id":42}"#)
				.insert_header("content-type", "application/json"),
		)
		.expect(1)
		.mount(&server)
		.await;

	let Harness { engine, .. } = harness(&server, 1_024).await?;
	let cold = engine.read("/users/42", None).await?;
	let warm = engine.read("/users/42", None).await?;

	assert_eq!(cold.source, CacheSource::Miss);
	assert_eq!(cold.response.status, 200);
	assert_eq!(warm.source, CacheSource::Hit);
	assert_eq!(warm.response.body.as_ref(), br#"{"id":42}"#);
	assert_eq!(warm.response.header("Content-Type"), Some("application/json"));

	let entry = engine.lookup(&CacheKey::new("/users/42", None)).await?;

	assert_eq!(entry.expires_at - entry.created_at, chrono::TimeDelta::seconds(60));

	server.verify().await;

	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_misses_share_one_origin_call() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/products/7"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_string(r#"{"id":7}"#)
				.set_delay(Duration::from_millis(200)),
		)
		.expect(1)
		.mount(&server)
		.await;

	let Harness { engine, .. } = harness(&server, 1_024).await?;
	let handles = (0..100)
		.map(|_| {
			let engine = engine.clone();

			tokio::spawn(async move { engine.read("/products/7", None).await })
		})
		.collect::<Vec<_>>();

	for handle in handles {
		let read = handle.await.expect("task")?;

		assert_eq!(read.response.body.as_ref(), br#"{"id":7}"#);
	}

	let snapshot = engine.metrics().snapshot();

	assert_eq!(snapshot.misses + snapshot.hits, 100);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn successful_write_invalidates_the_path() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/orders/9"))
		.respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"pending"}"#))
		.up_to_n_times(1)
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("PUT"))
		.and(path("/orders/9"))
		.and(body_string(r#"{"status":"shipped"}"#))
		.respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"shipped"}"#))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/orders/9"))
		.respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"shipped"}"#))
		.expect(1)
		.mount(&server)
		.await;

	let Harness { engine, .. } = harness(&server, 1_024).await?;
	let before = engine.read("/orders/9", None).await?;

	assert_eq!(before.response.body.as_ref(), br#"{"status":"pending"}"#);
	assert_eq!(engine.read("/orders/9", None).await?.source, CacheSource::Hit);

	let written = engine
		.forward_mutation(
			Method::PUT,
			"/orders/9",
			None,
			&HeaderMap::new(),
			Bytes::from_static(br#"{"status":"shipped"}"#),
		)
		.await?;

	assert_eq!(written.status, 200);

	let after = engine.read("/orders/9", None).await?;

	assert_eq!(after.source, CacheSource::Miss);
	assert_eq!(after.response.body.as_ref(), br#"{"status":"shipped"}"#);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn rejected_write_leaves_cache_untouched() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/orders/10"))
		.respond_with(ResponseTemplate::new(200).set_body_string("v1"))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("DELETE"))
		.and(path("/orders/10"))
		.respond_with(ResponseTemplate::new(409).set_body_string("conflict"))
		.expect(1)
		.mount(&server)
		.await;

	let Harness { engine, .. } = harness(&server, 1_024).await?;

	engine.read("/orders/10", None).await?;

	let rejected = engine
		.forward_mutation(Method::DELETE, "/orders/10", None, &HeaderMap::new(), Bytes::new())
		.await?;

	assert_eq!(rejected.status, 409);
	assert_eq!(engine.read("/orders/10", None).await?.source, CacheSource::Hit);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn longest_metadata_prefix_sets_the_ttl() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.respond_with(ResponseTemplate::new(200).set_body_string("ok"))
		.mount(&server)
		.await;

	let Harness { engine, metadata } = harness(&server, 1_024).await?;

	metadata.upsert("/api", 10).await?;
	metadata.upsert("/api/users", 30).await?;

	assert_eq!(metadata.get_ttl("/api/users/1").await?, Duration::from_secs(30));
	assert_eq!(metadata.get_ttl("/api/orders").await?, Duration::from_secs(10));
	assert_eq!(metadata.get_ttl("/other").await?, Duration::from_secs(60));

	engine.read("/api/users/1", None).await?;
	engine.read("/api/orders", None).await?;

	let users = engine.lookup(&CacheKey::new("/api/users/1", None)).await?;
	let orders = engine.lookup(&CacheKey::new("/api/orders", None)).await?;

	assert_eq!(users.expires_at - users.created_at, chrono::TimeDelta::seconds(30));
	assert_eq!(orders.expires_at - orders.created_at, chrono::TimeDelta::seconds(10));

	Ok(())
}

#[tokio::test]
async fn one_second_ttl_expires() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/short"))
		.respond_with(ResponseTemplate::new(200).set_body_string("tick"))
		.expect(2)
		.mount(&server)
		.await;

	let Harness { engine, metadata } = harness(&server, 1_024).await?;

	metadata.upsert("/short", 1).await?;

	assert_eq!(engine.read("/short", None).await?.source, CacheSource::Miss);
	assert_eq!(engine.read("/short", None).await?.source, CacheSource::Hit);

	tokio::time::sleep(Duration::from_millis(2_100)).await;

	assert_eq!(engine.read("/short", None).await?.source, CacheSource::Miss);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn entry_size_limit_is_inclusive() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/exact"))
		.respond_with(ResponseTemplate::new(200).set_body_string("0123456789abcdef"))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/over"))
		.respond_with(ResponseTemplate::new(200).set_body_string("0123456789abcdefg"))
		.expect(2)
		.mount(&server)
		.await;

	let Harness { engine, .. } = harness(&server, 16).await?;

	for _ in 0..2 {
		engine.read("/exact", None).await?;

		let over = engine.read("/over", None).await?;

		assert_eq!(over.source, CacheSource::Miss);
		assert_eq!(over.response.body.len(), 17);
	}

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn no_store_and_non_success_are_served_but_not_cached() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/private"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_string("secret")
				.insert_header("cache-control", "private, no-store"),
		)
		.expect(2)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/moved"))
		.respond_with(ResponseTemplate::new(302).insert_header("location", "/elsewhere"))
		.expect(2)
		.mount(&server)
		.await;

	let Harness { engine, .. } = harness(&server, 1_024).await?;

	for _ in 0..2 {
		assert_eq!(engine.read("/private", None).await?.response.body.as_ref(), b"secret");

		let moved = engine.read("/moved", None).await?;

		assert_eq!(moved.response.status, 302);
		assert_eq!(moved.response.header("location"), Some("/elsewhere"));
	}

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn query_order_and_empty_query_do_not_split_entries() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/search"))
		.respond_with(ResponseTemplate::new(200).set_body_string("[]"))
		.expect(2)
		.mount(&server)
		.await;

	let Harness { engine, .. } = harness(&server, 1_024).await?;

	assert_eq!(engine.read("/search", Some("b=2&a=1")).await?.source, CacheSource::Miss);
	assert_eq!(engine.read("/search", Some("a=1&b=2")).await?.source, CacheSource::Hit);
	assert_eq!(engine.read("/search", None).await?.source, CacheSource::Miss);
	assert_eq!(engine.read("/search", Some("")).await?.source, CacheSource::Hit);

	server.verify().await;

	Ok(())
}
