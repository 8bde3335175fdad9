//! External key-value store speaking the Redis protocol.

// std
use std::{
	collections::HashSet,
	fmt::{Debug, Formatter, Result as FmtResult},
};
// crates.io
use bytes::Bytes;
use redis::{AsyncCommands, aio::MultiplexedConnection};
// self
use crate::{
	_prelude::*,
	store::{KeyValueStore, validate_ttl},
};

const SCAN_BATCH: usize = 100;

/// Key-value store backed by a Redis-compatible server.
#[derive(Clone)]
pub struct RedisStore {
	client: redis::Client,
	connection: MultiplexedConnection,
}
impl RedisStore {
	/// Open a multiplexed connection to `address` (e.g. `redis://127.0.0.1:6379`).
	pub async fn connect(address: &str) -> Result<Self> {
		let client = redis::Client::open(address)?;
		let connection = client.get_multiplexed_async_connection().await?;

		tracing::info!(address, "connected to external key-value store");

		Ok(Self { client, connection })
	}
}
impl Debug for RedisStore {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("RedisStore").field("client", &self.client).finish_non_exhaustive()
	}
}
#[async_trait::async_trait]
impl KeyValueStore for RedisStore {
	async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
		validate_ttl(ttl)?;

		let mut conn = self.connection.clone();
		// EX takes whole seconds; round up so entries never expire early.
		let ttl_secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);

		conn.set_ex::<_, _, ()>(key, value.as_ref(), ttl_secs).await?;

		Ok(())
	}

	async fn get(&self, key: &str) -> Result<Option<Bytes>> {
		let mut conn = self.connection.clone();
		let value: Option<Vec<u8>> = conn.get(key).await?;

		Ok(value.map(Bytes::from))
	}

	async fn delete(&self, key: &str) -> Result<()> {
		let mut conn = self.connection.clone();

		conn.del::<_, ()>(key).await?;

		Ok(())
	}

	async fn scan(&self, pattern: &str) -> Result<HashSet<String>> {
		let mut conn = self.connection.clone();
		let mut keys = HashSet::new();
		let mut cursor = 0_u64;

		loop {
			let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
				.arg(cursor)
				.arg("MATCH")
				.arg(pattern)
				.arg("COUNT")
				.arg(SCAN_BATCH)
				.query_async(&mut conn)
				.await?;

			keys.extend(batch);

			if next == 0 {
				break;
			}

			cursor = next;
		}

		Ok(keys)
	}

	async fn expire_at(&self, key: &str, at: DateTime<Utc>) -> Result<bool> {
		let mut conn = self.connection.clone();
		let updated: i64 =
			redis::cmd("EXPIREAT").arg(key).arg(at.timestamp()).query_async(&mut conn).await?;

		Ok(updated == 1)
	}
}
