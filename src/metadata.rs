//! Durable per-URL TTL policy.
//!
//! Patterns are plain path prefixes. A request path resolves to the longest recorded pattern
//! that prefixes it; when nothing matches, the configured default TTL applies.

// std
use std::{fmt::Debug, str::FromStr};
// crates.io
use serde::{Deserialize, Serialize};
use sqlx::{
	Row, SqlitePool,
	sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};
// self
use crate::_prelude::*;

const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS url_metadata (
	url_pattern TEXT PRIMARY KEY,
	ttl_seconds INTEGER NOT NULL,
	created_at TEXT NOT NULL,
	updated_at TEXT NOT NULL
)";

/// TTL policy record for one URL prefix.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UrlMetadata {
	/// Path prefix the policy applies to.
	pub url_pattern: String,
	/// Lifetime of cache entries stored under this prefix.
	pub ttl_seconds: u64,
	/// When the record was first written.
	pub created_at: DateTime<Utc>,
	/// When the TTL was last changed.
	pub updated_at: DateTime<Utc>,
}
impl UrlMetadata {
	/// TTL as a duration.
	pub fn ttl(&self) -> Duration {
		Duration::from_secs(self.ttl_seconds)
	}

	fn from_row(row: &SqliteRow) -> Result<Self> {
		let ttl_seconds: i64 = row.try_get("ttl_seconds")?;

		Ok(Self {
			url_pattern: row.try_get("url_pattern")?,
			ttl_seconds: u64::try_from(ttl_seconds).unwrap_or_default(),
			created_at: row.try_get("created_at")?,
			updated_at: row.try_get("updated_at")?,
		})
	}
}

/// Storage of `url_pattern → ttl_seconds` with longest-prefix resolution.
#[async_trait::async_trait]
pub trait MetadataStore: Send + Sync + Debug {
	/// TTL for a request `url`; any query component is ignored.
	async fn get_ttl(&self, url: &str) -> Result<Duration>;

	/// Record stored for exactly `url_pattern`, if any.
	async fn get(&self, url_pattern: &str) -> Result<Option<UrlMetadata>>;

	/// Insert or replace the TTL for `url_pattern`. `ttl_seconds` must be at least 1.
	async fn upsert(&self, url_pattern: &str, ttl_seconds: u64) -> Result<UrlMetadata>;

	/// Remove the record for `url_pattern`, returning whether one existed.
	async fn delete(&self, url_pattern: &str) -> Result<bool>;

	/// Every record, ordered by pattern.
	async fn list(&self) -> Result<Vec<UrlMetadata>>;
}

/// SQLite-backed metadata store.
#[derive(Clone, Debug)]
pub struct SqliteMetadataStore {
	pool: SqlitePool,
	default_ttl: Duration,
}
impl SqliteMetadataStore {
	/// Open (creating if necessary) the database at `database_url` and ensure the schema exists.
	pub async fn connect(database_url: &str, default_ttl: Duration) -> Result<Self> {
		let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
		// An in-memory database lives exactly as long as its single connection.
		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.idle_timeout(None)
			.max_lifetime(None)
			.connect_with(options)
			.await?;
		let store = Self { pool, default_ttl };

		store.migrate().await?;

		tracing::info!(database_url, ?default_ttl, "metadata store ready");

		Ok(store)
	}

	/// Private in-memory database, mostly for tests and ephemeral deployments.
	pub async fn in_memory(default_ttl: Duration) -> Result<Self> {
		Self::connect("sqlite::memory:", default_ttl).await
	}

	/// TTL applied when no pattern matches.
	pub fn default_ttl(&self) -> Duration {
		self.default_ttl
	}

	async fn migrate(&self) -> Result<()> {
		sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;

		Ok(())
	}
}
#[async_trait::async_trait]
impl MetadataStore for SqliteMetadataStore {
	async fn get_ttl(&self, url: &str) -> Result<Duration> {
		let path = url.split_once('?').map_or(url, |(path, _)| path);
		let ttl_seconds: Option<i64> = sqlx::query_scalar(
			"SELECT ttl_seconds FROM url_metadata \
			 WHERE substr(?1, 1, length(url_pattern)) = url_pattern \
			 ORDER BY length(url_pattern) DESC LIMIT 1",
		)
		.bind(path)
		.fetch_optional(&self.pool)
		.await?;

		match ttl_seconds.and_then(|secs| u64::try_from(secs).ok()) {
			Some(secs) => Ok(Duration::from_secs(secs)),
			None => Ok(self.default_ttl),
		}
	}

	async fn get(&self, url_pattern: &str) -> Result<Option<UrlMetadata>> {
		let row = sqlx::query(
			"SELECT url_pattern, ttl_seconds, created_at, updated_at FROM url_metadata \
			 WHERE url_pattern = ?1",
		)
		.bind(url_pattern)
		.fetch_optional(&self.pool)
		.await?;

		row.as_ref().map(UrlMetadata::from_row).transpose()
	}

	#[tracing::instrument(skip(self))]
	async fn upsert(&self, url_pattern: &str, ttl_seconds: u64) -> Result<UrlMetadata> {
		if url_pattern.is_empty() {
			return Err(Error::Validation {
				field: "url",
				reason: "Must not be empty.".into(),
			});
		}

		let ttl = i64::try_from(ttl_seconds).ok().filter(|secs| *secs >= 1).ok_or_else(|| {
			Error::Validation {
				field: "ttl-seconds",
				reason: format!("Must be between 1 and {}, got {ttl_seconds}.", i64::MAX),
			}
		})?;
		let now = Utc::now();
		let row = sqlx::query(
			"INSERT INTO url_metadata (url_pattern, ttl_seconds, created_at, updated_at) \
			 VALUES (?1, ?2, ?3, ?3) \
			 ON CONFLICT(url_pattern) DO UPDATE SET \
			 ttl_seconds = excluded.ttl_seconds, updated_at = excluded.updated_at \
			 RETURNING url_pattern, ttl_seconds, created_at, updated_at",
		)
		.bind(url_pattern)
		.bind(ttl)
		.bind(now)
		.fetch_one(&self.pool)
		.await?;

		tracing::debug!("url metadata upserted");

		UrlMetadata::from_row(&row)
	}

	#[tracing::instrument(skip(self))]
	async fn delete(&self, url_pattern: &str) -> Result<bool> {
		let result = sqlx::query("DELETE FROM url_metadata WHERE url_pattern = ?1")
			.bind(url_pattern)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() > 0)
	}

	async fn list(&self) -> Result<Vec<UrlMetadata>> {
		let rows = sqlx::query(
			"SELECT url_pattern, ttl_seconds, created_at, updated_at FROM url_metadata \
			 ORDER BY url_pattern",
		)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(UrlMetadata::from_row).collect()
	}
}
