//! Read-through cache with single-flight misses and prefix invalidation.

// crates.io
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
// self
use crate::{
	_prelude::*,
	cache::{
		entry::{CacheEntry, OriginResponse},
		flight::{FlightRole, SingleFlight},
		key::CacheKey,
	},
	config::CacheConfig,
	http::{client::OriginClient, semantics},
	metadata::MetadataStore,
	metrics::CacheMetrics,
	store::KeyValueStore,
};

/// Where a read was served from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheSource {
	/// A live entry was found in the store.
	Hit,
	/// The origin was contacted, by this caller or by the fetch it joined.
	Miss,
	/// The origin was contacted unconditionally through [`CacheEngine::refresh`].
	Refreshed,
}
impl CacheSource {
	/// Value for the `x-cache` response header.
	pub fn as_header_value(self) -> &'static str {
		match self {
			CacheSource::Hit => "HIT",
			CacheSource::Miss | CacheSource::Refreshed => "MISS",
		}
	}
}

/// Result of a cache read.
#[derive(Clone, Debug)]
pub struct CacheRead {
	/// Response to hand back to the client.
	pub response: Arc<OriginResponse>,
	/// Where it came from.
	pub source: CacheSource,
}

/// Owner of every cache entry.
///
/// Reads consult the store, then coordinate through a single-flight registry so that at most
/// one origin call per key is outstanding. Successful cacheable responses are stored with the
/// TTL the metadata store assigns to the request path.
#[derive(Clone, Debug)]
pub struct CacheEngine {
	store: Arc<dyn KeyValueStore>,
	metadata: Arc<dyn MetadataStore>,
	origin: OriginClient,
	flights: Arc<SingleFlight<Arc<OriginResponse>>>,
	max_entry_bytes: usize,
	metrics: Arc<CacheMetrics>,
}
impl CacheEngine {
	/// Assemble an engine from its collaborators.
	pub fn new(
		store: Arc<dyn KeyValueStore>,
		metadata: Arc<dyn MetadataStore>,
		origin: OriginClient,
		config: &CacheConfig,
	) -> Self {
		Self {
			store,
			metadata,
			origin,
			flights: SingleFlight::new(config.max_in_flight),
			max_entry_bytes: config.max_entry_bytes,
			metrics: CacheMetrics::new(),
		}
	}

	/// Per-engine counters.
	pub fn metrics(&self) -> Arc<CacheMetrics> {
		self.metrics.clone()
	}

	/// Origin client shared with the gateway's mutating path.
	pub fn origin(&self) -> &OriginClient {
		&self.origin
	}

	/// Metadata store consulted on misses.
	pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
		&self.metadata
	}

	/// Number of origin fetches currently coordinated by the single-flight registry.
	pub fn in_flight(&self) -> usize {
		self.flights.len()
	}

	/// Serve `path?query` from the store, falling back to a coordinated origin fetch.
	#[tracing::instrument(skip(self))]
	pub async fn read(&self, path: &str, query: Option<&str>) -> Result<CacheRead> {
		let key = CacheKey::new(path, query);

		match self.lookup(&key).await {
			Ok(entry) => {
				self.metrics.record_hit();
				tracing::debug!(%key, expires_at = %entry.expires_at, "cache hit");

				return Ok(CacheRead { response: Arc::new(entry.response), source: CacheSource::Hit });
			},
			Err(Error::CacheMiss) => {},
			Err(err) => tracing::warn!(%key, error = %err, "store lookup failed; treating as miss"),
		}

		self.metrics.record_miss();

		let task = self.fetch_task(key.clone(), path.to_owned(), query.map(str::to_owned));
		let (response, role) = self.flights.run(&key, move || task).await.inspect_err(|_| {
			self.metrics.record_origin_error();
		})?;

		if role == FlightRole::Follower {
			self.metrics.record_flight_join();
		}

		Ok(CacheRead { response, source: CacheSource::Miss })
	}

	/// Force an origin call for `path?query` and replace the stored entry.
	#[tracing::instrument(skip(self))]
	pub async fn refresh(&self, path: &str, query: Option<&str>) -> Result<CacheRead> {
		let key = CacheKey::new(path, query);
		let response = self.fetch_and_store(&key, path, query).await.inspect_err(|_| {
			self.metrics.record_origin_error();
		})?;

		Ok(CacheRead { response, source: CacheSource::Refreshed })
	}

	/// Remove every entry whose key path starts with `path_prefix`, returning how many went.
	#[tracing::instrument(skip(self))]
	pub async fn invalidate(&self, path_prefix: &str) -> Result<usize> {
		let keys = self.store.scan(&CacheKey::prefix_pattern(path_prefix)).await?;

		for key in &keys {
			self.store.delete(key).await?;
		}

		self.metrics.record_invalidation(keys.len() as u64);
		tracing::debug!(removed = keys.len(), "cache invalidated");

		Ok(keys.len())
	}

	/// Live entry stored under `key`, or [`Error::CacheMiss`].
	pub async fn lookup(&self, key: &CacheKey) -> Result<CacheEntry> {
		let Some(raw) = self.store.get(key.as_str()).await? else {
			return Err(Error::CacheMiss);
		};
		let entry = match CacheEntry::decode(&raw) {
			Ok(entry) => entry,
			Err(err) => {
				tracing::warn!(%key, error = %err, "discarding undecodable cache entry");
				self.store.delete(key.as_str()).await?;

				return Err(Error::CacheMiss);
			},
		};

		if entry.is_expired_at(Utc::now()) {
			self.store.delete(key.as_str()).await?;

			return Err(Error::CacheMiss);
		}

		Ok(entry)
	}

	/// Forward a mutating request and invalidate `path` when the origin accepts it.
	#[tracing::instrument(skip(self, headers, body))]
	pub async fn forward_mutation(
		&self,
		method: Method,
		path: &str,
		query: Option<&str>,
		headers: &HeaderMap,
		body: Bytes,
	) -> Result<OriginResponse> {
		let response = self.origin.send(method, path, query, headers, body).await?;

		if response.status >= 500 {
			return Err(Error::OriginStatus { status: response.status_code() });
		}
		if response.is_success() {
			self.invalidate(path).await?;
		}

		Ok(response)
	}

	fn fetch_task(
		&self,
		key: CacheKey,
		path: String,
		query: Option<String>,
	) -> impl Future<Output = Result<Arc<OriginResponse>>> + Send + 'static {
		let engine = self.clone();

		async move { engine.fetch_and_store(&key, &path, query.as_deref()).await }
	}

	async fn fetch_and_store(
		&self,
		key: &CacheKey,
		path: &str,
		query: Option<&str>,
	) -> Result<Arc<OriginResponse>> {
		let response =
			self.origin.send(Method::GET, path, query, &HeaderMap::new(), Bytes::new()).await?;

		if response.status >= StatusCode::INTERNAL_SERVER_ERROR.as_u16() {
			return Err(Error::OriginStatus { status: response.status_code() });
		}

		let response = Arc::new(response);
		let stored = self.store_response(key, path, &response).await;

		self.metrics.record_store(stored);

		Ok(response)
	}

	async fn store_response(&self, key: &CacheKey, path: &str, response: &OriginResponse) -> bool {
		if let Err(err) = semantics::check_cacheable(
			response.status,
			&response.headers,
			response.body.len(),
			self.max_entry_bytes,
		) {
			tracing::debug!(%key, reason = %err, "response not cached");

			return false;
		}

		let ttl = match self.metadata.get_ttl(path).await {
			Ok(ttl) => ttl,
			Err(err) => {
				tracing::warn!(%key, error = %err, "ttl lookup failed; response not cached");

				return false;
			},
		};
		let entry = CacheEntry::new(key.clone(), response.clone(), ttl);
		let outcome = match entry.encode() {
			Ok(raw) => self.store.put(key.as_str(), raw, ttl).await,
			Err(err) => Err(err),
		};

		match outcome {
			Ok(()) => {
				tracing::debug!(%key, ?ttl, "response cached");

				true
			},
			Err(err) => {
				tracing::warn!(%key, error = %err, "failed to store response");

				false
			},
		}
	}
}
