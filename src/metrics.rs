//! Metrics helpers and in-process cache telemetry bookkeeping.

// std
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use smallvec::SmallVec;
// self
use crate::_prelude::*;

type LabelSet = SmallVec<[Label; 2]>;

const METRIC_CACHE_REQUESTS: &str = "gateway_cache_requests_total";
const METRIC_CACHE_STORES: &str = "gateway_cache_stores_total";
const METRIC_CACHE_INVALIDATIONS: &str = "gateway_cache_invalidations_total";
const METRIC_ORIGIN_REQUESTS: &str = "gateway_origin_requests_total";
const METRIC_ORIGIN_DURATION: &str = "gateway_origin_duration_seconds";
const METRIC_FLIGHT_JOINS: &str = "gateway_single_flight_joins_total";
const METRIC_TOKEN_VALIDATIONS: &str = "gateway_token_validations_total";

#[cfg(feature = "prometheus")]
/// Shared Prometheus handle installed by [`install_default_exporter`].
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Thread-safe accumulator for one cache engine.
#[derive(Debug, Default)]
pub struct CacheMetrics {
	hits: AtomicU64,
	misses: AtomicU64,
	stores: AtomicU64,
	skipped_stores: AtomicU64,
	invalidated_keys: AtomicU64,
	flight_joins: AtomicU64,
	origin_errors: AtomicU64,
}
impl CacheMetrics {
	/// Create a new accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a lookup served from the store.
	pub fn record_hit(&self) {
		self.hits.fetch_add(1, Ordering::Relaxed);
		record_cache_lookup("hit");
	}

	/// Record a lookup that had to go to the origin (directly or through a joined flight).
	pub fn record_miss(&self) {
		self.misses.fetch_add(1, Ordering::Relaxed);
		record_cache_lookup("miss");
	}

	/// Record whether an origin response was admitted to the store.
	pub fn record_store(&self, stored: bool) {
		if stored {
			self.stores.fetch_add(1, Ordering::Relaxed);
		} else {
			self.skipped_stores.fetch_add(1, Ordering::Relaxed);
		}

		let result = if stored { "stored" } else { "skipped" };

		metrics::counter!(METRIC_CACHE_STORES, labels("result", result).iter()).increment(1);
	}

	/// Record keys removed by an invalidation.
	pub fn record_invalidation(&self, keys: u64) {
		self.invalidated_keys.fetch_add(keys, Ordering::Relaxed);
		metrics::counter!(METRIC_CACHE_INVALIDATIONS).increment(keys);
	}

	/// Record a caller attaching to an in-flight fetch.
	pub fn record_flight_join(&self) {
		self.flight_joins.fetch_add(1, Ordering::Relaxed);
		metrics::counter!(METRIC_FLIGHT_JOINS).increment(1);
	}

	/// Record an origin failure surfaced to callers.
	pub fn record_origin_error(&self) {
		self.origin_errors.fetch_add(1, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot.
	pub fn snapshot(&self) -> CacheMetricsSnapshot {
		CacheMetricsSnapshot {
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			stores: self.stores.load(Ordering::Relaxed),
			skipped_stores: self.skipped_stores.load(Ordering::Relaxed),
			invalidated_keys: self.invalidated_keys.load(Ordering::Relaxed),
			flight_joins: self.flight_joins.load(Ordering::Relaxed),
			origin_errors: self.origin_errors.load(Ordering::Relaxed),
		}
	}
}

/// Read-only snapshot of cache counters, served by the cache statistics endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheMetricsSnapshot {
	/// Lookups served from the store.
	pub hits: u64,
	/// Lookups that required the origin.
	pub misses: u64,
	/// Origin responses admitted to the store.
	pub stores: u64,
	/// Origin responses served but not stored.
	pub skipped_stores: u64,
	/// Keys removed by invalidations.
	pub invalidated_keys: u64,
	/// Callers that attached to another caller's fetch.
	pub flight_joins: u64,
	/// Origin failures surfaced to callers.
	pub origin_errors: u64,
}
impl CacheMetricsSnapshot {
	/// Fraction of lookups served from the store.
	pub fn hit_rate(&self) -> f64 {
		let total = self.hits + self.misses;

		if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
	}
}

#[cfg(feature = "prometheus")]
/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

#[cfg(feature = "prometheus")]
/// Access the global Prometheus exporter handle when installed.
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record one origin exchange. `status` is the HTTP status, or `None` when no response arrived.
pub fn record_origin_request(status: Option<u16>, duration: Duration) {
	let status = status.map_or_else(|| "error".to_owned(), |status| status.to_string());

	metrics::counter!(METRIC_ORIGIN_REQUESTS, labels("status", status).iter()).increment(1);
	metrics::histogram!(METRIC_ORIGIN_DURATION).record(duration.as_secs_f64());
}

/// Record the outcome of an access or refresh token check.
pub fn record_token_validation(result: &'static str) {
	metrics::counter!(METRIC_TOKEN_VALIDATIONS, labels("result", result).iter()).increment(1);
}

fn record_cache_lookup(outcome: &'static str) {
	metrics::counter!(METRIC_CACHE_REQUESTS, labels("outcome", outcome).iter()).increment(1);
}

fn labels(key: &'static str, value: impl Into<metrics::SharedString>) -> LabelSet {
	let mut labels = LabelSet::new();

	labels.push(Label::new(key, value));

	labels
}
