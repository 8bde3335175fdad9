//! In-process key-value store backed by a size-weighted moka cache.

// std
use std::{collections::HashSet, time::Instant};
// crates.io
use bytes::Bytes;
use moka::{
	Expiry,
	ops::compute::{CompResult, Op},
	policy::EvictionPolicy,
	sync::Cache,
};
// self
use crate::{
	_prelude::*,
	store::{KeyValueStore, glob_matches, validate_ttl},
};

/// Longest lifetime an inline entry can have; longer TTLs are clamped to it.
pub const MAX_RETENTION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Clone, Debug)]
struct StoredValue {
	bytes: Bytes,
	expires_at: Instant,
}
impl StoredValue {
	fn is_live(&self, now: Instant) -> bool {
		now < self.expires_at
	}
}

struct PerEntryExpiry;
impl Expiry<String, StoredValue> for PerEntryExpiry {
	fn expire_after_create(
		&self,
		_key: &String,
		value: &StoredValue,
		created_at: Instant,
	) -> Option<Duration> {
		Some(value.expires_at.saturating_duration_since(created_at))
	}

	fn expire_after_update(
		&self,
		_key: &String,
		value: &StoredValue,
		updated_at: Instant,
		_duration_until_expiry: Option<Duration>,
	) -> Option<Duration> {
		Some(value.expires_at.saturating_duration_since(updated_at))
	}
}

/// Inline key-value store with per-entry expiry and an approximate byte budget.
///
/// Entries are weighted by key plus value length; once the budget is exceeded the least
/// recently used entries are evicted.
#[derive(Clone, Debug)]
pub struct MemoryStore {
	entries: Cache<String, StoredValue>,
}
impl MemoryStore {
	/// Create a store holding at most roughly `max_total_bytes` of keys and values.
	pub fn new(max_total_bytes: u64) -> Self {
		let entries = Cache::builder()
			.max_capacity(max_total_bytes)
			.weigher(|key: &String, value: &StoredValue| -> u32 {
				(key.len() + value.bytes.len()).try_into().unwrap_or(u32::MAX)
			})
			.eviction_policy(EvictionPolicy::lru())
			.expire_after(PerEntryExpiry)
			.build();

		Self { entries }
	}

	/// Approximate bytes currently held, after flushing pending maintenance.
	pub fn weighted_size(&self) -> u64 {
		self.entries.run_pending_tasks();

		self.entries.weighted_size()
	}
}
#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
	async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
		validate_ttl(ttl)?;

		let expires_at = deadline(Instant::now(), ttl)?;

		self.entries.insert(key.to_owned(), StoredValue { bytes: value, expires_at });

		Ok(())
	}

	async fn get(&self, key: &str) -> Result<Option<Bytes>> {
		let Some(value) = self.entries.get(key) else {
			return Ok(None);
		};

		if value.is_live(Instant::now()) {
			Ok(Some(value.bytes))
		} else {
			self.entries.invalidate(key);

			Ok(None)
		}
	}

	async fn delete(&self, key: &str) -> Result<()> {
		self.entries.invalidate(key);

		Ok(())
	}

	async fn scan(&self, pattern: &str) -> Result<HashSet<String>> {
		let now = Instant::now();

		Ok(self
			.entries
			.iter()
			.filter(|(key, value)| value.is_live(now) && glob_matches(pattern, key))
			.map(|(key, _)| key.as_ref().clone())
			.collect())
	}

	async fn expire_at(&self, key: &str, at: DateTime<Utc>) -> Result<bool> {
		let Ok(remaining) = (at - Utc::now()).to_std() else {
			let existed = self.entries.remove(key).is_some();

			return Ok(existed);
		};
		let now = Instant::now();
		let expires_at = deadline(now, remaining)?;
		let outcome = self.entries.entry(key.to_owned()).and_compute_with(|current| match current {
			Some(entry) if entry.value().is_live(now) => {
				let mut value = entry.into_value();

				value.expires_at = expires_at;

				Op::Put(value)
			},
			_ => Op::Nop,
		});

		Ok(!matches!(outcome, CompResult::StillNone(_) | CompResult::Unchanged(_)))
	}
}

fn deadline(now: Instant, ttl: Duration) -> Result<Instant> {
	now.checked_add(ttl.min(MAX_RETENTION)).ok_or_else(|| Error::Validation {
		field: "ttl",
		reason: format!("Deadline for {ttl:?} is not representable."),
	})
}
