//! Cached origin responses and their store encoding.

// crates.io
use bytes::Bytes;
use http::StatusCode;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
// self
use crate::{_prelude::*, cache::key::CacheKey};

/// Origin reply as captured by the gateway, minus hop-by-hop headers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginResponse {
	/// HTTP status code.
	pub status: u16,
	/// Ordered header pairs; repeated headers are joined with `", "`.
	pub headers: IndexMap<String, String>,
	/// Raw body bytes.
	#[serde(with = "body_base64")]
	pub body: Bytes,
}
impl OriginResponse {
	/// Status as a typed code, falling back to 502 for values `http` rejects.
	pub fn status_code(&self) -> StatusCode {
		StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_GATEWAY)
	}

	/// Whether the status is in the 2xx range.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Value of a header by case-insensitive name.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}
}

/// One stored response with its lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
	/// Fingerprint the entry is stored under.
	pub key: CacheKey,
	/// Captured origin reply.
	pub response: OriginResponse,
	/// When the entry was written.
	pub created_at: DateTime<Utc>,
	/// When the entry stops being served.
	pub expires_at: DateTime<Utc>,
}
impl CacheEntry {
	/// Wrap a response with a lifetime starting now.
	pub fn new(key: CacheKey, response: OriginResponse, ttl: Duration) -> Self {
		let created_at = Utc::now();
		let expires_at = TimeDelta::from_std(ttl)
			.ok()
			.and_then(|ttl| created_at.checked_add_signed(ttl))
			.unwrap_or(DateTime::<Utc>::MAX_UTC);

		Self { key, response, created_at, expires_at }
	}

	/// Whether the entry has reached its expiry at `now`.
	pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
		now >= self.expires_at
	}

	/// Serialize for the key-value store.
	pub fn encode(&self) -> Result<Bytes> {
		Ok(Bytes::from(serde_json::to_vec(self)?))
	}

	/// Deserialize a value previously produced by [`CacheEntry::encode`].
	pub fn decode(raw: &[u8]) -> Result<Self> {
		Ok(serde_json::from_slice(raw)?)
	}
}

mod body_base64 {
	// crates.io
	use base64::prelude::*;
	use bytes::Bytes;
	use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

	pub fn serialize<S>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&BASE64_STANDARD.encode(body))
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
	where
		D: Deserializer<'de>,
	{
		let encoded = String::deserialize(deserializer)?;

		BASE64_STANDARD.decode(encoded).map(Bytes::from).map_err(D::Error::custom)
	}
}
