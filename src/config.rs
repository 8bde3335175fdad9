//! Gateway configuration, defaults, and validation.
//!
//! Keys mirror the operator-facing option names (`jwt.private-key`, `cache.default-ttl-seconds`,
//! `origin.base-url`, ...). Every section can be omitted and falls back to its defaults, except
//! the signing secret and the origin base URL, which have no safe default.

// std
use std::net::SocketAddr;
// crates.io
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{_prelude::*, auth::directory::Principal};

/// TTL applied when no metadata pattern matches a request path.
pub const DEFAULT_TTL_SECONDS: u64 = 60;
/// Largest response body admitted to the cache (1 MiB).
pub const DEFAULT_MAX_ENTRY_BYTES: usize = 1_048_576;
/// Approximate memory budget of the inline store (64 MiB).
pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 64 * 1_048_576;
/// Upper bound on concurrently tracked single-flight fetches.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1_024;
/// Per-request origin timeout.
pub const DEFAULT_ORIGIN_TIMEOUT_MS: u64 = 5_000;
/// Concurrent request ceiling toward the origin.
pub const DEFAULT_ORIGIN_MAX_CONCURRENT: usize = 64;
/// Largest origin body relayed to clients (16 MiB).
pub const DEFAULT_ORIGIN_MAX_RESPONSE_BYTES: usize = 16 * 1_048_576;
/// Access token lifetime (30 minutes).
pub const DEFAULT_ACCESS_TOKEN_VALIDITY_SECONDS: u64 = 30 * 60;
/// Refresh token lifetime (14 days).
pub const DEFAULT_REFRESH_TOKEN_VALIDITY_SECONDS: u64 = 14 * 24 * 60 * 60;
/// Issuer URL embedded as the audience marker of access tokens.
pub const DEFAULT_ISSUER: &str = "https://auth-host:9000";

/// Top-level configuration for the gateway and the authentication sidecar.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GatewayConfig {
	/// Token signing and lifetime settings.
	pub jwt: JwtConfig,
	/// Cache policy and resource bounds.
	#[serde(default)]
	pub cache: CacheConfig,
	/// Origin connection settings.
	pub origin: OriginConfig,
	/// Key-value store selection.
	#[serde(default)]
	pub kvs: KvsConfig,
	/// Durable metadata store location.
	#[serde(default)]
	pub metadata: MetadataConfig,
	/// Request authorization policy.
	#[serde(default)]
	pub gateway: GatewayPolicy,
	/// Listener addresses.
	#[serde(default)]
	pub server: ServerConfig,
	/// Seed entries for the static user directory.
	#[serde(default)]
	pub users: Vec<Principal>,
}
impl GatewayConfig {
	/// Build a configuration with defaults everywhere except the signing secret and the origin.
	pub fn new(private_key: impl Into<String>, origin: OriginConfig) -> Self {
		Self {
			jwt: JwtConfig::new(private_key),
			cache: CacheConfig::default(),
			origin,
			kvs: KvsConfig::default(),
			metadata: MetadataConfig::default(),
			gateway: GatewayPolicy::default(),
			server: ServerConfig::default(),
			users: Vec::new(),
		}
	}

	#[cfg(feature = "server")]
	/// Parse and validate a TOML document.
	pub fn from_toml_str(raw: &str) -> Result<Self> {
		let config: Self = toml::from_str(raw)
			.map_err(|err| Error::Validation { field: "config", reason: err.to_string() })?;

		config.validate()?;

		Ok(config)
	}

	/// Validate every section against its documented constraints.
	pub fn validate(&self) -> Result<()> {
		self.jwt.validate()?;
		self.cache.validate()?;
		self.origin.validate()?;

		if self.origin.max_response_bytes < self.cache.max_entry_bytes {
			return Err(Error::Validation {
				field: "origin.max-response-bytes",
				reason: "Must be greater than or equal to cache.max-entry-bytes.".into(),
			});
		}

		if let KvsConfig::External { address } = &self.kvs
			&& address.trim().is_empty()
		{
			return Err(Error::Validation {
				field: "kvs.address",
				reason: "Must not be empty.".into(),
			});
		}
		if self.metadata.database_url.trim().is_empty() {
			return Err(Error::Validation {
				field: "metadata.database-url",
				reason: "Must not be empty.".into(),
			});
		}
		for prefix in &self.gateway.protected_prefixes {
			if !prefix.starts_with('/') {
				return Err(Error::Validation {
					field: "gateway.protected-prefixes",
					reason: format!("Prefix '{prefix}' must start with '/'."),
				});
			}
		}

		Ok(())
	}
}

/// Token authority settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JwtConfig {
	/// Secret seed the signing keypair is derived from.
	pub private_key: String,
	/// Access token lifetime in seconds.
	#[serde(default = "default_access_validity")]
	pub access_token_validity_in_seconds: u64,
	/// Refresh token lifetime in seconds.
	#[serde(default = "default_refresh_validity")]
	pub refresh_token_validity_in_seconds: u64,
	/// Issuer URL carried by access tokens as a marker claim.
	#[serde(default = "default_issuer")]
	pub issuer: String,
}
impl JwtConfig {
	/// Construct with default lifetimes.
	pub fn new(private_key: impl Into<String>) -> Self {
		Self {
			private_key: private_key.into(),
			access_token_validity_in_seconds: DEFAULT_ACCESS_TOKEN_VALIDITY_SECONDS,
			refresh_token_validity_in_seconds: DEFAULT_REFRESH_TOKEN_VALIDITY_SECONDS,
			issuer: DEFAULT_ISSUER.into(),
		}
	}

	/// Access token lifetime.
	pub fn access_ttl(&self) -> Duration {
		Duration::from_secs(self.access_token_validity_in_seconds)
	}

	/// Refresh token lifetime.
	pub fn refresh_ttl(&self) -> Duration {
		Duration::from_secs(self.refresh_token_validity_in_seconds)
	}

	fn validate(&self) -> Result<()> {
		if self.private_key.trim().is_empty() {
			return Err(Error::Validation {
				field: "jwt.private-key",
				reason: "Must not be empty.".into(),
			});
		}
		if self.access_token_validity_in_seconds == 0 {
			return Err(Error::Validation {
				field: "jwt.access-token-validity-in-seconds",
				reason: "Must be at least 1 second.".into(),
			});
		}
		if self.refresh_token_validity_in_seconds < self.access_token_validity_in_seconds {
			return Err(Error::Validation {
				field: "jwt.refresh-token-validity-in-seconds",
				reason: "Must be greater than or equal to the access token validity.".into(),
			});
		}

		Url::parse(&self.issuer).map_err(|err| Error::Validation {
			field: "jwt.issuer",
			reason: format!("Invalid URL: {err}."),
		})?;

		Ok(())
	}
}
impl std::fmt::Debug for JwtConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("JwtConfig")
			.field("private_key", &"<redacted>")
			.field("access_token_validity_in_seconds", &self.access_token_validity_in_seconds)
			.field("refresh_token_validity_in_seconds", &self.refresh_token_validity_in_seconds)
			.field("issuer", &self.issuer)
			.finish()
	}
}

/// Cache policy and resource bounds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheConfig {
	/// TTL used when no metadata pattern matches.
	#[serde(default = "default_ttl_seconds")]
	pub default_ttl_seconds: u64,
	/// Bodies larger than this are served but never stored.
	#[serde(default = "default_max_entry_bytes")]
	pub max_entry_bytes: usize,
	/// Approximate byte budget of the inline store before LRU eviction.
	#[serde(default = "default_max_total_bytes")]
	pub max_total_bytes: u64,
	/// Maximum number of keys tracked by the single-flight registry.
	#[serde(default = "default_max_in_flight")]
	pub max_in_flight: usize,
}
impl CacheConfig {
	/// Default TTL as a duration.
	pub fn default_ttl(&self) -> Duration {
		Duration::from_secs(self.default_ttl_seconds)
	}

	fn validate(&self) -> Result<()> {
		if self.default_ttl_seconds == 0 {
			return Err(Error::Validation {
				field: "cache.default-ttl-seconds",
				reason: "Must be at least 1 second.".into(),
			});
		}
		if self.max_entry_bytes == 0 {
			return Err(Error::Validation {
				field: "cache.max-entry-bytes",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_entry_bytes as u64 > self.max_total_bytes {
			return Err(Error::Validation {
				field: "cache.max-total-bytes",
				reason: "Must be greater than or equal to max-entry-bytes.".into(),
			});
		}
		if self.max_in_flight == 0 {
			return Err(Error::Validation {
				field: "cache.max-in-flight",
				reason: "Must be greater than zero.".into(),
			});
		}

		Ok(())
	}
}
impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			default_ttl_seconds: DEFAULT_TTL_SECONDS,
			max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
			max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
			max_in_flight: DEFAULT_MAX_IN_FLIGHT,
		}
	}
}

/// Origin connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OriginConfig {
	/// Base URL every gateway path is resolved against.
	pub base_url: Url,
	/// Per-request timeout in milliseconds.
	#[serde(default = "default_origin_timeout_ms")]
	pub timeout_ms: u64,
	/// Concurrent request ceiling.
	#[serde(default = "default_origin_max_concurrent")]
	pub max_concurrent: usize,
	/// Origin bodies larger than this are refused instead of buffered.
	#[serde(default = "default_origin_max_response_bytes")]
	pub max_response_bytes: usize,
}
impl OriginConfig {
	/// Build settings for the given base URL with default limits.
	pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
		Ok(Self {
			base_url: Url::parse(base_url.as_ref())?,
			timeout_ms: DEFAULT_ORIGIN_TIMEOUT_MS,
			max_concurrent: DEFAULT_ORIGIN_MAX_CONCURRENT,
			max_response_bytes: DEFAULT_ORIGIN_MAX_RESPONSE_BYTES,
		})
	}

	/// Per-request timeout as a duration.
	pub fn timeout(&self) -> Duration {
		Duration::from_millis(self.timeout_ms)
	}

	fn validate(&self) -> Result<()> {
		if !matches!(self.base_url.scheme(), "http" | "https") {
			return Err(Error::Validation {
				field: "origin.base-url",
				reason: "Must use http or https.".into(),
			});
		}
		if self.timeout_ms == 0 {
			return Err(Error::Validation {
				field: "origin.timeout-ms",
				reason: "Must be at least 1 ms.".into(),
			});
		}
		if self.max_concurrent == 0 {
			return Err(Error::Validation {
				field: "origin.max-concurrent",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_response_bytes == 0 {
			return Err(Error::Validation {
				field: "origin.max-response-bytes",
				reason: "Must be greater than zero.".into(),
			});
		}

		Ok(())
	}
}

/// Key-value store selection: in-process or an external Redis-compatible server.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", untagged)]
pub enum KvsConfig {
	/// In-process store (`kvs = "inline"`).
	#[default]
	#[serde(with = "inline_tag")]
	Inline,
	/// External store reached at `address`.
	External {
		/// Connection URL, e.g. `redis://127.0.0.1:6379`.
		address: String,
	},
}

/// Durable metadata store location.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MetadataConfig {
	/// SQLite connection URL.
	#[serde(default = "default_database_url")]
	pub database_url: String,
}
impl Default for MetadataConfig {
	fn default() -> Self {
		Self { database_url: default_database_url() }
	}
}

/// Request authorization policy.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GatewayPolicy {
	/// Path prefixes that require a valid bearer access token.
	#[serde(default)]
	pub protected_prefixes: Vec<String>,
}
impl GatewayPolicy {
	/// Whether requests to `path` must carry a valid access token.
	pub fn is_protected(&self, path: &str) -> bool {
		self.protected_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
	}
}

/// Listener addresses for the daemon.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
	/// Gateway listener.
	#[serde(default = "default_gateway_address")]
	pub gateway_address: SocketAddr,
	/// Authentication service listener.
	#[serde(default = "default_auth_address")]
	pub auth_address: SocketAddr,
}
impl Default for ServerConfig {
	fn default() -> Self {
		Self { gateway_address: default_gateway_address(), auth_address: default_auth_address() }
	}
}

mod inline_tag {
	// crates.io
	use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

	pub fn serialize<S>(serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str("inline")
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<(), D::Error>
	where
		D: Deserializer<'de>,
	{
		let tag = String::deserialize(deserializer)?;

		if tag == "inline" { Ok(()) } else { Err(D::Error::custom("expected \"inline\"")) }
	}
}

fn default_access_validity() -> u64 {
	DEFAULT_ACCESS_TOKEN_VALIDITY_SECONDS
}

fn default_refresh_validity() -> u64 {
	DEFAULT_REFRESH_TOKEN_VALIDITY_SECONDS
}

fn default_issuer() -> String {
	DEFAULT_ISSUER.into()
}

fn default_ttl_seconds() -> u64 {
	DEFAULT_TTL_SECONDS
}

fn default_max_entry_bytes() -> usize {
	DEFAULT_MAX_ENTRY_BYTES
}

fn default_max_total_bytes() -> u64 {
	DEFAULT_MAX_TOTAL_BYTES
}

fn default_max_in_flight() -> usize {
	DEFAULT_MAX_IN_FLIGHT
}

fn default_origin_timeout_ms() -> u64 {
	DEFAULT_ORIGIN_TIMEOUT_MS
}

fn default_origin_max_concurrent() -> usize {
	DEFAULT_ORIGIN_MAX_CONCURRENT
}

fn default_origin_max_response_bytes() -> usize {
	DEFAULT_ORIGIN_MAX_RESPONSE_BYTES
}

fn default_database_url() -> String {
	"sqlite://metadata.db".into()
}

fn default_gateway_address() -> SocketAddr {
	SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_auth_address() -> SocketAddr {
	SocketAddr::from(([0, 0, 0, 0], 9000))
}
