//! Read-through API caching gateway with per-URL TTL metadata, single-flight origin fetches,
//! write invalidation, and an RS256 access/refresh token authority.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod app;
pub mod auth;
pub mod cache;
pub mod config;
pub mod gateway;
pub mod http;
pub mod metadata;
pub mod metrics;
pub mod security;
#[cfg(feature = "server")] pub mod server;
pub mod store;

mod error;
mod _prelude {
	pub use std::{
		sync::Arc,
		time::{Duration, SystemTime},
	};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	app::App,
	auth::{
		directory::{Principal, StaticUserDirectory, UserDirectory},
		keys::SigningKeys,
		revocation::{RevocationIndex, RevocationReason},
		token::{AccessStatus, Claims, TokenAuthority, TokenKind, TokenPair},
	},
	cache::{
		engine::{CacheEngine, CacheRead, CacheSource},
		entry::{CacheEntry, OriginResponse},
		key::CacheKey,
	},
	config::GatewayConfig,
	error::{Error, Result},
	gateway::{Envelope, Gateway, GatewayRequest, GatewayResponse, RequestClass},
	http::client::OriginClient,
	metadata::{MetadataStore, SqliteMetadataStore, UrlMetadata},
	store::{KeyValueStore, memory::MemoryStore},
};
