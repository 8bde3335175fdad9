//! Start-up composition: KVS → metadata store → token authority → cache engine → gateway.

// self
use crate::{
	_prelude::*,
	auth::{
		directory::StaticUserDirectory, keys::SigningKeys, revocation::RevocationIndex,
		token::TokenAuthority,
	},
	cache::engine::CacheEngine,
	config::{GatewayConfig, KvsConfig},
	gateway::Gateway,
	http::client::OriginClient,
	metadata::{MetadataStore, SqliteMetadataStore},
	store::{KeyValueStore, memory::MemoryStore},
};

/// Fully wired service. Every component is built once, in dependency order, before the first
/// request is accepted.
#[derive(Clone, Debug)]
pub struct App {
	config: Arc<GatewayConfig>,
	store: Arc<dyn KeyValueStore>,
	metadata: Arc<dyn MetadataStore>,
	directory: Arc<StaticUserDirectory>,
	gateway: Gateway,
}
impl App {
	/// Validate `config`, derive the signing keypair, and wire every component.
	pub async fn bootstrap(config: GatewayConfig) -> Result<Self> {
		config.validate()?;

		let keys = SigningKeys::derive(&config.jwt.private_key)?;

		Self::assemble(config, Arc::new(keys)).await
	}

	/// Same as [`App::bootstrap`] but reuses an already derived keypair.
	pub async fn bootstrap_with_keys(config: GatewayConfig, keys: Arc<SigningKeys>) -> Result<Self> {
		config.validate()?;

		Self::assemble(config, keys).await
	}

	/// Loaded configuration.
	pub fn config(&self) -> &GatewayConfig {
		&self.config
	}

	/// Shared key-value store.
	pub fn store(&self) -> &Arc<dyn KeyValueStore> {
		&self.store
	}

	/// Durable metadata store.
	pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
		&self.metadata
	}

	/// Static user directory seeded from configuration.
	pub fn directory(&self) -> &Arc<StaticUserDirectory> {
		&self.directory
	}

	/// Request gateway.
	pub fn gateway(&self) -> &Gateway {
		&self.gateway
	}

	/// Read-through cache engine.
	pub fn engine(&self) -> &CacheEngine {
		self.gateway.engine()
	}

	/// Token authority.
	pub fn tokens(&self) -> &TokenAuthority {
		self.gateway.tokens()
	}

	async fn assemble(config: GatewayConfig, keys: Arc<SigningKeys>) -> Result<Self> {
		let store = connect_store(&config).await?;
		let metadata: Arc<dyn MetadataStore> = Arc::new(
			SqliteMetadataStore::connect(&config.metadata.database_url, config.cache.default_ttl())
				.await?,
		);
		let directory = Arc::new(StaticUserDirectory::new(config.users.iter().cloned()));
		let tokens = TokenAuthority::new(
			keys,
			&config.jwt,
			RevocationIndex::new(store.clone()),
			directory.clone(),
		);
		let origin = OriginClient::new(&config.origin)?;
		let engine = CacheEngine::new(store.clone(), metadata.clone(), origin, &config.cache);
		let gateway = Gateway::new(engine, tokens, config.gateway.clone());

		tracing::info!(
			origin = %config.origin.base_url,
			kvs = if matches!(config.kvs, KvsConfig::Inline) { "inline" } else { "external" },
			protected = config.gateway.protected_prefixes.len(),
			"gateway assembled"
		);

		Ok(Self { config: Arc::new(config), store, metadata, directory, gateway })
	}
}

async fn connect_store(config: &GatewayConfig) -> Result<Arc<dyn KeyValueStore>> {
	match &config.kvs {
		KvsConfig::Inline => Ok(Arc::new(MemoryStore::new(config.cache.max_total_bytes))),
		#[cfg(feature = "redis")]
		KvsConfig::External { address } =>
			Ok(Arc::new(crate::store::redis::RedisStore::connect(address).await?)),
		#[cfg(not(feature = "redis"))]
		KvsConfig::External { .. } => Err(Error::Validation {
			field: "kvs.address",
			reason: "External stores require the `redis` feature.".into(),
		}),
	}
}
