//! Integration tests for token issuance, refresh, logout, and account revocation.

// std
use std::{
	sync::{Arc, LazyLock},
	time::Duration,
};
// crates.io
use cache_gateway::{
	AccessStatus, Error, KeyValueStore, MemoryStore, Principal, Result, RevocationIndex,
	SigningKeys, StaticUserDirectory, TokenAuthority, TokenKind, config::JwtConfig,
};

static KEYS: LazyLock<Arc<SigningKeys>> =
	LazyLock::new(|| Arc::new(SigningKeys::derive("token-lifecycle").expect("keys")));

fn authority(access_secs: u64, refresh_secs: u64) -> (TokenAuthority, Arc<MemoryStore>) {
	let _ = tracing_subscriber::fmt::try_init();

	let mut config = JwtConfig::new("token-lifecycle");

	config.access_token_validity_in_seconds = access_secs;
	config.refresh_token_validity_in_seconds = refresh_secs;

	let store = Arc::new(MemoryStore::new(1_048_576));
	let directory = StaticUserDirectory::new([Principal {
		email: "ada@example.com".into(),
		authorities: vec!["reader".into()],
	}]);
	let authority = TokenAuthority::new(
		KEYS.clone(),
		&config,
		RevocationIndex::new(store.clone()),
		Arc::new(directory),
	);

	(authority, store)
}

#[tokio::test]
async fn expired_access_token_is_refreshable() -> Result<()> {
	let (authority, _) = authority(1, 60);
	let pair = authority.issue("ada@example.com", vec!["reader".into()])?;

	assert_eq!(authority.validate_access(&pair.access_token).await, AccessStatus::Valid);

	tokio::time::sleep(Duration::from_millis(2_100)).await;

	assert_eq!(authority.validate_access(&pair.access_token).await, AccessStatus::Refreshable);
	assert!(authority.validate_refresh(&pair.refresh_token).await);
	// The principal still resolves from an expired token's claims.
	assert_eq!(authority.authentication_of(&pair.access_token).await?.email, "ada@example.com");

	let renewed = authority.reissue(&pair.access_token, &pair.refresh_token).await?;
	let claims = authority.parse(&renewed.access_token)?;

	assert_eq!(authority.validate_access(&renewed.access_token).await, AccessStatus::Valid);
	assert_eq!(claims.sub, TokenKind::Access);
	assert_eq!(claims.email.as_deref(), Some("ada@example.com"));
	assert_eq!(claims.roles.as_deref(), Some("reader"));
	// The old refresh token stays usable until it expires or is revoked.
	assert!(authority.validate_refresh(&pair.refresh_token).await);

	Ok(())
}

#[tokio::test]
async fn logout_revokes_access_until_expiry() -> Result<()> {
	let (authority, store) = authority(30, 60);
	let pair = authority.issue("ada@example.com", Vec::new())?;

	authority.logout(&pair.access_token).await?;

	assert_eq!(authority.validate_access(&pair.access_token).await, AccessStatus::Invalid);
	assert!(matches!(
		authority.authentication_of(&pair.access_token).await,
		Err(Error::TokenRevoked)
	));
	assert!(matches!(
		authority.reissue(&pair.access_token, &pair.refresh_token).await,
		Err(Error::TokenRevoked)
	));

	let records = store.scan("revoked:*").await?;

	assert_eq!(records.len(), 1);
	assert!(records.iter().all(|key| !key.contains(&pair.access_token)));

	Ok(())
}

#[tokio::test]
async fn account_deletion_blocks_refresh_only() -> Result<()> {
	let (authority, _) = authority(30, 60);
	let pair = authority.issue("ada@example.com", Vec::new())?;

	authority.revoke_account(&pair.refresh_token).await?;

	assert!(!authority.validate_refresh(&pair.refresh_token).await);
	assert_eq!(authority.validate_access(&pair.access_token).await, AccessStatus::Valid);
	assert!(matches!(
		authority.reissue(&pair.access_token, &pair.refresh_token).await,
		Err(Error::TokenRevoked)
	));

	Ok(())
}

#[tokio::test]
async fn principal_resolution() -> Result<()> {
	let (authority, _) = authority(30, 60);
	let known = authority.issue("ada@example.com", Vec::new())?;
	let unknown = authority.issue("mallory@example.com", Vec::new())?;

	assert_eq!(authority.authentication_of(&known.access_token).await?.authorities, ["reader"]);
	assert!(matches!(
		authority.authentication_of(&unknown.access_token).await,
		Err(Error::PrincipalUnknown)
	));
	assert!(matches!(
		authority.authentication_of(&known.refresh_token).await,
		Err(Error::TokenMalformed)
	));

	Ok(())
}

#[tokio::test]
async fn tampered_signatures_are_rejected() -> Result<()> {
	let (authority, _) = authority(30, 60);
	let pair = authority.issue("ada@example.com", Vec::new())?;
	let expiry = authority.expiry_instant(&pair.access_token)?;

	assert!(expiry > chrono::Utc::now());
	assert!(!authority.public_key().is_empty());

	let (signed, signature) = pair.access_token.rsplit_once('.').expect("compact JWS");
	let flipped = if signature.starts_with('A') { 'B' } else { 'A' };
	let tampered = format!("{signed}.{flipped}{}", &signature[1..]);

	assert_eq!(authority.validate_access(&tampered).await, AccessStatus::Invalid);
	assert!(matches!(
		authority.parse(&tampered),
		Err(Error::TokenSignatureInvalid | Error::TokenMalformed)
	));

	Ok(())
}
