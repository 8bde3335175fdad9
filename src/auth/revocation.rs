//! Revocation records for logged-out access tokens and deleted accounts' refresh tokens.
//!
//! Records live in the shared key-value store under `revoked:<digest>` and expire together with
//! the token they block. Only digests are ever stored or logged.

// std
use std::{
	fmt::{Display, Formatter, Result as FmtResult},
	str::FromStr,
};
// crates.io
use bytes::Bytes;
use serde::{Deserialize, Serialize};
// self
use crate::{_prelude::*, security::TokenDigest, store::KeyValueStore};

/// Why a token was revoked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevocationReason {
	/// Access token invalidated at logout.
	Logout,
	/// Refresh token invalidated because its account was deleted.
	Delete,
}
impl RevocationReason {
	/// Stored representation.
	pub fn as_str(self) -> &'static str {
		match self {
			RevocationReason::Logout => "logout",
			RevocationReason::Delete => "delete",
		}
	}
}
impl Display for RevocationReason {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl FromStr for RevocationReason {
	type Err = Error;

	fn from_str(raw: &str) -> Result<Self> {
		match raw {
			"logout" => Ok(RevocationReason::Logout),
			"delete" => Ok(RevocationReason::Delete),
			other => Err(Error::Store(format!("unknown revocation reason '{other}'"))),
		}
	}
}

/// Index of revoked tokens, sharing the key-value store with the cache under its own prefix.
#[derive(Clone, Debug)]
pub struct RevocationIndex {
	store: Arc<dyn KeyValueStore>,
}
impl RevocationIndex {
	/// Key namespace of revocation records.
	pub const PREFIX: &'static str = "revoked:";

	/// Wrap a key-value store.
	pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
		Self { store }
	}

	/// Record `reason` for `token` for `ttl`, rounded up to the store's one second floor.
	pub async fn revoke(&self, token: &str, reason: RevocationReason, ttl: Duration) -> Result<()> {
		let digest = TokenDigest::of(token);
		let ttl = ttl.max(Duration::from_secs(1));
		let record = Bytes::from_static(reason.as_str().as_bytes());

		self.store.put(&Self::key(&digest), record, ttl).await?;

		tracing::info!(token = %digest.fingerprint(), %reason, ?ttl, "token revoked");

		Ok(())
	}

	/// Reason recorded for `token`, if it is currently revoked.
	pub async fn reason_for(&self, token: &str) -> Result<Option<RevocationReason>> {
		let digest = TokenDigest::of(token);
		let Some(raw) = self.store.get(&Self::key(&digest)).await? else {
			return Ok(None);
		};
		let raw = std::str::from_utf8(&raw)
			.map_err(|_| Error::Store("revocation record is not UTF-8".into()))?;

		raw.parse().map(Some)
	}

	fn key(digest: &TokenDigest) -> String {
		format!("{}{}", Self::PREFIX, digest.to_key())
	}
}
