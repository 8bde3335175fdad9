//! Security utilities covering token redaction, bearer extraction, and public key publication.
//!
//! # Threat Model
//! Tokens are bearer credentials: anything that can read a log line or a store key containing
//! one can replay it. These helpers make sure the rest of the crate only ever handles digests of
//! token strings outside the request path itself.

// std
use std::fmt::{Debug, Formatter, Result as FmtResult};
// crates.io
use base64::prelude::*;
use http::{HeaderMap, header::AUTHORIZATION};
use sha2::{Digest, Sha256};

const FINGERPRINT_BYTES: usize = 12;

/// SHA-256 digest of a token string, safe to log and to use as a store key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TokenDigest {
	bytes: [u8; 32],
}
impl TokenDigest {
	/// Digest the given token string.
	pub fn of(token: &str) -> Self {
		let digest = Sha256::digest(token.as_bytes());
		let mut bytes = [0u8; 32];

		bytes.copy_from_slice(&digest);

		Self { bytes }
	}

	/// Full digest, base64url encoded without padding.
	pub fn to_key(&self) -> String {
		BASE64_URL_SAFE_NO_PAD.encode(self.bytes)
	}

	/// Short prefix of the digest for log correlation.
	pub fn fingerprint(&self) -> String {
		BASE64_URL_SAFE_NO_PAD.encode(&self.bytes[..FINGERPRINT_BYTES])
	}
}
impl Debug for TokenDigest {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		write!(f, "TokenDigest({})", self.fingerprint())
	}
}

/// Log-safe fingerprint of a token string.
pub fn token_fingerprint(token: &str) -> String {
	TokenDigest::of(token).fingerprint()
}

/// Extract the raw token from `Authorization: Bearer <token>`.
///
/// The scheme is matched case-insensitively; empty tokens are treated as absent.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
	let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
	let (scheme, token) = value.split_once(' ')?;

	if !scheme.eq_ignore_ascii_case("bearer") {
		return None;
	}

	let token = token.trim();

	if token.is_empty() { None } else { Some(token) }
}

/// Encode a DER SubjectPublicKeyInfo for publication.
pub fn encode_spki(spki_der: &[u8]) -> String {
	BASE64_STANDARD.encode(spki_der)
}
