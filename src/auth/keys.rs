//! Deterministic RS256 signing keypair.
//!
//! The keypair is derived from the configured secret so that one process produces the same
//! public key across restarts. Derivation is stable only for a given build of this crate; hosts
//! that must verify each other's tokens should exchange the published public key instead.
//! This is not a hardening measure: the secret needs full key-strength entropy.

// std
use std::fmt::{Debug, Formatter, Result as FmtResult};
// crates.io
use jsonwebtoken::{DecodingKey, EncodingKey};
use rand::{SeedableRng, rngs::StdRng};
use rsa::{
	RsaPrivateKey,
	pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding},
};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, security};

/// Modulus size of the derived key.
pub const RSA_BITS: usize = 2048;

/// RS256 keypair held by the token authority. Read-only after construction.
#[derive(Clone)]
pub struct SigningKeys {
	encoding: EncodingKey,
	decoding: DecodingKey,
	spki_der: Vec<u8>,
}
impl SigningKeys {
	/// Derive the keypair from `secret`.
	///
	/// This is CPU heavy (RSA prime search); call it once at start-up.
	pub fn derive(secret: &str) -> Result<Self> {
		if secret.is_empty() {
			return Err(Error::Validation {
				field: "jwt.private-key",
				reason: "Must not be empty.".into(),
			});
		}

		let digest = Sha256::digest(secret.as_bytes());
		let mut seed = [0u8; 32];

		seed.copy_from_slice(&digest);

		let mut rng = StdRng::from_seed(seed);
		let private_key = RsaPrivateKey::new(&mut rng, RSA_BITS).map_err(key_error)?;
		let public_key = private_key.to_public_key();
		let private_pem = private_key.to_pkcs8_pem(LineEnding::LF).map_err(key_error)?;
		let public_pem = public_key.to_public_key_pem(LineEnding::LF).map_err(key_error)?;
		let spki_der = public_key.to_public_key_der().map_err(key_error)?.as_bytes().to_vec();
		let encoding = EncodingKey::from_rsa_pem(private_pem.as_bytes())?;
		let decoding = DecodingKey::from_rsa_pem(public_pem.as_bytes())?;

		tracing::info!(bits = RSA_BITS, "signing keypair derived");

		Ok(Self { encoding, decoding, spki_der })
	}

	/// Key used to sign tokens.
	pub fn encoding_key(&self) -> &EncodingKey {
		&self.encoding
	}

	/// Key used to verify tokens.
	pub fn decoding_key(&self) -> &DecodingKey {
		&self.decoding
	}

	/// DER-encoded X.509 SubjectPublicKeyInfo.
	pub fn public_key_der(&self) -> &[u8] {
		&self.spki_der
	}

	/// Base64 SubjectPublicKeyInfo as published at the discovery endpoint.
	pub fn public_key_base64(&self) -> String {
		security::encode_spki(&self.spki_der)
	}
}
impl Debug for SigningKeys {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("SigningKeys")
			.field("public_key_bytes", &self.spki_der.len())
			.finish_non_exhaustive()
	}
}

fn key_error(err: impl std::fmt::Display) -> Error {
	Error::Validation { field: "jwt.private-key", reason: format!("Key derivation failed: {err}.") }
}
