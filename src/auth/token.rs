//! Access/refresh token issuance, verification, and revocation-aware validation.

// std
use std::collections::{BTreeMap, HashSet};
// crates.io
use jsonwebtoken::{Algorithm, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	auth::{
		directory::{Principal, UserDirectory},
		keys::SigningKeys,
		revocation::{RevocationIndex, RevocationReason},
	},
	config::JwtConfig,
	metrics,
	security,
};

/// Value of the `sub` claim, naming what the token is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
	/// Short-lived credential carrying identity and roles.
	#[serde(rename = "access-token")]
	Access,
	/// Long-lived credential that can only mint new pairs.
	#[serde(rename = "refresh-token")]
	Refresh,
}

/// Claims carried by both token kinds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Claims {
	/// Token kind.
	pub sub: TokenKind,
	/// Expiry as seconds since the Unix epoch.
	pub exp: i64,
	/// Account e-mail (access tokens only).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub email: Option<String>,
	/// Granted roles joined with `,` (access tokens only).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub roles: Option<String>,
	/// Any further claims, including the issuer marker of access tokens.
	#[serde(flatten)]
	pub markers: BTreeMap<String, Value>,
}
impl Claims {
	/// Instant the token stops being valid.
	pub fn expiry_instant(&self) -> DateTime<Utc> {
		DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
	}

	/// Whether `exp ≤ now`.
	pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
		self.expiry_instant() <= now
	}

	/// Life left at `now`, or `None` once expired.
	pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
		(self.expiry_instant() - now).to_std().ok().filter(|remaining| !remaining.is_zero())
	}

	/// Individual roles of the comma-joined `roles` claim.
	pub fn role_list(&self) -> Vec<String> {
		self.roles
			.as_deref()
			.unwrap_or_default()
			.split(',')
			.map(str::trim)
			.filter(|role| !role.is_empty())
			.map(str::to_owned)
			.collect()
	}

	/// Whether the claim named `issuer` is present and `true`.
	pub fn carries_marker(&self, issuer: &str) -> bool {
		matches!(self.markers.get(issuer), Some(Value::Bool(true)))
	}
}

/// Freshly minted credentials.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TokenPair {
	/// Compact JWS access token.
	pub access_token: String,
	/// Compact JWS refresh token.
	pub refresh_token: String,
}

/// Outcome of checking an access token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessStatus {
	/// Signature valid, not expired, not revoked.
	Valid,
	/// Unusable; the client must authenticate again.
	Invalid,
	/// Signature valid but expired; the client should use its refresh token.
	Refreshable,
}
impl AccessStatus {
	fn as_label(self) -> &'static str {
		match self {
			AccessStatus::Valid => "valid",
			AccessStatus::Invalid => "invalid",
			AccessStatus::Refreshable => "refreshable",
		}
	}
}

/// Issues and validates RS256 tokens.
///
/// Owns the process keypair, which is derived before the first request and never mutated.
#[derive(Clone, Debug)]
pub struct TokenAuthority {
	keys: Arc<SigningKeys>,
	revocations: RevocationIndex,
	directory: Arc<dyn UserDirectory>,
	access_ttl: Duration,
	refresh_ttl: Duration,
	issuer: String,
	validation: Validation,
}
impl TokenAuthority {
	/// Derive the keypair from configuration and assemble the authority.
	pub fn from_config(
		config: &JwtConfig,
		revocations: RevocationIndex,
		directory: Arc<dyn UserDirectory>,
	) -> Result<Self> {
		let keys = SigningKeys::derive(&config.private_key)?;

		Ok(Self::new(Arc::new(keys), config, revocations, directory))
	}

	/// Assemble the authority around an existing keypair.
	pub fn new(
		keys: Arc<SigningKeys>,
		config: &JwtConfig,
		revocations: RevocationIndex,
		directory: Arc<dyn UserDirectory>,
	) -> Self {
		let mut validation = Validation::new(Algorithm::RS256);

		// Expiry is judged here so expired tokens still yield their claims.
		validation.validate_exp = false;
		validation.validate_aud = false;
		validation.leeway = 0;
		validation.required_spec_claims = HashSet::from(["exp".to_owned()]);

		Self {
			keys,
			revocations,
			directory,
			access_ttl: config.access_ttl(),
			refresh_ttl: config.refresh_ttl(),
			issuer: config.issuer.clone(),
			validation,
		}
	}

	/// Base64 SubjectPublicKeyInfo of the verification key.
	pub fn public_key(&self) -> String {
		self.keys.public_key_base64()
	}

	/// Revocation index used by this authority.
	pub fn revocations(&self) -> &RevocationIndex {
		&self.revocations
	}

	/// Mint an access/refresh pair for `email` with `roles`.
	pub fn issue(&self, email: &str, roles: Vec<String>) -> Result<TokenPair> {
		let now = Utc::now();
		let mut markers = BTreeMap::new();

		markers.insert(self.issuer.clone(), Value::Bool(true));

		let access = Claims {
			sub: TokenKind::Access,
			exp: expiry_after(now, self.access_ttl),
			email: Some(email.to_owned()),
			roles: Some(roles.join(",")),
			markers,
		};
		let refresh = Claims {
			sub: TokenKind::Refresh,
			exp: expiry_after(now, self.refresh_ttl),
			email: None,
			roles: None,
			markers: BTreeMap::new(),
		};
		let pair = TokenPair { access_token: self.sign(&access)?, refresh_token: self.sign(&refresh)? };

		tracing::debug!(
			access = %security::token_fingerprint(&pair.access_token),
			refresh = %security::token_fingerprint(&pair.refresh_token),
			"token pair issued"
		);

		Ok(pair)
	}

	/// Verify the signature of `token` and return its claims, even when it has expired.
	pub fn parse(&self, token: &str) -> Result<Claims> {
		if token.is_empty() {
			return Err(Error::TokenMalformed);
		}

		match jsonwebtoken::decode::<Claims>(token, self.keys.decoding_key(), &self.validation) {
			Ok(data) => Ok(data.claims),
			Err(err) => match err.kind() {
				ErrorKind::InvalidSignature => Err(Error::TokenSignatureInvalid),
				_ => {
					tracing::debug!(
						token = %security::token_fingerprint(token),
						error = %err,
						"token rejected"
					);

					Err(Error::TokenMalformed)
				},
			},
		}
	}

	/// Expiry instant embedded in `token`.
	pub fn expiry_instant(&self, token: &str) -> Result<DateTime<Utc>> {
		Ok(self.parse(token)?.expiry_instant())
	}

	/// Validate an access token, collapsing every failure into a three-way status.
	///
	/// Store failures while consulting the revocation index fail closed.
	pub async fn validate_access(&self, token: &str) -> AccessStatus {
		let status = match self.check_access(token).await {
			Ok(_) => AccessStatus::Valid,
			Err(Error::TokenExpired) => AccessStatus::Refreshable,
			Err(err) => {
				if err.status_code().is_server_error() {
					tracing::warn!(
						token = %security::token_fingerprint(token),
						error = %err,
						"revocation check failed; rejecting token"
					);
				}

				AccessStatus::Invalid
			},
		};

		metrics::record_token_validation(status.as_label());

		status
	}

	/// Typed variant of [`TokenAuthority::validate_access`] returning the claims on success.
	pub async fn check_access(&self, token: &str) -> Result<Claims> {
		let claims = self.access_claims(token).await?;

		if claims.is_expired_at(Utc::now()) {
			return Err(Error::TokenExpired);
		}

		Ok(claims)
	}

	/// Whether `token` is a live, unrevoked refresh token.
	pub async fn validate_refresh(&self, token: &str) -> bool {
		let valid = self.check_refresh(token).await.is_ok();

		metrics::record_token_validation(if valid { "refresh-valid" } else { "refresh-invalid" });

		valid
	}

	/// Typed variant of [`TokenAuthority::validate_refresh`].
	pub async fn check_refresh(&self, token: &str) -> Result<Claims> {
		let claims = self.parse(token)?;

		if claims.sub != TokenKind::Refresh {
			return Err(Error::TokenMalformed);
		}
		if claims.is_expired_at(Utc::now()) {
			return Err(Error::TokenExpired);
		}
		if self.revocations.reason_for(token).await? == Some(RevocationReason::Delete) {
			return Err(Error::TokenRevoked);
		}

		Ok(claims)
	}

	/// Mint a new pair from a valid refresh token and a valid or merely expired access token.
	///
	/// Identity and roles are carried over from the access token.
	pub async fn reissue(&self, access_token: &str, refresh_token: &str) -> Result<TokenPair> {
		self.check_refresh(refresh_token).await?;

		let claims = self.access_claims(access_token).await?;
		let email = claims.email.as_deref().ok_or(Error::TokenMalformed)?;

		self.issue(email, claims.role_list())
	}

	/// Revoke `access_token` for the rest of its life. Expired tokens need no record.
	pub async fn logout(&self, access_token: &str) -> Result<()> {
		let claims = self.parse(access_token)?;

		if claims.sub != TokenKind::Access {
			return Err(Error::TokenMalformed);
		}

		match claims.remaining_at(Utc::now()) {
			Some(remaining) =>
				self.revocations.revoke(access_token, RevocationReason::Logout, remaining).await,
			None => {
				tracing::debug!(
					token = %security::token_fingerprint(access_token),
					"logout of expired token needs no record"
				);

				Ok(())
			},
		}
	}

	/// Revoke `refresh_token` because its account is being deleted.
	pub async fn revoke_account(&self, refresh_token: &str) -> Result<()> {
		let claims = self.parse(refresh_token)?;

		if claims.sub != TokenKind::Refresh {
			return Err(Error::TokenMalformed);
		}

		match claims.remaining_at(Utc::now()) {
			Some(remaining) =>
				self.revocations.revoke(refresh_token, RevocationReason::Delete, remaining).await,
			None => Ok(()),
		}
	}

	/// Resolve the principal behind an access token.
	///
	/// Expired tokens still resolve; logged-out tokens do not.
	pub async fn authentication_of(&self, access_token: &str) -> Result<Principal> {
		let claims = self.access_claims(access_token).await?;
		let email = claims.email.ok_or(Error::PrincipalUnknown)?;

		self.directory.find_by_email(&email).await?.ok_or(Error::PrincipalUnknown)
	}

	async fn access_claims(&self, token: &str) -> Result<Claims> {
		let claims = self.parse(token)?;

		if claims.sub != TokenKind::Access {
			return Err(Error::TokenMalformed);
		}
		if self.revocations.reason_for(token).await? == Some(RevocationReason::Logout) {
			return Err(Error::TokenRevoked);
		}

		Ok(claims)
	}

	fn sign(&self, claims: &Claims) -> Result<String> {
		Ok(jsonwebtoken::encode(&Header::new(Algorithm::RS256), claims, self.keys.encoding_key())?)
	}
}

/// `now + ttl`, rounded up to a whole second.
fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> i64 {
	let expiry = TimeDelta::from_std(ttl)
		.ok()
		.and_then(|ttl| now.checked_add_signed(ttl))
		.unwrap_or(DateTime::<Utc>::MAX_UTC);

	expiry.timestamp() + i64::from(expiry.timestamp_subsec_nanos() > 0)
}
