//! Crate-wide error types and `Result` alias.

// std
use std::sync::Arc;
// crates.io
use http::StatusCode;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the caching gateway.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Http(#[from] http::Error),
	#[error(transparent)]
	Jsonwebtoken(#[from] jsonwebtoken::errors::Error),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Sqlx(#[from] sqlx::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[cfg(feature = "redis")]
	#[error(transparent)]
	Redis(#[from] redis::RedisError),

	#[error("Cache miss.")]
	CacheMiss,
	#[error("Cached entry of {size} bytes exceeds the {limit} byte limit.")]
	EntryTooLarge { size: usize, limit: usize },
	#[error("Response is not cacheable: {0}")]
	Uncacheable(String),
	#[error("No metadata recorded for '{url}'.")]
	MetadataNotFound { url: String },
	#[error("Key-value store error: {0}")]
	Store(String),

	#[error("Origin did not answer within {timeout:?}.")]
	OriginTimeout { timeout: std::time::Duration },
	#[error("Origin transport failure: {0}")]
	OriginTransport(String),
	#[error("Origin responded with HTTP status {status}.")]
	OriginStatus { status: StatusCode },

	#[error("Token expired.")]
	TokenExpired,
	#[error("Token malformed.")]
	TokenMalformed,
	#[error("Token signature invalid.")]
	TokenSignatureInvalid,
	#[error("Token revoked.")]
	TokenRevoked,
	#[error("Principal unknown.")]
	PrincipalUnknown,

	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },

	#[error(transparent)]
	Shared(Arc<Error>),
}
impl Error {
	/// Peel the sharing layer added when one failure is delivered to several callers.
	pub fn root(&self) -> &Error {
		match self {
			Error::Shared(inner) => inner.root(),
			other => other,
		}
	}

	/// HTTP status a client observes for this error.
	pub fn status_code(&self) -> StatusCode {
		match self.root() {
			Error::OriginTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
			Error::OriginTransport(_) | Error::OriginStatus { .. } => StatusCode::BAD_GATEWAY,
			Error::TokenExpired
			| Error::TokenMalformed
			| Error::TokenSignatureInvalid
			| Error::TokenRevoked => StatusCode::UNAUTHORIZED,
			Error::PrincipalUnknown => StatusCode::FORBIDDEN,
			Error::MetadataNotFound { .. } => StatusCode::NOT_FOUND,
			Error::Validation { .. } => StatusCode::BAD_REQUEST,
			_ => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	/// Whether the client should retry with its refresh token.
	pub fn refresh_hint(&self) -> bool {
		matches!(self.root(), Error::TokenExpired)
	}

	/// Message safe to hand to clients.
	///
	/// Token failures collapse to fixed strings and internal failures never echo their source.
	pub fn client_message(&self) -> String {
		match self.root() {
			Error::OriginTimeout { .. } => "Origin timed out.".into(),
			Error::OriginTransport(_) => "Origin unreachable.".into(),
			Error::OriginStatus { status } => format!("Origin responded with {}.", status.as_u16()),
			Error::TokenExpired => "Access token expired.".into(),
			Error::TokenMalformed | Error::TokenSignatureInvalid | Error::TokenRevoked =>
				"Invalid token.".into(),
			Error::PrincipalUnknown => "Unknown principal.".into(),
			err @ (Error::MetadataNotFound { .. } | Error::Validation { .. }) => err.to_string(),
			_ => "Internal gateway error.".into(),
		}
	}
}
