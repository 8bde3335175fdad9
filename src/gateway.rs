//! Request classification, authorization, and response envelopes for the gateway surface.

// crates.io
use bytes::Bytes;
use http::{
	HeaderMap, HeaderValue, Method, StatusCode,
	header::{CONTENT_ENCODING, CONTENT_TYPE, WWW_AUTHENTICATE},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	auth::token::{AccessStatus, TokenAuthority},
	cache::{
		engine::{CacheEngine, CacheSource},
		entry::OriginResponse,
	},
	config::GatewayPolicy,
	security,
};

/// Response header reporting whether a read was served from the cache.
pub const X_CACHE: &str = "x-cache";
/// Response header telling the client to use its refresh token.
pub const X_TOKEN_REFRESH: &str = "x-token-refresh";

const REFRESH_CHALLENGE: &str =
	r#"Bearer error="invalid_token", error_description="token expired""#;
const FALLBACK_BODY: &[u8] = br#"{"status":500,"message":"Internal gateway error."}"#;

/// How a request is handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestClass {
	/// `GET`: served read-through.
	Read,
	/// `POST`, `PUT`, `DELETE`, `PATCH`: forwarded, then invalidated on success.
	Mutating,
}
impl RequestClass {
	/// Classify `method`, or `None` when the gateway does not serve it.
	pub fn of(method: &Method) -> Option<Self> {
		match *method {
			Method::GET => Some(RequestClass::Read),
			Method::POST | Method::PUT | Method::DELETE | Method::PATCH =>
				Some(RequestClass::Mutating),
			_ => None,
		}
	}
}

/// Transport-neutral incoming request.
#[derive(Clone, Debug)]
pub struct GatewayRequest {
	/// HTTP method.
	pub method: Method,
	/// Request path, the cache namespace.
	pub path: String,
	/// Raw query string without the leading `?`.
	pub query: Option<String>,
	/// Client headers.
	pub headers: HeaderMap,
	/// Buffered request body.
	pub body: Bytes,
}
impl GatewayRequest {
	/// Request with no query, headers, or body.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self {
			method,
			path: path.into(),
			query: None,
			headers: HeaderMap::new(),
			body: Bytes::new(),
		}
	}

	/// Attach a raw query string.
	pub fn with_query(mut self, query: impl Into<String>) -> Self {
		self.query = Some(query.into());

		self
	}

	/// Replace the headers.
	pub fn with_headers(mut self, headers: HeaderMap) -> Self {
		self.headers = headers;

		self
	}

	/// Attach a bearer access token.
	pub fn with_bearer(mut self, token: &str) -> Self {
		if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
			self.headers.insert(http::header::AUTHORIZATION, value);
		}

		self
	}

	/// Replace the body.
	pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
		self.body = body.into();

		self
	}
}

/// Standard response body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
	/// `{ "status": <code>, "result": <body> }`.
	Success {
		/// HTTP status.
		status: u16,
		/// Origin body, as JSON when it parses and as a string otherwise.
		result: Value,
	},
	/// `{ "status": <code>, "message": <text> }`.
	Failure {
		/// HTTP status.
		status: u16,
		/// Client-safe description.
		message: String,
	},
}
impl Envelope {
	/// Wrap an origin response. Origin statuses of 400 and above become failures.
	pub fn for_origin(response: &OriginResponse) -> Self {
		let status = response.status_code();

		if status.is_client_error() || status.is_server_error() {
			let text = String::from_utf8_lossy(&response.body).trim().to_owned();
			let message = if text.is_empty() {
				status.canonical_reason().unwrap_or("Origin error.").to_owned()
			} else {
				text
			};

			return Envelope::Failure { status: response.status, message };
		}

		let result = if response.body.is_empty() {
			Value::Null
		} else {
			serde_json::from_slice(&response.body).unwrap_or_else(|_| {
				Value::String(String::from_utf8_lossy(&response.body).into_owned())
			})
		};

		Envelope::Success { status: response.status, result }
	}

	/// Envelope describing `err` without leaking internal detail.
	pub fn for_error(err: &Error) -> Self {
		Envelope::Failure { status: err.status_code().as_u16(), message: err.client_message() }
	}

	/// HTTP status carried by the envelope.
	pub fn status(&self) -> u16 {
		match self {
			Envelope::Success { status, .. } | Envelope::Failure { status, .. } => *status,
		}
	}
}

/// Transport-neutral outgoing response.
#[derive(Clone, Debug)]
pub struct GatewayResponse {
	/// HTTP status.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Serialized [`Envelope`].
	pub body: Bytes,
}
impl GatewayResponse {
	/// Serialize `envelope` as the body under `status`.
	pub fn json(status: StatusCode, mut headers: HeaderMap, envelope: &Envelope) -> Self {
		let body = match serde_json::to_vec(envelope) {
			Ok(body) => Bytes::from(body),
			Err(err) => {
				tracing::error!(error = %err, "failed to serialize response envelope");

				Bytes::from_static(FALLBACK_BODY)
			},
		};

		headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

		Self { status, headers, body }
	}

	/// Relay an origin response, keeping its end-to-end headers.
	pub fn from_origin(response: &OriginResponse) -> Self {
		let mut headers = crate::http::semantics::restore_headers(&response.headers);

		headers.remove(CONTENT_ENCODING);

		Self::json(response.status_code(), headers, &Envelope::for_origin(response))
	}

	/// Map `err` onto its status, attaching the refresh marker for expired access tokens.
	pub fn from_error(err: &Error) -> Self {
		let mut headers = HeaderMap::new();

		if err.refresh_hint() {
			headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static(REFRESH_CHALLENGE));
			headers.insert(X_TOKEN_REFRESH, HeaderValue::from_static("required"));
		}

		Self::json(err.status_code(), headers, &Envelope::for_error(err))
	}

	/// Failure envelope with a fixed message.
	pub fn failure(status: StatusCode, message: impl Into<String>) -> Self {
		Self::json(
			status,
			HeaderMap::new(),
			&Envelope::Failure { status: status.as_u16(), message: message.into() },
		)
	}

	/// Decode the body back into an envelope.
	pub fn envelope(&self) -> Result<Envelope> {
		Ok(serde_json::from_slice(&self.body)?)
	}

	/// Whether the response asks the client to refresh its tokens.
	pub fn requests_refresh(&self) -> bool {
		self.headers.contains_key(X_TOKEN_REFRESH)
	}

	/// Tag the response with the `x-cache` header for `source`.
	pub fn with_cache_source(mut self, source: CacheSource) -> Self {
		self.headers.insert(X_CACHE, HeaderValue::from_static(source.as_header_value()));

		self
	}
}

/// Per-request protocol: classify, authorize, then delegate to the cache engine.
///
/// Stateless between requests.
#[derive(Clone, Debug)]
pub struct Gateway {
	engine: CacheEngine,
	tokens: TokenAuthority,
	policy: GatewayPolicy,
}
impl Gateway {
	/// Assemble the gateway.
	pub fn new(engine: CacheEngine, tokens: TokenAuthority, policy: GatewayPolicy) -> Self {
		Self { engine, tokens, policy }
	}

	/// Cache engine behind the gateway.
	pub fn engine(&self) -> &CacheEngine {
		&self.engine
	}

	/// Token authority used for protected paths.
	pub fn tokens(&self) -> &TokenAuthority {
		&self.tokens
	}

	/// Authorization policy.
	pub fn policy(&self) -> &GatewayPolicy {
		&self.policy
	}

	/// Handle one request. Failures are rendered as error envelopes.
	#[tracing::instrument(skip_all, fields(method = %request.method, path = %request.path))]
	pub async fn handle(&self, request: GatewayRequest) -> GatewayResponse {
		match self.dispatch(request).await {
			Ok(response) => response,
			Err(err) => {
				if err.status_code().is_server_error() {
					tracing::warn!(error = %err, "request failed");
				} else {
					tracing::debug!(error = %err, "request rejected");
				}

				GatewayResponse::from_error(&err)
			},
		}
	}

	/// Check the bearer token of a request to a protected path.
	///
	/// Unprotected paths always pass. An expired token yields [`Error::TokenExpired`]; every
	/// other failure yields a plain token error.
	pub async fn authorize(&self, request: &GatewayRequest) -> Result<()> {
		if !self.policy.is_protected(&request.path) {
			return Ok(());
		}

		let Some(token) = security::extract_bearer_token(&request.headers) else {
			return Err(Error::TokenMalformed);
		};

		match self.tokens.validate_access(token).await {
			AccessStatus::Valid => Ok(()),
			AccessStatus::Refreshable => Err(Error::TokenExpired),
			AccessStatus::Invalid => Err(Error::TokenRevoked),
		}
	}

	async fn dispatch(&self, request: GatewayRequest) -> Result<GatewayResponse> {
		let Some(class) = RequestClass::of(&request.method) else {
			return Ok(GatewayResponse::failure(
				StatusCode::METHOD_NOT_ALLOWED,
				format!("Method {} is not supported.", request.method),
			));
		};

		self.authorize(&request).await?;

		match class {
			RequestClass::Read => {
				let read = self.engine.read(&request.path, request.query.as_deref()).await?;

				Ok(GatewayResponse::from_origin(&read.response).with_cache_source(read.source))
			},
			RequestClass::Mutating => {
				let response = self
					.engine
					.forward_mutation(
						request.method,
						&request.path,
						request.query.as_deref(),
						&request.headers,
						request.body,
					)
					.await?;

				Ok(GatewayResponse::from_origin(&response))
			},
		}
	}
}
