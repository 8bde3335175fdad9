//! Bounded, timeout-enforcing client for the origin service.

// crates.io
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method};
use reqwest::{Client, RequestBuilder, redirect::Policy};
use tokio::sync::Semaphore;
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::entry::OriginResponse,
	config::OriginConfig,
	http::semantics,
	metrics,
};

/// Request/response surface toward the origin.
///
/// Every call is bounded by the configured timeout, which also covers waiting for one of the
/// `max-concurrent` permits. Bodies are read chunk by chunk and refused once they pass
/// `max-response-bytes`. No retries are attempted here.
#[derive(Clone, Debug)]
pub struct OriginClient {
	client: Client,
	base_url: Url,
	timeout: Duration,
	max_response_bytes: usize,
	permits: Arc<Semaphore>,
}
impl OriginClient {
	/// Build a client from origin settings.
	pub fn new(config: &OriginConfig) -> Result<Self> {
		let client = Client::builder()
			.redirect(Policy::none())
			.user_agent(format!("cache-gateway/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(config.timeout())
			.build()?;

		Ok(Self::with_client(config, client))
	}

	/// Build a client around a caller-supplied reqwest client (primarily for tests).
	pub fn with_client(config: &OriginConfig, client: Client) -> Self {
		Self {
			client,
			base_url: config.base_url.clone(),
			timeout: config.timeout(),
			max_response_bytes: config.max_response_bytes,
			permits: Arc::new(Semaphore::new(config.max_concurrent)),
		}
	}

	/// Base URL requests are resolved against.
	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	/// Resolve a gateway path and optional raw query against the base URL.
	pub fn resolve(&self, path: &str, query: Option<&str>) -> Url {
		let mut url = self.base_url.clone();
		let base_path = url.path().trim_end_matches('/').to_owned();
		let path = if path.starts_with('/') { path.to_owned() } else { format!("/{path}") };

		url.set_path(&format!("{base_path}{path}"));
		url.set_query(query.filter(|query| !query.is_empty()));

		url
	}

	/// Issue one request to the origin and buffer its response, up to `max-response-bytes`.
	#[tracing::instrument(skip(self, headers, body))]
	pub async fn send(
		&self,
		method: Method,
		path: &str,
		query: Option<&str>,
		headers: &HeaderMap,
		body: Bytes,
	) -> Result<OriginResponse> {
		let started = Instant::now();
		let _permit = match tokio::time::timeout(self.timeout, self.permits.acquire()).await {
			Ok(Ok(permit)) => permit,
			Ok(Err(_)) => return Err(Error::OriginTransport("origin client is shut down".into())),
			Err(_) => {
				tracing::warn!(timeout = ?self.timeout, "timed out waiting for an origin slot");
				metrics::record_origin_request(None, started.elapsed());

				return Err(Error::OriginTimeout { timeout: self.timeout });
			},
		};
		let remaining = self.timeout.saturating_sub(started.elapsed());

		if remaining.is_zero() {
			metrics::record_origin_request(None, started.elapsed());

			return Err(Error::OriginTimeout { timeout: self.timeout });
		}

		let url = self.resolve(path, query);
		let mut builder = self
			.client
			.request(method, url)
			.headers(semantics::forwardable_request_headers(headers))
			.timeout(remaining);

		if !body.is_empty() {
			builder = builder.body(body);
		}

		let outcome = self.receive(builder).await;
		let elapsed = started.elapsed();

		match outcome {
			Ok(Err(size)) => {
				metrics::record_origin_request(None, elapsed);
				tracing::warn!(size, limit = self.max_response_bytes, "origin body too large");

				Err(Error::OriginTransport(format!(
					"Origin body exceeds {} bytes.",
					self.max_response_bytes
				)))
			},
			Ok(Ok(response)) => {
				metrics::record_origin_request(Some(response.status), elapsed);
				tracing::debug!(status = response.status, ?elapsed, "origin responded");

				Ok(response)
			},
			Err(err) if err.is_timeout() => {
				metrics::record_origin_request(None, elapsed);
				tracing::warn!(timeout = ?self.timeout, "origin request timed out");

				Err(Error::OriginTimeout { timeout: self.timeout })
			},
			Err(err) => {
				metrics::record_origin_request(None, elapsed);
				tracing::warn!(error = %err, "origin transport failure");

				Err(Error::OriginTransport(err.to_string()))
			},
		}
	}

	/// Send `builder` and read the body, or report its size once it passes the ceiling.
	async fn receive(
		&self,
		builder: RequestBuilder,
	) -> std::result::Result<std::result::Result<OriginResponse, u64>, reqwest::Error> {
		let mut response = builder.send().await?;

		if let Some(length) = response.content_length()
			&& length > self.max_response_bytes as u64
		{
			return Ok(Err(length));
		}

		let status = response.status().as_u16();
		let headers = semantics::collect_headers(response.headers());
		let mut body = BytesMut::new();

		while let Some(chunk) = response.chunk().await? {
			if body.len() + chunk.len() > self.max_response_bytes {
				return Ok(Err((body.len() + chunk.len()) as u64));
			}

			body.extend_from_slice(&chunk);
		}

		Ok(Ok(OriginResponse { status, headers, body: body.freeze() }))
	}
}
