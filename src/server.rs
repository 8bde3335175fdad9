//! HTTP surface: the gateway listener, the authentication listener, and the daemon entry point.

// std
use std::path::PathBuf;
// crates.io
use axum::{
	Router,
	body::Bytes,
	extract::{Query, RawQuery, Request, State},
	http::{HeaderMap, Method, StatusCode, Uri},
	middleware::{self, Next},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use clap::Parser;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use url::form_urlencoded;
// self
use crate::{
	_prelude::*,
	app::App,
	cache::engine::CacheSource,
	config::GatewayConfig,
	gateway::{Envelope, GatewayRequest, GatewayResponse},
};

/// Command line of the `cache-gatewayd` daemon.
#[derive(Debug, Parser)]
#[command(version, about = "Read-through API caching gateway with a token authority.")]
pub struct DaemonArgs {
	/// Path to the TOML configuration file.
	#[arg(long, short, env = "CACHE_GATEWAY_CONFIG", default_value = "cache-gateway.toml")]
	pub config: PathBuf,
}

#[derive(Debug, Deserialize)]
struct PatternQuery {
	url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PrefixQuery {
	prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct MetadataUpdate {
	url: String,
	ttl_seconds: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct IssueRequest {
	email: String,
	#[serde(default)]
	roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ReissueRequest {
	access_token: String,
	refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct LogoutRequest {
	access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RevokeRequest {
	refresh_token: String,
}

impl IntoResponse for GatewayResponse {
	fn into_response(self) -> Response {
		(self.status, self.headers, self.body).into_response()
	}
}
impl IntoResponse for Error {
	fn into_response(self) -> Response {
		if self.status_code().is_server_error() {
			tracing::warn!(error = %self, "request failed");
		}

		GatewayResponse::from_error(&self).into_response()
	}
}

/// Install the `tracing` subscriber, honoring `RUST_LOG` (default `info`).
pub fn init_tracing() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

	if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
		tracing::debug!("tracing subscriber already installed");
	}
}

/// Load the configuration named by `args`, assemble the service, and serve until interrupted.
pub async fn run(args: DaemonArgs) -> Result<()> {
	let raw = std::fs::read_to_string(&args.config)?;
	let config = GatewayConfig::from_toml_str(&raw)?;

	#[cfg(feature = "prometheus")]
	crate::metrics::install_default_exporter()?;

	let app = App::bootstrap(config).await?;

	serve(app).await
}

/// Bind both listeners and serve them until a shutdown signal arrives.
pub async fn serve(app: App) -> Result<()> {
	let gateway_listener = TcpListener::bind(app.config().server.gateway_address).await?;
	let auth_listener = TcpListener::bind(app.config().server.auth_address).await?;

	tracing::info!(
		gateway = %gateway_listener.local_addr()?,
		auth = %auth_listener.local_addr()?,
		"listening"
	);

	let gateway = axum::serve(gateway_listener, gateway_router(app.clone()))
		.with_graceful_shutdown(shutdown_signal());
	let auth = axum::serve(auth_listener, auth_router(app)).with_graceful_shutdown(shutdown_signal());

	tokio::try_join!(gateway.into_future(), auth.into_future())?;

	tracing::info!("listeners stopped");

	Ok(())
}

/// Gateway listener: transparent read-through and mutation forwarding plus the admin endpoints.
///
/// Admin endpoints obey the same protected-prefix policy as gateway paths.
pub fn gateway_router(app: App) -> Router {
	let admin = Router::new()
		.route("/admin/metadata", get(get_metadata).put(put_metadata).delete(delete_metadata))
		.route("/admin/cache", axum::routing::delete(invalidate_cache))
		.route("/admin/cache/refresh", post(refresh_cache))
		.route("/admin/cache/stats", get(cache_stats))
		.route_layer(middleware::from_fn_with_state(app.clone(), admin_guard));
	let router = Router::new().merge(admin).fallback(forward);

	#[cfg(feature = "prometheus")]
	let router = router.route("/metrics", get(render_metrics));

	router.with_state(app)
}

/// Authentication listener.
pub fn auth_router(app: App) -> Router {
	Router::new()
		.route("/auth/issue", post(issue))
		.route("/auth/refresh", post(reissue))
		.route("/auth/logout", post(logout))
		.route("/auth/revoke", post(revoke))
		.route("/auth/public-key", get(public_key))
		.with_state(app)
}

async fn forward(
	State(app): State<App>,
	method: Method,
	uri: Uri,
	headers: HeaderMap,
	body: Bytes,
) -> GatewayResponse {
	let mut request =
		GatewayRequest::new(method, uri.path()).with_headers(headers).with_body(body);

	if let Some(query) = uri.query() {
		request = request.with_query(query);
	}

	app.gateway().handle(request).await
}

async fn admin_guard(State(app): State<App>, request: Request, next: Next) -> Response {
	let probe = GatewayRequest::new(request.method().clone(), request.uri().path())
		.with_headers(request.headers().clone());

	match app.gateway().authorize(&probe).await {
		Ok(()) => next.run(request).await,
		Err(err) => err.into_response(),
	}
}

async fn get_metadata(
	State(app): State<App>,
	Query(query): Query<PatternQuery>,
) -> Result<GatewayResponse> {
	match query.url {
		Some(url) => {
			let record = app
				.metadata()
				.get(&url)
				.await?
				.ok_or_else(|| Error::MetadataNotFound { url: url.clone() })?;

			success(&record)
		},
		None => success(&app.metadata().list().await?),
	}
}

async fn put_metadata(State(app): State<App>, body: Bytes) -> Result<GatewayResponse> {
	let update: MetadataUpdate = parse_body(&body)?;
	let record = app.metadata().upsert(&update.url, update.ttl_seconds).await?;
	let invalidated = app.engine().invalidate(&record.url_pattern).await?;

	tracing::info!(
		url = %record.url_pattern,
		ttl_seconds = record.ttl_seconds,
		invalidated,
		"ttl updated"
	);

	success(&record)
}

async fn delete_metadata(
	State(app): State<App>,
	Query(query): Query<PatternQuery>,
) -> Result<GatewayResponse> {
	let url = required(query.url, "url")?;

	if !app.metadata().delete(&url).await? {
		return Err(Error::MetadataNotFound { url });
	}

	let invalidated = app.engine().invalidate(&url).await?;

	success(&json!({ "url": url, "invalidated": invalidated }))
}

async fn invalidate_cache(
	State(app): State<App>,
	Query(query): Query<PrefixQuery>,
) -> Result<GatewayResponse> {
	let prefix = required(query.prefix, "prefix")?;
	let invalidated = app.engine().invalidate(&prefix).await?;

	success(&json!({ "prefix": prefix, "invalidated": invalidated }))
}

async fn refresh_cache(
	State(app): State<App>,
	RawQuery(raw): RawQuery,
) -> Result<GatewayResponse> {
	let (path, query) = split_refresh_query(raw.as_deref())?;
	let read = app.engine().refresh(&path, query.as_deref()).await?;

	Ok(GatewayResponse::from_origin(&read.response).with_cache_source(CacheSource::Refreshed))
}

async fn cache_stats(State(app): State<App>) -> Result<GatewayResponse> {
	let snapshot = app.engine().metrics().snapshot();
	let mut stats = serde_json::to_value(&snapshot)?;

	stats["hit-rate"] = json!(snapshot.hit_rate());
	stats["in-flight"] = json!(app.engine().in_flight());

	success(&stats)
}

async fn issue(State(app): State<App>, body: Bytes) -> Result<GatewayResponse> {
	let request: IssueRequest = parse_body(&body)?;

	success(&app.tokens().issue(&request.email, request.roles)?)
}

async fn reissue(State(app): State<App>, body: Bytes) -> Result<GatewayResponse> {
	let request: ReissueRequest = parse_body(&body)?;

	success(&app.tokens().reissue(&request.access_token, &request.refresh_token).await?)
}

async fn logout(State(app): State<App>, body: Bytes) -> Result<GatewayResponse> {
	let request: LogoutRequest = parse_body(&body)?;

	app.tokens().logout(&request.access_token).await?;

	success(&json!({ "revoked": true }))
}

async fn revoke(State(app): State<App>, body: Bytes) -> Result<GatewayResponse> {
	let request: RevokeRequest = parse_body(&body)?;

	app.tokens().revoke_account(&request.refresh_token).await?;

	success(&json!({ "revoked": true }))
}

async fn public_key(State(app): State<App>) -> Result<GatewayResponse> {
	success(&app.tokens().public_key())
}

#[cfg(feature = "prometheus")]
async fn render_metrics() -> String {
	crate::metrics::prometheus_handle().map(|handle| handle.render()).unwrap_or_default()
}

async fn shutdown_signal() {
	if let Err(err) = tokio::signal::ctrl_c().await {
		tracing::error!(error = %err, "failed to listen for the shutdown signal");

		std::future::pending::<()>().await;
	}

	tracing::info!("shutdown signal received");
}

fn success<T>(value: &T) -> Result<GatewayResponse>
where
	T: ?Sized + Serialize,
{
	let result = serde_json::to_value(value)?;

	Ok(GatewayResponse::json(
		StatusCode::OK,
		HeaderMap::new(),
		&Envelope::Success { status: StatusCode::OK.as_u16(), result },
	))
}

fn parse_body<T>(body: &[u8]) -> Result<T>
where
	T: DeserializeOwned,
{
	serde_json::from_slice(body)
		.map_err(|err| Error::Validation { field: "body", reason: format!("Invalid JSON: {err}.") })
}

fn required(value: Option<String>, field: &'static str) -> Result<String> {
	value.filter(|value| !value.is_empty()).ok_or_else(|| Error::Validation {
		field,
		reason: "Query parameter is required.".into(),
	})
}

/// Split `path=<p>&<rest>` into the target path and the query forwarded with it.
fn split_refresh_query(raw: Option<&str>) -> Result<(String, Option<String>)> {
	let mut path = None;
	let mut rest = form_urlencoded::Serializer::new(String::new());
	let mut forwarded = 0_usize;

	for (name, value) in form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
		if name == "path" && path.is_none() {
			path = Some(value.into_owned());
		} else {
			rest.append_pair(&name, &value);

			forwarded += 1;
		}
	}

	let path = required(path, "path")?;

	Ok((path, (forwarded > 0).then(|| rest.finish())))
}
