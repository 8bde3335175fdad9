//! Which origin responses may be stored and which headers survive the trip.

// crates.io
use http::{
	HeaderMap, HeaderName, HeaderValue,
	header::{CACHE_CONTROL, CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING},
};
use indexmap::IndexMap;
// self
use crate::_prelude::*;

const KEEP_ALIVE: &str = "keep-alive";

/// Whether `name` is a hop-by-hop header that must never be stored or re-served.
pub fn is_hop_by_hop(name: &str) -> bool {
	name.eq_ignore_ascii_case(CONNECTION.as_str())
		|| name.eq_ignore_ascii_case(KEEP_ALIVE)
		|| name.eq_ignore_ascii_case(TRANSFER_ENCODING.as_str())
}

/// Flatten a header map into ordered `name → value` pairs without hop-by-hop headers.
///
/// Repeated headers are joined with `", "` in arrival order.
pub fn collect_headers(headers: &HeaderMap) -> IndexMap<String, String> {
	let mut collected = IndexMap::with_capacity(headers.keys_len());

	for name in headers.keys() {
		if is_hop_by_hop(name.as_str()) {
			continue;
		}

		let joined = headers
			.get_all(name)
			.iter()
			.map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
			.collect::<Vec<_>>()
			.join(", ");

		collected.insert(name.as_str().to_owned(), joined);
	}

	collected
}

/// Rebuild a header map from stored pairs, dropping anything hop-by-hop or unrepresentable.
///
/// `Content-Length` is dropped as well because the body is re-framed on the way out.
pub fn restore_headers(headers: &IndexMap<String, String>) -> HeaderMap {
	let mut restored = HeaderMap::with_capacity(headers.len());

	for (name, value) in headers {
		if is_hop_by_hop(name) || name.eq_ignore_ascii_case(CONTENT_LENGTH.as_str()) {
			continue;
		}

		let (Ok(name), Ok(value)) =
			(HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value))
		else {
			tracing::debug!(header = %name, "dropping unrepresentable header");

			continue;
		};

		restored.append(name, value);
	}

	restored
}

/// Request headers forwarded to the origin.
///
/// Hop-by-hop headers, `Host`, `Content-Length`, and the gateway's own bearer credential stay
/// behind.
pub fn forwardable_request_headers(headers: &HeaderMap) -> HeaderMap {
	let mut forwarded = HeaderMap::with_capacity(headers.len());

	for (name, value) in headers {
		if is_hop_by_hop(name.as_str())
			|| name == HOST
			|| name == CONTENT_LENGTH
			|| name == http::header::AUTHORIZATION
		{
			continue;
		}

		forwarded.append(name.clone(), value.clone());
	}

	forwarded
}

/// Whether a `Cache-Control` value forbids storage.
pub fn forbids_storage(cache_control: &str) -> bool {
	cache_control
		.split(',')
		.map(str::trim)
		.any(|directive| directive.eq_ignore_ascii_case("no-store"))
}

/// Decide whether a response may be stored.
///
/// Only 2xx responses without `Cache-Control: no-store` and with a body no larger than
/// `max_entry_bytes` are cacheable.
pub fn check_cacheable(
	status: u16,
	headers: &IndexMap<String, String>,
	body_len: usize,
	max_entry_bytes: usize,
) -> Result<()> {
	if !(200..300).contains(&status) {
		return Err(Error::Uncacheable(format!("status {status} is outside 2xx")));
	}
	if headers
		.iter()
		.any(|(name, value)| name.eq_ignore_ascii_case(CACHE_CONTROL.as_str()) && forbids_storage(value))
	{
		return Err(Error::Uncacheable("origin sent Cache-Control: no-store".into()));
	}
	if body_len > max_entry_bytes {
		return Err(Error::EntryTooLarge { size: body_len, limit: max_entry_bytes });
	}

	Ok(())
}
