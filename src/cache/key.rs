//! Canonical request fingerprints.

// std
use std::fmt::{Display, Formatter, Result as FmtResult};
// crates.io
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use url::form_urlencoded;
// self
use crate::store;

type QueryPairs = SmallVec<[(String, String); 4]>;

/// Store key identifying one cached response.
///
/// Rendered as `cache:<path>` or `cache:<path>?<query>`, where the query pairs are sorted and
/// re-encoded so that parameter order does not split the cache. An empty query and no query
/// produce the same key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);
impl CacheKey {
	/// Namespace shared by every cache entry in the key-value store.
	pub const PREFIX: &'static str = "cache:";

	/// Fingerprint a request path and raw query string.
	pub fn new(path: &str, query: Option<&str>) -> Self {
		let mut key = String::with_capacity(Self::PREFIX.len() + path.len() + 1);

		key.push_str(Self::PREFIX);
		key.push_str(&normalize_path(path));

		if let Some(query) = query.and_then(canonical_query) {
			key.push('?');
			key.push_str(&query);
		}

		Self(key)
	}

	/// Glob pattern matching every key whose path starts with `path_prefix`.
	pub fn prefix_pattern(path_prefix: &str) -> String {
		store::prefix_pattern(&format!("{}{}", Self::PREFIX, normalize_path(path_prefix)))
	}

	/// Path component of the key.
	pub fn path(&self) -> &str {
		let rest = &self.0[Self::PREFIX.len()..];

		rest.split_once('?').map_or(rest, |(path, _)| path)
	}

	/// Key as stored.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Display for CacheKey {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(&self.0)
	}
}
impl AsRef<str> for CacheKey {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

fn normalize_path(path: &str) -> String {
	if path.starts_with('/') { path.to_owned() } else { format!("/{path}") }
}

fn canonical_query(query: &str) -> Option<String> {
	let mut pairs: QueryPairs = form_urlencoded::parse(query.as_bytes())
		.map(|(name, value)| (name.into_owned(), value.into_owned()))
		.collect();

	if pairs.is_empty() {
		return None;
	}

	pairs.sort();

	Some(form_urlencoded::Serializer::new(String::new()).extend_pairs(pairs).finish())
}
