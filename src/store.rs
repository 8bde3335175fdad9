//! Byte-safe key-value storage with per-entry TTL, glob scans, and atomic deletes.
//!
//! The cache plane and the revocation index share one keyspace; each owns a disjoint prefix.

pub mod memory;
#[cfg(feature = "redis")] pub mod redis;

// std
use std::{collections::HashSet, fmt::Debug};
// crates.io
use bytes::Bytes;
// self
use crate::_prelude::*;

/// Storage primitive shared by the cache engine and the revocation index.
///
/// Individual operations are linearizable; there are no multi-key transactions. `scan` is
/// incremental: keys created while it runs may be missed and keys deleted while it runs may
/// still be reported.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync + Debug {
	/// Store `value` under `key`, replacing any prior entry. `ttl` must be at least one second.
	async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

	/// Fetch the live value for `key`; expired entries read as absent.
	async fn get(&self, key: &str) -> Result<Option<Bytes>>;

	/// Remove `key`. Deleting a missing key is not an error.
	async fn delete(&self, key: &str) -> Result<()>;

	/// Keys matching a glob `pattern` (`*`, `?`, and `\` escapes).
	async fn scan(&self, pattern: &str) -> Result<HashSet<String>>;

	/// Move the expiry of `key` to `at` without touching its value.
	///
	/// Returns whether the key existed. An instant in the past removes the key.
	async fn expire_at(&self, key: &str, at: DateTime<Utc>) -> Result<bool>;
}

/// Reject TTLs below the one second floor.
pub fn validate_ttl(ttl: Duration) -> Result<()> {
	if ttl < Duration::from_secs(1) {
		return Err(Error::Validation {
			field: "ttl",
			reason: format!("Must be at least 1 second, got {ttl:?}."),
		});
	}

	Ok(())
}

/// Escape glob metacharacters so `literal` only matches itself.
pub fn escape_glob(literal: &str) -> String {
	let mut escaped = String::with_capacity(literal.len());

	for c in literal.chars() {
		if matches!(c, '*' | '?' | '[' | ']' | '\\') {
			escaped.push('\\');
		}

		escaped.push(c);
	}

	escaped
}

/// Pattern matching every key that starts with `prefix`.
pub fn prefix_pattern(prefix: &str) -> String {
	let mut pattern = escape_glob(prefix);

	pattern.push('*');

	pattern
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GlobToken {
	Any,
	One,
	Literal(char),
}

fn tokenize(pattern: &str) -> Vec<GlobToken> {
	let mut tokens = Vec::with_capacity(pattern.len());
	let mut chars = pattern.chars();

	while let Some(c) = chars.next() {
		let token = match c {
			'*' => GlobToken::Any,
			'?' => GlobToken::One,
			'\\' => GlobToken::Literal(chars.next().unwrap_or('\\')),
			other => GlobToken::Literal(other),
		};

		tokens.push(token);
	}

	tokens
}

/// Whether `candidate` matches the glob `pattern`.
pub fn glob_matches(pattern: &str, candidate: &str) -> bool {
	let tokens = tokenize(pattern);
	let text: Vec<char> = candidate.chars().collect();
	let (mut p, mut t) = (0, 0);
	// Position of the last `*` and the text index it is currently absorbing up to.
	let mut backtrack: Option<(usize, usize)> = None;

	while t < text.len() {
		match tokens.get(p) {
			Some(GlobToken::Any) => {
				backtrack = Some((p, t));
				p += 1;
			},
			Some(GlobToken::One) => {
				p += 1;
				t += 1;
			},
			Some(GlobToken::Literal(c)) if *c == text[t] => {
				p += 1;
				t += 1;
			},
			_ => match backtrack {
				Some((star, absorbed)) => {
					backtrack = Some((star, absorbed + 1));
					p = star + 1;
					t = absorbed + 1;
				},
				None => return false,
			},
		}
	}

	tokens[p..].iter().all(|token| *token == GlobToken::Any)
}
