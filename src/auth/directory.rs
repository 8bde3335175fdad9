//! Principal lookup for authenticated tokens.

// std
use std::{
	collections::HashMap,
	fmt::Debug,
	sync::{PoisonError, RwLock},
};
// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

/// Account resolved from a token's `email` claim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Principal {
	/// Account e-mail address.
	pub email: String,
	/// Granted authorities (roles).
	#[serde(default)]
	pub authorities: Vec<String>,
}

/// External account directory consulted by `authentication_of`.
#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync + Debug {
	/// Principal registered under `email`, if any.
	async fn find_by_email(&self, email: &str) -> Result<Option<Principal>>;
}

/// In-memory directory seeded from configuration.
#[derive(Debug, Default)]
pub struct StaticUserDirectory {
	users: RwLock<HashMap<String, Principal>>,
}
impl StaticUserDirectory {
	/// Directory containing `principals`. Later duplicates replace earlier ones.
	pub fn new(principals: impl IntoIterator<Item = Principal>) -> Self {
		let directory = Self::default();

		for principal in principals {
			directory.insert(principal);
		}

		directory
	}

	/// Add or replace a principal. E-mail addresses match case-insensitively.
	pub fn insert(&self, principal: Principal) {
		self.users
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(principal.email.to_ascii_lowercase(), principal);
	}

	/// Remove a principal, returning it if present.
	pub fn remove(&self, email: &str) -> Option<Principal> {
		self.users.write().unwrap_or_else(PoisonError::into_inner).remove(&email.to_ascii_lowercase())
	}
}
#[async_trait::async_trait]
impl UserDirectory for StaticUserDirectory {
	async fn find_by_email(&self, email: &str) -> Result<Option<Principal>> {
		Ok(self
			.users
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(&email.to_ascii_lowercase())
			.cloned())
	}
}
