//! Token authority: keypair, issuance and validation, revocation records, and principal lookup.

pub mod directory;
pub mod keys;
pub mod revocation;
pub mod token;
