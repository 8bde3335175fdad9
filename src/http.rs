//! Origin transport and HTTP cacheability rules.

pub mod client;
pub mod semantics;
