//! Cache plane: request fingerprints, stored entries, single-flight coordination, and the
//! read-through engine.

pub mod engine;
pub mod entry;
pub mod flight;
pub mod key;
