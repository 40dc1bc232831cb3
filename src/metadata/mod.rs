//! Ring Metadata Module
//!
//! Maps keys to the storage node that owns them.
//!
//! ## Core Concepts
//! - **Fingerprint**: MD5 of a key or node name as 32 uppercase hex chars.
//! - **Hash range**: every node owns `(start, end]`, where `end` is the
//!   fingerprint of its name and `start` is its predecessor's `end`.
//! - **Ring**: immutable snapshot ordered by `end`. The coordinator builds a
//!   new snapshot for every membership change and publishes it as JSON.

pub mod hash;
pub mod ring;
pub mod types;

pub use hash::{fingerprint, in_range};
pub use ring::{MessageTag, Ring, RingError};
pub use types::{CacheStrategy, HashRange, RingNode};

#[cfg(test)]
mod tests;
