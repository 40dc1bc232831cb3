//! Persistent Storage Module
//!
//! Durable key/value storage for a single node.
//!
//! ## Core Concepts
//! - **Block**: fixed 120 030-byte record holding at most one pair (see `block`).
//! - **Table**: the files of a node form one open-addressed hash table with
//!   linear probing; deletes leave tombstones.
//! - **Ranges**: `get_range`/`remove_range` scan the whole table and select
//!   pairs by key fingerprint, which is how data moves between nodes.
//! - **Locking**: one reader/writer lock per file, taken per block access.

pub mod block;
pub mod engine;

pub use block::{BLOCK_SIZE, MAX_KEY_LEN, MAX_VALUE_LEN};
pub use engine::{KvDb, PutOutcome, StorageConfig, StorageError, StorageResult, validate};
