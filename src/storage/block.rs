//! On-Disk Block Layout
//!
//! Every key/value pair lives in exactly one fixed-size block:
//!
//! | Offset | Size    | Field                          |
//! |--------|---------|--------------------------------|
//! | 0      | 1       | occupied flag                  |
//! | 1      | 1       | dirty flag (set on every write)|
//! | 2      | 4       | key length, big-endian         |
//! | 6      | 4       | value length, big-endian       |
//! | 10     | 20      | key bytes                      |
//! | 30     | 120 000 | value bytes                    |
//!
//! A tombstone only clears the occupied flag. The dirty flag is never
//! cleared, so it doubles as the "slot was used at some point" marker that
//! ends a probe sequence.

pub const OCCUPIED_OFFSET: usize = 0;
pub const DIRTY_OFFSET: usize = 1;
pub const KEY_LEN_OFFSET: usize = 2;
pub const VALUE_LEN_OFFSET: usize = 6;
pub const KEY_OFFSET: usize = 10;
pub const VALUE_OFFSET: usize = KEY_OFFSET + MAX_KEY_LEN;

pub const MAX_KEY_LEN: usize = 20;
pub const MAX_VALUE_LEN: usize = 120_000;
pub const BLOCK_SIZE: usize = VALUE_OFFSET + MAX_VALUE_LEN;

/// Read-only view over one block.
pub struct BlockRef<'a>(&'a [u8]);

impl<'a> BlockRef<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        debug_assert_eq!(bytes.len(), BLOCK_SIZE);
        Self(bytes)
    }

    pub fn is_occupied(&self) -> bool {
        self.0[OCCUPIED_OFFSET] != 0
    }

    /// Whether anything was ever written here (occupied now or tombstoned).
    pub fn was_written(&self) -> bool {
        self.0[DIRTY_OFFSET] != 0
    }

    fn read_len(&self, offset: usize, max: usize) -> usize {
        let raw = u32::from_be_bytes([
            self.0[offset],
            self.0[offset + 1],
            self.0[offset + 2],
            self.0[offset + 3],
        ]);
        (raw as usize).min(max)
    }

    pub fn key(&self) -> &'a [u8] {
        let bytes: &'a [u8] = self.0;
        let len = self.read_len(KEY_LEN_OFFSET, MAX_KEY_LEN);
        &bytes[KEY_OFFSET..KEY_OFFSET + len]
    }

    pub fn value(&self) -> &'a [u8] {
        let bytes: &'a [u8] = self.0;
        let len = self.read_len(VALUE_LEN_OFFSET, MAX_VALUE_LEN);
        &bytes[VALUE_OFFSET..VALUE_OFFSET + len]
    }

    /// Key of an occupied block, `None` for free slots.
    pub fn live_key(&self) -> Option<&'a [u8]> {
        self.is_occupied().then(|| self.key())
    }
}

/// Mutable view over one block.
pub struct BlockMut<'a>(&'a mut [u8]);

impl<'a> BlockMut<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        debug_assert_eq!(bytes.len(), BLOCK_SIZE);
        Self(bytes)
    }

    /// Writes an occupied record. Returns the number of leading bytes of
    /// the block that changed (for range flushing).
    ///
    /// Callers validate lengths beforehand.
    pub fn write(&mut self, key: &[u8], value: &[u8]) -> usize {
        self.0[OCCUPIED_OFFSET] = 1;
        self.0[DIRTY_OFFSET] = 1;
        self.0[KEY_LEN_OFFSET..KEY_LEN_OFFSET + 4]
            .copy_from_slice(&(key.len() as u32).to_be_bytes());
        self.0[VALUE_LEN_OFFSET..VALUE_LEN_OFFSET + 4]
            .copy_from_slice(&(value.len() as u32).to_be_bytes());
        self.0[KEY_OFFSET..KEY_OFFSET + key.len()].copy_from_slice(key);
        self.0[VALUE_OFFSET..VALUE_OFFSET + value.len()].copy_from_slice(value);
        VALUE_OFFSET + value.len()
    }

    /// Marks the block free. Key and value bytes stay on disk.
    pub fn tombstone(&mut self) -> usize {
        self.0[OCCUPIED_OFFSET] = 0;
        OCCUPIED_OFFSET + 1
    }
}
