//! Block Hash Table Engine
//!
//! A node's database is a directory `KVDB/<name>/` holding files `db0..dbF-1`.
//! Each file is a fixed array of blocks mapped into memory; together they
//! form one open-addressed table of `F * blocks_per_file` slots.
//!
//! ## Probing
//! The home slot of a key is `|string_hash(key)| mod total_blocks`, and the
//! probe sequence is `+1 mod total_blocks`. A lookup stops at the first slot
//! that was never written. Inserts reuse the first free slot (tombstones
//! included) once the lookup has proven the key absent.
//!
//! ## Locking
//! Every block access takes the read or write lock of the file containing
//! that block and releases it before moving on. Writers are additionally
//! serialized by a gate so that two `put`s of the same new key cannot both
//! claim a slot.

use super::block::{BLOCK_SIZE, BlockMut, BlockRef, MAX_KEY_LEN, MAX_VALUE_LEN};
use crate::metadata::{HashRange, fingerprint};

use memmap2::{MmapMut, MmapOptions};
use parking_lot::{Mutex, RwLock};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

pub const BLOCKS_PER_FILE: usize = 5000;
pub const INITIAL_FILES: usize = 2;
pub const DEFAULT_ROOT: &str = "KVDB";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("out of space: probed all {blocks} blocks without a free slot")]
    OutOfSpace { blocks: usize },

    #[error("key is {len} bytes, limit is {}", MAX_KEY_LEN)]
    KeyTooLarge { len: usize },

    #[error("value is {len} bytes, limit is {}", MAX_VALUE_LEN)]
    ValueTooLarge { len: usize },

    #[error("empty key")]
    EmptyKey,

    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// What a `put` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The key was absent and now holds the value.
    Inserted,
    /// The key existed and its value was replaced.
    Updated,
    /// Empty value on an existing key: the key was removed.
    Deleted,
    /// Empty value on a missing key: nothing changed.
    Absent,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Parent directory of all node databases.
    pub root: PathBuf,
    pub blocks_per_file: usize,
    pub initial_files: usize,
    /// Flush the touched bytes of the map after every write.
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            blocks_per_file: BLOCKS_PER_FILE,
            initial_files: INITIAL_FILES,
            sync_writes: true,
        }
    }
}

impl StorageConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }
}

struct DbFile {
    path: PathBuf,
    map: RwLock<MmapMut>,
}

/// Validates a key/value pair before it reaches the table.
pub fn validate(key: &str, value: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::EmptyKey);
    }
    if key.len() > MAX_KEY_LEN {
        return Err(StorageError::KeyTooLarge { len: key.len() });
    }
    if value.len() > MAX_VALUE_LEN {
        return Err(StorageError::ValueTooLarge { len: value.len() });
    }
    Ok(())
}

/// Hash used for the home slot: the 31-multiplier hash over UTF-16 code
/// units, wrapped to 32 bits, absolute value.
pub fn string_hash(key: &str) -> u64 {
    let mut h: i32 = 0;
    for unit in key.encode_utf16() {
        h = h.wrapping_mul(31).wrapping_add(i32::from(unit));
    }
    u64::from(h.unsigned_abs())
}

pub struct KvDb {
    name: String,
    dir: PathBuf,
    config: StorageConfig,
    files: RwLock<Vec<DbFile>>,
    write_gate: Mutex<()>,
}

impl KvDb {
    /// Opens (or creates) the database of node `name` under `config.root`.
    pub fn open(name: &str, config: StorageConfig) -> StorageResult<Self> {
        let dir = config.root.join(name);
        let files = Self::initialize(&dir, &config)?;

        tracing::info!(
            node = name,
            files = files.len(),
            path = %dir.display(),
            "Opened block storage"
        );

        Ok(Self {
            name: name.to_string(),
            dir,
            config,
            files: RwLock::new(files),
            write_gate: Mutex::new(()),
        })
    }

    fn initialize(dir: &Path, config: &StorageConfig) -> StorageResult<Vec<DbFile>> {
        fs::create_dir_all(dir)?;

        let mut existing = 0;
        while dir.join(format!("db{}", existing)).exists() {
            existing += 1;
        }
        let count = if existing == 0 {
            config.initial_files
        } else {
            existing
        };

        (0..count)
            .map(|i| Self::map_file(&dir.join(format!("db{}", i)), config.blocks_per_file))
            .collect()
    }

    fn map_file(path: &Path, blocks: usize) -> StorageResult<DbFile> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let expected = (BLOCK_SIZE * blocks) as u64;
        if file.metadata()?.len() != expected {
            file.set_len(expected)?;
        }

        // Safety: the file is private to this node and stays at a fixed
        // length for the lifetime of the mapping.
        let map = unsafe { MmapOptions::new().map_mut(&file)? };

        Ok(DbFile {
            path: path.to_path_buf(),
            map: RwLock::new(map),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    pub fn total_blocks(&self) -> usize {
        self.file_count() * self.config.blocks_per_file
    }

    fn locate(&self, index: usize) -> (usize, usize) {
        let bpf = self.config.blocks_per_file;
        (index / bpf, (index % bpf) * BLOCK_SIZE)
    }

    fn read_block<T>(&self, files: &[DbFile], index: usize, f: impl FnOnce(BlockRef<'_>) -> T) -> T {
        let (file, offset) = self.locate(index);
        let map = files[file].map.read();
        f(BlockRef::new(&map[offset..offset + BLOCK_SIZE]))
    }

    fn write_block(
        &self,
        files: &[DbFile],
        index: usize,
        f: impl FnOnce(&mut BlockMut<'_>) -> usize,
    ) -> StorageResult<()> {
        let (file, offset) = self.locate(index);
        let mut map = files[file].map.write();
        let touched = f(&mut BlockMut::new(&mut map[offset..offset + BLOCK_SIZE]));
        if self.config.sync_writes {
            map.flush_range(offset, touched)?;
        }
        Ok(())
    }

    /// Slot currently holding `key`, if any.
    fn find(&self, files: &[DbFile], key: &str) -> Option<usize> {
        let total = files.len() * self.config.blocks_per_file;
        let home = (string_hash(key) % total as u64) as usize;
        let key = key.as_bytes();

        for step in 0..total {
            let index = (home + step) % total;
            let (hit, stop) = self.read_block(files, index, |block| {
                (block.live_key() == Some(key), !block.was_written())
            });
            if hit {
                return Some(index);
            }
            if stop {
                return None;
            }
        }
        None
    }

    /// Stores `value` under `key`. An empty value deletes the key.
    pub fn put(&self, key: &str, value: &str) -> StorageResult<PutOutcome> {
        validate(key, value)?;
        if value.is_empty() {
            return Ok(if self.delete(key)? {
                PutOutcome::Deleted
            } else {
                PutOutcome::Absent
            });
        }

        let _gate = self.write_gate.lock();
        let files = self.files.read();
        let key_bytes = key.as_bytes();

        if let Some(index) = self.find(&files, key) {
            self.write_block(&files, index, |block| block.write(key_bytes, value.as_bytes()))?;
            return Ok(PutOutcome::Updated);
        }

        let total = files.len() * self.config.blocks_per_file;
        let home = (string_hash(key) % total as u64) as usize;
        for step in 0..total {
            let index = (home + step) % total;
            if !self.read_block(&files, index, |block| block.is_occupied()) {
                self.write_block(&files, index, |block| block.write(key_bytes, value.as_bytes()))?;
                return Ok(PutOutcome::Inserted);
            }
        }

        tracing::warn!(node = %self.name, blocks = total, "Storage is full");
        Err(StorageError::OutOfSpace { blocks: total })
    }

    pub fn get(&self, key: &str) -> StorageResult<Option<String>> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Ok(None);
        }
        let files = self.files.read();
        Ok(self.find(&files, key).map(|index| {
            self.read_block(&files, index, |block| {
                String::from_utf8_lossy(block.value()).into_owned()
            })
        }))
    }

    /// Tombstones `key`. Returns whether it existed.
    pub fn delete(&self, key: &str) -> StorageResult<bool> {
        let _gate = self.write_gate.lock();
        let files = self.files.read();
        match self.find(&files, key) {
            Some(index) => {
                self.write_block(&files, index, |block| block.tombstone())?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// All pairs whose key fingerprint lies in `range`, in table order.
    pub fn get_range(&self, range: &HashRange) -> StorageResult<Vec<(String, String)>> {
        Ok(self.scan(|key| range.contains(&fingerprint(key))))
    }

    /// Every live pair, in table order.
    pub fn entries(&self) -> StorageResult<Vec<(String, String)>> {
        Ok(self.scan(|_| true))
    }

    fn scan(&self, wanted: impl Fn(&[u8]) -> bool) -> Vec<(String, String)> {
        let files = self.files.read();
        let total = files.len() * self.config.blocks_per_file;
        let mut pairs = Vec::new();

        for index in 0..total {
            let entry = self.read_block(&files, index, |block| {
                let key = block.live_key()?;
                wanted(key).then(|| {
                    (
                        String::from_utf8_lossy(key).into_owned(),
                        String::from_utf8_lossy(block.value()).into_owned(),
                    )
                })
            });
            if let Some(pair) = entry {
                pairs.push(pair);
            }
        }
        pairs
    }

    /// Tombstones every pair whose key fingerprint lies in `range`.
    pub fn remove_range(&self, range: &HashRange) -> StorageResult<usize> {
        let _gate = self.write_gate.lock();
        let files = self.files.read();
        let total = files.len() * self.config.blocks_per_file;
        let mut removed = 0;

        for index in 0..total {
            let matches = self.read_block(&files, index, |block| {
                block
                    .live_key()
                    .is_some_and(|key| range.contains(&fingerprint(key)))
            });
            if matches {
                self.write_block(&files, index, |block| block.tombstone())?;
                removed += 1;
            }
        }

        tracing::debug!(node = %self.name, removed, range = %range, "Removed range");
        Ok(removed)
    }

    /// Number of occupied blocks.
    pub fn len(&self) -> usize {
        let files = self.files.read();
        let total = files.len() * self.config.blocks_per_file;
        (0..total)
            .filter(|&index| self.read_block(&files, index, |block| block.is_occupied()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deletes every file and recreates the initial layout.
    pub fn clear(&self) -> StorageResult<()> {
        tracing::info!(node = %self.name, "Clearing storage");

        let _gate = self.write_gate.lock();
        let mut files = self.files.write();
        for file in files.drain(..) {
            let guard = file.map.write();
            drop(guard);
            let DbFile { path, map } = file;
            drop(map);
            fs::remove_file(&path)?;
        }
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }

        *files = Self::initialize(&self.dir, &self.config)?;
        Ok(())
    }

    /// Growing the table is not supported; callers see `OUT_OF_SPACE`.
    pub fn extend(&self) -> StorageResult<bool> {
        Ok(false)
    }
}
