//! Read Cache Module
//!
//! A bounded in-memory map in front of a node's block storage.
//!
//! ## Core Concepts
//! - **Strategy**: the eviction policy comes from the node's ring record
//!   (`FIFO`, `LRU`, `LFU`). `None` or a capacity of zero disables caching.
//! - **Coherence**: the cache is write-through. Every successful write
//!   refreshes the entry, deletes and range removals drop it.
//! - **Fills**: a read that missed loads from storage and then offers the
//!   value with `fill`, passing the `ticket` taken before the load. Any
//!   write in between bumps the generation and the fill is dropped, so a
//!   slow reader cannot put back a value a writer already replaced.
//! - **Eviction**: each entry keeps a logical timestamp (insertion for FIFO,
//!   last access for LRU) and a hit counter (LFU). The victim is the entry
//!   with the smallest key for the active policy; ties fall back to age.

use crate::metadata::CacheStrategy;

use parking_lot::Mutex;
use std::collections::HashMap;

struct Entry {
    value: String,
    stamp: u64,
    hits: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    clock: u64,
    generation: u64,
    hits: u64,
    misses: u64,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn touch(&mut self) {
        self.generation += 1;
    }
}

pub struct ReadCache {
    strategy: CacheStrategy,
    capacity: usize,
    inner: Mutex<Inner>,
}

impl ReadCache {
    pub fn new(strategy: CacheStrategy, capacity: usize) -> Self {
        Self {
            strategy,
            capacity,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(CacheStrategy::None, 0)
    }

    pub fn is_enabled(&self) -> bool {
        self.strategy != CacheStrategy::None && self.capacity > 0
    }

    pub fn strategy(&self) -> CacheStrategy {
        self.strategy
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        let mut inner = self.inner.lock();
        let now = inner.tick();
        let strategy = self.strategy;

        let found = inner.entries.get_mut(key).map(|entry| {
            entry.hits += 1;
            if strategy == CacheStrategy::Lru {
                entry.stamp = now;
            }
            entry.value.clone()
        });
        match found {
            Some(_) => inner.hits += 1,
            None => inner.misses += 1,
        }
        found
    }

    /// Inserts or refreshes `key`, evicting one entry when full.
    pub fn put(&self, key: &str, value: &str) {
        if !self.is_enabled() {
            return;
        }
        let mut inner = self.inner.lock();
        inner.touch();
        self.insert(&mut inner, key, value);
    }

    /// Generation to hand back to `fill` after a storage load.
    pub fn ticket(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Caches a value loaded from storage unless the key was written or
    /// invalidated since `ticket` was taken. Returns whether it was cached.
    pub fn fill(&self, key: &str, value: &str, ticket: u64) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let mut inner = self.inner.lock();
        if inner.generation != ticket || inner.entries.contains_key(key) {
            return false;
        }
        self.insert(&mut inner, key, value);
        true
    }

    fn insert(&self, inner: &mut Inner, key: &str, value: &str) {
        let now = inner.tick();

        if let Some(entry) = inner.entries.get_mut(key) {
            entry.value = value.to_string();
            entry.hits += 1;
            if self.strategy == CacheStrategy::Lru {
                entry.stamp = now;
            }
            return;
        }

        if inner.entries.len() >= self.capacity
            && let Some(victim) = self.victim(inner)
        {
            inner.entries.remove(&victim);
        }

        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                stamp: now,
                hits: 0,
            },
        );
    }

    fn victim(&self, inner: &Inner) -> Option<String> {
        let entries = inner.entries.iter();
        let chosen = match self.strategy {
            CacheStrategy::Lfu => entries.min_by_key(|(_, e)| (e.hits, e.stamp)),
            _ => entries.min_by_key(|(_, e)| e.stamp),
        };
        chosen.map(|(key, _)| key.clone())
    }

    pub fn invalidate(&self, key: &str) {
        let mut inner = self.inner.lock();
        inner.touch();
        inner.entries.remove(key);
    }

    /// Drops every entry whose key matches `predicate`.
    pub fn invalidate_where(&self, predicate: impl Fn(&str) -> bool) {
        let mut inner = self.inner.lock();
        inner.touch();
        inner.entries.retain(|key, _| !predicate(key));
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.touch();
        inner.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (inner.hits, inner.misses)
    }
}
