//! Bounded TTL cache for text embeddings.
//!
//! Entries expire `expiry` after insertion and are never returned past that
//! age. Expired entries are dropped on lookup and by a lazy sweep that runs at
//! most once per [`SWEEP_INTERVAL`]. When full, the oldest entry is evicted.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Shared, immutable embedding vector.
pub type Embedding = Arc<Vec<f32>>;

struct CacheEntry {
    embedding: Embedding,
    inserted: Instant,
}

pub struct EmbeddingCache {
    entries: HashMap<String, CacheEntry>,
    max_size: usize,
    expiry: Duration,
    last_sweep: Instant,
    hits: u64,
    misses: u64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub max_size: usize,
    pub expiry_secs: u64,
    pub hits: u64,
    pub misses: u64,
}

impl EmbeddingCache {
    pub fn new(max_size: usize, expiry: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            max_size: max_size.max(1),
            expiry,
            last_sweep: Instant::now(),
            hits: 0,
            misses: 0,
        }
    }

    /// Look up `text`, counting a hit or a miss.
    pub fn get(&mut self, text: &str) -> Option<Embedding> {
        self.maybe_sweep();
        let now = Instant::now();

        let lookup = self.entries.get(text).map(|entry| {
            (
                now.duration_since(entry.inserted) <= self.expiry,
                Arc::clone(&entry.embedding),
            )
        });
        let fresh = match lookup {
            Some((true, embedding)) => Some(embedding),
            Some((false, _)) => {
                self.entries.remove(text);
                None
            }
            None => None,
        };

        match fresh {
            Some(_) => self.hits += 1,
            None => self.misses += 1,
        }
        fresh
    }

    pub fn insert(&mut self, text: String, embedding: Embedding) {
        if !self.entries.contains_key(&text) && self.entries.len() >= self.max_size {
            self.evict_oldest();
        }
        self.entries.insert(
            text,
            CacheEntry {
                embedding,
                inserted: Instant::now(),
            },
        );
    }

    /// Drop everything; returns how many entries were removed.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    /// Apply new bounds, trimming the oldest entries if the cache shrank.
    pub fn reconfigure(&mut self, max_size: usize, expiry: Duration) {
        self.max_size = max_size.max(1);
        self.expiry = expiry;
        while self.entries.len() > self.max_size {
            self.evict_oldest();
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            max_size: self.max_size,
            expiry_secs: self.expiry.as_secs(),
            hits: self.hits,
            misses: self.misses,
        }
    }

    fn maybe_sweep(&mut self) {
        if self.last_sweep.elapsed() < SWEEP_INTERVAL {
            return;
        }
        self.sweep();
    }

    /// Remove all expired entries now.
    pub fn sweep(&mut self) -> usize {
        let now = Instant::now();
        let expiry = self.expiry;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.duration_since(entry.inserted) <= expiry);
        self.last_sweep = now;
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, "embedding cache sweep");
        }
        removed
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.inserted)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}
