//! Content deduplication for the current write session.
//!
//! Sectors are keyed by BLAKE3 of their raw bytes.  All-zero sectors are
//! always keyed; other sectors only when deduplication is enabled.  The map
//! is rebuilt from nothing in every session and never written to the image.

use std::collections::HashMap;

pub type ContentHash = [u8; 32];

#[derive(Debug, Default)]
pub struct ContentDeduplicator {
    enabled: bool,
    table:   HashMap<ContentHash, u64>,
    hits:    u64,
}

impl ContentDeduplicator {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, table: HashMap::new(), hits: 0 }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Key for `data`, or `None` when this sector does not take part.
    pub fn key(&self, data: &[u8]) -> Option<ContentHash> {
        if self.enabled || data.iter().all(|b| *b == 0) {
            Some(blake3::hash(data).into())
        } else {
            None
        }
    }

    /// Locator already holding this content, counting the hit.
    pub fn lookup(&mut self, key: &ContentHash) -> Option<u64> {
        let found = self.table.get(key).copied();
        if found.is_some() {
            self.hits += 1;
        }
        found
    }

    pub fn record(&mut self, key: ContentHash, locator: u64) {
        self.table.insert(key, locator);
    }

    /// Sectors that were satisfied without storing new bytes.
    pub fn hits(&self) -> u64 {
        self.hits
    }
}
