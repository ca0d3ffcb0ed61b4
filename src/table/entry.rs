//! Table Entry Module
//!
//! Defines the structure for individual table entries with TTL support.

use std::time::{Duration, Instant};

use bytes::Bytes;

// == Table Entry ==
/// Represents a single table entry with its key, value and metadata.
#[derive(Debug, Clone)]
pub struct TableEntry<V> {
    /// The key as it was first inserted (original spelling)
    pub key: Bytes,
    /// The stored value
    pub value: V,
    /// Insertion sequence number, defines iteration order
    pub seq: u64,
    /// Insertion or last overwrite time
    pub stored_at: Instant,
}

impl<V> TableEntry<V> {
    // == Constructor ==
    /// Creates a new entry stamped with the current time.
    pub fn new(key: Bytes, value: V, seq: u64) -> Self {
        Self {
            key,
            value,
            seq,
            stored_at: Instant::now(),
        }
    }

    // == Is Expired ==
    /// Checks if the entry has outlived the table's timeout.
    ///
    /// An entry is expired once the elapsed time is greater than or equal to
    /// the timeout. Tables without a timeout never expire entries.
    pub fn is_expired(&self, ttl: Option<Duration>) -> bool {
        match ttl {
            Some(ttl) => self.stored_at.elapsed() >= ttl,
            None => false,
        }
    }

    // == Refresh ==
    /// Replaces the value and restarts the entry's lifetime, returning the old value.
    pub fn refresh(&mut self, value: V) -> V {
        self.stored_at = Instant::now();
        std::mem::replace(&mut self.value, value)
    }
}
