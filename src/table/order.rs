//! Insertion Order Module
//!
//! Tracks the order in which keys entered a table, for iteration and eviction.

use std::collections::BTreeMap;

// == Insertion Order ==
/// Tracks insertion order by sequence number.
///
/// Sequence numbers only grow, so the first entry of the map is always the
/// oldest insertion and iteration from the front yields insertion order.
#[derive(Debug, Default)]
pub struct InsertionOrder {
    /// Sequence number to lookup key
    order: BTreeMap<u64, Vec<u8>>,
}

impl InsertionOrder {
    // == Constructor ==
    /// Creates a new empty tracker.
    pub fn new() -> Self {
        Self {
            order: BTreeMap::new(),
        }
    }

    // == Push ==
    /// Records a key under a fresh sequence number.
    pub fn push(&mut self, seq: u64, key: Vec<u8>) {
        self.order.insert(seq, key);
    }

    // == Remove ==
    /// Forgets the key recorded under `seq`.
    pub fn remove(&mut self, seq: u64) -> Option<Vec<u8>> {
        self.order.remove(&seq)
    }

    // == Pop Oldest ==
    /// Returns and removes the least recently inserted key.
    pub fn pop_oldest(&mut self) -> Option<Vec<u8>> {
        self.order.pop_first().map(|(_, key)| key)
    }

    // == After ==
    /// Iterates keys inserted after `seq`, oldest first.
    pub fn after(&self, seq: u64) -> impl Iterator<Item = (u64, &Vec<u8>)> {
        self.order
            .range(seq.saturating_add(1)..)
            .map(|(seq, key)| (*seq, key))
    }

    // == Iter ==
    /// Iterates all keys, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &Vec<u8>)> {
        self.order.iter().map(|(seq, key)| (*seq, key))
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}
