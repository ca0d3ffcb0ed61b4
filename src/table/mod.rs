//! Table Module
//!
//! Generic associative container used both as the case-insensitive header
//! multimap of a request and as the process-wide filesystem-status cache.
//! Duplication, freeing, case folding, capacity and timeout are configured
//! independently per table.

mod entry;
mod order;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

use std::time::Duration;

use bytes::Bytes;

// Re-export public types
pub use entry::TableEntry;
pub use order::InsertionOrder;
pub use stats::TableStats;
pub use store::Table;

// == Table Value ==
/// Values a [`Table`] can store.
pub trait TableValue {
    /// Copies the value into storage owned by the table.
    fn duplicate(&self) -> Self;
}

impl TableValue for Bytes {
    fn duplicate(&self) -> Self {
        Bytes::copy_from_slice(self)
    }
}

// == Table Config ==
/// Behaviour flags of a [`Table`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableConfig {
    /// Copy inserted values into table-owned storage
    pub dup: bool,
    /// Drop displaced values on overwrite and on destruction
    pub free_on_overwrite: bool,
    /// Compare keys ignoring ASCII case
    pub case_insensitive: bool,
    /// Maximum number of entries, 0 = unbounded
    pub capacity: usize,
    /// Entry lifetime, None = entries never expire
    pub ttl: Option<Duration>,
}

impl TableConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dup(mut self, dup: bool) -> Self {
        self.dup = dup;
        self
    }

    pub fn free_on_overwrite(mut self, free: bool) -> Self {
        self.free_on_overwrite = free;
        self
    }

    pub fn case_insensitive(mut self, ci: bool) -> Self {
        self.case_insensitive = ci;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }
}
