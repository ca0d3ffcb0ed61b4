//! Table Store Module
//!
//! Associative container combining HashMap storage with insertion-order
//! tracking, an optional capacity bound and an optional entry timeout.

use std::borrow::Cow;
use std::collections::HashMap;

use bytes::Bytes;
use tracing::debug;

use crate::error::{Result, TableError};
use crate::table::{InsertionOrder, TableConfig, TableEntry, TableStats, TableValue};

// == Table ==
/// Insertion-ordered table keyed by byte strings.
///
/// The same type backs the header multimaps of a request and the
/// process-wide filesystem-status cache; [`TableConfig`] selects the
/// behaviour (duplication, freeing, case folding, capacity, timeout).
#[derive(Debug)]
pub struct Table<V> {
    /// Name used in log records
    name: &'static str,
    /// Behaviour flags, fixed once the table is in use
    config: TableConfig,
    /// Lookup key (case-folded when configured) to entry
    entries: HashMap<Vec<u8>, TableEntry<V>>,
    /// Insertion order tracker
    order: InsertionOrder,
    /// Next insertion sequence number
    next_seq: u64,
    /// Lookup statistics
    stats: TableStats,
}

impl<V: TableValue> Table<V> {
    // == Constructor ==
    /// Creates an empty table sized for `buckets` entries.
    ///
    /// The table starts case-sensitive, unbounded, without timeout and
    /// without value duplication; call [`Table::configure`] before first use
    /// to change that.
    pub fn new(buckets: usize, name: &'static str) -> Self {
        Self {
            name,
            config: TableConfig::default(),
            entries: HashMap::with_capacity(buckets),
            order: InsertionOrder::new(),
            next_seq: 1,
            stats: TableStats::new(),
        }
    }

    /// Creates a table and applies `config` in one step.
    pub fn with_config(buckets: usize, name: &'static str, config: TableConfig) -> Self {
        let mut table = Self::new(buckets, name);
        table.config = config;
        table
    }

    // == Configure ==
    /// Replaces the behaviour flags. Only allowed while the table is empty.
    pub fn configure(&mut self, config: TableConfig) -> Result<()> {
        if !self.entries.is_empty() {
            return Err(TableError::InUse(self.name).into());
        }
        self.config = config;
        Ok(())
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    // == Set ==
    /// Inserts or overwrites `key`.
    ///
    /// With `dup` the value is copied into table-owned storage first.
    /// Overwriting a live key keeps its insertion position and restarts its
    /// timeout; the displaced value is dropped when `free_on_overwrite` is set
    /// and handed back to the caller otherwise. Inserting a new key into a
    /// full table evicts the oldest insertion.
    pub fn set(&mut self, key: impl AsRef<[u8]>, value: V) -> Result<Option<V>> {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(TableError::EmptyKey(self.name).into());
        }

        let value = if self.config.dup {
            value.duplicate()
        } else {
            value
        };
        let lookup = self.lookup_key(key).into_owned();

        // An expired entry is replaced as if it were absent
        let ttl = self.config.ttl;
        if self.entries.get(&lookup).is_some_and(|e| e.is_expired(ttl)) {
            self.purge(&lookup);
        }

        if let Some(entry) = self.entries.get_mut(&lookup) {
            let previous = entry.refresh(value);
            return Ok(self.displaced(previous));
        }

        if self.config.capacity > 0 && self.entries.len() >= self.config.capacity {
            self.evict_oldest();
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.push(seq, lookup.clone());
        self.entries
            .insert(lookup, TableEntry::new(Bytes::copy_from_slice(key), value, seq));
        self.stats.set_total_entries(self.entries.len());

        Ok(None)
    }

    // == Get ==
    /// Looks up `key`, recording a hit or a miss.
    ///
    /// An entry whose timeout has elapsed reads as absent and is purged.
    pub fn get(&mut self, key: impl AsRef<[u8]>) -> Option<&V> {
        let lookup = self.lookup_key(key.as_ref()).into_owned();

        let ttl = self.config.ttl;
        if self.entries.get(&lookup).is_some_and(|e| e.is_expired(ttl)) {
            self.purge(&lookup);
        }

        if self.entries.contains_key(&lookup) {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
        self.entries.get(&lookup).map(|entry| &entry.value)
    }

    // == Peek ==
    /// Looks up `key` without touching statistics or purging.
    pub fn peek(&self, key: impl AsRef<[u8]>) -> Option<&V> {
        let lookup = self.lookup_key(key.as_ref());
        self.entries
            .get(lookup.as_ref())
            .filter(|entry| !entry.is_expired(self.config.ttl))
            .map(|entry| &entry.value)
    }

    // == Next ==
    /// Returns the live entry inserted after `cursor`, or the first live
    /// entry when `cursor` is `None`.
    ///
    /// Returns `None` at the end of the table or when `cursor` is not a key
    /// of the table. The table must not be mutated during a walk.
    pub fn next(&self, cursor: Option<&[u8]>) -> Option<(&Bytes, &V)> {
        let after = match cursor {
            Some(cursor) => self.entries.get(self.lookup_key(cursor).as_ref())?.seq,
            None => 0,
        };
        self.order
            .after(after)
            .filter_map(|(_, lookup)| self.entries.get(lookup))
            .find(|entry| !entry.is_expired(self.config.ttl))
            .map(|entry| (&entry.key, &entry.value))
    }

    // == Iter ==
    /// Iterates live entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &V)> {
        let ttl = self.config.ttl;
        self.order
            .iter()
            .filter_map(move |(_, lookup)| self.entries.get(lookup))
            .filter(move |entry| !entry.is_expired(ttl))
            .map(|entry| (&entry.key, &entry.value))
    }

    // == Remove ==
    /// Removes `key`, returning its value if it was live.
    pub fn remove(&mut self, key: impl AsRef<[u8]>) -> Option<V> {
        let lookup = self.lookup_key(key.as_ref()).into_owned();
        let entry = self.entries.remove(&lookup)?;
        self.order.remove(entry.seq);
        self.stats.set_total_entries(self.entries.len());

        if entry.is_expired(self.config.ttl) {
            self.stats.record_expirations(1);
            None
        } else {
            Some(entry.value)
        }
    }

    // == Purge Expired ==
    /// Physically removes every expired entry, returning how many were dropped.
    pub fn purge_expired(&mut self) -> usize {
        let ttl = self.config.ttl;
        if ttl.is_none() {
            return 0;
        }

        let expired: Vec<Vec<u8>> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(ttl))
            .map(|(lookup, _)| lookup.clone())
            .collect();

        for lookup in &expired {
            if let Some(entry) = self.entries.remove(lookup) {
                self.order.remove(entry.seq);
            }
        }

        self.stats.record_expirations(expired.len());
        self.stats.set_total_entries(self.entries.len());
        expired.len()
    }

    // == Free ==
    /// Destroys the table.
    ///
    /// Tables configured with `free_on_overwrite` drop their values here;
    /// otherwise the values are handed back to the caller in insertion order.
    pub fn free(mut self) -> Vec<V> {
        let mut values = Vec::new();
        while let Some(lookup) = self.order.pop_oldest() {
            if let Some(entry) = self.entries.remove(&lookup) {
                if !self.config.free_on_overwrite {
                    values.push(entry.value);
                }
            }
        }
        values
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.stats.set_total_entries(0);
    }

    /// Returns a snapshot of the lookup statistics.
    pub fn stats(&self) -> TableStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    /// Number of physically stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup_key<'k>(&self, key: &'k [u8]) -> Cow<'k, [u8]> {
        if self.config.case_insensitive && key.iter().any(u8::is_ascii_uppercase) {
            Cow::Owned(key.to_ascii_lowercase())
        } else {
            Cow::Borrowed(key)
        }
    }

    fn displaced(&self, previous: V) -> Option<V> {
        if self.config.free_on_overwrite {
            None
        } else {
            Some(previous)
        }
    }

    fn purge(&mut self, lookup: &[u8]) {
        if let Some(entry) = self.entries.remove(lookup) {
            self.order.remove(entry.seq);
            self.stats.record_expirations(1);
            self.stats.set_total_entries(self.entries.len());
        }
    }

    fn evict_oldest(&mut self) {
        if let Some(lookup) = self.order.pop_oldest() {
            if let Some(entry) = self.entries.remove(&lookup) {
                self.stats.record_eviction();
                debug!(
                    table = self.name,
                    key = %String::from_utf8_lossy(&entry.key),
                    "evicted oldest entry"
                );
            }
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LwsError;
    use std::thread::sleep;
    use std::time::Duration;

    fn bytes(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn plain() -> Table<Bytes> {
        Table::new(8, "test")
    }

    #[test]
    fn test_table_new() {
        let table = plain();
        assert_eq!(table.len(), 0);
        assert!(table.is_empty());
        assert_eq!(table.config(), &TableConfig::default());
    }

    #[test]
    fn test_table_set_and_get() {
        let mut table = plain();

        assert!(table.set("key1", bytes("value1")).unwrap().is_none());
        assert_eq!(table.get("key1"), Some(&bytes("value1")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_table_get_nonexistent() {
        let mut table = plain();
        assert!(table.get("missing").is_none());
        assert_eq!(table.stats().misses, 1);
    }

    #[test]
    fn test_table_empty_key_rejected() {
        let mut table = plain();
        let result = table.set("", bytes("value"));
        assert!(matches!(result, Err(LwsError::Table(TableError::EmptyKey(_)))));
    }

    #[test]
    fn test_table_configure_after_use_rejected() {
        let mut table = plain();
        table.set("key", bytes("value")).unwrap();

        let result = table.configure(TableConfig::new().case_insensitive(true));
        assert!(matches!(result, Err(LwsError::Table(TableError::InUse(_)))));
    }

    #[test]
    fn test_table_case_sensitive_by_default() {
        let mut table = plain();
        table.set("Key", bytes("a")).unwrap();
        table.set("key", bytes("b")).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.get("KEY"), None);
    }

    #[test]
    fn test_table_case_insensitive() {
        let mut table = Table::with_config(8, "test", TableConfig::new().case_insensitive(true));
        table.set("Content-Type", bytes("text/html")).unwrap();
        table.set("content-type", bytes("text/plain")).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.get("CONTENT-TYPE"), Some(&bytes("text/plain")));
        // Original spelling of the first insertion is kept
        let (key, _) = table.next(None).unwrap();
        assert_eq!(key, &bytes("Content-Type"));
    }

    #[test]
    fn test_table_overwrite_returns_previous_without_free() {
        let mut table = plain();
        table.set("key", bytes("old")).unwrap();

        let previous = table.set("key", bytes("new")).unwrap();
        assert_eq!(previous, Some(bytes("old")));
        assert_eq!(table.get("key"), Some(&bytes("new")));
    }

    #[test]
    fn test_table_overwrite_frees_previous() {
        let mut table = Table::with_config(8, "test", TableConfig::new().free_on_overwrite(true));
        table.set("key", bytes("old")).unwrap();

        assert!(table.set("key", bytes("new")).unwrap().is_none());
        assert_eq!(table.get("key"), Some(&bytes("new")));
    }

    #[test]
    fn test_table_dup_copies_value() {
        let mut table = Table::with_config(8, "test", TableConfig::new().dup(true));
        let shared = Bytes::from(b"payload".to_vec());
        table.set("key", shared.clone()).unwrap();

        let stored = table.get("key").unwrap();
        assert_eq!(stored, &shared);
        assert_ne!(stored.as_ptr(), shared.as_ptr(), "dup must copy into owned storage");
    }

    #[test]
    fn test_table_without_dup_shares_value() {
        let mut table = plain();
        let shared = Bytes::from(b"payload".to_vec());
        table.set("key", shared.clone()).unwrap();

        assert_eq!(table.get("key").unwrap().as_ptr(), shared.as_ptr());
    }

    #[test]
    fn test_table_overwrite_keeps_position() {
        let mut table = plain();
        table.set("a", bytes("1")).unwrap();
        table.set("b", bytes("2")).unwrap();
        table.set("a", bytes("3")).unwrap();

        let keys: Vec<_> = table.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![bytes("a"), bytes("b")]);
    }

    #[test]
    fn test_table_next_walks_insertion_order() {
        let mut table = plain();
        for key in ["zeta", "alpha", "mid"] {
            table.set(key, bytes(key)).unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor: Option<Bytes> = None;
        while let Some((key, _)) = table.next(cursor.as_deref()) {
            seen.push(key.clone());
            cursor = Some(key.clone());
        }
        assert_eq!(seen, vec![bytes("zeta"), bytes("alpha"), bytes("mid")]);

        // Restartable from the beginning
        assert_eq!(table.next(None).map(|(k, _)| k.clone()), Some(bytes("zeta")));
        // Unknown cursor ends the walk
        assert!(table.next(Some(b"nope")).is_none());
    }

    #[test]
    fn test_table_remove() {
        let mut table = plain();
        table.set("key", bytes("value")).unwrap();

        assert_eq!(table.remove("key"), Some(bytes("value")));
        assert!(table.is_empty());
        assert!(table.remove("key").is_none());
        assert!(table.next(None).is_none());
    }

    #[test]
    fn test_table_capacity_evicts_oldest_insertion() {
        let mut table = Table::with_config(4, "test", TableConfig::new().capacity(3));
        for key in ["k1", "k2", "k3", "k4"] {
            table.set(key, bytes(key)).unwrap();
        }

        assert_eq!(table.len(), 3);
        assert!(table.get("k1").is_none());
        assert!(table.get("k2").is_some());
        assert!(table.get("k3").is_some());
        assert!(table.get("k4").is_some());
        assert_eq!(table.stats().evictions, 1);
    }

    #[test]
    fn test_table_capacity_ignores_reads() {
        let mut table = Table::with_config(4, "test", TableConfig::new().capacity(2));
        table.set("k1", bytes("1")).unwrap();
        table.set("k2", bytes("2")).unwrap();

        // Reads do not change eviction order
        table.get("k1");
        table.set("k3", bytes("3")).unwrap();

        assert!(table.get("k1").is_none());
        assert!(table.get("k2").is_some());
    }

    #[test]
    fn test_table_capacity_overwrite_does_not_evict() {
        let mut table = Table::with_config(4, "test", TableConfig::new().capacity(2));
        table.set("k1", bytes("1")).unwrap();
        table.set("k2", bytes("2")).unwrap();
        table.set("k1", bytes("3")).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.stats().evictions, 0);
    }

    #[test]
    fn test_table_ttl_expiration() {
        let config = TableConfig::new().ttl(Some(Duration::from_millis(50)));
        let mut table = Table::with_config(4, "test", config);
        table.set("key", bytes("value")).unwrap();

        assert!(table.get("key").is_some());
        assert!(table.peek("key").is_some());

        sleep(Duration::from_millis(80));

        assert!(table.peek("key").is_none());
        assert!(table.next(None).is_none());
        assert!(table.get("key").is_none());
        assert_eq!(table.stats().expirations, 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_table_ttl_lazy_until_touched() {
        let config = TableConfig::new().ttl(Some(Duration::from_millis(30)));
        let mut table = Table::with_config(4, "test", config);
        table.set("key", bytes("value")).unwrap();

        sleep(Duration::from_millis(60));

        // Still physically stored until a lookup or purge touches it
        assert_eq!(table.len(), 1);
        assert!(table.peek("key").is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_table_set_over_expired_is_new_insertion() {
        let config = TableConfig::new().ttl(Some(Duration::from_millis(30)));
        let mut table = Table::with_config(4, "test", config);
        table.set("old", bytes("1")).unwrap();
        table.set("other", bytes("2")).unwrap();

        sleep(Duration::from_millis(60));
        table.set("other", bytes("3")).unwrap();
        table.set("old", bytes("4")).unwrap();

        let keys: Vec<_> = table.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![bytes("other"), bytes("old")]);
    }

    #[test]
    fn test_table_purge_expired() {
        let config = TableConfig::new().ttl(Some(Duration::from_millis(50)));
        let mut table = Table::with_config(4, "test", config);
        table.set("key1", bytes("value1")).unwrap();

        sleep(Duration::from_millis(80));
        table.set("key2", bytes("value2")).unwrap();

        assert_eq!(table.purge_expired(), 1);
        assert_eq!(table.len(), 1);
        assert!(table.get("key2").is_some());
    }

    #[test]
    fn test_table_purge_without_ttl_is_noop() {
        let mut table = plain();
        table.set("key", bytes("value")).unwrap();
        assert_eq!(table.purge_expired(), 0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_table_free_returns_caller_owned_values() {
        let mut table = plain();
        table.set("a", bytes("1")).unwrap();
        table.set("b", bytes("2")).unwrap();

        assert_eq!(table.free(), vec![bytes("1"), bytes("2")]);
    }

    #[test]
    fn test_table_free_drops_owned_values() {
        let mut table = Table::with_config(4, "test", TableConfig::new().free_on_overwrite(true));
        table.set("a", bytes("1")).unwrap();

        assert!(table.free().is_empty());
    }

    #[test]
    fn test_table_stats() {
        let mut table = plain();
        table.set("key", bytes("value")).unwrap();
        table.get("key");
        table.get("missing");

        let stats = table.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);
    }
}
