//! Property-Based Tests for the Table Module
//!
//! Uses proptest to check the capacity, ordering and case-folding invariants.

use proptest::prelude::*;
use std::collections::HashSet;
use std::thread::sleep;
use std::time::Duration;

use bytes::Bytes;

use crate::table::{Table, TableConfig};

// == Strategies ==
/// Generates header-like keys
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9-]{0,15}".prop_map(|s| s)
}

fn value_strategy() -> impl Strategy<Value = Bytes> {
    "[ -~]{0,64}".prop_map(|s| Bytes::from(s.into_bytes()))
}

#[derive(Debug, Clone)]
enum TableOp {
    Set { key: String, value: Bytes },
    Get { key: String },
    Remove { key: String },
}

fn table_op_strategy() -> impl Strategy<Value = TableOp> {
    prop_oneof![
        (key_strategy(), value_strategy()).prop_map(|(key, value)| TableOp::Set { key, value }),
        key_strategy().prop_map(|key| TableOp::Get { key }),
        key_strategy().prop_map(|key| TableOp::Remove { key }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // A bounded table never holds more than `cap` entries
    #[test]
    fn prop_capacity_enforcement(
        ops in prop::collection::vec(table_op_strategy(), 1..200),
        cap in 1usize..32,
    ) {
        let mut table = Table::with_config(8, "prop", TableConfig::new().capacity(cap));

        for op in ops {
            match op {
                TableOp::Set { key, value } => {
                    table.set(key, value).unwrap();
                }
                TableOp::Get { key } => {
                    table.get(key);
                }
                TableOp::Remove { key } => {
                    table.remove(key);
                }
            }
            prop_assert!(table.len() <= cap, "table size {} exceeds cap {}", table.len(), cap);
        }
    }

    // Inserting cap + 1 distinct keys evicts exactly the first one
    #[test]
    fn prop_eviction_drops_oldest(
        keys in prop::collection::hash_set(key_strategy(), 2..40),
    ) {
        let keys: Vec<String> = keys.into_iter().collect();
        let cap = keys.len() - 1;
        let mut table = Table::with_config(8, "prop", TableConfig::new().capacity(cap));

        for key in &keys {
            table.set(key, Bytes::from(key.clone())).unwrap();
        }

        prop_assert_eq!(table.len(), cap);
        prop_assert!(table.peek(&keys[0]).is_none(), "oldest key should be evicted");
        for key in &keys[1..] {
            prop_assert!(table.peek(key).is_some(), "key {} should survive", key);
        }
    }

    // Iteration yields live keys in first-insertion order
    #[test]
    fn prop_iteration_follows_insertion(
        entries in prop::collection::vec((key_strategy(), value_strategy()), 1..50),
    ) {
        let mut table = Table::new(8, "prop");
        let mut expected: Vec<String> = Vec::new();
        let mut seen = HashSet::new();

        for (key, value) in entries {
            if seen.insert(key.clone()) {
                expected.push(key.clone());
            }
            table.set(&key, value).unwrap();
        }

        let walked: Vec<String> = table
            .iter()
            .map(|(key, _)| String::from_utf8(key.to_vec()).unwrap())
            .collect();
        prop_assert_eq!(walked, expected);
    }

    // Case variants of a key collapse into one entry in a case-insensitive table
    #[test]
    fn prop_case_insensitive_uniqueness(
        key in key_strategy(),
        first in value_strategy(),
        second in value_strategy(),
    ) {
        let mut table = Table::with_config(8, "prop", TableConfig::new().case_insensitive(true));

        table.set(key.to_ascii_lowercase(), first).unwrap();
        table.set(key.to_ascii_uppercase(), second.clone()).unwrap();

        prop_assert_eq!(table.len(), 1);
        prop_assert_eq!(table.get(&key), Some(&second));
    }

    // Set then get returns the most recent value for a key
    #[test]
    fn prop_overwrite_semantics(
        key in key_strategy(),
        value1 in value_strategy(),
        value2 in value_strategy(),
    ) {
        let mut table = Table::with_config(8, "prop", TableConfig::new().dup(true));

        table.set(&key, value1).unwrap();
        table.set(&key, value2.clone()).unwrap();

        prop_assert_eq!(table.get(&key), Some(&value2));
        prop_assert_eq!(table.len(), 1);
    }
}

// Separate block with fewer cases for time-sensitive TTL checks
proptest! {
    #![proptest_config(ProptestConfig::with_cases(5))]

    #[test]
    fn prop_ttl_expiration_behavior(key in key_strategy(), value in value_strategy()) {
        let config = TableConfig::new().ttl(Some(Duration::from_millis(40)));
        let mut table = Table::with_config(8, "prop", config);

        table.set(&key, value.clone()).unwrap();
        prop_assert_eq!(table.get(&key), Some(&value));

        sleep(Duration::from_millis(70));

        prop_assert!(table.get(&key).is_none(), "entry should read as absent after timeout");
    }
}
