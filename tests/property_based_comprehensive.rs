//! Property-based tests for the core data structures and decoders
//!
//! Core features tested:
//! 1. Splay tree ordering and nearest-key lookup
//! 2. Log line escaping
//! 3. Integer and address decoding
//! 4. Code map interval lookup

use proptest::prelude::*;
use std::collections::BTreeMap;
use tickprof::code_entry::CodeEntry;
use tickprof::code_map::CodeMap;
use tickprof::csv_parser::{join_fields, parse_line};
use tickprof::log_reader::{parse_address, parse_int};
use tickprof::splay_tree::SplayTree;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_splay_tree_matches_btree_map(
        entries in prop::collection::vec((0u64..10_000, any::<u32>()), 0..200),
        queries in prop::collection::vec(0u64..12_000, 0..50),
    ) {
        let mut tree = SplayTree::new();
        let mut model = BTreeMap::new();
        for &(key, value) in &entries {
            tree.insert(key, value);
            model.insert(key, value);
        }

        prop_assert_eq!(tree.len(), model.len());
        prop_assert_eq!(tree.export_keys(), model.keys().copied().collect::<Vec<_>>());

        for query in queries {
            let expected = model.range(..=query).next_back().map(|(&k, &v)| (k, v));
            let found = tree.find_greatest_less_than(query).map(|(k, &v)| (k, v));
            prop_assert_eq!(found, expected);
            prop_assert_eq!(tree.find(query).copied(), model.get(&query).copied());
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_splay_tree_remove(keys in prop::collection::btree_set(0u64..1_000, 1..100)) {
        let mut tree = SplayTree::new();
        for &key in &keys {
            tree.insert(key, key * 2);
        }
        for (i, &key) in keys.iter().enumerate() {
            if i % 2 == 0 {
                prop_assert_eq!(tree.remove(key).ok(), Some(key * 2));
                prop_assert!(!tree.contains(key));
                prop_assert!(tree.remove(key).is_err());
            }
        }
        prop_assert_eq!(tree.len(), keys.len() / 2);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_log_fields_survive_escaping(
        fields in prop::collection::vec(".*", 2..8),
    ) {
        // At least two fields, so the line is never empty
        let line = join_fields(&fields);
        prop_assert!(!line.contains('\n'));
        prop_assert_eq!(parse_line(&line).unwrap(), fields);
    }

    #[test]
    fn prop_parse_line_never_panics(line in ".*") {
        let _ = parse_line(&line);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_parse_int_decimal_and_hex(value in (i64::MIN + 1)..=i64::MAX) {
        prop_assert_eq!(parse_int(&value.to_string()).unwrap(), value);
        let hex = if value < 0 {
            format!("-0x{:x}", value.unsigned_abs())
        } else {
            format!("0x{value:x}")
        };
        prop_assert_eq!(parse_int(&hex).unwrap(), value);
    }

    #[test]
    fn prop_parse_address(value in any::<u64>()) {
        prop_assert_eq!(parse_address(&format!("{value:#x}")).unwrap(), value);
        prop_assert_eq!(parse_address(&value.to_string()).unwrap(), value);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_code_map_finds_covering_entry(
        sizes in prop::collection::vec(1u64..0x400, 1..60),
        queries in prop::collection::vec(any::<prop::sample::Index>(), 1..30),
    ) {
        // Lay out non-overlapping code objects with gaps between them
        let mut map = CodeMap::new();
        let mut layout = Vec::new();
        let mut start = 0x1000_0000u64;
        for (i, &size) in sizes.iter().enumerate() {
            let id = map.add_dynamic_code(start, CodeEntry::code(size, "Stub", format!("s{i}")));
            layout.push((start, size, id));
            start += size + 0x10;
        }

        for query in queries {
            let &(start, size, id) = query.get(&layout);
            prop_assert_eq!(map.find_entry(start), Some(id));
            prop_assert_eq!(map.find_entry(start + size - 1), Some(id));
            prop_assert_eq!(map.find_entry(start + size), None);
        }
    }
}
