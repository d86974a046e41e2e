//! Property-Based Tests for Fingerprint Determinism
//!
//! Property: equal call shapes always produce equal keys, and values that only
//! differ in type never collide.

use callguard::fingerprint::{CallArgs, Fingerprinter, OperationIdentity};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn fingerprinter() -> Fingerprinter {
    Fingerprinter::new("property_tests")
}

fn identity() -> OperationIdentity {
    OperationIdentity::function("properties::target")
}

proptest! {
    #[test]
    fn equal_calls_produce_equal_keys(
        number in any::<i64>(),
        text in ".*",
        flags in proptest::collection::vec(any::<bool>(), 0..8),
        named in proptest::collection::btree_map("[a-z]{1,8}", any::<u32>(), 0..4),
    ) {
        let build = || -> CallArgs {
            let mut args = CallArgs::new()
                .arg(&number).unwrap()
                .arg(&text).unwrap()
                .arg(&flags).unwrap();
            for (name, value) in &named {
                args = args.kwarg(name, value).unwrap();
            }
            args
        };

        let first = fingerprinter().fingerprint(&identity(), &build(), false);
        let second = fingerprinter().fingerprint(&identity(), &build(), false);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn integer_and_string_forms_never_collide(number in any::<i64>()) {
        let as_int = CallArgs::new().arg(&number).unwrap();
        let as_text = CallArgs::new().arg(&number.to_string()).unwrap();

        let fp = fingerprinter();
        prop_assert_ne!(
            fp.fingerprint(&identity(), &as_int, false),
            fp.fingerprint(&identity(), &as_text, false)
        );
    }

    #[test]
    fn kwarg_order_does_not_matter(a in any::<u16>(), b in any::<u16>()) {
        let forward = CallArgs::new().kwarg("a", &a).unwrap().kwarg("b", &b).unwrap();
        let reverse = CallArgs::new().kwarg("b", &b).unwrap().kwarg("a", &a).unwrap();

        let fp = fingerprinter();
        prop_assert_eq!(
            fp.fingerprint(&identity(), &forward, false),
            fp.fingerprint(&identity(), &reverse, false)
        );
    }

    #[test]
    fn map_insertion_order_does_not_matter(entries in proptest::collection::vec(("[a-z]{1,6}", any::<i32>()), 0..8)) {
        let ordered: BTreeMap<String, i32> = entries.iter().cloned().collect();
        let hashed: std::collections::HashMap<String, i32> = entries.iter().cloned().collect();

        let fp = fingerprinter();
        prop_assert_eq!(
            fp.fingerprint(&identity(), &CallArgs::new().arg(&ordered).unwrap(), false),
            fp.fingerprint(&identity(), &CallArgs::new().arg(&hashed).unwrap(), false)
        );
    }
}
