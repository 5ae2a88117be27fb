//! Property tests over the semantic-version core and the evaluator.

use proptest::prelude::*;
use std::collections::BTreeMap;
use templar::engine::{Evaluator, Value};
use templar::resolver::{Version, VersionConstraint};

fn arb_version() -> impl Strategy<Value = Version> {
    (
        0u32..50,
        0u32..50,
        0u32..50,
        proptest::option::of("[a-z]{1,6}(\\.[0-9]{1,2})?"),
    )
        .prop_map(|(major, minor, patch, pre)| Version {
            major,
            minor,
            patch,
            pre,
            build: None,
        })
}

proptest! {
    #[test]
    fn version_display_parse_round_trip(v in arb_version()) {
        let text = v.to_string();
        let parsed = Version::parse(&text).unwrap();
        prop_assert_eq!(parsed, v);
    }

    #[test]
    fn caret_allows_base_but_not_next_major(v in arb_version()) {
        let constraint = VersionConstraint::parse(&format!("^{}", v)).unwrap();
        prop_assert!(constraint.allows(&v));
        prop_assert!(!constraint.allows(&v.bump_major()));
    }

    #[test]
    fn tilde_allows_base_but_not_next_minor(v in arb_version()) {
        let constraint = VersionConstraint::parse(&format!("~{}", v)).unwrap();
        prop_assert!(constraint.allows(&v));
        prop_assert!(!constraint.allows(&v.bump_minor()));
    }

    #[test]
    fn ordering_is_total_and_antisymmetric(a in arb_version(), b in arb_version()) {
        use std::cmp::Ordering;
        match a.cmp(&b) {
            Ordering::Less => prop_assert_eq!(b.cmp(&a), Ordering::Greater),
            Ordering::Greater => prop_assert_eq!(b.cmp(&a), Ordering::Less),
            Ordering::Equal => prop_assert_eq!(b.cmp(&a), Ordering::Equal),
        }
    }

    #[test]
    fn evaluation_is_deterministic(n in -1000i64..1000, m in 1i64..1000) {
        let eval = Evaluator::new();
        let mut vars = BTreeMap::new();
        vars.insert("n".to_string(), Value::Number(n as f64));
        vars.insert("m".to_string(), Value::Number(m as f64));
        let expr = "n * 3 + m > 0 and n % m <= m";
        let first = eval.evaluate(expr, &vars).unwrap();
        let second = eval.evaluate(expr, &vars).unwrap();
        prop_assert_eq!(first, second);
    }
}
