//! Property-based tests for delegation expansion.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    use crate::model::{AuthConfig, AuthDocument};

    /// Strategy for a declared permission universe plus a subset to exclude.
    fn universe_and_exclusions() -> impl Strategy<Value = (BTreeSet<String>, BTreeSet<String>)> {
        prop::collection::btree_set("[a-z]{1,8}", 1..12).prop_flat_map(|universe| {
            let items: Vec<String> = universe.iter().cloned().collect();
            let excluded = prop::sample::subsequence(items.clone(), 0..=items.len())
                .prop_map(|v| v.into_iter().collect::<BTreeSet<_>>());
            (Just(universe), excluded)
        })
    }

    fn document(universe: &BTreeSet<String>, holder: &str, raw: String) -> AuthDocument {
        AuthDocument {
            permissions: universe.iter().cloned().collect(),
            permission_access: [(holder.to_string(), raw)].into_iter().collect(),
            ..Default::default()
        }
    }

    proptest! {
        #[test]
        fn test_wildcard_manages_everything_but_exclusions(
            (universe, excluded) in universe_and_exclusions()
        ) {
            let holder = universe.iter().next().cloned().unwrap();
            let mut raw = vec!["*".to_string()];
            raw.extend(excluded.iter().cloned());

            let config = AuthConfig::from_document(document(&universe, &holder, raw.join(", ")))
                .unwrap();
            let managed = config.managed_by(&holder).unwrap();

            for p in &universe {
                prop_assert_eq!(managed.contains(p), !excluded.contains(p), "permission {}", p);
                prop_assert_eq!(config.grants_access([holder.as_str()], p), !excluded.contains(p));
            }
        }

        #[test]
        fn test_plain_list_manages_exactly_listed(
            (universe, listed) in universe_and_exclusions()
        ) {
            let holder = universe.iter().next().cloned().unwrap();
            let raw = listed.iter().cloned().collect::<Vec<_>>().join(",");

            let config = AuthConfig::from_document(document(&universe, &holder, raw)).unwrap();
            let managed: BTreeSet<String> =
                config.managed_by(&holder).unwrap().iter().cloned().collect();
            prop_assert_eq!(managed, listed);
        }
    }
}
