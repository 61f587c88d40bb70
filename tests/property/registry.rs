//! Property-based tests for the member registry.
//!
//! Uses proptest to verify:
//! 1. Joining distinct names yields a roster in join order.
//! 2. A duplicate join is rejected and leaves the registry unchanged.
//! 3. Leave is idempotent and keeps the order of the remaining members.
//! 4. The registry never holds more than its capacity.

use std::net::SocketAddr;

use chatter_server::registry::{JoinError, MemberRegistry};
use proptest::prelude::*;

fn addr(i: usize) -> SocketAddr {
    let port = u16::try_from(10_000 + i).expect("port in range");
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Strategy for a list of distinct valid screen names in random order.
fn arb_distinct_names(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::hash_set("[a-z][a-z0-9_]{0,11}", 1..max)
        .prop_map(|set| set.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

proptest! {
    /// The roster after a sequence of distinct joins is exactly that
    /// sequence.
    #[test]
    fn roster_is_join_order(names in arb_distinct_names(40)) {
        let mut registry = MemberRegistry::new();
        for (i, name) in names.iter().enumerate() {
            let roster = registry.try_join(name, addr(i)).expect("distinct join");
            prop_assert_eq!(&roster, &names[..=i].to_vec());
        }
        prop_assert_eq!(registry.snapshot(), names);
    }

    /// Joining an existing name fails with `DuplicateName` and changes
    /// nothing.
    #[test]
    fn duplicate_join_rejected(names in arb_distinct_names(20), pick in any::<prop::sample::Index>()) {
        let mut registry = MemberRegistry::new();
        for (i, name) in names.iter().enumerate() {
            registry.try_join(name, addr(i)).expect("distinct join");
        }
        let before = registry.snapshot();
        let existing = pick.get(&names);

        prop_assert_eq!(
            registry.try_join(existing, addr(999)),
            Err(JoinError::DuplicateName)
        );
        prop_assert_eq!(registry.snapshot(), before);
        prop_assert_ne!(registry.get(existing).map(|m| m.address), Some(addr(999)));
    }

    /// Leaving twice is the same as leaving once, and the others keep
    /// their relative order.
    #[test]
    fn leave_is_idempotent(names in arb_distinct_names(20), pick in any::<prop::sample::Index>()) {
        let mut registry = MemberRegistry::new();
        for (i, name) in names.iter().enumerate() {
            registry.try_join(name, addr(i)).expect("distinct join");
        }
        let leaving = pick.get(&names).clone();

        prop_assert!(registry.leave(&leaving).is_some());
        let after_once = registry.snapshot();
        prop_assert!(registry.leave(&leaving).is_none());
        prop_assert_eq!(registry.snapshot(), after_once.clone());

        let expected: Vec<String> = names.into_iter().filter(|n| *n != leaving).collect();
        prop_assert_eq!(after_once, expected);
    }

    /// Capacity is never exceeded, whatever mix of joins and leaves arrives.
    #[test]
    fn capacity_is_never_exceeded(
        capacity in 1usize..8,
        ops in prop::collection::vec((any::<bool>(), 0usize..12), 0..64),
    ) {
        let mut registry = MemberRegistry::with_capacity(capacity);
        for (i, (join, who)) in ops.into_iter().enumerate() {
            let name = format!("m{who}");
            if join {
                match registry.try_join(&name, addr(i)) {
                    Ok(_) | Err(JoinError::DuplicateName) => {}
                    Err(JoinError::ServerFull { max }) => {
                        prop_assert_eq!(max, capacity);
                        prop_assert_eq!(registry.len(), capacity);
                    }
                    Err(e) => prop_assert!(false, "unexpected join error: {e}"),
                }
            } else {
                registry.leave(&name);
            }
            prop_assert!(registry.len() <= capacity);
        }
    }
}
