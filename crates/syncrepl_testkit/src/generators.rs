//! Property-based test generators using proptest.
//!
//! DNs are drawn from a small pool so generated event streams keep hitting
//! the same entries: re-adds, modifies of deleted entries and deletes of
//! absent ones all show up.

use crate::fixtures::{sample_dn, SAMPLE_BASE_DN};
use bytes::Bytes;
use proptest::prelude::*;
use syncrepl_core::{AttributeDelta, Cookie, Entry, Scope, UrlDescriptor};
use syncrepl_engine::SyncEvent;

const NAMES: &[&str] = &["alice", "bob", "carol", "dave", "erin", "frank"];
const ATTRIBUTES: &[&str] = &["cn", "mail", "title", "telephoneNumber"];

/// Strategy for DNs from the shared pool.
pub fn dn_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(NAMES).prop_map(sample_dn)
}

/// Strategy for attribute names.
pub fn attribute_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(ATTRIBUTES).prop_map(str::to_string)
}

/// Strategy for attribute values. Few distinct values, so deltas collide.
pub fn value_strategy() -> impl Strategy<Value = Bytes> {
    prop::string::string_regex("[a-d]{1,2}")
        .expect("Invalid regex")
        .prop_map(Bytes::from)
}

fn values_strategy(max: usize) -> impl Strategy<Value = Vec<Bytes>> {
    prop::collection::vec(value_strategy(), 0..=max)
}

/// Strategy for entries with one to three attributes.
pub fn entry_strategy() -> impl Strategy<Value = Entry> {
    (
        dn_strategy(),
        prop::collection::btree_map(attribute_strategy(), values_strategy(3), 1..=3),
    )
        .prop_map(|(dn, attributes)| {
            let mut entry = Entry::new(dn);
            for (name, values) in attributes {
                if !values.is_empty() {
                    entry = entry.with_attribute(name, values);
                }
            }
            entry
        })
}

/// Strategy for attribute deltas.
pub fn delta_strategy() -> impl Strategy<Value = AttributeDelta> {
    prop_oneof![
        (attribute_strategy(), values_strategy(3))
            .prop_map(|(attribute, values)| AttributeDelta::Add { attribute, values }),
        (attribute_strategy(), values_strategy(2))
            .prop_map(|(attribute, values)| AttributeDelta::Delete { attribute, values }),
        (attribute_strategy(), values_strategy(3))
            .prop_map(|(attribute, values)| AttributeDelta::Replace { attribute, values }),
    ]
}

/// Strategy for opaque cookies.
pub fn cookie_strategy() -> impl Strategy<Value = Cookie> {
    (1u32..10_000).prop_map(|csn| Cookie::from(format!("rid=001,csn={csn:08}").as_str()))
}

/// Strategy for search descriptors under the sample base.
pub fn descriptor_strategy() -> impl Strategy<Value = UrlDescriptor> {
    (
        prop::sample::select(vec![Scope::Base, Scope::One, Scope::Subtree]),
        prop::sample::select(vec!["", "(objectClass=person)", "(cn=a*)"]),
        prop::collection::vec(attribute_strategy(), 0..3),
    )
        .prop_map(|(scope, filter, attributes)| {
            UrlDescriptor::new(SAMPLE_BASE_DN, scope, filter, attributes)
        })
}

/// Strategy for change events: adds, modifies and deletes.
pub fn change_event_strategy() -> impl Strategy<Value = SyncEvent> {
    prop_oneof![
        3 => entry_strategy().prop_map(SyncEvent::EntryAdded),
        2 => (dn_strategy(), prop::collection::vec(delta_strategy(), 1..4))
            .prop_map(|(dn, deltas)| SyncEvent::EntryModified { dn, deltas }),
        1 => dn_strategy().prop_map(SyncEvent::EntryDeleted),
    ]
}

/// Strategy for a stream of change events.
pub fn change_stream_strategy(max_len: usize) -> impl Strategy<Value = Vec<SyncEvent>> {
    prop::collection::vec(change_event_strategy(), 0..=max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn dns_come_from_pool() {
        let mut runner = TestRunner::default();
        for _ in 0..50 {
            let dn = dn_strategy().new_tree(&mut runner).unwrap().current();
            assert!(dn.ends_with(SAMPLE_BASE_DN));
        }
    }

    proptest! {
        #[test]
        fn generated_entries_have_values(entry in entry_strategy()) {
            prop_assert!(!entry.dn.is_empty());
            prop_assert!(entry.attributes.values().all(|v| !v.is_empty()));
        }

        #[test]
        fn change_events_carry_a_dn(event in change_event_strategy()) {
            prop_assert!(event.dn().is_some());
        }
    }
}
