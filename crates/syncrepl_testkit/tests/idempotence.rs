//! Property tests: replaying events changes nothing, and what is committed
//! survives a reopen.

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use syncrepl_core::{Cookie, Entry, Store, StoreConfig};
use syncrepl_engine::{EngineConfig, MockTransport, SyncEngine, SyncEvent};
use syncrepl_storage::InMemoryBackend;
use syncrepl_testkit::prelude::*;

type Contents = BTreeMap<String, Entry>;

/// Entries without the per-session cookie stamp.
fn contents(image: &StoreImage) -> Contents {
    image
        .entries
        .iter()
        .map(|(dn, entry)| {
            let mut entry = entry.clone();
            entry.last_cookie_seen = None;
            (dn.clone(), entry)
        })
        .collect()
}

fn session(events: &[SyncEvent], csn: u32) -> Vec<SyncEvent> {
    let mut session = events.to_vec();
    session.push(SyncEvent::CookieAdvance(Cookie::from(
        format!("rid=001,csn={csn}").as_str(),
    )));
    session
}

fn run_sessions(sessions: Vec<Vec<SyncEvent>>, config: EngineConfig) -> Vec<StoreImage> {
    let transport = Arc::new(MockTransport::new());
    let count = sessions.len();
    for events in sessions {
        transport.push_session(events);
    }

    let store = Store::open_in_memory().unwrap();
    let engine = SyncEngine::with_store(store, sample_descriptor(), transport, config).unwrap();

    let mut images = Vec::with_capacity(count);
    for _ in 0..count {
        engine.run().unwrap();
        images.push(StoreImage::capture(engine.store().unwrap()).unwrap());
    }
    images
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn replaying_a_stream_changes_nothing(events in change_stream_strategy(24)) {
        let images = run_sessions(
            vec![session(&events, 1), session(&events, 1)],
            EngineConfig::default(),
        );
        prop_assert_eq!(contents(&images[0]), contents(&images[1]));
        prop_assert_eq!(&images[0].cookie, &images[1].cookie);
    }

    #[test]
    fn batch_size_does_not_change_the_result(
        events in change_stream_strategy(24),
        batch in 2usize..16,
    ) {
        let one = run_sessions(vec![session(&events, 1)], EngineConfig::default());
        let batched = run_sessions(
            vec![session(&events, 1)],
            EngineConfig::new().with_max_batch_events(batch),
        );
        prop_assert_eq!(&one[0].entries, &batched[0].entries);
        prop_assert_eq!(&one[0].cookie, &batched[0].cookie);
    }

    #[test]
    fn committed_state_survives_reopen(events in change_stream_strategy(24)) {
        let disk = InMemoryBackend::new();
        let store =
            Store::open_with_backend(StoreConfig::default(), Box::new(disk.clone())).unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.push_session(session(&events, 7));

        let engine = SyncEngine::with_store(
            store,
            sample_descriptor(),
            transport,
            EngineConfig::new().with_max_batch_events(5),
        )
        .unwrap();
        engine.run().unwrap();
        let live = StoreImage::capture(engine.store().unwrap()).unwrap();
        engine.close().unwrap();

        let reopened = Store::open_with_backend(StoreConfig::default(), Box::new(disk)).unwrap();
        prop_assert_eq!(StoreImage::capture(&reopened).unwrap(), live);
    }

    #[test]
    fn present_phase_leaves_exactly_the_listed_entries(
        events in change_stream_strategy(16),
        keep in prop::collection::btree_set(dn_strategy(), 0..6),
    ) {
        let mut reconcile = vec![SyncEvent::PresentPhaseBegin];
        reconcile.extend(keep.iter().cloned().map(SyncEvent::PresentPhaseEntry));
        reconcile.push(SyncEvent::PresentPhaseEnd);

        let images = run_sessions(
            vec![session(&events, 1), session(&reconcile, 2)],
            EngineConfig::default(),
        );

        let before: Vec<&str> = images[0].dns();
        let expected: Vec<&str> = before
            .into_iter()
            .filter(|dn| keep.contains(*dn))
            .collect();
        prop_assert_eq!(images[1].dns(), expected);
        prop_assert!(images[1].entries.values().all(|e| e.present));
    }
}
