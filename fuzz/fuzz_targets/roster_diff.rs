//! Arbitrary diff sequences keep the roster free of empty key material and
//! the reconciliation report consistent with the store.

#![no_main]

use chorus_core::{RosterChange, RosterDiff, RosterStore};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut store = RosterStore::new();

    // Each 3-byte chunk: member id, key length, key fill byte. A zero byte
    // separates diffs.
    for batch in data.split(|b| *b == 0) {
        let diff: RosterDiff = batch
            .chunks_exact(3)
            .map(|c| (u64::from(c[0]), vec![c[2]; usize::from(c[1] % 4)]))
            .collect();

        let report = store.apply_diff(diff);

        for change in &report.changes {
            match change {
                RosterChange::Added(id) | RosterChange::Updated(id) => {
                    assert!(store.contains(*id));
                },
                RosterChange::Removed(id) => assert!(!store.contains(*id)),
            }
        }
        assert!(store.as_map().values().all(|key| !key.is_empty()));
    }
});
