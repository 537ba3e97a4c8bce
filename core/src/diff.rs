//! Port-level diff between a fresh snapshot and the last recorded one.

use std::collections::BTreeMap;

use crate::model::{ChangeKind, ChangeSet, PortStatus, Snapshot};

/// Classify every port that differs between `current` and `previous`.
///
/// With no previous snapshot every current port is `Added`. Ports present in
/// both with the same status are not reported.
pub fn diff(current: &Snapshot, previous: Option<&Snapshot>) -> ChangeSet {
    let empty: BTreeMap<u16, PortStatus> = BTreeMap::new();
    let before = previous.map(|p| &p.ports).unwrap_or(&empty);

    let mut changes = ChangeSet::new();
    for (&port, status) in &current.ports {
        match before.get(&port) {
            None => changes.insert(port, ChangeKind::Added),
            Some(prev) if prev != status => changes.insert(port, ChangeKind::Updated),
            Some(_) => {}
        }
    }
    for &port in before.keys() {
        if !current.ports.contains_key(&port) {
            changes.insert(port, ChangeKind::Removed);
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Host;
    use proptest::prelude::*;
    use time::OffsetDateTime;

    fn snap(ports: &[(u16, PortStatus)]) -> Snapshot {
        let mut s = Snapshot::new(Host::new("192.0.2.10".parse().unwrap()), OffsetDateTime::UNIX_EPOCH);
        for &(p, st) in ports {
            s = s.with_port(p, st);
        }
        s
    }

    fn kinds(set: &ChangeSet) -> Vec<(u16, ChangeKind)> {
        set.records().map(|r| (r.port, r.kind)).collect()
    }

    use PortStatus::{Closed, Open};

    #[test]
    fn port_added() {
        let got = diff(&snap(&[(80, Open), (443, Open)]), Some(&snap(&[(80, Open)])));
        assert_eq!(kinds(&got), vec![(443, ChangeKind::Added)]);
    }

    #[test]
    fn port_removed() {
        let got = diff(&snap(&[(80, Open)]), Some(&snap(&[(80, Open), (443, Open)])));
        assert_eq!(kinds(&got), vec![(443, ChangeKind::Removed)]);
    }

    #[test]
    fn port_updated() {
        let got = diff(&snap(&[(80, Closed)]), Some(&snap(&[(80, Open)])));
        assert_eq!(kinds(&got), vec![(80, ChangeKind::Updated)]);
    }

    #[test]
    fn mixed_changes() {
        let current = snap(&[(80, Closed), (443, Open), (8080, Open)]);
        let previous = snap(&[(80, Open), (443, Closed), (9090, Open)]);
        let got = diff(&current, Some(&previous));
        assert_eq!(
            kinds(&got),
            vec![
                (80, ChangeKind::Updated),
                (443, ChangeKind::Updated),
                (8080, ChangeKind::Added),
                (9090, ChangeKind::Removed),
            ]
        );
    }

    #[test]
    fn no_history_means_all_added() {
        let got = diff(&snap(&[(22, Closed), (80, Open)]), None);
        assert_eq!(kinds(&got), vec![(22, ChangeKind::Added), (80, ChangeKind::Added)]);
    }

    #[test]
    fn empty_against_empty() {
        assert!(diff(&snap(&[]), Some(&snap(&[]))).is_empty());
        assert!(diff(&snap(&[]), None).is_empty());
    }

    fn arb_status() -> impl Strategy<Value = PortStatus> {
        prop::sample::select(PortStatus::ALL.to_vec())
    }

    fn arb_snapshot() -> impl Strategy<Value = Snapshot> {
        prop::collection::btree_map(any::<u16>(), arb_status(), 0..24).prop_map(|ports| {
            let mut s = snap(&[]);
            s.ports = ports;
            s
        })
    }

    proptest! {
        #[test]
        fn against_nothing_is_all_added(s in arb_snapshot()) {
            let got = diff(&s, None);
            prop_assert_eq!(got.len(), s.ports.len());
            for r in got.records() {
                prop_assert_eq!(r.kind, ChangeKind::Added);
                prop_assert!(s.ports.contains_key(&r.port));
            }
        }

        #[test]
        fn against_itself_is_empty(s in arb_snapshot()) {
            prop_assert!(diff(&s, Some(&s)).is_empty());
        }

        #[test]
        fn direction_swaps_added_and_removed(a in arb_snapshot(), b in arb_snapshot()) {
            let forward = diff(&a, Some(&b));
            let backward = diff(&b, Some(&a));
            prop_assert_eq!(forward.len(), backward.len());
            for r in forward.records() {
                let expected = match r.kind {
                    ChangeKind::Added => ChangeKind::Removed,
                    ChangeKind::Removed => ChangeKind::Added,
                    ChangeKind::Updated => ChangeKind::Updated,
                };
                prop_assert_eq!(backward.get(r.port), Some(expected));
            }
        }
    }
}
