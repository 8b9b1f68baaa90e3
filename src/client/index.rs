//! In-memory index of the latest replaceable and addressable events.
//!
//! Updated on the relay delivery path as events pass validation, and
//! optimistically when the client publishes its own events. Replacement
//! follows the relay rule: larger `created_at` wins; on a tie the
//! lexicographically smaller id wins.

use rustc_hash::FxHashMap;
use std::sync::RwLock;

use crate::types::event::{is_addressable, is_replaceable, Event, Kind, PublicKey};

#[derive(Default)]
pub struct EventIndex {
    replaceable: RwLock<FxHashMap<(PublicKey, Kind), Event>>,
    addressable: RwLock<FxHashMap<(PublicKey, Kind, String), Event>>,
}

/// Relay replacement rule.
fn supersedes(candidate: &Event, incumbent: &Event) -> bool {
    candidate.created_at > incumbent.created_at
        || (candidate.created_at == incumbent.created_at && candidate.id < incumbent.id)
}

impl EventIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event if its kind is indexed and it supersedes the
    /// current entry.
    pub fn observe(&self, event: &Event) {
        if is_replaceable(event.kind) {
            let key = (event.pubkey, event.kind);
            let mut map = self.replaceable.write().unwrap();
            match map.get(&key) {
                Some(current) if !supersedes(event, current) => {}
                _ => {
                    map.insert(key, event.clone());
                }
            }
        } else if is_addressable(event.kind) {
            let key = (event.pubkey, event.kind, event.identifier().to_string());
            let mut map = self.addressable.write().unwrap();
            match map.get(&key) {
                Some(current) if !supersedes(event, current) => {}
                _ => {
                    map.insert(key, event.clone());
                }
            }
        }
    }

    pub fn latest_replaceable(&self, pubkey: &PublicKey, kind: Kind) -> Option<Event> {
        self.replaceable
            .read()
            .unwrap()
            .get(&(*pubkey, kind))
            .cloned()
    }

    pub fn latest_addressable(
        &self,
        pubkey: &PublicKey,
        kind: Kind,
        identifier: &str,
    ) -> Option<Event> {
        self.addressable
            .read()
            .unwrap()
            .get(&(*pubkey, kind, identifier.to_string()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::EventId;

    fn event(kind: Kind, created_at: u64, id_byte: u8, d: Option<&str>) -> Event {
        let tags = match d {
            Some(d) => vec![vec!["d".to_string(), d.to_string()]],
            None => vec![],
        };
        Event {
            id: EventId([id_byte; 32]),
            pubkey: PublicKey([7u8; 32]),
            created_at,
            kind,
            tags,
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn newer_replaceable_wins() {
        let index = EventIndex::new();
        index.observe(&event(0, 100, 1, None));
        index.observe(&event(0, 200, 2, None));
        let latest = index.latest_replaceable(&PublicKey([7u8; 32]), 0).unwrap();
        assert_eq!(latest.created_at, 200);

        // An older one arriving later does not replace.
        index.observe(&event(0, 150, 3, None));
        let latest = index.latest_replaceable(&PublicKey([7u8; 32]), 0).unwrap();
        assert_eq!(latest.created_at, 200);
    }

    #[test]
    fn equal_timestamps_break_toward_smaller_id() {
        let index = EventIndex::new();
        index.observe(&event(0, 100, 0xbb, None));
        index.observe(&event(0, 100, 0xaa, None));
        let latest = index.latest_replaceable(&PublicKey([7u8; 32]), 0).unwrap();
        assert_eq!(latest.id.0[0], 0xaa);

        // The larger id never displaces the smaller at the same time.
        index.observe(&event(0, 100, 0xcc, None));
        let latest = index.latest_replaceable(&PublicKey([7u8; 32]), 0).unwrap();
        assert_eq!(latest.id.0[0], 0xaa);
    }

    #[test]
    fn addressable_entries_are_keyed_by_identifier() {
        let index = EventIndex::new();
        index.observe(&event(30023, 100, 1, Some("post-a")));
        index.observe(&event(30023, 200, 2, Some("post-b")));

        let pk = PublicKey([7u8; 32]);
        assert_eq!(
            index
                .latest_addressable(&pk, 30023, "post-a")
                .unwrap()
                .created_at,
            100
        );
        assert_eq!(
            index
                .latest_addressable(&pk, 30023, "post-b")
                .unwrap()
                .created_at,
            200
        );
        assert!(index.latest_addressable(&pk, 30023, "post-c").is_none());
    }

    #[test]
    fn regular_kinds_are_ignored() {
        let index = EventIndex::new();
        index.observe(&event(1, 100, 1, None));
        assert!(index.latest_replaceable(&PublicKey([7u8; 32]), 1).is_none());
    }
}
