//! Kind-10002 relay lists (NIP-65).

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::relays::utils::normalize_relay_url;
use crate::types::event::{Event, RELAY_LIST};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayInfo {
    pub url: String,
    pub read: bool,
    pub write: bool,
}

/// Extract relay entries from `r` tags. Without a marker a relay is
/// used for both read and write; with one it is scoped accordingly.
/// URLs are normalized and deduplicated; invalid ones are dropped.
pub fn parse_relay_list(event: &Event) -> Result<Vec<RelayInfo>> {
    if event.kind != RELAY_LIST {
        return Err(Error::invalid_event("event is not kind 10002"));
    }

    let mut unique: FxHashMap<String, RelayInfo> = FxHashMap::default();
    for tag in &event.tags {
        if tag.len() >= 2 && tag[0] == "r" && !tag[1].is_empty() {
            let Ok(url) = normalize_relay_url(&tag[1]) else {
                continue;
            };
            let marker = tag
                .get(2)
                .map(|m| m.to_lowercase())
                .unwrap_or_default();
            let info = RelayInfo {
                url: url.clone(),
                read: marker.is_empty() || marker == "read",
                write: marker.is_empty() || marker == "write",
            };
            unique.insert(url, info);
        }
    }
    Ok(unique.into_values().collect())
}

/// Relays usable for reading the author's events.
pub fn read_relays(relays: &[RelayInfo]) -> Vec<String> {
    relays
        .iter()
        .filter(|r| r.read)
        .map(|r| r.url.clone())
        .collect()
}

/// Relays the author writes to.
pub fn write_relays(relays: &[RelayInfo]) -> Vec<String> {
    relays
        .iter()
        .filter(|r| r.write)
        .map(|r| r.url.clone())
        .collect()
}
