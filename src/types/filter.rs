//! Subscription filters (NIP-01).
//!
//! A filter is a conjunction of optional predicates; set-valued fields
//! require membership, `since`/`until` are inclusive bounds, and `#X`
//! entries match single-letter indexed tag values.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::types::event::{Event, EventId, Kind, PublicKey, Timestamp};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub ids: Option<Vec<EventId>>,
    pub authors: Option<Vec<PublicKey>>,
    pub kinds: Option<Vec<Kind>>,
    pub since: Option<Timestamp>,
    pub until: Option<Timestamp>,
    pub limit: Option<usize>,
    /// `#X` entries, keyed by the single-letter tag name. BTreeMap so the
    /// wire form is deterministic.
    pub tags: BTreeMap<char, Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: EventId) -> Self {
        self.ids.get_or_insert_with(Vec::new).push(id);
        self
    }

    pub fn author(mut self, author: PublicKey) -> Self {
        self.authors.get_or_insert_with(Vec::new).push(author);
        self
    }

    pub fn kind(mut self, kind: Kind) -> Self {
        self.kinds.get_or_insert_with(Vec::new).push(kind);
        self
    }

    pub fn since(mut self, ts: Timestamp) -> Self {
        self.since = Some(ts);
        self
    }

    pub fn until(mut self, ts: Timestamp) -> Self {
        self.until = Some(ts);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Add a `#X` tag predicate. `name` must be a single ASCII letter.
    pub fn tag(mut self, name: char, values: Vec<String>) -> Result<Self> {
        if !name.is_ascii_alphabetic() {
            return Err(Error::invalid_input(format!(
                "tag filter name must be a single ASCII letter, got {name:?}"
            )));
        }
        self.tags.entry(name).or_default().extend(values);
        Ok(self)
    }

    /// Whether `event` satisfies every predicate present.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref ids) = self.ids {
            if !ids.contains(&event.id) {
                return false;
            }
        }
        if let Some(ref authors) = self.authors {
            if !authors.contains(&event.pubkey) {
                return false;
            }
        }
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.created_at > until {
                return false;
            }
        }
        for (name, values) in &self.tags {
            let mut buf = [0u8; 4];
            let name_str: &str = name.encode_utf8(&mut buf);
            let hit = event.tags.iter().any(|tag| {
                tag.len() >= 2
                    && tag[0] == name_str
                    && values.iter().any(|v| v == &tag[1])
            });
            if !hit {
                return false;
            }
        }
        true
    }

    pub fn as_json(&self) -> String {
        let mut json = String::from("{");

        if let Some(ref ids) = self.ids {
            json.push_str(r#""ids":["#);
            json.push_str(
                &ids.iter()
                    .map(|id| format!(r#""{}""#, id.to_hex()))
                    .collect::<Vec<_>>()
                    .join(","),
            );
            json.push_str("],");
        }

        if let Some(ref authors) = self.authors {
            json.push_str(r#""authors":["#);
            json.push_str(
                &authors
                    .iter()
                    .map(|a| format!(r#""{}""#, a.to_hex()))
                    .collect::<Vec<_>>()
                    .join(","),
            );
            json.push_str("],");
        }

        if let Some(ref kinds) = self.kinds {
            json.push_str(r#""kinds":["#);
            json.push_str(
                &kinds
                    .iter()
                    .map(|k| k.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            );
            json.push_str("],");
        }

        for (name, values) in &self.tags {
            json.push_str(&format!(r##""#{}":["##, name));
            json.push_str(
                &values
                    .iter()
                    .map(|v| format!(r#""{}""#, escape(v)))
                    .collect::<Vec<_>>()
                    .join(","),
            );
            json.push_str("],");
        }

        if let Some(since) = self.since {
            json.push_str(&format!(r#""since":{},"#, since));
        }
        if let Some(until) = self.until {
            json.push_str(&format!(r#""until":{},"#, until));
        }
        if let Some(limit) = self.limit {
            json.push_str(&format!(r#""limit":{},"#, limit));
        }

        if json.ends_with(',') {
            json.pop();
        }
        json.push('}');
        json
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    crate::types::event::push_json_escaped(&mut out, s);
    out
}
