//! Kind-0 profile metadata.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::event::{Event, METADATA};

/// The well-known fields of a kind-0 content document. Unknown fields
/// are preserved nowhere; clients needing extensions should parse the
/// content themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lud16: Option<String>,
}

impl Metadata {
    pub fn from_event(event: &Event) -> Result<Self> {
        if event.kind != METADATA {
            return Err(Error::invalid_event("event is not kind 0"));
        }
        serde_json::from_str(&event.content)
            .map_err(|e| Error::invalid_event(format!("bad metadata content: {e}")))
    }

    pub fn as_json(&self) -> String {
        serde_json::to_string(self).expect("metadata serialization is infallible")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::{Keys, Template};

    #[test]
    fn parses_profile_fields() {
        let keys = Keys::generate();
        let content = r#"{"name":"fiatjaf","about":"nostr author","picture":"https://x.example/p.png","nip05":"_@fiatjaf.com"}"#;
        let event = Template::new(METADATA, content, vec![])
            .to_event(&keys)
            .unwrap();
        let metadata = Metadata::from_event(&event).unwrap();
        assert_eq!(metadata.name.as_deref(), Some("fiatjaf"));
        assert_eq!(metadata.nip05.as_deref(), Some("_@fiatjaf.com"));
        assert!(metadata.banner.is_none());
    }

    #[test]
    fn rejects_wrong_kind_and_bad_json() {
        let keys = Keys::generate();
        let note = Template::new(1, "{}", vec![]).to_event(&keys).unwrap();
        assert!(Metadata::from_event(&note).is_err());

        let broken = Template::new(METADATA, "not json", vec![])
            .to_event(&keys)
            .unwrap();
        assert!(Metadata::from_event(&broken).is_err());
    }

    #[test]
    fn json_round_trip_skips_empty_fields() {
        let metadata = Metadata {
            name: Some("n".to_string()),
            ..Default::default()
        };
        assert_eq!(metadata.as_json(), r#"{"name":"n"}"#);
    }
}
