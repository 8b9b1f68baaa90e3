//! Kind-3 contact lists.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::event::{Event, CONTACT_LIST};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub pubkey: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub relays: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub petname: Option<String>,
}

/// Extract contacts from a kind-3 event's `p` tags: pubkey at position
/// 1, optional relay hint at 2, optional petname at 3.
pub fn parse_contact_list(event: &Event) -> Result<Vec<Contact>> {
    if event.kind != CONTACT_LIST {
        return Err(Error::invalid_event("event is not kind 3"));
    }

    let mut contacts = Vec::new();
    for tag in &event.tags {
        if tag.len() >= 2 && tag[0] == "p" {
            let mut contact = Contact {
                pubkey: tag[1].clone(),
                relays: Vec::new(),
                petname: None,
            };
            if tag.len() >= 3 && !tag[2].is_empty() {
                contact.relays = vec![tag[2].clone()];
            }
            if tag.len() >= 4 && !tag[3].is_empty() {
                contact.petname = Some(tag[3].clone());
            }
            contacts.push(contact);
        }
    }
    Ok(contacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::{Keys, Template};

    #[test]
    fn extracts_pubkey_relay_and_petname() {
        let keys = Keys::generate();
        let event = Template::new(
            CONTACT_LIST,
            "",
            vec![
                vec!["p".into(), "aa".repeat(32)],
                vec![
                    "p".into(),
                    "bb".repeat(32),
                    "wss://relay.example.com".into(),
                    "alice".into(),
                ],
                vec!["e".into(), "ignored".into()],
            ],
        )
        .to_event(&keys)
        .unwrap();

        let contacts = parse_contact_list(&event).unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].pubkey, "aa".repeat(32));
        assert!(contacts[0].relays.is_empty());
        assert!(contacts[0].petname.is_none());
        assert_eq!(contacts[1].relays, vec!["wss://relay.example.com".to_string()]);
        assert_eq!(contacts[1].petname.as_deref(), Some("alice"));
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let keys = Keys::generate();
        let note = Template::new(1, "", vec![]).to_event(&keys).unwrap();
        assert!(parse_contact_list(&note).is_err());
    }
}
