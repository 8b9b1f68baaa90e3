//! NIP-10 thread structure of kind-1 notes.
//!
//! Marked `e` tags (`root`, `reply`, `mention`) take precedence; for
//! legacy events with positional tags, the first `e` tag is the root
//! and the last is the reply target.

use crate::types::event::Event;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRef {
    pub id: String,
    pub relay: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Thread {
    pub root: Option<EventRef>,
    pub reply: Option<EventRef>,
    pub mentions: Vec<EventRef>,
    /// Pubkeys of the participants being replied to (`p` tags).
    pub pubkeys: Vec<String>,
}

impl Thread {
    pub fn is_reply(&self) -> bool {
        self.root.is_some() || self.reply.is_some()
    }
}

fn event_ref(tag: &[String]) -> EventRef {
    EventRef {
        id: tag[1].clone(),
        relay: tag.get(2).filter(|r| !r.is_empty()).cloned(),
    }
}

pub fn parse_thread(event: &Event) -> Thread {
    let mut thread = Thread::default();
    let mut positional: Vec<EventRef> = Vec::new();
    let mut saw_marker = false;

    for tag in &event.tags {
        if tag.len() < 2 {
            continue;
        }
        match tag[0].as_str() {
            "e" => {
                let marker = tag.get(3).map(String::as_str);
                match marker {
                    Some("root") => {
                        saw_marker = true;
                        thread.root = Some(event_ref(tag));
                    }
                    Some("reply") => {
                        saw_marker = true;
                        thread.reply = Some(event_ref(tag));
                    }
                    Some("mention") => {
                        saw_marker = true;
                        thread.mentions.push(event_ref(tag));
                    }
                    _ => positional.push(event_ref(tag)),
                }
            }
            "p" => thread.pubkeys.push(tag[1].clone()),
            _ => {}
        }
    }

    if !saw_marker && !positional.is_empty() {
        // Legacy positional scheme.
        if positional.len() == 1 {
            thread.root = positional.pop();
        } else {
            thread.reply = positional.pop();
            thread.root = Some(positional.remove(0));
            thread.mentions = positional;
        }
    } else if saw_marker {
        thread.mentions.extend(positional);
    }

    // A reply straight to the root: NIP-10 says the single marked root
    // is also the reply target.
    if thread.root.is_some() && thread.reply.is_none() {
        thread.reply = thread.root.clone();
    }

    thread
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::{Keys, Template};

    fn note(tags: Vec<Vec<String>>) -> Event {
        Template::new(1, "reply text", tags)
            .to_event(&Keys::generate())
            .unwrap()
    }

    #[test]
    fn marked_tags_take_precedence() {
        let event = note(vec![
            vec!["e".into(), "root-id".into(), "".into(), "root".into()],
            vec!["e".into(), "reply-id".into(), "wss://r.example".into(), "reply".into()],
            vec!["e".into(), "mention-id".into(), "".into(), "mention".into()],
            vec!["p".into(), "aa".repeat(32)],
        ]);
        let thread = parse_thread(&event);
        assert_eq!(thread.root.as_ref().unwrap().id, "root-id");
        assert_eq!(thread.reply.as_ref().unwrap().id, "reply-id");
        assert_eq!(
            thread.reply.as_ref().unwrap().relay.as_deref(),
            Some("wss://r.example")
        );
        assert_eq!(thread.mentions.len(), 1);
        assert_eq!(thread.pubkeys, vec!["aa".repeat(32)]);
        assert!(thread.is_reply());
    }

    #[test]
    fn positional_tags_fall_back() {
        let event = note(vec![
            vec!["e".into(), "first".into()],
            vec!["e".into(), "middle".into()],
            vec!["e".into(), "last".into()],
        ]);
        let thread = parse_thread(&event);
        assert_eq!(thread.root.unwrap().id, "first");
        assert_eq!(thread.reply.unwrap().id, "last");
        assert_eq!(thread.mentions.len(), 1);
        assert_eq!(thread.mentions[0].id, "middle");
    }

    #[test]
    fn single_e_tag_is_a_reply_to_root() {
        let event = note(vec![vec!["e".into(), "the-root".into()]]);
        let thread = parse_thread(&event);
        assert_eq!(thread.root.as_ref().unwrap().id, "the-root");
        assert_eq!(thread.reply.as_ref().unwrap().id, "the-root");
    }

    #[test]
    fn top_level_note_has_no_thread() {
        let event = note(vec![vec!["t".into(), "topic".into()]]);
        let thread = parse_thread(&event);
        assert!(!thread.is_reply());
        assert!(thread.mentions.is_empty());
    }
}
