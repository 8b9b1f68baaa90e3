//! Types for the Nostr relay protocol (NIP-01): client messages, relay
//! events, connection status and per-relay configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::types::event::{Event, Keys, Template, ValidationOptions, CLIENT_AUTH};
use crate::types::filter::Filter;
use crate::error::Result;

/// Client-to-relay messages.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// `["EVENT", <event>]`
    Event(Event),

    /// `["REQ", <subscription_id>, <filter>, ...]`
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },

    /// `["CLOSE", <subscription_id>]`
    Close { subscription_id: String },

    /// `["AUTH", <signed kind-22242 event>]`
    Auth(Event),

    /// `["COUNT", <subscription_id>, <filter>, ...]`
    Count {
        subscription_id: String,
        filters: Vec<Filter>,
    },
}

impl ClientMessage {
    pub fn to_json(&self) -> String {
        match self {
            ClientMessage::Event(event) => format!(r#"["EVENT",{}]"#, event.as_json()),
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut parts = vec!["\"REQ\"".to_string(), format!(r#""{subscription_id}""#)];
                parts.extend(filters.iter().map(Filter::as_json));
                format!("[{}]", parts.join(","))
            }
            ClientMessage::Close { subscription_id } => {
                format!(r#"["CLOSE","{subscription_id}"]"#)
            }
            ClientMessage::Auth(event) => format!(r#"["AUTH",{}]"#, event.as_json()),
            ClientMessage::Count {
                subscription_id,
                filters,
            } => {
                let mut parts = vec!["\"COUNT\"".to_string(), format!(r#""{subscription_id}""#)];
                parts.extend(filters.iter().map(Filter::as_json));
                format!("[{}]", parts.join(","))
            }
        }
    }
}

/// Outcome of a publish as acknowledged by the relay's OK frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OkOutcome {
    pub accepted: bool,
    pub message: String,
}

impl OkOutcome {
    /// Treat a refusal as [`crate::Error::Rejected`].
    pub fn into_result(self) -> Result<()> {
        if self.accepted {
            Ok(())
        } else {
            Err(crate::Error::Rejected {
                reason: self.message,
            })
        }
    }
}

/// Events emitted on the relay's broadcast channel.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    Connect,
    Disconnect,
    Error(String),
    Notice(String),
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    Closed {
        subscription_id: String,
        message: String,
    },
    Auth {
        challenge: String,
    },
    Count {
        subscription_id: String,
        count: u64,
    },
}

/// Connection status for a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

/// Per-subscription callbacks. Delivery happens on the relay's flusher
/// task, so these must be shareable across threads.
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;
pub type EoseCallback = Arc<dyn Fn() + Send + Sync>;
pub type ClosedCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Configuration for relay connections.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Timeout for connection attempts.
    pub connection_timeout: Duration,
    /// How long events sit in the ordering buffer before a flush.
    pub buffer_flush_delay: Duration,
    /// Maximum events an ordering buffer holds before an early flush.
    pub max_buffered_events: usize,
    /// Whether to reconnect after an unexpected close.
    pub auto_reconnect: bool,
    /// Give up reconnecting after this many attempts.
    pub max_reconnect_attempts: u32,
    /// Backoff cap.
    pub max_reconnect_delay: Duration,
    /// Default deadline for publish acknowledgements.
    pub publish_timeout: Duration,
    /// Structural validation knobs.
    pub validation: ValidationOptions,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_millis(10_000),
            buffer_flush_delay: Duration::from_millis(50),
            max_buffered_events: 4096,
            auto_reconnect: true,
            max_reconnect_attempts: 10,
            max_reconnect_delay: Duration::from_millis(60_000),
            publish_timeout: Duration::from_millis(10_000),
            validation: ValidationOptions::default(),
        }
    }
}

/// Build the signed kind-22242 response to an AUTH challenge.
pub fn build_auth_event(keys: &Keys, relay_url: &str, challenge: &str) -> Result<Event> {
    Template::new(
        CLIENT_AUTH,
        "",
        vec![
            vec!["relay".to_string(), relay_url.to_string()],
            vec!["challenge".to_string(), challenge.to_string()],
        ],
    )
    .to_event(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::{Keys, SecretKey};

    #[test]
    fn req_wire_form() {
        let msg = ClientMessage::Req {
            subscription_id: "sub-1".to_string(),
            filters: vec![Filter::new().kind(1)],
        };
        assert_eq!(msg.to_json(), r#"["REQ","sub-1",{"kinds":[1]}]"#);
    }

    #[test]
    fn close_wire_form() {
        let msg = ClientMessage::Close {
            subscription_id: "sub-1".to_string(),
        };
        assert_eq!(msg.to_json(), r#"["CLOSE","sub-1"]"#);
    }

    #[test]
    fn event_wire_form_embeds_event_json() {
        let keys = Keys::new(SecretKey::from_bytes({
            let mut sk = [0u8; 32];
            sk[31] = 9;
            sk
        }))
        .unwrap();
        let event = Template::new(1, "hi", vec![]).to_event(&keys).unwrap();
        let json = ClientMessage::Event(event.clone()).to_json();
        assert!(json.starts_with(r#"["EVENT",{"id":""#));
        assert!(json.contains(&event.id.to_hex()));
    }

    #[test]
    fn rejected_outcome_becomes_error() {
        let outcome = OkOutcome {
            accepted: false,
            message: "blocked: spam".to_string(),
        };
        assert!(matches!(
            outcome.into_result(),
            Err(crate::Error::Rejected { .. })
        ));
    }

    #[test]
    fn auth_event_shape() {
        let keys = Keys::generate();
        let event = build_auth_event(&keys, "wss://relay.example.com", "challenge-123").unwrap();
        assert_eq!(event.kind, CLIENT_AUTH);
        assert_eq!(event.tag_value("relay"), Some("wss://relay.example.com"));
        assert_eq!(event.tag_value("challenge"), Some("challenge-123"));
        event.verify().unwrap();
    }
}
