//! # snstr
//!
//! A Nostr client library built around the protocol's core machinery:
//!
//! - the canonical event model with deterministic hashing and BIP-340
//!   signing ([`types::event`]),
//! - a per-relay WebSocket state machine with reconnection, publish
//!   acknowledgement correlation and ordered delivery ([`relays`]),
//! - a multi-relay pool with cross-relay deduplication ([`relays::pool`]),
//! - encrypted payloads ([`nips::nip04`], [`nips::nip44`]) and gift
//!   wraps ([`nips::nip59`]),
//! - bech32 entity codecs ([`nips::nip19`]),
//! - remote signing over relays ([`nips::nip46`]),
//! - and a rate-limited high-level [`client::Client`] gluing it all
//!   together.

pub mod client;
pub mod error;
pub mod nips;
pub mod parser;
pub mod relays;
pub mod signer;
pub mod types;
pub mod utils;

pub use client::{Client, ClientOptions, DmEncryption, RateLimit, RateLimits};
pub use error::{Error, Result};
pub use relays::{
    ConnectionStatus, OkOutcome, Relay, RelayEvent, RelayOptions, RelayPool, RemoveRelayOutcome,
};
pub use signer::{PrivateKeySigner, Signer};
pub use types::{
    Event, EventId, Filter, Keys, Kind, PublicKey, SecretKey, Template, Timestamp, UnsignedEvent,
    ValidationOptions,
};
