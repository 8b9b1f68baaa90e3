//! Parsers for well-known event kinds: profile metadata, contact lists,
//! relay lists and NIP-10 threads.

pub mod contacts;
pub mod metadata;
pub mod relay_list;
pub mod thread;

pub use contacts::{parse_contact_list, Contact};
pub use metadata::Metadata;
pub use relay_list::{parse_relay_list, RelayInfo};
pub use thread::{parse_thread, EventRef, Thread};
