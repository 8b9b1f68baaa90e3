pub mod event;
pub mod filter;

pub use event::{
    compute_event_id, is_addressable, is_ephemeral, is_regular, is_replaceable, serialize_canonical,
    sign_id, timestamp_now, verify_signature, Event, EventId, Keys, Kind, PublicKey, SecretKey,
    Template, Timestamp, UnsignedEvent, ValidationOptions,
};
pub use filter::Filter;
