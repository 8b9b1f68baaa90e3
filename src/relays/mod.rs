//! Relay transport: per-relay connection state machines, the ordering
//! buffer, and the multi-relay pool.

pub mod buffer;
pub mod connection;
pub mod pool;
pub mod types;
pub mod utils;

pub use connection::Relay;
pub use pool::{PoolSubscription, RelayPool, RemoveRelayOutcome};
pub use types::{
    build_auth_event, ClientMessage, ClosedCallback, ConnectionStatus, EoseCallback,
    EventCallback, OkOutcome, RelayEvent, RelayOptions,
};
pub use utils::{clean_relay_urls, normalize_relay_url};
