//! High-level client: a signer, a relay pool, and rate-limited helpers
//! over both.

pub mod index;
pub mod rate_limit;

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::relays::pool::{PoolSubscription, RelayPool, RemoveRelayOutcome};
use crate::relays::types::{EoseCallback, EventCallback, OkOutcome, RelayOptions};
use crate::signer::{PrivateKeySigner, Signer};
use crate::types::event::{
    Event, Keys, Kind, PublicKey, Template, ENCRYPTED_DIRECT_MESSAGE, TEXT_NOTE,
};
use crate::types::filter::Filter;

pub use rate_limit::{Operation, RateLimit, RateLimiter, RateLimits};

/// Which envelope `publish_direct_message` uses. NIP-04 remains the
/// default for interoperability; NIP-44 is the modern envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DmEncryption {
    #[default]
    Nip04,
    Nip44,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub relay_options: RelayOptions,
    pub rate_limits: RateLimits,
    pub dm_encryption: DmEncryption,
    /// Default deadline for `fetch_one` / `fetch_many`.
    pub query_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            relay_options: RelayOptions::default(),
            rate_limits: RateLimits::default(),
            dm_encryption: DmEncryption::default(),
            query_timeout: Duration::from_millis(10_000),
        }
    }
}

pub struct Client {
    pool: Arc<RelayPool>,
    signer: StdRwLock<Option<Arc<dyn Signer>>>,
    limiter: RateLimiter,
    options: ClientOptions,
}

impl Client {
    pub fn new(options: ClientOptions) -> Self {
        let pool = Arc::new(RelayPool::with_options(options.relay_options.clone()));
        let limiter = RateLimiter::new(options.rate_limits);
        Self {
            pool,
            signer: StdRwLock::new(None),
            limiter,
            options,
        }
    }

    pub fn with_keys(keys: Keys, options: ClientOptions) -> Self {
        let client = Self::new(options);
        client.set_keys(keys);
        client
    }

    pub fn set_keys(&self, keys: Keys) {
        self.set_signer(Arc::new(PrivateKeySigner::new(keys)));
    }

    /// Install any signing backend, e.g. a NIP-46 remote signer.
    pub fn set_signer(&self, signer: Arc<dyn Signer>) {
        *self.signer.write().unwrap() = Some(signer);
    }

    fn signer(&self) -> Result<Arc<dyn Signer>> {
        self.signer
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::invalid_input("no signer configured"))
    }

    pub fn pool(&self) -> &Arc<RelayPool> {
        &self.pool
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub async fn public_key(&self) -> Result<PublicKey> {
        self.signer()?.public_key().await
    }

    // ------------------------------------------------------------------
    // Relay set management (same URL normalization as the pool)
    // ------------------------------------------------------------------

    pub fn add_relay(&self, url: &str) -> Result<()> {
        self.pool.add_relay(url).map(|_| ())
    }

    pub async fn remove_relay(&self, url: &str) -> RemoveRelayOutcome {
        self.pool.remove_relay(url).await
    }

    pub fn relays(&self) -> Vec<String> {
        self.pool.relay_urls()
    }

    /// Connect every registered relay; per-relay failures are logged
    /// and skipped.
    pub async fn connect(&self) {
        for url in self.relays() {
            if let Err(e) = self.pool.ensure_relay(&url).await {
                tracing::warn!(relay = %url, error = %e, "connect failed");
            }
        }
    }

    pub async fn disconnect(&self) {
        self.pool.close(None).await;
    }

    // ------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------

    /// Sign `template` and publish to every registered relay. The
    /// replaceable/addressable cache observes own events immediately.
    pub async fn publish_event(
        &self,
        template: Template,
    ) -> Result<(Event, HashMap<String, Result<OkOutcome>>)> {
        self.limiter.check(Operation::Publish)?;
        let event = self.signer()?.sign_event(template).await?;
        self.pool.index().observe(&event);
        let urls = self.relays();
        if urls.is_empty() {
            return Err(Error::invalid_input("no relays configured"));
        }
        let outcomes = self.pool.publish(&urls, event.clone()).await?;
        Ok((event, outcomes))
    }

    pub async fn publish_text_note(
        &self,
        content: &str,
        tags: Vec<Vec<String>>,
    ) -> Result<(Event, HashMap<String, Result<OkOutcome>>)> {
        self.publish_event(Template::new(TEXT_NOTE, content, tags))
            .await
    }

    /// Encrypted DM to `receiver`, kind 4, NIP-04 by default (see
    /// [`ClientOptions::dm_encryption`]).
    pub async fn publish_direct_message(
        &self,
        receiver: &PublicKey,
        content: &str,
    ) -> Result<(Event, HashMap<String, Result<OkOutcome>>)> {
        let signer = self.signer()?;
        let ciphertext = match self.options.dm_encryption {
            DmEncryption::Nip04 => signer.nip04_encrypt(receiver, content).await?,
            DmEncryption::Nip44 => signer.nip44_encrypt(receiver, content).await?,
        };
        let template = Template::new(
            ENCRYPTED_DIRECT_MESSAGE,
            ciphertext,
            vec![vec!["p".to_string(), receiver.to_hex()]],
        );
        self.publish_event(template).await
    }

    /// Decrypt a kind-4 DM addressed to us, trying the configured
    /// scheme first and falling back to the other.
    pub async fn decrypt_direct_message(&self, event: &Event) -> Result<String> {
        if event.kind != ENCRYPTED_DIRECT_MESSAGE {
            return Err(Error::invalid_event("not a direct message"));
        }
        let signer = self.signer()?;
        let our_pk = signer.public_key().await?;
        // The counterparty is the other pubkey involved.
        let peer = if event.pubkey == our_pk {
            let hex = event
                .tag_value("p")
                .ok_or_else(|| Error::invalid_event("direct message lacks a p tag"))?;
            PublicKey::from_hex(hex)?
        } else {
            event.pubkey
        };
        if crate::nips::nip04::looks_like_nip04(&event.content) {
            signer.nip04_decrypt(&peer, &event.content).await
        } else {
            signer.nip44_decrypt(&peer, &event.content).await
        }
    }

    // ------------------------------------------------------------------
    // Subscriptions and queries
    // ------------------------------------------------------------------

    pub async fn subscribe(
        &self,
        filters: Vec<Filter>,
        on_event: EventCallback,
        on_eose: Option<EoseCallback>,
    ) -> Result<PoolSubscription> {
        self.limiter.check(Operation::Subscribe)?;
        let urls = self.relays();
        self.pool.subscribe(&urls, filters, on_event, on_eose).await
    }

    pub async fn fetch_many(&self, filter: Filter, timeout: Option<Duration>) -> Result<Vec<Event>> {
        self.limiter.check(Operation::Fetch)?;
        let urls = self.relays();
        self.pool
            .query_sync(&urls, filter, timeout.unwrap_or(self.options.query_timeout))
            .await
    }

    pub async fn fetch_one(&self, filter: Filter, timeout: Option<Duration>) -> Result<Option<Event>> {
        Ok(self.fetch_many(filter, timeout).await?.into_iter().next())
    }

    // ------------------------------------------------------------------
    // Replaceable / addressable cache
    // ------------------------------------------------------------------

    /// Latest observed replaceable event for `(pubkey, kind)`. The cache
    /// is fed by the relay delivery path and by own publishes.
    pub fn get_latest_replaceable_event(&self, pubkey: &PublicKey, kind: Kind) -> Option<Event> {
        self.pool.index().latest_replaceable(pubkey, kind)
    }

    /// Latest observed addressable event for `(pubkey, kind, d)`.
    pub fn get_latest_addressable_event(
        &self,
        pubkey: &PublicKey,
        kind: Kind,
        identifier: &str,
    ) -> Option<Event> {
        self.pool.index().latest_addressable(pubkey, kind, identifier)
    }
}
