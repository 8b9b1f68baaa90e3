//! Multi-relay fan-out and fan-in.
//!
//! The pool owns at most one [`Relay`] per normalized URL. Operations
//! take explicit URL sets; per-relay failures are contained and never
//! fail the pool call as a whole.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::oneshot;

use crate::client::index::EventIndex;
use crate::error::{Error, Result};
use crate::relays::connection::Relay;
use crate::relays::types::{EoseCallback, EventCallback, OkOutcome, RelayOptions};
use crate::relays::utils::normalize_relay_url;
use crate::types::event::{Event, EventId};
use crate::types::filter::Filter;

/// Result of [`RelayPool::remove_relay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveRelayOutcome {
    Removed,
    NotFound,
    InvalidUrl,
}

/// Handle to a subscription fanned out across several relays.
pub struct PoolSubscription {
    entries: Vec<(Relay, String)>,
}

impl PoolSubscription {
    pub fn relay_urls(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(relay, _)| relay.url().to_string())
            .collect()
    }

    pub async fn unsubscribe(&self) {
        for (relay, sub_id) in &self.entries {
            let _ = relay.unsubscribe(sub_id).await;
        }
    }
}

pub struct RelayPool {
    relays: StdRwLock<FxHashMap<String, Relay>>,
    options: RelayOptions,
    index: Arc<EventIndex>,
}

impl Default for RelayPool {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayPool {
    pub fn new() -> Self {
        Self::with_options(RelayOptions::default())
    }

    pub fn with_options(options: RelayOptions) -> Self {
        Self {
            relays: StdRwLock::new(FxHashMap::default()),
            options,
            index: Arc::new(EventIndex::new()),
        }
    }

    /// Replaceable/addressable cache shared by every relay in the pool.
    pub fn index(&self) -> &Arc<EventIndex> {
        &self.index
    }

    pub fn relay_urls(&self) -> Vec<String> {
        self.relays.read().unwrap().keys().cloned().collect()
    }

    pub fn relay(&self, url: &str) -> Option<Relay> {
        let normalized = normalize_relay_url(url).ok()?;
        self.relays.read().unwrap().get(&normalized).cloned()
    }

    /// Register a relay without connecting. Returns the existing handle
    /// when the normalized URL is already present.
    pub fn add_relay(&self, url: &str) -> Result<Relay> {
        let normalized = normalize_relay_url(url)?;
        if let Some(existing) = self.relays.read().unwrap().get(&normalized) {
            return Ok(existing.clone());
        }
        let relay =
            Relay::with_shared_index(&normalized, self.options.clone(), self.index.clone())?;
        let mut map = self.relays.write().unwrap();
        // A concurrent add may have won the race.
        Ok(map.entry(normalized).or_insert(relay).clone())
    }

    /// Get-or-add, then connect.
    pub async fn ensure_relay(&self, url: &str) -> Result<Relay> {
        let relay = self.add_relay(url)?;
        relay.connect().await?;
        Ok(relay)
    }

    /// Disconnect and drop a relay.
    pub async fn remove_relay(&self, url: &str) -> RemoveRelayOutcome {
        let Ok(normalized) = normalize_relay_url(url) else {
            return RemoveRelayOutcome::InvalidUrl;
        };
        let removed = self.relays.write().unwrap().remove(&normalized);
        match removed {
            Some(relay) => {
                let _ = relay.disconnect().await;
                RemoveRelayOutcome::Removed
            }
            None => RemoveRelayOutcome::NotFound,
        }
    }

    /// Disconnect the listed relays, or every relay when `urls` is None.
    /// Relays stay registered and can be reconnected.
    pub async fn close(&self, urls: Option<&[String]>) {
        let targets: Vec<Relay> = match urls {
            Some(urls) => urls.iter().filter_map(|url| self.relay(url)).collect(),
            None => self.relays.read().unwrap().values().cloned().collect(),
        };
        for relay in targets {
            let _ = relay.disconnect().await;
        }
    }

    /// Publish to every URL, aggregating per-URL outcomes. A failure on
    /// one relay never aborts the others.
    pub async fn publish(
        &self,
        urls: &[String],
        event: Event,
    ) -> Result<HashMap<String, Result<OkOutcome>>> {
        let normalized = normalize_urls(urls)?;
        let tasks = normalized.iter().map(|url| {
            let event = event.clone();
            async move {
                let outcome = match self.ensure_relay(url).await {
                    Ok(relay) => relay.publish(event).await,
                    Err(e) => Err(e),
                };
                (url.clone(), outcome)
            }
        });
        Ok(join_all(tasks).await.into_iter().collect())
    }

    /// Subscribe across relays. The callback sees each event id at most
    /// once for the lifetime of the returned handle; `on_eose` fires
    /// once, after every reachable relay reported EOSE (unreachable
    /// relays count immediately).
    pub async fn subscribe(
        &self,
        urls: &[String],
        filters: Vec<Filter>,
        on_event: EventCallback,
        on_eose: Option<EoseCallback>,
    ) -> Result<PoolSubscription> {
        let normalized = normalize_urls(urls)?;

        let seen: Arc<StdMutex<FxHashSet<EventId>>> =
            Arc::new(StdMutex::new(FxHashSet::default()));
        let remaining = Arc::new(AtomicUsize::new(normalized.len()));
        let eose_fired = Arc::new(AtomicBool::new(false));

        let mut entries = Vec::with_capacity(normalized.len());
        for url in normalized {
            let relay = match self.add_relay(&url) {
                Ok(relay) => relay,
                Err(e) => {
                    tracing::warn!(relay = %url, error = %e, "skipping relay");
                    eose_countdown(&remaining, &eose_fired, &on_eose);
                    continue;
                }
            };

            let wrapped_event: EventCallback = {
                let seen = seen.clone();
                let on_event = on_event.clone();
                Arc::new(move |event: Event| {
                    if seen.lock().unwrap().insert(event.id) {
                        on_event(event);
                    }
                })
            };
            let wrapped_eose: EoseCallback = {
                let remaining = remaining.clone();
                let eose_fired = eose_fired.clone();
                let on_eose = on_eose.clone();
                Arc::new(move || {
                    eose_countdown(&remaining, &eose_fired, &on_eose);
                })
            };

            match relay
                .subscribe(filters.clone(), wrapped_event, Some(wrapped_eose))
                .await
            {
                Ok(sub_id) => entries.push((relay.clone(), sub_id)),
                Err(e) => {
                    tracing::warn!(relay = %url, error = %e, "subscribe failed");
                    eose_countdown(&remaining, &eose_fired, &on_eose);
                    continue;
                }
            }

            // Registered first so a successful connect replays the REQ;
            // an unreachable relay counts toward EOSE immediately.
            if relay.connect().await.is_err() {
                tracing::warn!(relay = %url, "relay unreachable");
                eose_countdown(&remaining, &eose_fired, &on_eose);
            }
        }

        Ok(PoolSubscription { entries })
    }

    /// Collect matching events until EOSE from every reachable URL, or
    /// until the timeout. Results are deduplicated and sorted newest
    /// first.
    pub async fn query_sync(
        &self,
        urls: &[String],
        filter: Filter,
        timeout: Duration,
    ) -> Result<Vec<Event>> {
        let collected: Arc<StdMutex<Vec<Event>>> = Arc::new(StdMutex::new(Vec::new()));
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let done_tx = Arc::new(StdMutex::new(Some(done_tx)));

        let sink = collected.clone();
        let on_event: EventCallback = Arc::new(move |event: Event| {
            sink.lock().unwrap().push(event);
        });
        let on_eose: EoseCallback = Arc::new(move || {
            if let Some(tx) = done_tx.lock().unwrap().take() {
                let _ = tx.send(());
            }
        });

        let handle = self.subscribe(urls, vec![filter], on_event, Some(on_eose)).await?;
        // Either every relay reported EOSE or the deadline passed;
        // whatever was collected by then is the answer.
        let _ = tokio::time::timeout(timeout, done_rx).await;
        handle.unsubscribe().await;

        let mut events = {
            let mut guard = collected.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        events.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(events)
    }

    /// The single newest event matching `filter`, if any.
    pub async fn get(
        &self,
        urls: &[String],
        filter: Filter,
        timeout: Duration,
    ) -> Result<Option<Event>> {
        let events = self.query_sync(urls, filter, timeout).await?;
        Ok(events.into_iter().next())
    }
}

fn normalize_urls(urls: &[String]) -> Result<Vec<String>> {
    if urls.is_empty() {
        return Err(Error::invalid_input("no relay URLs given"));
    }
    let mut seen = FxHashSet::default();
    let mut normalized = Vec::with_capacity(urls.len());
    for url in urls {
        let url = normalize_relay_url(url)?;
        if seen.insert(url.clone()) {
            normalized.push(url);
        }
    }
    Ok(normalized)
}

fn eose_countdown(
    remaining: &AtomicUsize,
    fired: &AtomicBool,
    on_eose: &Option<EoseCallback>,
) {
    let previous = remaining
        .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| {
            n.checked_sub(1)
        })
        .unwrap_or(0);
    if previous == 1 && !fired.swap(true, AtomicOrdering::SeqCst) {
        if let Some(on_eose) = on_eose {
            on_eose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::{timestamp_now, Keys, UnsignedEvent};
    use tokio::sync::mpsc;

    // 127.0.0.1:1 refuses connections immediately, keeping the tests
    // offline and fast.
    fn unreachable_urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("ws://127.0.0.1:{}", i + 1)).collect()
    }

    fn pool() -> RelayPool {
        crate::test_util::setup_tracing();
        let mut options = RelayOptions::default();
        options.connection_timeout = Duration::from_millis(200);
        options.buffer_flush_delay = Duration::from_millis(10);
        options.auto_reconnect = false;
        RelayPool::with_options(options)
    }

    fn signed(keys: &Keys, content: &str) -> Event {
        UnsignedEvent {
            pubkey: keys.public_key(),
            created_at: timestamp_now() - 1,
            kind: 1,
            tags: vec![],
            content: content.to_string(),
        }
        .sign(keys)
        .unwrap()
    }

    #[test]
    fn add_relay_is_idempotent_per_normalized_url() {
        let pool = pool();
        let a = pool.add_relay("relay.example.com").unwrap();
        let b = pool.add_relay("wss://relay.example.com").unwrap();
        assert_eq!(a.url(), b.url());
        assert_eq!(pool.relay_urls().len(), 1);
    }

    #[test]
    fn add_relay_rejects_bad_scheme() {
        let pool = pool();
        assert!(matches!(
            pool.add_relay("http://x.example"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn remove_relay_outcomes() {
        let pool = pool();
        pool.add_relay("relay.example.com").unwrap();
        assert_eq!(
            pool.remove_relay("wss://relay.example.com").await,
            RemoveRelayOutcome::Removed
        );
        assert_eq!(
            pool.remove_relay("relay.example.com").await,
            RemoveRelayOutcome::NotFound
        );
        assert_eq!(
            pool.remove_relay("http://x.example").await,
            RemoveRelayOutcome::InvalidUrl
        );
    }

    #[tokio::test]
    async fn subscription_dedups_across_relays() {
        let pool = pool();
        let urls = unreachable_urls(2);
        let keys = Keys::generate();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (eose_tx, mut eose_rx) = mpsc::unbounded_channel();
        let handle = pool
            .subscribe(
                &urls,
                vec![Filter::new().kind(1)],
                Arc::new(move |event: Event| {
                    let _ = tx.send(event.id);
                }),
                Some(Arc::new(move || {
                    let _ = eose_tx.send(());
                })),
            )
            .await
            .unwrap();

        // Both relays were unreachable, so the aggregate EOSE has fired
        // exactly once already.
        eose_rx.recv().await.unwrap();
        assert!(eose_rx.try_recv().is_err());

        // The same event arriving from both relays reaches the callback
        // once.
        let event = signed(&keys, "duplicated");
        for url in &urls {
            let relay = pool.relay(url).unwrap();
            let sub_id = relay.subscription_ids().pop().unwrap();
            let frame = format!(r#"["EVENT","{}",{}]"#, sub_id, event.as_json());
            relay.handle_frame(&frame).await;
            relay.handle_frame(&format!(r#"["EOSE","{}"]"#, sub_id)).await;
        }

        assert_eq!(rx.recv().await.unwrap(), event.id);
        assert!(rx.try_recv().is_err());

        handle.unsubscribe().await;
    }

    #[tokio::test]
    async fn publish_aggregates_per_url_failures() {
        let pool = pool();
        let urls = unreachable_urls(2);
        let keys = Keys::generate();
        let event = signed(&keys, "to nowhere");

        let outcomes = pool.publish(&urls, event).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        for url in &urls {
            assert!(outcomes.get(url).unwrap().is_err(), "{url}");
        }
    }

    #[tokio::test]
    async fn query_sync_returns_after_aggregate_eose() {
        let pool = pool();
        let urls = unreachable_urls(1);

        let started = std::time::Instant::now();
        let events = pool
            .query_sync(&urls, Filter::new().kind(1), Duration::from_secs(5))
            .await
            .unwrap();
        // The unreachable relay counted as EOSE immediately; the call
        // must not sit out the full timeout.
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn empty_url_set_is_invalid_input() {
        let pool = pool();
        assert!(matches!(
            pool.publish(&[], signed(&Keys::generate(), "x")).await,
            Err(Error::InvalidInput(_))
        ));
    }
}
