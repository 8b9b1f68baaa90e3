//! Individual relay connection management.
//!
//! One [`Relay`] owns one WebSocket to one relay URL and tracks that
//! connection's subscriptions and in-flight publishes. All socket writes
//! go through the relay's own sink guard; inbound frames are parsed and
//! routed by a single reader task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock, Weak};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::client::index::EventIndex;
use crate::error::{Error, Result};
use crate::relays::buffer::OrderingBuffer;
use crate::relays::types::{
    build_auth_event, ClientMessage, ClosedCallback, ConnectionStatus, EoseCallback,
    EventCallback, OkOutcome, RelayEvent, RelayOptions,
};
use crate::relays::utils::normalize_relay_url;
use crate::types::event::{Event, Keys};
use crate::types::filter::Filter;
use crate::utils::json::{extract_frame, unquote};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type PublishWaiter = oneshot::Sender<Result<OkOutcome>>;

pub(crate) struct Subscription {
    id: String,
    filters: Vec<Filter>,
    on_event: EventCallback,
    on_eose: Option<EoseCallback>,
    on_closed: Option<ClosedCallback>,
    buffer: OrderingBuffer,
    /// Serializes timer flushes against eager EOSE flushes.
    flush_gate: AsyncMutex<()>,
    active: AtomicBool,
    flusher: StdMutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    fn shutdown(&self) {
        self.active.store(false, AtomicOrdering::SeqCst);
        if let Some(handle) = self.flusher.lock().unwrap().take() {
            handle.abort();
        }
        self.buffer.clear();
    }
}

pub(crate) struct RelayInner {
    url: String,
    options: RelayOptions,
    status: StdRwLock<ConnectionStatus>,
    ws_sink: AsyncMutex<Option<WsSink>>,
    subscriptions: StdRwLock<HashMap<String, Arc<Subscription>>>,
    pending_publishes: StdMutex<HashMap<String, Vec<PublishWaiter>>>,
    pending_counts: StdMutex<HashMap<String, oneshot::Sender<u64>>>,
    events_tx: broadcast::Sender<RelayEvent>,
    connect_gate: AsyncMutex<()>,
    reconnect_enabled: AtomicBool,
    reader: StdMutex<Option<JoinHandle<()>>>,
    index: Arc<EventIndex>,
}

/// A connection to one relay. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

impl Relay {
    pub fn new(url: &str) -> Result<Self> {
        Self::with_options(url, RelayOptions::default())
    }

    pub fn with_options(url: &str, options: RelayOptions) -> Result<Self> {
        Self::with_shared_index(url, options, Arc::new(EventIndex::new()))
    }

    /// A relay whose replaceable/addressable index is shared with the
    /// owning pool or client.
    pub(crate) fn with_shared_index(
        url: &str,
        options: RelayOptions,
        index: Arc<EventIndex>,
    ) -> Result<Self> {
        let url = normalize_relay_url(url)?;
        let (events_tx, _) = broadcast::channel(128);
        Ok(Self {
            inner: Arc::new(RelayInner {
                url,
                options,
                status: StdRwLock::new(ConnectionStatus::Disconnected),
                ws_sink: AsyncMutex::new(None),
                subscriptions: StdRwLock::new(HashMap::new()),
                pending_publishes: StdMutex::new(HashMap::new()),
                pending_counts: StdMutex::new(HashMap::new()),
                events_tx,
                connect_gate: AsyncMutex::new(()),
                reconnect_enabled: AtomicBool::new(false),
                reader: StdMutex::new(None),
                index,
            }),
        })
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.read().unwrap()
    }

    /// Listen for lifecycle and protocol events.
    pub fn events(&self) -> broadcast::Receiver<RelayEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn subscription_ids(&self) -> Vec<String> {
        self.inner
            .subscriptions
            .read()
            .unwrap()
            .keys()
            .cloned()
            .collect()
    }

    /// Open the socket. Concurrent calls share the same attempt: they
    /// serialize on an internal gate, and late arrivals observe the
    /// already-Connected state.
    pub async fn connect(&self) -> Result<()> {
        let _gate = self.inner.connect_gate.lock().await;
        if self.status().is_connected() {
            return Ok(());
        }
        self.inner
            .reconnect_enabled
            .store(self.inner.options.auto_reconnect, AtomicOrdering::SeqCst);
        RelayInner::open_socket(&self.inner).await?;
        RelayInner::resubscribe_all(&self.inner).await;
        self.inner.emit(RelayEvent::Connect);
        tracing::debug!(relay = %self.inner.url, "connected");
        Ok(())
    }

    /// Tear everything down: cancels pending publishes with
    /// `Disconnected`, drains ordering buffers without invoking user
    /// callbacks, removes subscriptions and disables reconnect.
    pub async fn disconnect(&self) -> Result<()> {
        let inner = &self.inner;
        inner.reconnect_enabled.store(false, AtomicOrdering::SeqCst);
        *inner.status.write().unwrap() = ConnectionStatus::Closing;

        if let Some(handle) = inner.reader.lock().unwrap().take() {
            handle.abort();
        }

        if let Some(mut sink) = inner.ws_sink.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }

        inner.fail_pending_publishes();
        inner.pending_counts.lock().unwrap().clear();

        let subs: Vec<Arc<Subscription>> = {
            let mut map = inner.subscriptions.write().unwrap();
            map.drain().map(|(_, sub)| sub).collect()
        };
        for sub in subs {
            sub.shutdown();
        }

        *inner.status.write().unwrap() = ConnectionStatus::Disconnected;
        inner.emit(RelayEvent::Disconnect);
        tracing::debug!(relay = %inner.url, "disconnected");
        Ok(())
    }

    /// Publish with the default acknowledgement timeout.
    pub async fn publish(&self, event: Event) -> Result<OkOutcome> {
        self.publish_with_timeout(event, self.inner.options.publish_timeout)
            .await
    }

    /// Send `["EVENT", ...]` and await the matching OK frame. Concurrent
    /// publishes of the same event id share one wire send.
    pub async fn publish_with_timeout(&self, event: Event, timeout: Duration) -> Result<OkOutcome> {
        let id_hex = event.id.to_hex();
        let (tx, rx) = oneshot::channel();

        let first = {
            let mut pending = self.inner.pending_publishes.lock().unwrap();
            let waiters = pending.entry(id_hex.clone()).or_default();
            waiters.push(tx);
            waiters.len() == 1
        };

        if first {
            if let Err(e) = self.send_message(ClientMessage::Event(event)).await {
                self.inner.pending_publishes.lock().unwrap().remove(&id_hex);
                return Err(e);
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(_) => {
                self.inner.pending_publishes.lock().unwrap().remove(&id_hex);
                Err(Error::Timeout)
            }
        }
    }

    /// Open a subscription with a generated id.
    pub async fn subscribe(
        &self,
        filters: Vec<Filter>,
        on_event: EventCallback,
        on_eose: Option<EoseCallback>,
    ) -> Result<String> {
        let sub_id = generate_sub_id();
        self.subscribe_with_id(&sub_id, filters, on_event, on_eose, None)
            .await?;
        Ok(sub_id)
    }

    /// Open a subscription under a caller-chosen id (≤64 chars). A
    /// duplicate id replaces the prior subscription: the old one is
    /// cancelled and its buffer dropped.
    pub async fn subscribe_with_id(
        &self,
        sub_id: &str,
        filters: Vec<Filter>,
        on_event: EventCallback,
        on_eose: Option<EoseCallback>,
        on_closed: Option<ClosedCallback>,
    ) -> Result<()> {
        if sub_id.is_empty() || sub_id.len() > 64 {
            return Err(Error::invalid_input(
                "subscription id must be 1..=64 characters",
            ));
        }

        let sub = Arc::new(Subscription {
            id: sub_id.to_string(),
            filters,
            on_event,
            on_eose,
            on_closed,
            buffer: OrderingBuffer::new(self.inner.options.max_buffered_events),
            flush_gate: AsyncMutex::new(()),
            active: AtomicBool::new(true),
            flusher: StdMutex::new(None),
        });

        let previous = self
            .inner
            .subscriptions
            .write()
            .unwrap()
            .insert(sub_id.to_string(), sub.clone());
        if let Some(previous) = previous {
            tracing::debug!(relay = %self.inner.url, sub_id = %sub_id, "replacing subscription");
            previous.shutdown();
        }

        // Periodic flusher; EOSE flushes eagerly from the reader task.
        // Holds only a weak relay handle so an abandoned relay can drop.
        let flusher = tokio::spawn(flusher_loop(Arc::downgrade(&self.inner), sub.clone()));
        *sub.flusher.lock().unwrap() = Some(flusher);

        if self.status().is_connected() {
            let req = ClientMessage::Req {
                subscription_id: sub_id.to_string(),
                filters: sub.filters.clone(),
            };
            if let Err(e) = self.send_message(req).await {
                tracing::warn!(relay = %self.inner.url, sub_id = %sub_id, error = %e,
                    "REQ not sent, will retry on reconnect");
            }
        }
        Ok(())
    }

    pub async fn unsubscribe(&self, sub_id: &str) -> Result<()> {
        let removed = self.inner.subscriptions.write().unwrap().remove(sub_id);
        let Some(sub) = removed else {
            return Ok(());
        };
        sub.shutdown();
        if self.status().is_connected() {
            let _ = self
                .send_message(ClientMessage::Close {
                    subscription_id: sub_id.to_string(),
                })
                .await;
        }
        Ok(())
    }

    /// `["COUNT", ...]`, resolved by the relay's COUNT response. Relay
    /// support is optional; unsupporting relays time out.
    pub async fn count(&self, filters: Vec<Filter>, timeout: Duration) -> Result<u64> {
        let sub_id = generate_sub_id();
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending_counts
            .lock()
            .unwrap()
            .insert(sub_id.clone(), tx);

        let msg = ClientMessage::Count {
            subscription_id: sub_id.clone(),
            filters,
        };
        if let Err(e) = self.send_message(msg).await {
            self.inner.pending_counts.lock().unwrap().remove(&sub_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(count)) => Ok(count),
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(_) => {
                self.inner.pending_counts.lock().unwrap().remove(&sub_id);
                Err(Error::Timeout)
            }
        }
    }

    /// Respond to an AUTH challenge with a signed kind-22242 event.
    pub async fn authenticate(&self, keys: &Keys, challenge: &str) -> Result<()> {
        let event = build_auth_event(keys, &self.inner.url, challenge)?;
        self.send_message(ClientMessage::Auth(event)).await
    }

    pub(crate) async fn send_message(&self, message: ClientMessage) -> Result<()> {
        if !self.status().is_connected() {
            return Err(Error::Disconnected);
        }
        let json = message.to_json();

        let mut sink_guard = self.inner.ws_sink.lock().await;
        let sink = sink_guard.as_mut().ok_or(Error::Disconnected)?;
        if let Err(e) = sink.send(Message::Text(json)).await {
            tracing::error!(relay = %self.inner.url, error = %e, "send failed, marking disconnected");
            *sink_guard = None;
            *self.inner.status.write().unwrap() = ConnectionStatus::Disconnected;
            return Err(Error::Disconnected);
        }
        Ok(())
    }

    /// Inbound frame dispatch. Exposed within the crate so the routing
    /// logic is testable without a socket.
    pub(crate) async fn handle_frame(&self, text: &str) {
        RelayInner::handle_frame(&self.inner, text).await
    }
}

impl RelayInner {
    fn emit(&self, event: RelayEvent) {
        let _ = self.events_tx.send(event);
    }

    fn fail_pending_publishes(&self) {
        let waiters: Vec<PublishWaiter> = {
            let mut pending = self.pending_publishes.lock().unwrap();
            pending.drain().flat_map(|(_, w)| w).collect()
        };
        for waiter in waiters {
            let _ = waiter.send(Err(Error::Disconnected));
        }
    }

    /// Dial the socket and start the reader task.
    fn open_socket<'a>(
        inner: &'a Arc<RelayInner>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            *inner.status.write().unwrap() = ConnectionStatus::Connecting;

            let connected = tokio::time::timeout(
                inner.options.connection_timeout,
                connect_async(inner.url.as_str()),
            )
            .await;
            let stream = match connected {
                Ok(Ok((stream, _response))) => stream,
                Ok(Err(e)) => {
                    *inner.status.write().unwrap() = ConnectionStatus::Disconnected;
                    tracing::error!(relay = %inner.url, error = %e, "connect failed");
                    return Err(Error::Disconnected);
                }
                Err(_) => {
                    *inner.status.write().unwrap() = ConnectionStatus::Disconnected;
                    tracing::error!(relay = %inner.url, "connect timed out");
                    return Err(Error::Timeout);
                }
            };

            let (sink, stream) = stream.split();
            *inner.ws_sink.lock().await = Some(sink);

            let reader = tokio::spawn(reader_loop(inner.clone(), stream));
            if let Some(old) = inner.reader.lock().unwrap().replace(reader) {
                old.abort();
            }

            *inner.status.write().unwrap() = ConnectionStatus::Connected;
            Ok(())
        })
    }

    /// Replay REQ frames for every live subscription, with their
    /// original ids.
    async fn resubscribe_all(inner: &Arc<RelayInner>) {
        let messages: Vec<ClientMessage> = {
            let subs = inner.subscriptions.read().unwrap();
            subs.values()
                .map(|sub| ClientMessage::Req {
                    subscription_id: sub.id.clone(),
                    filters: sub.filters.clone(),
                })
                .collect()
        };
        for message in messages {
            let json = message.to_json();
            let mut sink_guard = inner.ws_sink.lock().await;
            if let Some(sink) = sink_guard.as_mut() {
                if let Err(e) = sink.send(Message::Text(json)).await {
                    tracing::warn!(relay = %inner.url, error = %e, "resubscribe send failed");
                    break;
                }
            }
        }
    }

    async fn handle_frame(inner: &Arc<RelayInner>, text: &str) {
        let Some(parts) = extract_frame(text) else {
            tracing::warn!(relay = %inner.url, "malformed frame");
            return;
        };
        let Some(kind_raw) = parts[0] else {
            return;
        };

        match unquote(kind_raw) {
            "EVENT" => {
                let Some(sub_id) = parts[1].map(unquote) else {
                    return;
                };
                let Some(event_json) = parts[2] else { return };
                let sub = inner
                    .subscriptions
                    .read()
                    .unwrap()
                    .get(sub_id)
                    .cloned();
                let Some(sub) = sub else {
                    tracing::debug!(relay = %inner.url, sub_id = %sub_id, "event for unknown subscription");
                    return;
                };
                let event = match Event::from_json(event_json) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(relay = %inner.url, error = %e, "unparseable event");
                        return;
                    }
                };
                if let Err(e) = event.validate_structure(&inner.options.validation) {
                    tracing::debug!(relay = %inner.url, error = %e, "dropping structurally invalid event");
                    return;
                }
                if sub.buffer.push(event) {
                    // Buffer is at capacity; flush ahead of the timer.
                    flush_subscription(inner, &sub).await;
                }
            }
            "EOSE" => {
                let Some(sub_id) = parts[1].map(unquote) else {
                    return;
                };
                let sub = inner
                    .subscriptions
                    .read()
                    .unwrap()
                    .get(sub_id)
                    .cloned();
                if let Some(sub) = sub {
                    flush_subscription(inner, &sub).await;
                    if let Some(on_eose) = &sub.on_eose {
                        on_eose();
                    }
                }
            }
            "OK" => {
                let Some(event_id) = parts[1].map(unquote) else {
                    return;
                };
                let accepted = parts[2] == Some("true");
                let message = parts[3].map(unquote).unwrap_or_default().to_string();
                let outcome = OkOutcome {
                    accepted,
                    message: message.clone(),
                };
                let waiters = inner
                    .pending_publishes
                    .lock()
                    .unwrap()
                    .remove(event_id)
                    .unwrap_or_default();
                for waiter in waiters {
                    let _ = waiter.send(Ok(outcome.clone()));
                }
                inner.emit(RelayEvent::Ok {
                    event_id: event_id.to_string(),
                    accepted,
                    message,
                });
            }
            "NOTICE" => {
                let message = parts[1].map(unquote).unwrap_or_default().to_string();
                tracing::debug!(relay = %inner.url, notice = %message, "NOTICE");
                inner.emit(RelayEvent::Notice(message));
            }
            "CLOSED" => {
                let Some(sub_id) = parts[1].map(unquote) else {
                    return;
                };
                let message = parts[2].map(unquote).unwrap_or_default().to_string();
                let removed = inner.subscriptions.write().unwrap().remove(sub_id);
                if let Some(sub) = removed {
                    sub.shutdown();
                    if let Some(on_closed) = &sub.on_closed {
                        on_closed(message.clone());
                    }
                }
                inner.emit(RelayEvent::Closed {
                    subscription_id: sub_id.to_string(),
                    message,
                });
            }
            "AUTH" => {
                let challenge = parts[1].map(unquote).unwrap_or_default().to_string();
                inner.emit(RelayEvent::Auth { challenge });
            }
            "COUNT" => {
                let Some(sub_id) = parts[1].map(unquote) else {
                    return;
                };
                let count = parts[2]
                    .and_then(|payload| serde_json::from_str::<serde_json::Value>(payload).ok())
                    .and_then(|v| v.get("count").and_then(|c| c.as_u64()));
                if let Some(count) = count {
                    if let Some(waiter) = inner.pending_counts.lock().unwrap().remove(sub_id) {
                        let _ = waiter.send(count);
                    }
                    inner.emit(RelayEvent::Count {
                        subscription_id: sub_id.to_string(),
                        count,
                    });
                }
            }
            other => {
                tracing::warn!(relay = %inner.url, kind = %other, "unknown frame kind");
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms: u64 = 1000;
        let cap_ms = self.options.max_reconnect_delay.as_millis() as u64;
        let exp = base_ms.saturating_mul(1u64 << (attempt - 1).min(16));
        let delay_ms = exp.min(cap_ms);
        // jitter to 75%..125%
        let mut byte = [0u8; 1];
        let _ = getrandom::getrandom(&mut byte);
        let jittered = delay_ms * (192 + (byte[0] as u64 % 128)) / 256;
        Duration::from_millis(jittered.max(1))
    }
}

/// Deliver everything parked in the buffer, in protocol order.
/// Cryptographic verification happens here, off the reader's hot path;
/// events that fail are dropped and never reach the callback.
async fn flush_subscription(inner: &Arc<RelayInner>, sub: &Arc<Subscription>) {
    let _gate = sub.flush_gate.lock().await;
    if !sub.active.load(AtomicOrdering::SeqCst) {
        return;
    }
    for event in sub.buffer.drain_sorted() {
        if let Err(e) = event.validate_crypto() {
            tracing::warn!(relay = %inner.url, id = %event.id, error = %e,
                "dropping event failing cryptographic verification");
            continue;
        }
        inner.index.observe(&event);
        (sub.on_event)(event);
    }
}

async fn flusher_loop(inner: Weak<RelayInner>, sub: Arc<Subscription>) {
    loop {
        let delay = match inner.upgrade() {
            Some(inner) => inner.options.buffer_flush_delay,
            None => return,
        };
        tokio::time::sleep(delay).await;
        if !sub.active.load(AtomicOrdering::SeqCst) {
            return;
        }
        let Some(inner) = inner.upgrade() else { return };
        if !sub.buffer.is_empty() {
            flush_subscription(&inner, &sub).await;
        }
    }
}

async fn reader_loop(inner: Arc<RelayInner>, mut stream: SplitStream<WsStream>) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => RelayInner::handle_frame(&inner, &text).await,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                tracing::warn!(relay = %inner.url, "unexpected binary message");
            }
            Err(e) => {
                tracing::error!(relay = %inner.url, error = %e, "websocket error");
                break;
            }
        }
    }
    on_stream_end(inner).await;
}

async fn on_stream_end(inner: Arc<RelayInner>) {
    {
        let status = *inner.status.read().unwrap();
        if matches!(
            status,
            ConnectionStatus::Closing | ConnectionStatus::Disconnected
        ) {
            // Deliberate disconnect already handled teardown.
            return;
        }
    }

    tracing::warn!(relay = %inner.url, "connection lost");
    *inner.status.write().unwrap() = ConnectionStatus::Disconnected;
    *inner.ws_sink.lock().await = None;
    inner.fail_pending_publishes();
    inner.emit(RelayEvent::Disconnect);

    if inner.reconnect_enabled.load(AtomicOrdering::SeqCst) {
        tokio::spawn(reconnect_loop(inner));
    }
}

/// Exponential backoff with jitter; gives up after
/// `max_reconnect_attempts`. Pending publishes are never resent, but all
/// live subscriptions are re-issued with their original ids.
async fn reconnect_loop(inner: Arc<RelayInner>) {
    for attempt in 1..=inner.options.max_reconnect_attempts {
        tokio::time::sleep(inner.backoff_delay(attempt)).await;
        if !inner.reconnect_enabled.load(AtomicOrdering::SeqCst) {
            return;
        }
        tracing::debug!(relay = %inner.url, attempt, "reconnecting");
        match RelayInner::open_socket(&inner).await {
            Ok(()) => {
                RelayInner::resubscribe_all(&inner).await;
                inner.emit(RelayEvent::Connect);
                tracing::debug!(relay = %inner.url, attempt, "reconnected");
                return;
            }
            Err(e) => {
                tracing::warn!(relay = %inner.url, attempt, error = %e, "reconnect attempt failed");
            }
        }
    }
    inner.emit(RelayEvent::Error("reconnect attempts exhausted".into()));
    tracing::error!(relay = %inner.url, "reconnect attempts exhausted");
}

fn generate_sub_id() -> String {
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes).expect("OS randomness unavailable");
    format!("sub-{}", hex::encode(bytes))
}

#[cfg(test)]
impl Relay {
    /// The REQ frames a reconnect would replay.
    pub(crate) fn resubscribe_messages(&self) -> Vec<ClientMessage> {
        self.inner
            .subscriptions
            .read()
            .unwrap()
            .values()
            .map(|sub| ClientMessage::Req {
                subscription_id: sub.id.clone(),
                filters: sub.filters.clone(),
            })
            .collect()
    }

    /// Register a publish waiter without touching the wire, for tests of
    /// OK-frame correlation.
    pub(crate) fn test_register_publish(
        &self,
        id_hex: &str,
    ) -> oneshot::Receiver<Result<OkOutcome>> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending_publishes
            .lock()
            .unwrap()
            .entry(id_hex.to_string())
            .or_default()
            .push(tx);
        rx
    }

    pub(crate) fn test_fail_pending(&self) {
        self.inner.fail_pending_publishes();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::{timestamp_now, Keys, UnsignedEvent};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    fn relay() -> Relay {
        crate::test_util::setup_tracing();
        let mut options = RelayOptions::default();
        options.buffer_flush_delay = Duration::from_millis(10);
        Relay::with_options("wss://relay.example.com", options).unwrap()
    }

    fn signed_event(keys: &Keys, created_at: u64, content: &str) -> Event {
        UnsignedEvent {
            pubkey: keys.public_key(),
            created_at,
            kind: 1,
            tags: vec![],
            content: content.to_string(),
        }
        .sign(keys)
        .unwrap()
    }

    #[test]
    fn url_is_normalized_on_construction() {
        let relay = Relay::new("relay.example.com").unwrap();
        assert_eq!(relay.url(), "wss://relay.example.com");
        assert!(Relay::new("http://nope.example").is_err());
    }

    #[tokio::test]
    async fn ok_frame_resolves_matching_publish_only() {
        let relay = relay();
        let rx_match = relay.test_register_publish("aaaa");
        let rx_other = relay.test_register_publish("bbbb");

        relay
            .handle_frame(r#"["OK","aaaa",true,"stored"]"#)
            .await;

        let outcome = rx_match.await.unwrap().unwrap();
        assert!(outcome.accepted);
        assert_eq!(outcome.message, "stored");

        // The unrelated publish is still pending.
        let mut rx_other = rx_other;
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn concurrent_publishes_of_same_id_share_the_ack() {
        let relay = relay();
        let rx_a = relay.test_register_publish("cccc");
        let rx_b = relay.test_register_publish("cccc");

        relay.handle_frame(r#"["OK","cccc",false,"blocked"]"#).await;

        for rx in [rx_a, rx_b] {
            let outcome = rx.await.unwrap().unwrap();
            assert!(!outcome.accepted);
            assert_eq!(outcome.message, "blocked");
        }
    }

    #[tokio::test]
    async fn disconnect_fails_pending_publishes() {
        let relay = relay();
        let rx = relay.test_register_publish("dddd");
        relay.test_fail_pending();
        assert!(matches!(rx.await.unwrap(), Err(Error::Disconnected)));
    }

    #[tokio::test]
    async fn eose_flushes_sorted_then_signals() {
        let relay = relay();
        let keys = Keys::generate();
        let now = timestamp_now();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (eose_tx, mut eose_rx) = mpsc::unbounded_channel();
        let tx2 = tx.clone();
        relay
            .subscribe_with_id(
                "sub-test",
                vec![Filter::new().kind(1)],
                Arc::new(move |event: Event| {
                    let _ = tx2.send(event.content.clone());
                }),
                Some(Arc::new(move || {
                    let _ = eose_tx.send(());
                })),
                None,
            )
            .await
            .unwrap();

        let e_old = signed_event(&keys, now - 30, "old");
        let e_new = signed_event(&keys, now - 10, "new");
        let e_mid = signed_event(&keys, now - 20, "mid");

        for event in [&e_old, &e_new, &e_mid] {
            let frame = format!(r#"["EVENT","sub-test",{}]"#, event.as_json());
            relay.handle_frame(&frame).await;
        }
        relay.handle_frame(r#"["EOSE","sub-test"]"#).await;

        // All three delivered newest-first, then EOSE.
        assert_eq!(rx.recv().await.unwrap(), "new");
        assert_eq!(rx.recv().await.unwrap(), "mid");
        assert_eq!(rx.recv().await.unwrap(), "old");
        eose_rx.recv().await.unwrap();
        drop(tx);
    }

    #[tokio::test]
    async fn equal_timestamps_deliver_in_id_order() {
        let relay = relay();
        let keys = Keys::generate();
        let now = timestamp_now();

        let a = signed_event(&keys, now - 5, "a");
        let b = signed_event(&keys, now - 5, "b");
        let mut expected = vec![a.clone(), b.clone()];
        expected.sort_by(|x, y| x.id.cmp(&y.id));

        let (tx, mut rx) = mpsc::unbounded_channel();
        relay
            .subscribe_with_id(
                "sub-tie",
                vec![],
                Arc::new(move |event: Event| {
                    let _ = tx.send(event.id);
                }),
                None,
                None,
            )
            .await
            .unwrap();

        for event in [&b, &a] {
            let frame = format!(r#"["EVENT","sub-tie",{}]"#, event.as_json());
            relay.handle_frame(&frame).await;
        }
        relay.handle_frame(r#"["EOSE","sub-tie"]"#).await;

        assert_eq!(rx.recv().await.unwrap(), expected[0].id);
        assert_eq!(rx.recv().await.unwrap(), expected[1].id);
    }

    #[tokio::test]
    async fn invalid_events_are_dropped_before_delivery() {
        let relay = relay();
        let keys = Keys::generate();
        let now = timestamp_now();

        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();
        relay
            .subscribe_with_id(
                "sub-bad",
                vec![],
                Arc::new(move |event: Event| {
                    sink.lock().unwrap().push(event.content.clone());
                }),
                None,
                None,
            )
            .await
            .unwrap();

        // Valid event.
        let good = signed_event(&keys, now - 1, "good");
        // Tampered content: structural checks pass, crypto fails.
        let mut forged = signed_event(&keys, now - 2, "original");
        forged.content = "forged".to_string();
        // Future-dated: dropped at the structural stage.
        let future = signed_event(&keys, now + 100_000, "future");

        for event in [&good, &forged, &future] {
            let frame = format!(r#"["EVENT","sub-bad",{}]"#, event.as_json());
            relay.handle_frame(&frame).await;
        }
        relay.handle_frame(r#"["EOSE","sub-bad"]"#).await;

        assert_eq!(&*delivered.lock().unwrap(), &["good".to_string()]);
    }

    #[tokio::test]
    async fn closed_frame_removes_subscription_permanently() {
        let relay = relay();
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
        relay
            .subscribe_with_id(
                "sub-closed",
                vec![],
                Arc::new(|_| {}),
                None,
                Some(Arc::new(move |msg: String| {
                    let _ = closed_tx.send(msg);
                })),
            )
            .await
            .unwrap();

        relay
            .handle_frame(r#"["CLOSED","sub-closed","auth-required: do it"]"#)
            .await;

        assert_eq!(closed_rx.recv().await.unwrap(), "auth-required: do it");
        assert!(relay.subscription_ids().is_empty());
        // Nothing left for a reconnect to replay.
        assert!(relay.resubscribe_messages().is_empty());
    }

    #[tokio::test]
    async fn duplicate_sub_id_replaces_the_first() {
        let relay = relay();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let keys = Keys::generate();

        relay
            .subscribe_with_id(
                "dup",
                vec![],
                Arc::new(move |e: Event| {
                    let _ = tx1.send(e.content.clone());
                }),
                None,
                None,
            )
            .await
            .unwrap();
        relay
            .subscribe_with_id(
                "dup",
                vec![],
                Arc::new(move |e: Event| {
                    let _ = tx2.send(e.content.clone());
                }),
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(relay.subscription_ids(), vec!["dup".to_string()]);

        let event = signed_event(&keys, timestamp_now() - 1, "for the second");
        let frame = format!(r#"["EVENT","dup",{}]"#, event.as_json());
        relay.handle_frame(&frame).await;
        relay.handle_frame(r#"["EOSE","dup"]"#).await;

        assert_eq!(rx2.recv().await.unwrap(), "for the second");
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn resubscribe_messages_cover_live_subscriptions() {
        let relay = relay();
        relay
            .subscribe_with_id("keep-1", vec![Filter::new().kind(1)], Arc::new(|_| {}), None, None)
            .await
            .unwrap();
        relay
            .subscribe_with_id("keep-2", vec![], Arc::new(|_| {}), None, None)
            .await
            .unwrap();

        let mut ids: Vec<String> = relay
            .resubscribe_messages()
            .into_iter()
            .map(|msg| match msg {
                ClientMessage::Req {
                    subscription_id, ..
                } => subscription_id,
                other => panic!("unexpected message {other:?}"),
            })
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["keep-1".to_string(), "keep-2".to_string()]);
    }

    #[tokio::test]
    async fn notice_and_auth_are_emitted() {
        let relay = relay();
        let mut events = relay.events();

        relay.handle_frame(r#"["NOTICE","slow down"]"#).await;
        relay.handle_frame(r#"["AUTH","challenge-77"]"#).await;

        match events.recv().await.unwrap() {
            RelayEvent::Notice(msg) => assert_eq!(msg, "slow down"),
            other => panic!("unexpected {other:?}"),
        }
        match events.recv().await.unwrap() {
            RelayEvent::Auth { challenge } => assert_eq!(challenge, "challenge-77"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn count_response_resolves_waiter() {
        let relay = relay();
        let (tx, rx) = oneshot::channel();
        relay
            .inner
            .pending_counts
            .lock()
            .unwrap()
            .insert("cnt-1".to_string(), tx);

        relay.handle_frame(r#"["COUNT","cnt-1",{"count":42}]"#).await;
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn timer_flush_delivers_without_eose() {
        let relay = relay();
        let keys = Keys::generate();
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay
            .subscribe_with_id(
                "live",
                vec![],
                Arc::new(move |e: Event| {
                    let _ = tx.send(e.content.clone());
                }),
                None,
                None,
            )
            .await
            .unwrap();

        let event = signed_event(&keys, timestamp_now() - 1, "live-event");
        let frame = format!(r#"["EVENT","live",{}]"#, event.as_json());
        relay.handle_frame(&frame).await;

        // No EOSE: the periodic flusher must deliver on its own.
        let received =
            tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert_eq!(received.unwrap().unwrap(), "live-event");
    }

    #[tokio::test]
    async fn sub_id_length_is_validated() {
        let relay = relay();
        let long = "x".repeat(65);
        assert!(relay
            .subscribe_with_id(&long, vec![], Arc::new(|_| {}), None, None)
            .await
            .is_err());
        assert!(relay
            .subscribe_with_id("", vec![], Arc::new(|_| {}), None, None)
            .await
            .is_err());
    }
}
