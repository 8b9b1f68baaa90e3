//! NIP-46 client: the application side of a remote-signing session.
//!
//! Sends encrypted kind-24133 requests to the bunker's signer pubkey and
//! correlates encrypted responses by request id. The pubkey returned by
//! `get_public_key` (the user key) is the one application events are
//! signed under; it may differ from the signer pubkey in the bunker URI.

use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::nips::nip46::rpc::{
    Request, Response, METHOD_CONNECT, METHOD_GET_PUBLIC_KEY, METHOD_NIP04_DECRYPT,
    METHOD_NIP04_ENCRYPT, METHOD_NIP44_DECRYPT, METHOD_NIP44_ENCRYPT, METHOD_PING,
    METHOD_SIGN_EVENT,
};
use crate::nips::nip46::uri::BunkerUri;
use crate::nips::nip46::{decrypt_content, encrypt_content, validate_auth_url};
use crate::relays::pool::{PoolSubscription, RelayPool};
use crate::relays::types::{EventCallback, RelayOptions};
use crate::signer::Signer;
use crate::types::event::{
    timestamp_now, Event, Keys, PublicKey, Template, NOSTR_CONNECT,
};
use crate::types::filter::Filter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreferredEncryption {
    Nip04,
    #[default]
    Nip44,
}

#[derive(Debug, Clone)]
pub struct Nip46ClientOptions {
    /// Deadline for each request/response exchange.
    pub timeout: Duration,
    pub preferred_encryption: PreferredEncryption,
    /// When set, auth_url domains outside this list are rejected.
    pub auth_domain_whitelist: Option<Vec<String>>,
    pub relay_options: RelayOptions,
}

impl Default for Nip46ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10_000),
            preferred_encryption: PreferredEncryption::default(),
            auth_domain_whitelist: None,
            relay_options: RelayOptions::default(),
        }
    }
}

type AuthUrlCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Everything the inbound response path needs, shared with the pool
/// subscription callback.
struct ResponderState {
    client_keys: Keys,
    signer_pubkey: PublicKey,
    pending: StdMutex<FxHashMap<String, oneshot::Sender<Result<String>>>>,
    auth_callback: StdRwLock<Option<AuthUrlCallback>>,
    auth_domain_whitelist: Option<Vec<String>>,
}

impl ResponderState {
    fn ingest(&self, event: &Event) {
        if event.kind != NOSTR_CONNECT {
            return;
        }
        if event.pubkey != self.signer_pubkey {
            tracing::debug!(sender = %event.pubkey, "ignoring kind-24133 event from unknown sender");
            return;
        }
        let plaintext = match decrypt_content(&self.client_keys, &event.pubkey, &event.content) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::warn!(error = %e, "failed to decrypt NIP-46 response");
                return;
            }
        };
        let response = match Response::from_json(&plaintext) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable NIP-46 response");
                return;
            }
        };

        if response.is_auth_url() {
            let url = response.error.unwrap_or_default();
            match validate_auth_url(&url, self.auth_domain_whitelist.as_deref()) {
                Ok(()) => {
                    tracing::debug!(url = %url, "bunker requests authorization");
                    if let Some(callback) = self.auth_callback.read().unwrap().as_ref() {
                        // The request stays pending; the real response
                        // follows once authorization completes.
                        callback(url);
                        return;
                    }
                    // No handler to open the URL: the call cannot
                    // proceed, fail it now.
                    if let Some(waiter) = self.pending.lock().unwrap().remove(&response.id) {
                        let _ = waiter.send(Err(Error::AuthRequired(url)));
                    }
                }
                Err(e) => tracing::warn!(error = %e, "rejected auth url"),
            }
            return;
        }

        let waiter = self.pending.lock().unwrap().remove(&response.id);
        let Some(waiter) = waiter else {
            tracing::debug!(id = %response.id, "response for unknown request id");
            return;
        };
        let outcome = match (response.result, response.error) {
            (_, Some(error)) => {
                if error.starts_with("unauthorized") {
                    Err(Error::Permission(error))
                } else {
                    Err(Error::Rejected { reason: error })
                }
            }
            (Some(result), None) => Ok(result),
            (None, None) => Err(Error::Rejected {
                reason: "empty response".to_string(),
            }),
        };
        let _ = waiter.send(outcome);
    }
}

pub struct Nip46Client {
    pool: Arc<RelayPool>,
    state: Arc<ResponderState>,
    user_pubkey: StdRwLock<Option<PublicKey>>,
    relays: Vec<String>,
    secret: Option<String>,
    options: Nip46ClientOptions,
    subscription: StdMutex<Option<PoolSubscription>>,
}

impl Nip46Client {
    /// Build a session from a bunker URI without touching the network.
    /// Most callers want [`Nip46Client::connect`] instead.
    pub fn new(uri: &BunkerUri, client_keys: Keys, options: Nip46ClientOptions) -> Result<Self> {
        if uri.relays.is_empty() {
            return Err(Error::invalid_input("bunker URI names no relays"));
        }
        let pool = Arc::new(RelayPool::with_options(options.relay_options.clone()));
        let state = Arc::new(ResponderState {
            client_keys,
            signer_pubkey: uri.signer_pubkey,
            pending: StdMutex::new(FxHashMap::default()),
            auth_callback: StdRwLock::new(None),
            auth_domain_whitelist: options.auth_domain_whitelist.clone(),
        });
        Ok(Self {
            pool,
            state,
            user_pubkey: StdRwLock::new(None),
            relays: uri.relays.clone(),
            secret: uri.secret.clone(),
            options,
            subscription: StdMutex::new(None),
        })
    }

    /// Full session establishment: fresh communication keys, response
    /// subscription, then the `connect` RPC (with the URI's secret when
    /// present).
    pub async fn connect(uri: &BunkerUri, options: Nip46ClientOptions) -> Result<Self> {
        let client = Self::new(uri, Keys::generate(), options)?;
        client.start().await?;

        let mut params = vec![client.state.signer_pubkey.to_hex()];
        if let Some(secret) = &client.secret {
            params.push(secret.clone());
        }
        let result = client.request(METHOD_CONNECT, params).await?;
        if result != "ack" && client.secret.as_deref() != Some(result.as_str()) {
            return Err(Error::Rejected {
                reason: format!("unexpected connect result: {result}"),
            });
        }
        Ok(client)
    }

    /// Open the response subscription on the session relays.
    pub async fn start(&self) -> Result<()> {
        let filter = Filter::new()
            .kind(NOSTR_CONNECT)
            .tag('p', vec![self.state.client_keys.public_key().to_hex()])?;
        let state = self.state.clone();
        let handler: EventCallback = Arc::new(move |event: Event| {
            state.ingest(&event);
        });
        let subscription = self
            .pool
            .subscribe(&self.relays, vec![filter], handler, None)
            .await?;
        *self.subscription.lock().unwrap() = Some(subscription);
        Ok(())
    }

    /// Register a handler for bunker authorization URLs. The URL has
    /// already passed [`validate_auth_url`].
    pub fn on_auth_url(&self, callback: AuthUrlCallback) {
        *self.state.auth_callback.write().unwrap() = Some(callback);
    }

    /// The pubkey of the communication (session) key.
    pub fn client_pubkey(&self) -> PublicKey {
        self.state.client_keys.public_key()
    }

    pub fn signer_pubkey(&self) -> PublicKey {
        self.state.signer_pubkey
    }

    /// The user pubkey, fetched once from the bunker and cached.
    pub async fn get_public_key(&self) -> Result<PublicKey> {
        if let Some(cached) = *self.user_pubkey.read().unwrap() {
            return Ok(cached);
        }
        let result = self.request(METHOD_GET_PUBLIC_KEY, vec![]).await?;
        let pubkey = PublicKey::from_hex(&result)?;
        *self.user_pubkey.write().unwrap() = Some(pubkey);
        Ok(pubkey)
    }

    /// Remote-sign a template. The returned event must verify and must
    /// be signed by the user key.
    pub async fn sign_event(&self, template: Template) -> Result<Event> {
        let user_pubkey = self.get_public_key().await?;
        let unsigned = serde_json::json!({
            "pubkey": user_pubkey.to_hex(),
            "created_at": timestamp_now(),
            "kind": template.kind,
            "tags": template.tags,
            "content": template.content,
        })
        .to_string();
        let result = self.request(METHOD_SIGN_EVENT, vec![unsigned]).await?;
        let event = Event::from_json(&result)?;
        event.verify()?;
        if event.pubkey != user_pubkey {
            return Err(Error::invalid_event("bunker signed with unexpected key"));
        }
        Ok(event)
    }

    pub async fn ping(&self) -> Result<()> {
        let result = self.request(METHOD_PING, vec![]).await?;
        if result == "pong" {
            Ok(())
        } else {
            Err(Error::Rejected {
                reason: format!("unexpected ping result: {result}"),
            })
        }
    }

    pub async fn nip04_encrypt(&self, third_party: &PublicKey, plaintext: &str) -> Result<String> {
        self.request(
            METHOD_NIP04_ENCRYPT,
            vec![third_party.to_hex(), plaintext.to_string()],
        )
        .await
    }

    pub async fn nip04_decrypt(&self, third_party: &PublicKey, ciphertext: &str) -> Result<String> {
        self.request(
            METHOD_NIP04_DECRYPT,
            vec![third_party.to_hex(), ciphertext.to_string()],
        )
        .await
    }

    pub async fn nip44_encrypt(&self, third_party: &PublicKey, plaintext: &str) -> Result<String> {
        self.request(
            METHOD_NIP44_ENCRYPT,
            vec![third_party.to_hex(), plaintext.to_string()],
        )
        .await
    }

    pub async fn nip44_decrypt(&self, third_party: &PublicKey, payload: &str) -> Result<String> {
        self.request(
            METHOD_NIP44_DECRYPT,
            vec![third_party.to_hex(), payload.to_string()],
        )
        .await
    }

    /// Close the response subscription and the session's relay pool.
    pub async fn disconnect(&self) {
        let subscription = self.subscription.lock().unwrap().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe().await;
        }
        self.pool.close(None).await;
    }

    async fn request(&self, method: &str, params: Vec<String>) -> Result<String> {
        let request = Request::new(method, params);
        let rx = self.register_pending(&request.id);
        let event = self.build_request_event(&request)?;

        let outcomes = self.pool.publish(&self.relays, event).await?;
        if outcomes.values().all(|outcome| outcome.is_err()) {
            self.state.pending.lock().unwrap().remove(&request.id);
            return Err(Error::Disconnected);
        }

        match tokio::time::timeout(self.options.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(_) => {
                self.state.pending.lock().unwrap().remove(&request.id);
                Err(Error::Timeout)
            }
        }
    }

    pub(crate) fn register_pending(&self, id: &str) -> oneshot::Receiver<Result<String>> {
        let (tx, rx) = oneshot::channel();
        self.state
            .pending
            .lock()
            .unwrap()
            .insert(id.to_string(), tx);
        rx
    }

    /// Encrypt and sign one request as a kind-24133 event.
    pub(crate) fn build_request_event(&self, request: &Request) -> Result<Event> {
        let use_nip04 = self.options.preferred_encryption == PreferredEncryption::Nip04;
        let content = encrypt_content(
            &self.state.client_keys,
            &self.state.signer_pubkey,
            &request.as_json(),
            use_nip04,
        )?;
        Template::new(
            NOSTR_CONNECT,
            content,
            vec![vec!["p".to_string(), self.state.signer_pubkey.to_hex()]],
        )
        .to_event(&self.state.client_keys)
    }

    /// Feed one inbound kind-24133 event through the response path.
    pub(crate) fn ingest_response_event(&self, event: &Event) {
        self.state.ingest(event);
    }
}

#[async_trait]
impl Signer for Nip46Client {
    async fn public_key(&self) -> Result<PublicKey> {
        self.get_public_key().await
    }

    async fn sign_event(&self, template: Template) -> Result<Event> {
        Nip46Client::sign_event(self, template).await
    }

    async fn nip04_encrypt(&self, peer: &PublicKey, plaintext: &str) -> Result<String> {
        Nip46Client::nip04_encrypt(self, peer, plaintext).await
    }

    async fn nip04_decrypt(&self, peer: &PublicKey, ciphertext: &str) -> Result<String> {
        Nip46Client::nip04_decrypt(self, peer, ciphertext).await
    }

    async fn nip44_encrypt(&self, peer: &PublicKey, plaintext: &str) -> Result<String> {
        Nip46Client::nip44_encrypt(self, peer, plaintext).await
    }

    async fn nip44_decrypt(&self, peer: &PublicKey, payload: &str) -> Result<String> {
        Nip46Client::nip44_decrypt(self, peer, payload).await
    }
}
