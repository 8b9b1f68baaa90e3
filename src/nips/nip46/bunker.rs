//! NIP-46 bunker: the key-holding side of a remote-signing session.
//!
//! Holds two keypairs: the signer keys (communication identity, the
//! pubkey in the bunker URI) and the user keys (the identity that signs
//! application events). Sessions move from unknown to connected on a
//! valid `connect`; every method except `connect`, `ping` and
//! `get_public_key` requires a connected session whose permission set
//! allows it.

use std::sync::{Arc, Mutex as StdMutex};

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::nips::nip04;
use crate::nips::nip46::rpc::{
    Request, Response, METHOD_CONNECT, METHOD_GET_PUBLIC_KEY, METHOD_NIP04_DECRYPT,
    METHOD_NIP04_ENCRYPT, METHOD_NIP44_DECRYPT, METHOD_NIP44_ENCRYPT, METHOD_PING,
    METHOD_SIGN_EVENT,
};
use crate::nips::nip46::uri::BunkerUri;
use crate::nips::nip46::{decrypt_content, encrypt_content};
use crate::relays::pool::{PoolSubscription, RelayPool};
use crate::relays::types::{EventCallback, RelayOptions};
use crate::types::event::{
    timestamp_now, Event, Keys, Kind, PublicKey, Template, UnsignedEvent, NOSTR_CONNECT,
};
use crate::types::filter::Filter;

#[derive(Debug, Clone)]
pub struct Nip46BunkerOptions {
    /// Shared secret clients must present in `connect`.
    pub secret: Option<String>,
    /// The permission set granted to connecting clients. A client may
    /// request fewer permissions; it can never obtain more.
    pub default_permissions: Vec<String>,
    pub relay_options: RelayOptions,
}

impl Default for Nip46BunkerOptions {
    fn default() -> Self {
        Self {
            secret: None,
            default_permissions: vec![
                METHOD_SIGN_EVENT.to_string(),
                METHOD_NIP04_ENCRYPT.to_string(),
                METHOD_NIP04_DECRYPT.to_string(),
                METHOD_NIP44_ENCRYPT.to_string(),
                METHOD_NIP44_DECRYPT.to_string(),
            ],
            relay_options: RelayOptions::default(),
        }
    }
}

struct Session {
    permissions: Vec<String>,
}

/// Whether `permissions` covers `method`, and for signing, the kind.
fn permission_granted(permissions: &[String], method: &str, kind: Option<Kind>) -> bool {
    if method == METHOD_SIGN_EVENT {
        permissions.iter().any(|perm| {
            perm == METHOD_SIGN_EVENT
                || kind.is_some_and(|kind| perm == &format!("{METHOD_SIGN_EVENT}:{kind}"))
        })
    } else {
        permissions.iter().any(|perm| perm == method)
    }
}

pub struct Nip46Bunker {
    signer_keys: Keys,
    user_keys: Keys,
    relays: Vec<String>,
    pool: Arc<RelayPool>,
    sessions: StdMutex<FxHashMap<PublicKey, Session>>,
    options: Nip46BunkerOptions,
    subscription: StdMutex<Option<PoolSubscription>>,
}

impl Nip46Bunker {
    pub fn new(
        signer_keys: Keys,
        user_keys: Keys,
        relays: Vec<String>,
        options: Nip46BunkerOptions,
    ) -> Self {
        let pool = Arc::new(RelayPool::with_options(options.relay_options.clone()));
        Self {
            signer_keys,
            user_keys,
            relays,
            pool,
            sessions: StdMutex::new(FxHashMap::default()),
            options,
            subscription: StdMutex::new(None),
        }
    }

    /// The URI clients use to reach this bunker.
    pub fn bunker_uri(&self) -> BunkerUri {
        BunkerUri {
            signer_pubkey: self.signer_keys.public_key(),
            relays: self.relays.clone(),
            secret: self.options.secret.clone(),
        }
    }

    pub fn signer_pubkey(&self) -> PublicKey {
        self.signer_keys.public_key()
    }

    pub fn user_pubkey(&self) -> PublicKey {
        self.user_keys.public_key()
    }

    /// Subscribe for requests on the configured relays and serve them
    /// until [`Nip46Bunker::stop`].
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let filter = Filter::new()
            .kind(NOSTR_CONNECT)
            .tag('p', vec![self.signer_keys.public_key().to_hex()])?;
        let bunker = self.clone();
        let handler: EventCallback = Arc::new(move |event: Event| {
            let bunker = bunker.clone();
            tokio::spawn(async move {
                bunker.serve_request_event(&event).await;
            });
        });
        let subscription = self
            .pool
            .subscribe(&self.relays, vec![filter], handler, None)
            .await?;
        *self.subscription.lock().unwrap() = Some(subscription);
        Ok(())
    }

    pub async fn stop(&self) {
        let subscription = self.subscription.lock().unwrap().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe().await;
        }
        self.pool.close(None).await;
    }

    async fn serve_request_event(&self, event: &Event) {
        match self.process_event(event) {
            Ok(response_event) => {
                let outcomes = self.pool.publish(&self.relays, response_event).await;
                if let Err(e) = outcomes {
                    tracing::warn!(error = %e, "failed to publish NIP-46 response");
                }
            }
            Err(e) => tracing::warn!(error = %e, "dropping unusable NIP-46 request"),
        }
    }

    /// Decrypt a request event, run it through the state machine and
    /// build the encrypted response event. The response uses the same
    /// encryption scheme the request arrived with.
    pub(crate) fn process_event(&self, event: &Event) -> Result<Event> {
        if event.kind != NOSTR_CONNECT {
            return Err(Error::invalid_event("not a kind-24133 event"));
        }
        event.verify()?;
        let use_nip04 = nip04::looks_like_nip04(&event.content);
        let plaintext = decrypt_content(&self.signer_keys, &event.pubkey, &event.content)?;
        let request = Request::from_json(&plaintext)?;
        tracing::debug!(client = %event.pubkey, method = %request.method, "NIP-46 request");

        let response = self.process_request(&event.pubkey, &request);

        let content = encrypt_content(
            &self.signer_keys,
            &event.pubkey,
            &response.as_json(),
            use_nip04,
        )?;
        Template::new(
            NOSTR_CONNECT,
            content,
            vec![vec!["p".to_string(), event.pubkey.to_hex()]],
        )
        .to_event(&self.signer_keys)
    }

    /// The session state machine, independent of transport encryption.
    pub(crate) fn process_request(&self, client: &PublicKey, request: &Request) -> Response {
        match request.method.as_str() {
            METHOD_CONNECT => self.handle_connect(client, request),
            METHOD_PING => Response::ok(&request.id, "pong"),
            METHOD_GET_PUBLIC_KEY => {
                Response::ok(&request.id, self.user_keys.public_key().to_hex())
            }
            method => {
                let granted = {
                    let sessions = self.sessions.lock().unwrap();
                    let Some(session) = sessions.get(client) else {
                        return Response::error(&request.id, "unauthorized: connect first");
                    };
                    let kind = if method == METHOD_SIGN_EVENT {
                        match parse_sign_request(request) {
                            Ok(unsigned) => Some(unsigned.kind),
                            Err(e) => return Response::error(&request.id, e.to_string()),
                        }
                    } else {
                        None
                    };
                    permission_granted(&session.permissions, method, kind)
                };
                if !granted {
                    return Response::error(&request.id, "unauthorized: permission denied");
                }
                self.dispatch(request)
            }
        }
    }

    fn handle_connect(&self, client: &PublicKey, request: &Request) -> Response {
        let Some(target) = request.params.first() else {
            return Response::error(&request.id, "connect requires the signer pubkey");
        };
        if target.to_lowercase() != self.signer_keys.public_key().to_hex() {
            return Response::error(&request.id, "unknown signer pubkey");
        }
        if let Some(expected) = &self.options.secret {
            if request.params.get(1).map(String::as_str) != Some(expected.as_str()) {
                return Response::error(&request.id, "invalid secret");
            }
        }

        // Requested permissions can narrow the configured set, never
        // widen it.
        let permissions = match request.params.get(2) {
            Some(requested) if !requested.is_empty() => requested
                .split(',')
                .filter(|perm| {
                    self.options
                        .default_permissions
                        .iter()
                        .any(|allowed| allowed == perm || perm.starts_with(&format!("{allowed}:")))
                })
                .map(str::to_string)
                .collect(),
            _ => self.options.default_permissions.clone(),
        };

        self.sessions
            .lock()
            .unwrap()
            .insert(*client, Session { permissions });
        tracing::debug!(client = %client, "NIP-46 session connected");
        Response::ok(&request.id, "ack")
    }

    fn dispatch(&self, request: &Request) -> Response {
        let outcome = match request.method.as_str() {
            METHOD_SIGN_EVENT => self.handle_sign_event(request),
            METHOD_NIP04_ENCRYPT => self.handle_crypto(request, |keys, peer, text| {
                Ok(nip04::encrypt(keys.secret_key(), peer, text)?)
            }),
            METHOD_NIP04_DECRYPT => self.handle_crypto(request, |keys, peer, text| {
                Ok(nip04::decrypt(keys.secret_key(), peer, text)?)
            }),
            METHOD_NIP44_ENCRYPT => self.handle_crypto(request, |keys, peer, text| {
                encrypt_content(keys, peer, text, false)
            }),
            METHOD_NIP44_DECRYPT => self.handle_crypto(request, |keys, peer, text| {
                decrypt_content(keys, peer, text)
            }),
            method => Err(Error::Rejected {
                reason: format!("unsupported method: {method}"),
            }),
        };
        match outcome {
            Ok(result) => Response::ok(&request.id, result),
            Err(e) => Response::error(&request.id, e.to_string()),
        }
    }

    fn handle_sign_event(&self, request: &Request) -> Result<String> {
        let parsed = parse_sign_request(request)?;
        let event = UnsignedEvent {
            pubkey: self.user_keys.public_key(),
            created_at: parsed.created_at.unwrap_or_else(timestamp_now),
            kind: parsed.kind,
            tags: parsed.tags,
            content: parsed.content,
        }
        .sign(&self.user_keys)?;
        Ok(event.as_json())
    }

    fn handle_crypto(
        &self,
        request: &Request,
        operation: impl Fn(&Keys, &PublicKey, &str) -> Result<String>,
    ) -> Result<String> {
        let peer_hex = request
            .params
            .first()
            .ok_or_else(|| Error::invalid_input("missing third-party pubkey"))?;
        let text = request
            .params
            .get(1)
            .ok_or_else(|| Error::invalid_input("missing payload"))?;
        let peer = PublicKey::from_hex(peer_hex)?;
        // Encryption methods act as the user identity, not the
        // communication identity.
        operation(&self.user_keys, &peer, text)
    }
}

struct SignRequest {
    kind: Kind,
    content: String,
    tags: Vec<Vec<String>>,
    created_at: Option<u64>,
}

fn parse_sign_request(request: &Request) -> Result<SignRequest> {
    let raw = request
        .params
        .first()
        .ok_or_else(|| Error::invalid_input("sign_event requires an event"))?;
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| Error::invalid_input(format!("bad event JSON: {e}")))?;
    let kind = value
        .get("kind")
        .and_then(|k| k.as_u64())
        .and_then(|k| Kind::try_from(k).ok())
        .ok_or_else(|| Error::invalid_input("event kind missing or out of range"))?;
    let content = value
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();
    let tags = value
        .get("tags")
        .map(|t| serde_json::from_value(t.clone()))
        .transpose()
        .map_err(|e| Error::invalid_input(format!("bad tags: {e}")))?
        .unwrap_or_default();
    let created_at = value.get("created_at").and_then(|t| t.as_u64());
    Ok(SignRequest {
        kind,
        content,
        tags,
        created_at,
    })
}
