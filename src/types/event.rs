//! Canonical Nostr event model (NIP-01).
//!
//! Events are immutable signed JSON documents. The identity of an event
//! is the SHA-256 of its canonical serialization, and the signature is
//! BIP-340 Schnorr over that id. Hashing and signing here are the single
//! source of truth for the rest of the crate.

use k256::schnorr::{Signature, SigningKey, VerifyingKey};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use signature::hazmat::PrehashVerifier;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

pub type Timestamp = u64;
pub type Kind = u16;

pub const METADATA: Kind = 0;
pub const TEXT_NOTE: Kind = 1;
pub const CONTACT_LIST: Kind = 3;
pub const ENCRYPTED_DIRECT_MESSAGE: Kind = 4;
pub const REPOST: Kind = 6;
pub const REACTION: Kind = 7;
pub const SEALED_RUMOR: Kind = 13;
pub const PRIVATE_DIRECT_MESSAGE: Kind = 14;
pub const GIFT_WRAP: Kind = 1059;
pub const RELAY_LIST: Kind = 10002;
pub const CLIENT_AUTH: Kind = 22242;
pub const NOSTR_CONNECT: Kind = 24133;

/// Relays keep only the newest event per `(pubkey, kind)` for these.
pub fn is_replaceable(kind: Kind) -> bool {
    kind == METADATA || kind == CONTACT_LIST || (10000..20000).contains(&kind)
}

/// Relays never store these.
pub fn is_ephemeral(kind: Kind) -> bool {
    (20000..30000).contains(&kind)
}

/// Indexed by `(pubkey, kind, d)`, newest wins.
pub fn is_addressable(kind: Kind) -> bool {
    (30000..40000).contains(&kind)
}

pub fn is_regular(kind: Kind) -> bool {
    !is_replaceable(kind) && !is_ephemeral(kind) && !is_addressable(kind)
}

pub fn timestamp_now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn decode_hex32(s: &str, what: &str) -> Result<[u8; 32]> {
    if s.len() != 64 {
        return Err(Error::invalid_input(format!("{what} must be 64 hex chars")));
    }
    let bytes = hex::decode(s).map_err(|_| Error::invalid_input(format!("{what} is not hex")))?;
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

// ============================================================================
// Basic key and id types
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub [u8; 32]);

impl EventId {
    pub fn from_hex(s: &str) -> Result<Self> {
        Ok(EventId(decode_hex32(s, "event id")?))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.to_hex())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn from_hex(s: &str) -> Result<Self> {
        Ok(PublicKey(decode_hex32(s, "public key")?))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// 32-byte secp256k1 scalar. Wiped on drop; never printed, never logged.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(pub(crate) [u8; 32]);

impl SecretKey {
    pub fn from_hex(s: &str) -> Result<Self> {
        Ok(SecretKey(decode_hex32(s, "secret key")?))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        SecretKey(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        let signing_key = SigningKey::from_bytes(&self.0)
            .map_err(|_| Error::invalid_input("secret key is not a valid scalar"))?;
        Ok(PublicKey(signing_key.verifying_key().to_bytes().into()))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<sensitive>)")
    }
}

/// A secp256k1 keypair. The public key is derived once at construction.
#[derive(Clone)]
pub struct Keys {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl Keys {
    pub fn new(secret_key: SecretKey) -> Result<Self> {
        let public_key = secret_key.public_key()?;
        Ok(Self {
            secret_key,
            public_key,
        })
    }

    /// Parse a secret key from hex or bech32 `nsec1...`.
    pub fn parse(input: &str) -> Result<Self> {
        if input.starts_with("nsec1") {
            match crate::nips::nip19::decode(input)? {
                crate::nips::nip19::DecodedEntity::Nsec(sk) => Self::new(sk),
                _ => Err(Error::invalid_input("not an nsec entity")),
            }
        } else {
            Self::new(SecretKey::from_hex(input)?)
        }
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        loop {
            getrandom::getrandom(&mut bytes).expect("OS randomness unavailable");
            if let Ok(keys) = Self::new(SecretKey(bytes)) {
                bytes.zeroize();
                return keys;
            }
        }
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keys({})", self.public_key)
    }
}

// ============================================================================
// Canonical serialization
// ============================================================================

/// Append `s` JSON-escaped per NIP-01: `\" \\ \b \f \n \r \t`, `\u00XX`
/// for remaining control characters, everything else (incl. non-ASCII)
/// emitted raw. Shared by every wire writer in the crate.
pub(crate) fn push_json_escaped(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
}

/// The canonical array `[0,pubkey,created_at,kind,tags,content]` with no
/// whitespace. Field order is fixed by position, so the output is
/// byte-identical regardless of how the event was built or parsed.
pub fn serialize_canonical(
    pubkey: &PublicKey,
    created_at: Timestamp,
    kind: Kind,
    tags: &[Vec<String>],
    content: &str,
) -> String {
    let mut out = String::with_capacity(content.len() + 128);
    out.push_str("[0,\"");
    out.push_str(&pubkey.to_hex());
    out.push_str("\",");
    out.push_str(&created_at.to_string());
    out.push(',');
    out.push_str(&kind.to_string());
    out.push_str(",[");
    for (i, tag) in tags.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push('[');
        for (j, item) in tag.iter().enumerate() {
            if j > 0 {
                out.push(',');
            }
            out.push('"');
            push_json_escaped(&mut out, item);
            out.push('"');
        }
        out.push(']');
    }
    out.push_str("],\"");
    push_json_escaped(&mut out, content);
    out.push_str("\"]");
    out
}

/// SHA-256 of the canonical serialization.
pub fn compute_event_id(
    pubkey: &PublicKey,
    created_at: Timestamp,
    kind: Kind,
    tags: &[Vec<String>],
    content: &str,
) -> EventId {
    let serialized = serialize_canonical(pubkey, created_at, kind, tags, content);
    let digest = Sha256::digest(serialized.as_bytes());
    let mut id = [0u8; 32];
    id.copy_from_slice(&digest);
    EventId(id)
}

/// BIP-340 Schnorr over a 32-byte digest, with 32 bytes of OS
/// auxiliary randomness.
pub fn sign_id(id: &EventId, secret_key: &SecretKey) -> Result<String> {
    let signing_key = SigningKey::from_bytes(&secret_key.0)
        .map_err(|_| Error::invalid_input("secret key is not a valid scalar"))?;
    let mut aux = [0u8; 32];
    getrandom::getrandom(&mut aux).map_err(|e| Error::crypto(format!("aux randomness: {e}")))?;
    let signature = signing_key
        .sign_raw(&id.0, &aux)
        .map_err(|e| Error::crypto(format!("schnorr sign failed: {e}")))?;
    aux.zeroize();
    Ok(hex::encode(signature.to_bytes()))
}

/// Schnorr verification of `sig_hex` over `id` by `pubkey`.
pub fn verify_signature(id: &EventId, sig_hex: &str, pubkey: &PublicKey) -> Result<()> {
    let verifying_key = VerifyingKey::from_bytes(&pubkey.0)
        .map_err(|_| Error::crypto("public key is not a valid x-only point"))?;
    let sig_bytes =
        hex::decode(sig_hex).map_err(|_| Error::invalid_input("signature is not hex"))?;
    let signature = Signature::try_from(sig_bytes.as_slice())
        .map_err(|_| Error::invalid_input("signature must be 64 bytes"))?;
    verifying_key
        .verify_prehash(&id.0, &signature)
        .map_err(|_| Error::crypto("schnorr signature verification failed"))
}

// ============================================================================
// Event
// ============================================================================

/// Structural validation knobs.
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Maximum allowed `created_at` drift into the future, seconds.
    pub max_created_at_future_drift_s: u64,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            max_created_at_future_drift_s: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: EventId,
    pub pubkey: PublicKey,
    pub created_at: Timestamp,
    pub kind: Kind,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Event {
    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn tags(&self) -> &[Vec<String>] {
        &self.tags
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Value of the first tag named `name`, if any.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    /// The `d` identifier of an addressable event ("" when absent).
    pub fn identifier(&self) -> &str {
        self.tag_value("d").unwrap_or("")
    }

    pub fn compute_id(&self) -> EventId {
        compute_event_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            self.content(),
        )
    }

    /// Fast synchronous checks: field shapes and timestamp sanity.
    /// Run before an event is buffered.
    pub fn validate_structure(&self, opts: &ValidationOptions) -> Result<()> {
        if self.id.0 == [0u8; 32] {
            return Err(Error::invalid_event("missing id"));
        }
        if self.pubkey.0 == [0u8; 32] {
            return Err(Error::invalid_event("missing pubkey"));
        }
        if self.sig.len() != 128 || !self.sig.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::invalid_event("sig must be 128 hex chars"));
        }
        let now = timestamp_now();
        if self.created_at > now + opts.max_created_at_future_drift_s {
            return Err(Error::invalid_event(format!(
                "created_at {} is too far in the future",
                self.created_at
            )));
        }
        Ok(())
    }

    /// Expensive checks: id against the canonical hash, signature
    /// against the id. Run before an event is delivered.
    pub fn validate_crypto(&self) -> Result<()> {
        let expected = self.compute_id();
        if expected != self.id {
            return Err(Error::invalid_event("id does not match canonical hash"));
        }
        verify_signature(&self.id, &self.sig, &self.pubkey)
            .map_err(|_| Error::invalid_event("signature does not verify"))
    }

    /// Full validation: structure, id hash and signature.
    pub fn validate(&self, opts: &ValidationOptions) -> Result<()> {
        self.validate_structure(opts)?;
        self.validate_crypto()
    }

    /// Shorthand used in tests and by the remote signer: verify id+sig
    /// without the timestamp policy.
    pub fn verify(&self) -> Result<()> {
        self.validate_crypto()
    }

    pub fn as_json(&self) -> String {
        serde_json::to_string(self).expect("event serialization is infallible")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::invalid_event(format!("bad event JSON: {e}")))
    }
}

/// The fields an application chooses when creating an event; id, author,
/// timestamp and signature are filled in at signing time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub kind: Kind,
    pub content: String,
    pub tags: Vec<Vec<String>>,
}

impl Template {
    pub fn new(kind: Kind, content: impl Into<String>, tags: Vec<Vec<String>>) -> Self {
        Template {
            kind,
            content: content.into(),
            tags,
        }
    }

    /// Build the unsigned event at the current time.
    pub fn to_unsigned(&self, pubkey: PublicKey) -> UnsignedEvent {
        UnsignedEvent {
            pubkey,
            created_at: timestamp_now(),
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }

    /// Hash and sign at the current time.
    pub fn to_event(&self, keys: &Keys) -> Result<Event> {
        self.to_unsigned(keys.public_key()).sign(keys)
    }
}

/// An event with identity but no signature yet. Also the shape of a
/// gift-wrap rumor, which never gets one.
#[derive(Debug, Clone)]
pub struct UnsignedEvent {
    pub pubkey: PublicKey,
    pub created_at: Timestamp,
    pub kind: Kind,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl UnsignedEvent {
    pub fn id(&self) -> EventId {
        compute_event_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    pub fn sign(self, keys: &Keys) -> Result<Event> {
        if self.pubkey != keys.public_key() {
            return Err(Error::invalid_input(
                "signing key does not match event pubkey",
            ));
        }
        let id = self.id();
        let sig = sign_id(&id, keys.secret_key())?;
        Ok(Event {
            id,
            pubkey: self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig,
        })
    }

    /// An unsigned event serialized with an empty `sig`, as carried
    /// inside seals.
    pub fn into_rumor(self) -> Event {
        let id = self.id();
        Event {
            id,
            pubkey: self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig: String::new(),
        }
    }
}

// ============================================================================
// Serde plumbing: ids and pubkeys travel as hex strings
// ============================================================================

macro_rules! hex32_serde {
    ($ty:ident, $expecting:literal) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                struct HexVisitor;
                impl<'de> Visitor<'de> for HexVisitor {
                    type Value = $ty;

                    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                        f.write_str($expecting)
                    }

                    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<$ty, E> {
                        $ty::from_hex(v).map_err(|_| E::custom(concat!("invalid ", $expecting)))
                    }
                }
                deserializer.deserialize_str(HexVisitor)
            }
        }
    };
}

hex32_serde!(EventId, "64-char hex event id");
hex32_serde!(PublicKey, "64-char hex public key");
