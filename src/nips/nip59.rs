//! NIP-59 gift wraps carrying NIP-17 private direct messages.
//!
//! Three layers: an unsigned rumor (kind 14), a seal (kind 13, NIP-44
//! encrypted to the receiver, signed by the sender) and a wrap (kind
//! 1059, NIP-44 encrypted with a fresh ephemeral keypair and p-tagged to
//! the receiver). Each layer's `created_at` is randomized into the past
//! so that timestamps correlate neither with each other nor with the
//! send time.

use getrandom::getrandom;

use crate::error::{Error, Result};
use crate::nips::nip44::{self, ConversationKey};
use crate::types::event::{
    timestamp_now, Event, Keys, PublicKey, Timestamp, UnsignedEvent, GIFT_WRAP,
    PRIVATE_DIRECT_MESSAGE, SEALED_RUMOR,
};

/// Upper bound for the backdating window, seconds (2 days).
const TIMESTAMP_WINDOW_S: u64 = 2 * 24 * 60 * 60;

/// Uniformly random timestamp within the past two days.
fn random_past_timestamp() -> Result<Timestamp> {
    let mut bytes = [0u8; 8];
    getrandom(&mut bytes).map_err(|e| Error::crypto(format!("randomness: {e}")))?;
    let offset = u64::from_le_bytes(bytes) % TIMESTAMP_WINDOW_S;
    Ok(timestamp_now().saturating_sub(offset))
}

/// The innermost layer: an unsigned kind-14 DM addressed to `receiver`.
pub fn create_rumor(
    sender: &PublicKey,
    receiver: &PublicKey,
    content: &str,
) -> Result<UnsignedEvent> {
    Ok(UnsignedEvent {
        pubkey: *sender,
        created_at: random_past_timestamp()?,
        kind: PRIVATE_DIRECT_MESSAGE,
        tags: vec![vec!["p".to_string(), receiver.to_hex()]],
        content: content.to_string(),
    })
}

/// Seal a rumor: kind 13, content encrypted to `receiver`, signed by the
/// sender so the receiver can authenticate who wrote the rumor.
pub fn create_seal(
    sender_keys: &Keys,
    receiver: &PublicKey,
    rumor: &UnsignedEvent,
) -> Result<Event> {
    let conversation = ConversationKey::derive(sender_keys.secret_key(), receiver)?;
    let rumor_json = rumor.clone().into_rumor().as_json();
    let content = nip44::encrypt(&conversation, &rumor_json)?;

    UnsignedEvent {
        pubkey: sender_keys.public_key(),
        created_at: random_past_timestamp()?,
        kind: SEALED_RUMOR,
        tags: vec![],
        content,
    }
    .sign(sender_keys)
}

/// Wrap a seal: kind 1059, encrypted and signed with a freshly generated
/// ephemeral keypair, p-tagged to the receiver for relay indexing.
pub fn create_wrap(receiver: &PublicKey, seal: &Event) -> Result<Event> {
    let ephemeral = Keys::generate();
    let conversation = ConversationKey::derive(ephemeral.secret_key(), receiver)?;
    let content = nip44::encrypt(&conversation, &seal.as_json())?;

    UnsignedEvent {
        pubkey: ephemeral.public_key(),
        created_at: random_past_timestamp()?,
        kind: GIFT_WRAP,
        tags: vec![vec!["p".to_string(), receiver.to_hex()]],
        content,
    }
    .sign(&ephemeral)
}

/// Full construction: rumor → seal → wrap.
pub fn wrap_direct_message(
    sender_keys: &Keys,
    receiver: &PublicKey,
    content: &str,
) -> Result<Event> {
    let rumor = create_rumor(&sender_keys.public_key(), receiver, content)?;
    let seal = create_seal(sender_keys, receiver, &rumor)?;
    create_wrap(receiver, &seal)
}

/// Peel a gift wrap back to its rumor.
///
/// The seal's Schnorr signature is verified, and a rumor whose pubkey
/// differs from the seal's is rejected: otherwise anyone could seal an
/// arbitrary rumor claiming to be from a third party.
pub fn unwrap_direct_message(receiver_keys: &Keys, wrap: &Event) -> Result<Event> {
    if wrap.kind != GIFT_WRAP {
        return Err(Error::invalid_event(format!(
            "expected kind {GIFT_WRAP} wrap, got {}",
            wrap.kind
        )));
    }

    let wrap_conversation = ConversationKey::derive(receiver_keys.secret_key(), &wrap.pubkey)?;
    let seal_json = nip44::decrypt(&wrap_conversation, &wrap.content)?;
    let seal = Event::from_json(&seal_json)?;

    if seal.kind != SEALED_RUMOR {
        return Err(Error::invalid_event(format!(
            "expected kind {SEALED_RUMOR} seal, got {}",
            seal.kind
        )));
    }
    seal.validate_crypto()
        .map_err(|_| Error::invalid_event("seal signature does not verify"))?;

    let seal_conversation = ConversationKey::derive(receiver_keys.secret_key(), &seal.pubkey)?;
    let rumor_json = nip44::decrypt(&seal_conversation, &seal.content)?;
    let rumor = Event::from_json(&rumor_json)?;

    if rumor.pubkey != seal.pubkey {
        return Err(Error::invalid_event(
            "sender mismatch: rumor pubkey differs from seal pubkey",
        ));
    }
    if rumor.compute_id() != rumor.id {
        return Err(Error::invalid_event("rumor id does not match its hash"));
    }

    Ok(rumor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_and_unwrap_round_trip() {
        let sender = Keys::generate();
        let receiver = Keys::generate();

        let wrap = wrap_direct_message(&sender, &receiver.public_key(), "top secret").unwrap();
        assert_eq!(wrap.kind, GIFT_WRAP);
        assert_eq!(wrap.tag_value("p"), Some(receiver.public_key().to_hex()).as_deref());
        // The wrap is signed by an ephemeral key, not the sender.
        assert_ne!(wrap.pubkey, sender.public_key());

        let rumor = unwrap_direct_message(&receiver, &wrap).unwrap();
        assert_eq!(rumor.kind, PRIVATE_DIRECT_MESSAGE);
        assert_eq!(rumor.content, "top secret");
        assert_eq!(rumor.pubkey, sender.public_key());
        assert!(rumor.sig.is_empty());
    }

    #[test]
    fn timestamps_are_backdated() {
        let sender = Keys::generate();
        let receiver = Keys::generate();
        let wrap = wrap_direct_message(&sender, &receiver.public_key(), "when?").unwrap();
        let now = timestamp_now();
        assert!(wrap.created_at <= now);
        assert!(wrap.created_at >= now - TIMESTAMP_WINDOW_S - 1);
    }

    #[test]
    fn impersonated_rumor_is_rejected() {
        let sender = Keys::generate();
        let receiver = Keys::generate();
        let attacker = Keys::generate();

        // A rumor claiming to come from the attacker's victim, sealed by
        // the sender: the pubkeys disagree and the unwrap must fail.
        let mut rumor = create_rumor(&sender.public_key(), &receiver.public_key(), "hi").unwrap();
        rumor.pubkey = attacker.public_key();
        let seal = create_seal(&sender, &receiver.public_key(), &rumor).unwrap();
        let wrap = create_wrap(&receiver.public_key(), &seal).unwrap();

        let err = unwrap_direct_message(&receiver, &wrap).unwrap_err();
        assert!(err.to_string().contains("sender mismatch"), "{err}");
    }

    #[test]
    fn tampered_seal_signature_is_rejected() {
        let sender = Keys::generate();
        let receiver = Keys::generate();

        let rumor = create_rumor(&sender.public_key(), &receiver.public_key(), "hi").unwrap();
        let mut seal = create_seal(&sender, &receiver.public_key(), &rumor).unwrap();
        let mut sig = hex::decode(&seal.sig).unwrap();
        sig[5] ^= 0x01;
        seal.sig = hex::encode(sig);
        let wrap = create_wrap(&receiver.public_key(), &seal).unwrap();

        assert!(unwrap_direct_message(&receiver, &wrap).is_err());
    }

    #[test]
    fn wrong_receiver_cannot_unwrap() {
        let sender = Keys::generate();
        let receiver = Keys::generate();
        let stranger = Keys::generate();

        let wrap = wrap_direct_message(&sender, &receiver.public_key(), "not yours").unwrap();
        assert!(unwrap_direct_message(&stranger, &wrap).is_err());
    }

    #[test]
    fn non_wrap_kind_is_rejected() {
        let sender = Keys::generate();
        let receiver = Keys::generate();
        let mut wrap = wrap_direct_message(&sender, &receiver.public_key(), "x").unwrap();
        wrap.kind = 1;
        assert!(unwrap_direct_message(&receiver, &wrap).is_err());
    }
}
