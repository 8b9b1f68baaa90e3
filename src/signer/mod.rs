//! Signing backends.
//!
//! The [`Signer`] trait is the seam between event construction and key
//! custody: the client speaks to it the same way whether the key lives
//! in-process ([`PrivateKeySigner`]) or behind a NIP-46 bunker
//! ([`crate::nips::nip46::Nip46Client`]).

use async_trait::async_trait;

use crate::error::Result;
use crate::nips::nip04;
use crate::nips::nip44::{self, ConversationKey};
use crate::types::event::{Event, Keys, PublicKey, Template};

#[async_trait]
pub trait Signer: Send + Sync {
    /// The public key application events are attributed to.
    async fn public_key(&self) -> Result<PublicKey>;

    /// Hash and sign a template at the current time.
    async fn sign_event(&self, template: Template) -> Result<Event>;

    async fn nip04_encrypt(&self, peer: &PublicKey, plaintext: &str) -> Result<String>;
    async fn nip04_decrypt(&self, peer: &PublicKey, ciphertext: &str) -> Result<String>;
    async fn nip44_encrypt(&self, peer: &PublicKey, plaintext: &str) -> Result<String>;
    async fn nip44_decrypt(&self, peer: &PublicKey, payload: &str) -> Result<String>;
}

/// Signer backed by an in-process secret key.
pub struct PrivateKeySigner {
    keys: Keys,
}

impl PrivateKeySigner {
    pub fn new(keys: Keys) -> Self {
        Self { keys }
    }

    pub fn generate() -> Self {
        Self::new(Keys::generate())
    }

    /// Accepts hex or bech32 `nsec1...`.
    pub fn from_secret(input: &str) -> Result<Self> {
        Ok(Self::new(Keys::parse(input)?))
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }
}

#[async_trait]
impl Signer for PrivateKeySigner {
    async fn public_key(&self) -> Result<PublicKey> {
        Ok(self.keys.public_key())
    }

    async fn sign_event(&self, template: Template) -> Result<Event> {
        template.to_event(&self.keys)
    }

    async fn nip04_encrypt(&self, peer: &PublicKey, plaintext: &str) -> Result<String> {
        Ok(nip04::encrypt(self.keys.secret_key(), peer, plaintext)?)
    }

    async fn nip04_decrypt(&self, peer: &PublicKey, ciphertext: &str) -> Result<String> {
        Ok(nip04::decrypt(self.keys.secret_key(), peer, ciphertext)?)
    }

    async fn nip44_encrypt(&self, peer: &PublicKey, plaintext: &str) -> Result<String> {
        let conversation = ConversationKey::derive(self.keys.secret_key(), peer)?;
        Ok(nip44::encrypt(&conversation, plaintext)?)
    }

    async fn nip44_decrypt(&self, peer: &PublicKey, payload: &str) -> Result<String> {
        let conversation = ConversationKey::derive(self.keys.secret_key(), peer)?;
        Ok(nip44::decrypt(&conversation, payload)?)
    }
}
