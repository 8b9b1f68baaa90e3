// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license
// Adapted for project dependencies while maintaining NIP44 v2 compliance

//! NIP-44 (v2) - Encrypted Payloads
//!
//! <https://github.com/nostr-protocol/nips/blob/master/44.md>

use std::fmt;
use std::ops::Range;
use std::string::FromUtf8Error;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use getrandom::getrandom;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::error::Error;
use crate::nips::ecdh_x_coordinate;
use crate::types::event::{PublicKey, SecretKey};

const VERSION: u8 = 2;
const MESSAGE_KEYS_SIZE: usize = 76;
const CHACHA_KEY_SIZE: usize = 32;
const CHACHA_NONCE_SIZE: usize = 12;
const CHACHA_KEY_RANGE: Range<usize> = 0..CHACHA_KEY_SIZE;
const CHACHA_NONCE_RANGE: Range<usize> = CHACHA_KEY_SIZE..CHACHA_KEY_SIZE + CHACHA_NONCE_SIZE;
const HMAC_KEY_RANGE: Range<usize> = CHACHA_KEY_SIZE + CHACHA_NONCE_SIZE..MESSAGE_KEYS_SIZE;

const MIN_PLAINTEXT_SIZE: usize = 1;
const MAX_PLAINTEXT_SIZE: usize = 65535;

#[derive(Debug, PartialEq, Eq)]
pub enum Nip44Error {
    /// UTF-8 encoding error
    Utf8Encode(FromUtf8Error),
    /// HKDF length
    HkdfLength(usize),
    /// Try from slice
    TryFromSlice,
    /// Message is empty
    MessageEmpty,
    /// Message is too long
    MessageTooLong,
    /// Invalid HMAC
    InvalidHmac,
    /// Invalid padding
    InvalidPadding,
    /// Invalid payload
    InvalidPayload,
    /// Unknown version
    UnknownVersion(u8),
    /// Decoding error
    DecodingError(String),
    /// Key derivation failure
    KeyDerivation(String),
}

impl std::error::Error for Nip44Error {}

impl fmt::Display for Nip44Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Utf8Encode(e) => write!(f, "error while encoding to UTF-8: {e}"),
            Self::HkdfLength(size) => write!(f, "invalid length for HKDF: {size}"),
            Self::TryFromSlice => f.write_str("could not convert slice to array"),
            Self::MessageEmpty => f.write_str("message empty"),
            Self::MessageTooLong => f.write_str("message too long"),
            Self::InvalidHmac => f.write_str("invalid HMAC"),
            Self::InvalidPadding => f.write_str("invalid padding"),
            Self::InvalidPayload => f.write_str("invalid payload"),
            Self::UnknownVersion(v) => write!(f, "unknown version: {v}"),
            Self::DecodingError(s) => write!(f, "decoding error: {s}"),
            Self::KeyDerivation(s) => write!(f, "key derivation: {s}"),
        }
    }
}

impl From<FromUtf8Error> for Nip44Error {
    fn from(e: FromUtf8Error) -> Self {
        Self::Utf8Encode(e)
    }
}

impl From<Nip44Error> for Error {
    fn from(e: Nip44Error) -> Self {
        Error::Crypto(e.to_string())
    }
}

/// Message keys derived from conversation key and nonce. Wiped on drop.
struct MessageKeys {
    chacha_key: Zeroizing<[u8; 32]>,
    chacha_nonce: [u8; 12],
    hmac_key: Zeroizing<[u8; 32]>,
}

impl MessageKeys {
    fn derive(conversation_key: &ConversationKey, nonce: &[u8; 32]) -> Result<Self, Nip44Error> {
        let hk = Hkdf::<Sha256>::from_prk(conversation_key.as_bytes())
            .map_err(|_| Nip44Error::HkdfLength(0))?;

        let mut okm = Zeroizing::new([0u8; MESSAGE_KEYS_SIZE]);
        hk.expand(nonce, &mut *okm)
            .map_err(|_| Nip44Error::HkdfLength(MESSAGE_KEYS_SIZE))?;

        let mut chacha_key = Zeroizing::new([0u8; 32]);
        let mut chacha_nonce = [0u8; 12];
        let mut hmac_key = Zeroizing::new([0u8; 32]);

        chacha_key.copy_from_slice(&okm[CHACHA_KEY_RANGE]);
        chacha_nonce.copy_from_slice(&okm[CHACHA_NONCE_RANGE]);
        hmac_key.copy_from_slice(&okm[HMAC_KEY_RANGE]);

        Ok(MessageKeys {
            chacha_key,
            chacha_nonce,
            hmac_key,
        })
    }
}

/// NIP-44 v2 conversation key: HKDF-extract over the ECDH shared
/// x-coordinate with salt "nip44-v2". Symmetric between the two parties.
#[derive(Clone, PartialEq, Eq, Zeroize, zeroize::ZeroizeOnDrop)]
pub struct ConversationKey([u8; 32]);

impl fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConversationKey(<sensitive>)")
    }
}

impl ConversationKey {
    #[inline]
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn derive(secret_key: &SecretKey, public_key: &PublicKey) -> Result<Self, Nip44Error> {
        let shared_x = ecdh_x_coordinate(secret_key, public_key)
            .map_err(|e| Nip44Error::KeyDerivation(e.to_string()))?;

        let (prk, _) = Hkdf::<Sha256>::extract(Some(b"nip44-v2"), &*shared_x);

        let mut conversation_key = [0u8; 32];
        conversation_key.copy_from_slice(&prk);
        Ok(Self(conversation_key))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Padded length: next power of two ≥ the plaintext length, floor 32,
/// chunked above 256 bytes.
fn calc_padded_len(unpadded_len: usize) -> usize {
    if unpadded_len <= 32 {
        return 32;
    }

    let next_power = 1 << ((unpadded_len - 1).ilog2() + 1);
    let chunk = if next_power <= 256 {
        32
    } else {
        next_power / 8
    };

    chunk * ((unpadded_len - 1) / chunk + 1)
}

/// `u16-be length || plaintext || zeros`.
fn pad(plaintext: &[u8]) -> Result<Vec<u8>, Nip44Error> {
    let len = plaintext.len();

    if len < MIN_PLAINTEXT_SIZE {
        return Err(Nip44Error::MessageEmpty);
    }
    if len > MAX_PLAINTEXT_SIZE {
        return Err(Nip44Error::MessageTooLong);
    }

    let padded_len = calc_padded_len(len);
    let mut padded = Vec::with_capacity(2 + padded_len);
    padded.extend_from_slice(&(len as u16).to_be_bytes());
    padded.extend_from_slice(plaintext);
    padded.resize(2 + padded_len, 0);
    Ok(padded)
}

fn unpad(padded: &[u8]) -> Result<Vec<u8>, Nip44Error> {
    if padded.len() < 2 {
        return Err(Nip44Error::InvalidPadding);
    }

    let unpadded_len = u16::from_be_bytes([padded[0], padded[1]]) as usize;
    if unpadded_len == 0 {
        return Err(Nip44Error::MessageEmpty);
    }
    if padded.len() < 2 + unpadded_len {
        return Err(Nip44Error::InvalidPadding);
    }

    let expected_len = 2 + calc_padded_len(unpadded_len);
    if padded.len() != expected_len {
        return Err(Nip44Error::InvalidPadding);
    }

    Ok(padded[2..2 + unpadded_len].to_vec())
}

/// Encrypt; the result is the raw `[version][nonce][ct][mac]` payload,
/// NOT base64.
pub fn encrypt_to_bytes(
    conversation_key: &ConversationKey,
    plaintext: &[u8],
) -> Result<Vec<u8>, Nip44Error> {
    let mut nonce = [0u8; 32];
    getrandom(&mut nonce)
        .map_err(|e| Nip44Error::DecodingError(format!("failed to generate nonce: {e}")))?;
    encrypt_to_bytes_with_nonce(conversation_key, plaintext, &nonce)
}

fn encrypt_to_bytes_with_nonce(
    conversation_key: &ConversationKey,
    plaintext: &[u8],
    nonce: &[u8; 32],
) -> Result<Vec<u8>, Nip44Error> {
    let padded = pad(plaintext)?;

    let keys = MessageKeys::derive(conversation_key, nonce)?;

    let mut ciphertext = padded;
    let mut cipher = ChaCha20::new((&*keys.chacha_key).into(), &keys.chacha_nonce.into());
    cipher.apply_keystream(&mut ciphertext);

    // HMAC over nonce || ciphertext
    let mut mac =
        Hmac::<Sha256>::new_from_slice(&*keys.hmac_key).expect("HMAC can take any size key");
    mac.update(nonce);
    mac.update(&ciphertext);
    let mac_bytes = mac.finalize().into_bytes();

    let mut payload = Vec::with_capacity(1 + 32 + ciphertext.len() + 32);
    payload.push(VERSION);
    payload.extend_from_slice(nonce);
    payload.extend_from_slice(&ciphertext);
    payload.extend_from_slice(&mac_bytes);
    Ok(payload)
}

/// Decrypt a raw (already base64-decoded) payload. The MAC is checked in
/// constant time before any parsing of the plaintext.
pub fn decrypt_to_bytes(
    conversation_key: &ConversationKey,
    payload: &[u8],
) -> Result<Vec<u8>, Nip44Error> {
    let len = payload.len();
    if !(99..=65603).contains(&len) {
        return Err(Nip44Error::InvalidPayload);
    }

    let version = payload[0];
    if version != VERSION {
        return Err(Nip44Error::UnknownVersion(version));
    }

    let nonce = &payload[1..33];
    let ciphertext = &payload[33..len - 32];
    let mac = &payload[len - 32..];

    let nonce_array: [u8; 32] = nonce.try_into().map_err(|_| Nip44Error::TryFromSlice)?;
    let keys = MessageKeys::derive(conversation_key, &nonce_array)?;

    let mut mac_verifier =
        Hmac::<Sha256>::new_from_slice(&*keys.hmac_key).expect("HMAC can take any size key");
    mac_verifier.update(nonce);
    mac_verifier.update(ciphertext);
    mac_verifier
        .verify_slice(mac)
        .map_err(|_| Nip44Error::InvalidHmac)?;

    let mut plaintext_padded = ciphertext.to_vec();
    let mut cipher = ChaCha20::new((&*keys.chacha_key).into(), &keys.chacha_nonce.into());
    cipher.apply_keystream(&mut plaintext_padded);

    unpad(&plaintext_padded)
}

/// Encrypt `plaintext` for the conversation and return base64.
pub fn encrypt(
    conversation_key: &ConversationKey,
    plaintext: &str,
) -> Result<String, Nip44Error> {
    let encrypted = encrypt_to_bytes(conversation_key, plaintext.as_bytes())?;
    Ok(BASE64.encode(encrypted))
}

/// Decrypt a base64 payload.
pub fn decrypt(
    conversation_key: &ConversationKey,
    payload: &str,
) -> Result<String, Nip44Error> {
    // '#' flags a non-base64 future format
    if payload.starts_with('#') {
        return Err(Nip44Error::UnknownVersion(0));
    }

    let plen = payload.len();
    if !(132..=87472).contains(&plen) {
        return Err(Nip44Error::InvalidPayload);
    }

    let data = BASE64
        .decode(payload)
        .map_err(|e| Nip44Error::DecodingError(e.to_string()))?;

    let plaintext_bytes = decrypt_to_bytes(conversation_key, &data)?;
    String::from_utf8(plaintext_bytes).map_err(Nip44Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::Keys;

    fn conv_pair() -> (ConversationKey, ConversationKey) {
        let alice = Keys::generate();
        let bob = Keys::generate();
        let ab = ConversationKey::derive(alice.secret_key(), &bob.public_key()).unwrap();
        let ba = ConversationKey::derive(bob.secret_key(), &alice.public_key()).unwrap();
        (ab, ba)
    }

    #[test]
    fn test_calc_padded_len() {
        assert_eq!(calc_padded_len(1), 32);
        assert_eq!(calc_padded_len(32), 32);
        assert_eq!(calc_padded_len(33), 64);
        assert_eq!(calc_padded_len(64), 64);
        assert_eq!(calc_padded_len(65), 96);
        assert_eq!(calc_padded_len(256), 256);
        assert_eq!(calc_padded_len(257), 320);
    }

    #[test]
    fn test_padding() {
        let plaintext = b"hello";
        let padded = pad(plaintext).unwrap();
        assert_eq!(padded.len(), 2 + 32);
        assert_eq!(padded[0..2], [0x00, 0x05]);
        assert_eq!(&padded[2..7], b"hello");

        let unpadded = unpad(&padded).unwrap();
        assert_eq!(unpadded, plaintext);
    }

    #[test]
    fn conversation_key_is_symmetric() {
        let (ab, ba) = conv_pair();
        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }

    #[test]
    fn round_trip_various_sizes() {
        let (ab, ba) = conv_pair();
        let long = "à".repeat(300);
        for pt in ["x", "hello world", long.as_str()] {
            let ct = encrypt(&ab, pt).unwrap();
            assert_eq!(decrypt(&ba, &ct).unwrap(), pt);
        }
    }

    #[test]
    fn empty_plaintext_is_rejected() {
        let (ab, _) = conv_pair();
        assert_eq!(encrypt(&ab, ""), Err(Nip44Error::MessageEmpty));
    }

    #[test]
    fn oversized_plaintext_is_rejected() {
        let (ab, _) = conv_pair();
        let big = "a".repeat(65536);
        assert_eq!(encrypt(&ab, &big), Err(Nip44Error::MessageTooLong));
    }

    #[test]
    fn any_flipped_bit_fails_the_mac() {
        let (ab, ba) = conv_pair();
        let payload = encrypt_to_bytes(&ab, b"tamper target").unwrap();

        // One bit in the nonce, one in the ciphertext, one in the MAC.
        for idx in [1, 40, payload.len() - 1] {
            let mut corrupted = payload.clone();
            corrupted[idx] ^= 0x01;
            let err = decrypt_to_bytes(&ba, &corrupted).unwrap_err();
            assert_eq!(err, Nip44Error::InvalidHmac, "index {idx}");
        }
    }

    #[test]
    fn unknown_version_is_rejected() {
        let (ab, ba) = conv_pair();
        let mut payload = encrypt_to_bytes(&ab, b"versioned").unwrap();
        payload[0] = 0x01;
        assert_eq!(
            decrypt_to_bytes(&ba, &payload),
            Err(Nip44Error::UnknownVersion(1))
        );
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let (ab, ba) = conv_pair();
        let payload = encrypt_to_bytes(&ab, b"short").unwrap();
        assert_eq!(
            decrypt_to_bytes(&ba, &payload[..50]),
            Err(Nip44Error::InvalidPayload)
        );
    }

    #[test]
    fn wrong_conversation_key_fails() {
        let (ab, _) = conv_pair();
        let (other, _) = conv_pair();
        let ct = encrypt(&ab, "for bob only").unwrap();
        assert_eq!(decrypt(&other, &ct), Err(Nip44Error::InvalidHmac));
    }
}
