//! NIP-04: Encrypted Direct Message.
//!
//! AES-256-CBC over the raw ECDH x-coordinate, output encoded as
//! `<base64_ciphertext>?iv=<base64_iv>`.
//!
//! Note: NIP-04 is deprecated in favor of NIP-44 for new applications;
//! it is kept for interoperability with existing direct messages.

use aes::Aes256;
use base64::engine::{general_purpose, Engine};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use getrandom::getrandom;

use crate::error::Error;
use crate::nips::ecdh_x_coordinate;
use crate::types::event::{PublicKey, SecretKey};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

#[derive(Debug, thiserror::Error)]
pub enum Nip04Error {
    #[error("invalid content format")]
    InvalidContentFormat,

    #[error("base64 decode error")]
    Base64Decode,

    #[error("UTF-8 encoding error")]
    Utf8Encode,

    #[error("wrong block mode")]
    WrongBlockMode,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("random generation failed")]
    RandomGenerationFailed,
}

impl From<Nip04Error> for Error {
    fn from(e: Nip04Error) -> Self {
        Error::Crypto(e.to_string())
    }
}

fn generate_iv() -> Result<[u8; 16], Nip04Error> {
    let mut iv = [0u8; 16];
    getrandom(&mut iv).map_err(|_| Nip04Error::RandomGenerationFailed)?;
    Ok(iv)
}

/// Encrypt `content` for `public_key`.
pub fn encrypt(
    secret_key: &SecretKey,
    public_key: &PublicKey,
    content: &str,
) -> Result<String, Nip04Error> {
    encrypt_with_iv(secret_key, public_key, content, generate_iv()?)
}

/// Encrypt with a caller-provided IV. Only tests should pin the IV.
pub fn encrypt_with_iv(
    secret_key: &SecretKey,
    public_key: &PublicKey,
    content: &str,
    iv: [u8; 16],
) -> Result<String, Nip04Error> {
    let key = ecdh_x_coordinate(secret_key, public_key)
        .map_err(|e| Nip04Error::InvalidKey(e.to_string()))?;

    let cipher = Aes256CbcEnc::new((&*key).into(), &iv.into());
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(content.as_bytes());

    Ok(format!(
        "{}?iv={}",
        general_purpose::STANDARD.encode(ciphertext),
        general_purpose::STANDARD.encode(iv)
    ))
}

/// Decrypt a `<ct>?iv=<iv>` payload from `public_key`.
pub fn decrypt(
    secret_key: &SecretKey,
    public_key: &PublicKey,
    encrypted_content: &str,
) -> Result<String, Nip04Error> {
    let bytes = decrypt_to_bytes(secret_key, public_key, encrypted_content)?;
    String::from_utf8(bytes).map_err(|_| Nip04Error::Utf8Encode)
}

/// Decrypt to raw bytes, for content that might not be UTF-8.
pub fn decrypt_to_bytes(
    secret_key: &SecretKey,
    public_key: &PublicKey,
    encrypted_content: &str,
) -> Result<Vec<u8>, Nip04Error> {
    let mut parts = encrypted_content.split("?iv=");
    let (ct_b64, iv_b64) = match (parts.next(), parts.next(), parts.next()) {
        (Some(ct), Some(iv), None) => (ct, iv),
        _ => return Err(Nip04Error::InvalidContentFormat),
    };

    let mut encrypted = general_purpose::STANDARD
        .decode(ct_b64)
        .map_err(|_| Nip04Error::Base64Decode)?;
    let iv = general_purpose::STANDARD
        .decode(iv_b64)
        .map_err(|_| Nip04Error::Base64Decode)?;
    if iv.len() != 16 {
        return Err(Nip04Error::InvalidContentFormat);
    }

    let key = ecdh_x_coordinate(secret_key, public_key)
        .map_err(|e| Nip04Error::InvalidKey(e.to_string()))?;

    let cipher = Aes256CbcDec::new((&*key).into(), iv.as_slice().into());
    let decrypted = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&mut encrypted)
        .map_err(|_| Nip04Error::WrongBlockMode)?;

    Ok(decrypted)
}

/// Whether a ciphertext uses the NIP-04 framing rather than NIP-44
/// base64. Used when a peer may speak either (NIP-46 transport).
pub fn looks_like_nip04(content: &str) -> bool {
    content.contains("?iv=")
}
