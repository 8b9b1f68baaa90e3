//! NIP-46: remote signing over relays.
//!
//! Two parties talk through kind-24133 events: the client (application
//! side, [`client::Nip46Client`]) and the bunker (key holder,
//! [`bunker::Nip46Bunker`]). Requests and responses are JSON envelopes
//! encrypted with NIP-44, falling back to NIP-04 for old bunkers.
//!
//! Two keys are involved per session: the signer pubkey (communication
//! identity, in the bunker URI) and the user pubkey (the key that signs
//! application events). They may differ.

pub mod bunker;
pub mod client;
pub mod rpc;
pub mod uri;

pub use bunker::{Nip46Bunker, Nip46BunkerOptions};
pub use client::{Nip46Client, Nip46ClientOptions, PreferredEncryption};
pub use rpc::{Request, Response};
pub use uri::{BunkerUri, NostrConnectUri};

use url::Url;

use crate::error::{Error, Result};
use crate::nips::nip04;
use crate::nips::nip44::{self, ConversationKey};
use crate::types::event::{Keys, PublicKey};

/// Encrypt an envelope for the NIP-46 transport with the chosen scheme.
pub(crate) fn encrypt_content(
    keys: &Keys,
    recipient: &PublicKey,
    plaintext: &str,
    use_nip04: bool,
) -> Result<String> {
    if use_nip04 {
        Ok(nip04::encrypt(keys.secret_key(), recipient, plaintext)?)
    } else {
        let conversation = ConversationKey::derive(keys.secret_key(), recipient)?;
        Ok(nip44::encrypt(&conversation, plaintext)?)
    }
}

/// Decrypt a transport envelope, detecting the scheme by its framing
/// (`?iv=` marks NIP-04).
pub(crate) fn decrypt_content(
    keys: &Keys,
    sender: &PublicKey,
    content: &str,
) -> Result<String> {
    if nip04::looks_like_nip04(content) {
        Ok(nip04::decrypt(keys.secret_key(), sender, content)?)
    } else {
        let conversation = ConversationKey::derive(keys.secret_key(), sender)?;
        Ok(nip44::decrypt(&conversation, content)?)
    }
}

/// Validate an `auth_url` sent by a bunker before handing it to the
/// application: HTTPS only, no markup-dangerous characters, optionally
/// restricted to an allowlist of domains (exact match or subdomain).
pub fn validate_auth_url(url_str: &str, domain_allowlist: Option<&[String]>) -> Result<()> {
    if url_str
        .chars()
        .any(|c| matches!(c, '<' | '>' | '"' | '\''))
    {
        return Err(Error::invalid_input("auth url contains unsafe characters"));
    }
    let url = Url::parse(url_str)
        .map_err(|e| Error::invalid_input(format!("invalid auth url: {e}")))?;
    if url.scheme() != "https" {
        return Err(Error::invalid_input("auth url must be https"));
    }
    let Some(allowlist) = domain_allowlist else {
        return Ok(());
    };
    let host = url
        .host_str()
        .ok_or_else(|| Error::invalid_input("auth url has no host"))?;
    let allowed = allowlist
        .iter()
        .any(|domain| host == domain || host.ends_with(&format!(".{domain}")));
    if !allowed {
        return Err(Error::invalid_input(format!(
            "auth url domain {host} is not allowlisted"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_is_required() {
        validate_auth_url("https://bunker.example/authorize", None).unwrap();
        assert!(validate_auth_url("http://bunker.example/authorize", None).is_err());
        assert!(validate_auth_url("javascript:alert(1)", None).is_err());
    }

    #[test]
    fn markup_characters_are_rejected() {
        assert!(validate_auth_url("https://x.example/<script>", None).is_err());
        assert!(validate_auth_url("https://x.example/'inject'", None).is_err());
    }

    #[test]
    fn allowlist_matches_domain_and_subdomains() {
        let allow = vec!["bunker.example".to_string()];
        validate_auth_url("https://bunker.example/a", Some(&allow)).unwrap();
        validate_auth_url("https://auth.bunker.example/a", Some(&allow)).unwrap();
        assert!(validate_auth_url("https://evil.example/a", Some(&allow)).is_err());
        assert!(validate_auth_url("https://notbunker.example/a", Some(&allow)).is_err());
    }
}
