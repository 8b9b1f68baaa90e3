//! NIP-46 connection strings.
//!
//! `bunker://<signer-pubkey>?relay=..&secret=..` (bunker-initiated) and
//! `nostrconnect://<client-pubkey>?relay=..&secret=..&perms=..&name=..`
//! (client-initiated).

use std::fmt;

use url::form_urlencoded;
use url::Url;

use crate::error::{Error, Result};
use crate::relays::utils::normalize_relay_url;
use crate::types::event::PublicKey;

fn parse_uri(input: &str, scheme: &str) -> Result<(PublicKey, Url)> {
    let url =
        Url::parse(input).map_err(|e| Error::invalid_input(format!("invalid {scheme} URI: {e}")))?;
    if url.scheme() != scheme {
        return Err(Error::invalid_input(format!(
            "expected {scheme}:// URI, got {}://",
            url.scheme()
        )));
    }
    let pubkey_hex = url
        .host_str()
        .ok_or_else(|| Error::invalid_input(format!("{scheme} URI lacks a pubkey")))?;
    let pubkey = PublicKey::from_hex(pubkey_hex)?;
    Ok((pubkey, url))
}

fn collect_relays(url: &Url) -> Result<Vec<String>> {
    let mut relays = Vec::new();
    for (key, value) in url.query_pairs() {
        if key == "relay" {
            relays.push(normalize_relay_url(&value)?);
        }
    }
    Ok(relays)
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Bunker-initiated connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BunkerUri {
    pub signer_pubkey: PublicKey,
    pub relays: Vec<String>,
    pub secret: Option<String>,
}

impl BunkerUri {
    pub fn parse(input: &str) -> Result<Self> {
        let (signer_pubkey, url) = parse_uri(input, "bunker")?;
        Ok(Self {
            signer_pubkey,
            relays: collect_relays(&url)?,
            secret: query_param(&url, "secret"),
        })
    }
}

impl fmt::Display for BunkerUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut query = form_urlencoded::Serializer::new(String::new());
        for relay in &self.relays {
            query.append_pair("relay", relay);
        }
        if let Some(secret) = &self.secret {
            query.append_pair("secret", secret);
        }
        let query = query.finish();
        if query.is_empty() {
            write!(f, "bunker://{}", self.signer_pubkey.to_hex())
        } else {
            write!(f, "bunker://{}?{}", self.signer_pubkey.to_hex(), query)
        }
    }
}

/// Client-initiated connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NostrConnectUri {
    pub client_pubkey: PublicKey,
    pub relays: Vec<String>,
    pub secret: Option<String>,
    pub perms: Vec<String>,
    pub name: Option<String>,
}

impl NostrConnectUri {
    pub fn parse(input: &str) -> Result<Self> {
        let (client_pubkey, url) = parse_uri(input, "nostrconnect")?;
        let perms = query_param(&url, "perms")
            .map(|csv| {
                csv.split(',')
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            client_pubkey,
            relays: collect_relays(&url)?,
            secret: query_param(&url, "secret"),
            perms,
            name: query_param(&url, "name"),
        })
    }
}

impl fmt::Display for NostrConnectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut query = form_urlencoded::Serializer::new(String::new());
        for relay in &self.relays {
            query.append_pair("relay", relay);
        }
        if let Some(secret) = &self.secret {
            query.append_pair("secret", secret);
        }
        if !self.perms.is_empty() {
            query.append_pair("perms", &self.perms.join(","));
        }
        if let Some(name) = &self.name {
            query.append_pair("name", name);
        }
        let query = query.finish();
        if query.is_empty() {
            write!(f, "nostrconnect://{}", self.client_pubkey.to_hex())
        } else {
            write!(f, "nostrconnect://{}?{}", self.client_pubkey.to_hex(), query)
        }
    }
}
