//! Relay URL handling and normalization.
//!
//! The same normalization runs everywhere a URL enters the library
//! (relay construction, pool add/get/remove, client configuration), so
//! that `relay.example.com` and `wss://relay.example.com` name the same
//! connection.

use rustc_hash::FxHashSet;
use url::Url;

use crate::error::{Error, Result};

/// Normalize a relay URL: trim, default a missing scheme to `wss://`,
/// lowercase scheme and host, strip an empty path's trailing slash.
/// Rejects anything that is not `ws://` or `wss://`.
pub fn normalize_relay_url(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_input("relay URL is empty"));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else if let Some(rest) = trimmed.strip_prefix("//") {
        format!("wss://{rest}")
    } else {
        format!("wss://{trimmed}")
    };

    let parsed = Url::parse(&candidate)
        .map_err(|e| Error::invalid_input(format!("invalid relay URL {trimmed:?}: {e}")))?;

    // Url::parse lowercases the scheme, so the match is case-insensitive.
    match parsed.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(Error::invalid_input(format!(
                "relay URL must be ws:// or wss://, got {other}://"
            )))
        }
    }
    if parsed.host_str().is_none() {
        return Err(Error::invalid_input("relay URL has no host"));
    }

    let mut normalized = parsed.to_string();
    if parsed.path() == "/" && parsed.query().is_none() && normalized.ends_with('/') {
        normalized.pop();
    }
    Ok(normalized)
}

/// Normalize a list, dropping invalid entries and duplicates.
pub fn clean_relay_urls(relays: &[String]) -> Vec<String> {
    let mut seen = FxHashSet::default();
    relays
        .iter()
        .filter_map(|relay| normalize_relay_url(relay).ok())
        .filter(|url| seen.insert(url.clone()))
        .collect()
}
