//! NIP-46 request/response envelope: JSON-RPC-shaped messages carried
//! as the NIP-44/NIP-04 encrypted content of kind-24133 events.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const METHOD_CONNECT: &str = "connect";
pub const METHOD_GET_PUBLIC_KEY: &str = "get_public_key";
pub const METHOD_SIGN_EVENT: &str = "sign_event";
pub const METHOD_PING: &str = "ping";
pub const METHOD_NIP04_ENCRYPT: &str = "nip04_encrypt";
pub const METHOD_NIP04_DECRYPT: &str = "nip04_decrypt";
pub const METHOD_NIP44_ENCRYPT: &str = "nip44_encrypt";
pub const METHOD_NIP44_DECRYPT: &str = "nip44_decrypt";

/// The bunker signals a pending authorization by this result value; the
/// error field then carries the URL to open.
pub const RESULT_AUTH_URL: &str = "auth_url";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Request {
    pub id: String,
    pub method: String,
    pub params: Vec<String>,
}

impl Request {
    /// A request with a fresh random id.
    pub fn new(method: &str, params: Vec<String>) -> Self {
        let mut bytes = [0u8; 16];
        getrandom::getrandom(&mut bytes).expect("OS randomness unavailable");
        Self {
            id: hex::encode(bytes),
            method: method.to_string(),
            params,
        }
    }

    pub fn as_json(&self) -> String {
        serde_json::to_string(self).expect("request serialization is infallible")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::invalid_input(format!("bad NIP-46 request: {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Response {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: &str, result: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn error(id: &str, message: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            result: None,
            error: Some(message.into()),
        }
    }

    pub fn auth_url(id: &str, url: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            result: Some(RESULT_AUTH_URL.to_string()),
            error: Some(url.into()),
        }
    }

    pub fn is_auth_url(&self) -> bool {
        self.result.as_deref() == Some(RESULT_AUTH_URL)
    }

    pub fn as_json(&self) -> String {
        serde_json::to_string(self).expect("response serialization is infallible")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::invalid_input(format!("bad NIP-46 response: {e}")))
    }
}
