//! Wire types for pushed health information
//!
//! These mirror the JSON a HIP posts to the notification endpoint and the
//! key material the HIU sends out with a data-flow request.

use serde::{Deserialize, Serialize};

/// Default crypto algorithm label for key material
pub const CRYPTO_ALG: &str = "ECDH";

/// Curve label for key material
pub const CURVE: &str = "curve25519";

/// Public key parameter label
pub const KEY_PARAMETERS: &str = "Curve25519/32byte random key";

/// Key material exchanged once per transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMaterial {
    pub crypto_alg: String,
    pub curve: String,
    pub dh_public_key: DhPublicKey,
    /// Base64 encoded random nonce
    pub nonce: String,
}

/// Diffie-Hellman public key descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DhPublicKey {
    /// Expiry as an ISO-8601 timestamp
    pub expiry: String,
    pub parameters: String,
    /// Base64 encoded public key
    pub key_value: String,
}

/// One unit of pushed content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Base64 ciphertext (AES-GCM, tag appended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Link to already access-controlled content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,

    /// Media type of the plaintext, usually `application/fhir+json`
    pub media: String,

    #[serde(default)]
    pub checksum: String,

    /// Care context this entry belongs to, when the HIP supplies it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub care_context_reference: Option<String>,
}

impl Entry {
    /// Which delivery mode this entry uses, if it is well formed.
    pub fn delivery(&self) -> Option<Delivery<'_>> {
        match (self.content.as_deref(), self.link.as_deref()) {
            (Some(content), None) => Some(Delivery::Inline(content)),
            (None, Some(link)) => Some(Delivery::Link(link)),
            _ => None,
        }
    }
}

/// How an entry's content reaches the HIU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery<'a> {
    /// Encrypted content carried in the notification
    Inline(&'a str),
    /// Plaintext content behind a URL
    Link(&'a str),
}

/// A HIP push for one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub transaction_id: String,

    #[serde(default)]
    pub entries: Vec<Entry>,

    /// The sender's half of the key exchange
    #[serde(rename = "keyMaterial")]
    pub sender_key_material: KeyMaterial,
}

impl NotificationPayload {
    /// Check the payload is processable at all
    pub fn validate(&self) -> Result<(), String> {
        if self.transaction_id.trim().is_empty() {
            return Err("transactionId is required".to_string());
        }
        if self.entries.is_empty() {
            return Err("at least one entry is required".to_string());
        }
        Ok(())
    }
}
