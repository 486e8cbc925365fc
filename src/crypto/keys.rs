//! Per-transaction key material generation and decoding.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::CryptoError;
use crate::models::{DhPublicKey, KeyMaterial, CRYPTO_ALG, CURVE, KEY_PARAMETERS};

// =============================================================================
// Constants
// =============================================================================

/// Random nonce length sent with every key material (32 bytes)
pub const NONCE_LEN: usize = 32;

/// X25519 key length (32 bytes)
pub const KEY_LEN: usize = 32;

/// DER prefix of an X.509 SubjectPublicKeyInfo wrapping an X25519 key
const X25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x6e, 0x03, 0x21, 0x00,
];

// =============================================================================
// Local key material
// =============================================================================

/// The HIU's half of a key exchange.
///
/// Held only for the lifetime of one transaction; the bytes are wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct LocalKeyMaterial {
    #[serde(with = "base64_key")]
    private_key: [u8; KEY_LEN],
    #[serde(with = "base64_key")]
    public_key: [u8; KEY_LEN],
    #[serde(with = "base64_key")]
    nonce: [u8; NONCE_LEN],
}

impl LocalKeyMaterial {
    /// Rebuild key material from stored parts
    pub fn from_parts(
        private_key: [u8; KEY_LEN],
        public_key: [u8; KEY_LEN],
        nonce: [u8; NONCE_LEN],
    ) -> Self {
        Self {
            private_key,
            public_key,
            nonce,
        }
    }

    pub fn private_key(&self) -> &[u8; KEY_LEN] {
        &self.private_key
    }

    pub fn public_key(&self) -> &[u8; KEY_LEN] {
        &self.public_key
    }

    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    /// The wire form sent to the HIP with the data-flow request
    pub fn to_key_material(&self, expiry: chrono::DateTime<Utc>) -> KeyMaterial {
        KeyMaterial {
            crypto_alg: CRYPTO_ALG.to_string(),
            curve: CURVE.to_string(),
            dh_public_key: DhPublicKey {
                expiry: expiry.to_rfc3339(),
                parameters: KEY_PARAMETERS.to_string(),
                key_value: STANDARD.encode(self.public_key),
            },
            nonce: STANDARD.encode(self.nonce),
        }
    }
}

impl std::fmt::Debug for LocalKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeyMaterial")
            .field("public_key", &STANDARD.encode(self.public_key))
            .field("private_key", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Generation
// =============================================================================

/// Generates fresh key material for each outgoing data-flow request
#[derive(Debug, Clone)]
pub struct KeyMaterialGenerator {
    key_lifetime: Duration,
}

impl Default for KeyMaterialGenerator {
    fn default() -> Self {
        Self {
            key_lifetime: Duration::hours(24),
        }
    }
}

impl KeyMaterialGenerator {
    pub fn new(key_lifetime: Duration) -> Self {
        Self { key_lifetime }
    }

    /// How long generated keys are advertised (and kept) for
    pub fn key_lifetime(&self) -> Duration {
        self.key_lifetime
    }

    /// Generate a keypair and nonce.
    ///
    /// Returns the local half (to be stored until the HIP pushes data) and
    /// the wire half (to be sent with the request).
    pub fn generate(&self) -> (LocalKeyMaterial, KeyMaterial) {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let local = LocalKeyMaterial {
            private_key: secret.to_bytes(),
            public_key: public.to_bytes(),
            nonce,
        };
        let wire = local.to_key_material(Utc::now() + self.key_lifetime);
        (local, wire)
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode a base64 public key.
///
/// Accepts the raw 32-byte X25519 key or its X.509 SubjectPublicKeyInfo
/// encoding.
pub fn decode_public_key(encoded: &str) -> Result<[u8; KEY_LEN], CryptoError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CryptoError::Key(format!("public key is not valid base64: {e}")))?;

    let raw = match bytes.len() {
        KEY_LEN => &bytes[..],
        44 if bytes.starts_with(&X25519_SPKI_PREFIX) => &bytes[X25519_SPKI_PREFIX.len()..],
        n => {
            return Err(CryptoError::Key(format!(
                "unsupported public key length: {n} bytes"
            )))
        }
    };

    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(raw);
    Ok(key)
}

/// Decode a base64 nonce
pub fn decode_nonce(encoded: &str) -> Result<Vec<u8>, CryptoError> {
    let nonce = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CryptoError::Key(format!("nonce is not valid base64: {e}")))?;

    if nonce.is_empty() {
        return Err(CryptoError::Key("nonce is empty".into()));
    }
    Ok(nonce)
}

/// Base64 encoding for fixed-size key arrays
mod base64_key {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = STANDARD
            .decode(&s)
            .map_err(|e| serde::de::Error::custom(format!("base64 decode error: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom(format!("expected {N} bytes")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_key_material() {
        let generator = KeyMaterialGenerator::default();
        let (local, wire) = generator.generate();

        assert_eq!(wire.crypto_alg, "ECDH");
        assert_eq!(wire.curve, "curve25519");
        assert_eq!(decode_public_key(&wire.dh_public_key.key_value).unwrap(), *local.public_key());
        assert_eq!(decode_nonce(&wire.nonce).unwrap(), local.nonce().to_vec());

        // Public key must belong to the private key
        let derived = PublicKey::from(&StaticSecret::from(*local.private_key()));
        assert_eq!(derived.to_bytes(), *local.public_key());
    }

    #[test]
    fn test_generated_material_is_fresh() {
        let generator = KeyMaterialGenerator::default();
        let (a, _) = generator.generate();
        let (b, _) = generator.generate();

        assert_ne!(a.private_key(), b.private_key());
        assert_ne!(a.nonce(), b.nonce());
    }

    #[test]
    fn test_decode_spki_public_key() {
        let raw = [7u8; KEY_LEN];
        let mut spki = X25519_SPKI_PREFIX.to_vec();
        spki.extend_from_slice(&raw);

        assert_eq!(decode_public_key(&STANDARD.encode(&spki)).unwrap(), raw);
        assert_eq!(decode_public_key(&STANDARD.encode(raw)).unwrap(), raw);
    }

    #[test]
    fn test_decode_rejects_malformed_keys() {
        assert!(matches!(decode_public_key("not base64!"), Err(CryptoError::Key(_))));
        assert!(matches!(
            decode_public_key(&STANDARD.encode([1u8; 16])),
            Err(CryptoError::Key(_))
        ));
        assert!(matches!(decode_nonce(""), Err(CryptoError::Key(_))));
    }

    #[test]
    fn test_stored_roundtrip_and_redacted_debug() {
        let (local, _) = KeyMaterialGenerator::default().generate();
        let json = serde_json::to_string(&local).unwrap();
        let restored: LocalKeyMaterial = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.private_key(), local.private_key());
        assert!(format!("{:?}", local).contains("<redacted>"));
    }
}
