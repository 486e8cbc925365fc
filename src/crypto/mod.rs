//! Key exchange and payload decryption for pushed health information
//!
//! # Protocol
//!
//! Each data-flow request carries a fresh X25519 public key and a 32-byte
//! nonce. The HIP answers with its own public key and nonce and encrypts
//! every entry with the same session key:
//!
//! 1. `shared = X25519(local_private, remote_public)`
//! 2. `xor = local_nonce XOR remote_nonce` (remote nonce cycled)
//! 3. `iv = xor[len - 12..]`
//! 4. `key = HKDF-SHA256(ikm = shared, salt = xor[..20], info = "")`, 32 bytes
//! 5. `plaintext = AES-256-GCM-decrypt(key, iv, ciphertext || tag)`
//!
//! Local key material lives only until the transaction is processed and is
//! zeroized when dropped.

pub mod cipher;
pub mod keys;
pub mod secret;

pub use cipher::PayloadDecryptor;
pub use keys::{decode_nonce, decode_public_key, KeyMaterialGenerator, LocalKeyMaterial, NONCE_LEN};
pub use secret::{derive_session_key, derive_session_key_from_parts, xor_nonces, SessionKey};

/// Errors raised by the key exchange and AEAD layers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Malformed, undecodable or unusable key material
    #[error("Key error: {0}")]
    Key(String),

    /// Tag verification failure or malformed ciphertext
    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),
}
