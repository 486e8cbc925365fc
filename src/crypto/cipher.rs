//! AES-256-GCM payload decryption.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine};

use super::secret::SessionKey;
use super::CryptoError;

/// GCM authentication tag length (16 bytes)
pub const TAG_LEN: usize = 16;

/// Decrypts the entries of one transaction with its session key.
///
/// Every call is independent; a failure leaves the decryptor usable for the
/// remaining entries.
#[derive(Debug, Clone)]
pub struct PayloadDecryptor {
    session: SessionKey,
}

impl PayloadDecryptor {
    pub fn new(session: SessionKey) -> Self {
        Self { session }
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.session.key()))
    }

    /// Decrypt a base64 ciphertext (tag appended) into UTF-8 text
    pub fn decrypt(&self, content: &str) -> Result<String, CryptoError> {
        let ciphertext = STANDARD
            .decode(content.trim())
            .map_err(|e| CryptoError::Decryption(format!("content is not valid base64: {e}")))?;

        let plaintext = self.decrypt_bytes(&ciphertext)?;
        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::Decryption("plaintext is not valid UTF-8".into()))
    }

    /// Decrypt raw ciphertext bytes
    pub fn decrypt_bytes(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < TAG_LEN {
            return Err(CryptoError::Decryption(format!(
                "ciphertext too short: {} bytes",
                ciphertext.len()
            )));
        }

        self.cipher()
            .decrypt(Nonce::from_slice(self.session.iv()), ciphertext)
            .map_err(|_| CryptoError::Decryption("authentication tag mismatch".into()))
    }

    /// Encrypt text into base64 ciphertext, the sending side of the protocol
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let ciphertext = self
            .cipher()
            .encrypt(Nonce::from_slice(self.session.iv()), plaintext.as_bytes())
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;
        Ok(STANDARD.encode(ciphertext))
    }
}
