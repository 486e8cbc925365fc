//! Shared secret derivation: X25519 + nonce XOR + HKDF-SHA256.

use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::keys::{decode_nonce, decode_public_key, LocalKeyMaterial, KEY_LEN};
use super::CryptoError;
use crate::models::KeyMaterial;

/// AES-GCM IV length taken from the tail of the XORed nonces
pub const IV_LEN: usize = 12;

/// HKDF salt length taken from the head of the XORed nonces
pub const SALT_LEN: usize = 20;

/// AES-256 key length
pub const AES_KEY_LEN: usize = 32;

/// Symmetric key and IV for one transaction
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    key: [u8; AES_KEY_LEN],
    iv: [u8; IV_LEN],
}

impl SessionKey {
    pub fn key(&self) -> &[u8; AES_KEY_LEN] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

/// XOR the local nonce with the remote one, cycling the remote nonce when it
/// is shorter. The result has the local nonce's length.
pub fn xor_nonces(local: &[u8], remote: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if remote.is_empty() {
        return Err(CryptoError::Key("remote nonce is empty".into()));
    }
    Ok(local
        .iter()
        .zip(remote.iter().cycle())
        .map(|(a, b)| a ^ b)
        .collect())
}

/// Derive the session key from the HIU's stored material and the HIP's key
/// material as received in the notification.
pub fn derive_session_key(
    local: &LocalKeyMaterial,
    remote: &KeyMaterial,
) -> Result<SessionKey, CryptoError> {
    let remote_public = decode_public_key(&remote.dh_public_key.key_value)?;
    let remote_nonce = decode_nonce(&remote.nonce)?;

    derive_session_key_from_parts(
        local.private_key(),
        local.nonce(),
        &remote_public,
        &remote_nonce,
    )
}

/// Derive the session key from raw parts.
///
/// Works for either side of the exchange: the HIP calls it with its own
/// private key and nonce and the HIU's public key and nonce.
pub fn derive_session_key_from_parts(
    private_key: &[u8; KEY_LEN],
    local_nonce: &[u8],
    remote_public: &[u8; KEY_LEN],
    remote_nonce: &[u8],
) -> Result<SessionKey, CryptoError> {
    let mut xor_of_randoms = xor_nonces(local_nonce, remote_nonce)?;
    if xor_of_randoms.len() < SALT_LEN.max(IV_LEN) {
        return Err(CryptoError::Key(format!(
            "nonce too short: {} bytes (need at least {})",
            xor_of_randoms.len(),
            SALT_LEN
        )));
    }

    let secret = StaticSecret::from(*private_key);
    let shared = secret.diffie_hellman(&PublicKey::from(*remote_public));
    if !shared.was_contributory() {
        return Err(CryptoError::Key("remote public key is a low-order point".into()));
    }

    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&xor_of_randoms[xor_of_randoms.len() - IV_LEN..]);

    let hkdf = Hkdf::<Sha256>::new(Some(&xor_of_randoms[..SALT_LEN]), shared.as_bytes());
    let mut key = [0u8; AES_KEY_LEN];
    hkdf.expand(&[], &mut key)
        .map_err(|e| CryptoError::Key(format!("HKDF expand failed: {e}")))?;

    xor_of_randoms.zeroize();
    Ok(SessionKey { key, iv })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyMaterialGenerator;

    #[test]
    fn test_xor_cycles_short_remote() {
        let local = [0xffu8; 6];
        let remote = [0x0f, 0xf0];
        assert_eq!(
            xor_nonces(&local, &remote).unwrap(),
            vec![0xf0, 0x0f, 0xf0, 0x0f, 0xf0, 0x0f]
        );
        assert!(xor_nonces(&local, &[]).is_err());
    }

    #[test]
    fn test_both_sides_derive_same_key() {
        let generator = KeyMaterialGenerator::default();
        let (hiu, hiu_wire) = generator.generate();
        let (hip, hip_wire) = generator.generate();

        let at_hiu = derive_session_key(&hiu, &hip_wire).unwrap();
        let at_hip = derive_session_key(&hip, &hiu_wire).unwrap();

        assert_eq!(at_hiu.key(), at_hip.key());
        assert_eq!(at_hiu.iv(), at_hip.iv());
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let generator = KeyMaterialGenerator::default();
        let (hiu, _) = generator.generate();
        let (_, hip_wire) = generator.generate();

        let first = derive_session_key(&hiu, &hip_wire).unwrap();
        let second = derive_session_key(&hiu, &hip_wire).unwrap();
        assert_eq!(first.key(), second.key());
        assert_eq!(first.iv(), second.iv());
    }

    #[test]
    fn test_iv_is_tail_of_xor() {
        let private_key = [9u8; KEY_LEN];
        let remote_public = *x25519_dalek::PublicKey::from(&StaticSecret::from([5u8; KEY_LEN])).as_bytes();
        let local_nonce: Vec<u8> = (0..32).collect();
        let remote_nonce = vec![0xaa; 32];

        let session =
            derive_session_key_from_parts(&private_key, &local_nonce, &remote_public, &remote_nonce)
                .unwrap();
        let xor = xor_nonces(&local_nonce, &remote_nonce).unwrap();
        assert_eq!(session.iv().as_slice(), &xor[20..32]);
    }

    #[test]
    fn test_short_nonce_is_key_error() {
        let private_key = [9u8; KEY_LEN];
        let remote_public = [4u8; KEY_LEN];
        let result = derive_session_key_from_parts(&private_key, &[1u8; 8], &remote_public, &[2u8; 8]);
        assert!(matches!(result, Err(CryptoError::Key(_))));
    }

    #[test]
    fn test_low_order_point_rejected() {
        let private_key = [9u8; KEY_LEN];
        let result =
            derive_session_key_from_parts(&private_key, &[1u8; 32], &[0u8; KEY_LEN], &[2u8; 32]);
        assert!(matches!(result, Err(CryptoError::Key(_))));
    }
}
