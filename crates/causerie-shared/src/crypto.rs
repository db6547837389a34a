use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::constants::{KDF_CONTEXT_KEY_WRAP, NONCE_SIZE, PUBKEY_SIZE, SYMMETRIC_KEY_SIZE, TAG_SIZE};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; SYMMETRIC_KEY_SIZE];

/// A content key sealed for one recipient: an ephemeral X25519 public key and
/// the content key encrypted under the ECDH-derived wrapping key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WrappedKey {
    pub ephemeral_public: [u8; PUBKEY_SIZE],
    /// nonce || ciphertext
    pub ciphertext: Vec<u8>,
}

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Seal `content_key` so that only the holder of the secret matching
/// `recipient_public` can recover it. A fresh ephemeral key is used per call.
pub fn wrap_key(
    recipient_public: &[u8; 32],
    content_key: &SymmetricKey,
    aad: &[u8],
) -> Result<WrappedKey, CryptoError> {
    let recipient = PublicKey::from(*recipient_public);
    let ephemeral = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);

    let shared = ephemeral.diffie_hellman(&recipient);
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidPublicKey);
    }

    let wrapping_key = derive_wrapping_key(
        shared.as_bytes(),
        ephemeral_public.as_bytes(),
        recipient.as_bytes(),
    );
    let ciphertext = encrypt(&wrapping_key, content_key, aad)?;

    Ok(WrappedKey {
        ephemeral_public: ephemeral_public.to_bytes(),
        ciphertext,
    })
}

/// Recover a content key sealed with [`wrap_key`].
pub fn unwrap_key(
    secret: &StaticSecret,
    wrapped: &WrappedKey,
    aad: &[u8],
) -> Result<SymmetricKey, CryptoError> {
    let ephemeral_public = PublicKey::from(wrapped.ephemeral_public);
    let own_public = PublicKey::from(secret);

    let shared = secret.diffie_hellman(&ephemeral_public);
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidPublicKey);
    }

    let wrapping_key = derive_wrapping_key(
        shared.as_bytes(),
        ephemeral_public.as_bytes(),
        own_public.as_bytes(),
    );
    let plaintext = decrypt(&wrapping_key, &wrapped.ciphertext, aad)?;

    if plaintext.len() != 32 {
        return Err(CryptoError::InvalidKeyLength);
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&plaintext);
    Ok(key)
}

// BLAKE3 KDF with domain separation; both public keys are bound in so a
// wrapped key cannot be replayed against another recipient.
fn derive_wrapping_key(
    shared_secret: &[u8; 32],
    ephemeral_public: &[u8; 32],
    recipient_public: &[u8; 32],
) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_KEY_WRAP);
    hasher.update(shared_secret);
    hasher.update(ephemeral_public);
    hasher.update(recipient_public);
    *hasher.finalize().as_bytes()
}

pub fn derive_key_from_passphrase(passphrase: &[u8], context: &str) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(passphrase);
    let hash = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash.as_bytes()[..32]);
    key
}

/// BLAKE3 hash of raw content, hex-encoded.
pub fn content_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = generate_symmetric_key();
        let plaintext = b"On se fait une causerie ?";

        let encrypted = encrypt(&key, plaintext, b"ctx").unwrap();
        let decrypted = decrypt(&key, &encrypted, b"ctx").unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = generate_symmetric_key();
        let key2 = generate_symmetric_key();

        let encrypted = encrypt(&key1, b"Secret message", b"").unwrap();
        assert!(decrypt(&key2, &encrypted, b"").is_err());
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = generate_symmetric_key();
        let encrypted = encrypt(&key, b"bound", b"message-1").unwrap();
        assert!(decrypt(&key, &encrypted, b"message-2").is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = generate_symmetric_key();

        let mut encrypted = encrypt(&key, b"Important data", b"").unwrap();
        let len = encrypted.len();
        encrypted[len - 1] ^= 0xFF;

        assert!(decrypt(&key, &encrypted, b"").is_err());
    }

    #[test]
    fn test_empty_data_fails() {
        let key = generate_symmetric_key();
        assert!(decrypt(&key, &[], b"").is_err());
    }

    #[test]
    fn test_nonce_prepended() {
        let key = generate_symmetric_key();
        let encrypted = encrypt(&key, b"test", b"").unwrap();
        // nonce (24) + ciphertext (4 + 16 tag)
        assert_eq!(encrypted.len(), NONCE_SIZE + 4 + 16);
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret).to_bytes();
        let content_key = generate_symmetric_key();

        let wrapped = wrap_key(&public, &content_key, b"msg").unwrap();
        let recovered = unwrap_key(&secret, &wrapped, b"msg").unwrap();

        assert_eq!(recovered, content_key);
    }

    #[test]
    fn test_unwrap_with_other_secret_fails() {
        let alice = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let mallory = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let content_key = generate_symmetric_key();

        let wrapped = wrap_key(&PublicKey::from(&alice).to_bytes(), &content_key, b"").unwrap();
        assert!(unwrap_key(&mallory, &wrapped, b"").is_err());
    }

    #[test]
    fn test_low_order_public_key_rejected() {
        let content_key = generate_symmetric_key();
        assert!(matches!(
            wrap_key(&[0u8; 32], &content_key, b""),
            Err(CryptoError::InvalidPublicKey)
        ));
    }

    #[test]
    fn test_passphrase_key_derivation_deterministic() {
        let key1 = derive_key_from_passphrase(b"correct horse", "ctx-a");
        let key2 = derive_key_from_passphrase(b"correct horse", "ctx-a");
        let key3 = derive_key_from_passphrase(b"correct horse", "ctx-b");

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
    }
}
