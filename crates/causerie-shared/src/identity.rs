use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::constants::KDF_CONTEXT_IDENTITY_KEY;
use crate::crypto::{self, SymmetricKey, WrappedKey};
use crate::error::{CryptoError, IdentityError};
use crate::types::UserId;

/// The X25519 key pair of one local identity. Others wrap content keys to
/// the public half; only this pair can unwrap them.
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
}

/// Serializable format for storing/exporting a key pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPairExport {
    pub secret_key: [u8; 32],
    pub public_key: [u8; 32],
}

impl KeyPair {
    /// Derive a key pair from an identity id and a seed. The same inputs
    /// always give the same pair.
    pub fn derive(user_id: &UserId, seed: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_IDENTITY_KEY);
        hasher.update(user_id.as_str().as_bytes());
        hasher.update(&(seed.len() as u64).to_le_bytes());
        hasher.update(seed);
        Self::from_secret_bytes(hasher.finalize().as_bytes())
    }

    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(rand::rngs::OsRng),
        }
    }

    /// Restore a key pair from secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self {
            secret: StaticSecret::from(*secret),
        }
    }

    /// Restore a key pair from a serialized export, checking that the stored
    /// public half still matches the secret.
    pub fn from_export(export: &KeyPairExport) -> Result<Self, IdentityError> {
        let pair = Self::from_secret_bytes(&export.secret_key);
        if pair.public_key_bytes() != export.public_key {
            return Err(IdentityError::KeyMismatch);
        }
        Ok(pair)
    }

    /// Get the raw public key bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        PublicKey::from(&self.secret).to_bytes()
    }

    /// Export key pair for serialization
    pub fn to_export(&self) -> KeyPairExport {
        KeyPairExport {
            secret_key: self.secret.to_bytes(),
            public_key: self.public_key_bytes(),
        }
    }

    /// Recover a content key that was wrapped to this pair's public key.
    pub fn unwrap_content_key(
        &self,
        wrapped: &WrappedKey,
        aad: &[u8],
    ) -> Result<SymmetricKey, CryptoError> {
        crypto::unwrap_key(&self.secret, wrapped, aad)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish_non_exhaustive()
    }
}

/// Parse a hex-encoded 32-byte public key.
pub fn parse_public_key(hex_str: &str) -> Result<[u8; 32], IdentityError> {
    let bytes = hex::decode(hex_str.trim()).map_err(|_| IdentityError::InvalidKeyBytes)?;
    bytes.try_into().map_err(|_| IdentityError::InvalidKeyBytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{generate_symmetric_key, wrap_key};

    #[test]
    fn test_derivation_deterministic() {
        let id = UserId::from("u1");
        let a = KeyPair::derive(&id, b"seed-1");
        let b = KeyPair::derive(&id, b"seed-1");
        assert_eq!(a.public_key_bytes(), b.public_key_bytes());
    }

    #[test]
    fn test_derivation_depends_on_identity_and_seed() {
        let a = KeyPair::derive(&UserId::from("u1"), b"seed");
        let b = KeyPair::derive(&UserId::from("u2"), b"seed");
        let c = KeyPair::derive(&UserId::from("u1"), b"other-seed");
        assert_ne!(a.public_key_bytes(), b.public_key_bytes());
        assert_ne!(a.public_key_bytes(), c.public_key_bytes());
    }

    #[test]
    fn test_export_roundtrip() {
        let pair = KeyPair::generate();
        let restored = KeyPair::from_export(&pair.to_export()).unwrap();
        assert_eq!(pair.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn test_export_with_wrong_public_key_rejected() {
        let mut export = KeyPair::generate().to_export();
        export.public_key = KeyPair::generate().public_key_bytes();
        assert!(matches!(
            KeyPair::from_export(&export),
            Err(IdentityError::KeyMismatch)
        ));
    }

    #[test]
    fn test_unwrap_content_key() {
        let pair = KeyPair::generate();
        let content_key = generate_symmetric_key();
        let wrapped = wrap_key(&pair.public_key_bytes(), &content_key, b"aad").unwrap();
        assert_eq!(pair.unwrap_content_key(&wrapped, b"aad").unwrap(), content_key);
    }

    #[test]
    fn test_parse_public_key() {
        let pair = KeyPair::generate();
        let hex_key = hex::encode(pair.public_key_bytes());
        assert_eq!(parse_public_key(&hex_key).unwrap(), pair.public_key_bytes());
        assert!(parse_public_key("abcd").is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let pair = KeyPair::generate();
        let secret_hex = hex::encode(pair.to_export().secret_key);
        assert!(!format!("{pair:?}").contains(&secret_hex));
    }
}
