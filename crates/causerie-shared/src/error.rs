use thiserror::Error;

use crate::types::UserId;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Invalid public key: key agreement produced a non-contributory secret")]
    InvalidPublicKey,
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Public key does not match secret key")]
    KeyMismatch,
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Envelope is not addressed to {0}")]
    NotAddressed(UserId),

    #[error("Unsupported envelope version {0}")]
    UnsupportedVersion(u8),

    #[error("Payload exceeds maximum size ({size} > {max} bytes)")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Decrypted file does not match its content hash")]
    IntegrityMismatch,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl From<bincode::Error> for ProtocolError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
