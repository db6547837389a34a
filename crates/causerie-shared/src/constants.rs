/// Envelope format version. Bump when the sealed payload layout changes.
pub const PROTOCOL_VERSION: u8 = 1;

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size in bytes
pub const TAG_SIZE: usize = 16;

/// X25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Maximum message payload size in bytes (256 KiB)
pub const MAX_MESSAGE_SIZE: usize = 262_144;

/// Maximum attachment size in bytes (50 MiB)
pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// Content shown in place of a message deleted for everyone
pub const DELETED_MESSAGE_TOMBSTONE: &str = "This message was deleted";

/// Default delay before a simulated "delivered" acknowledgement, in milliseconds
pub const DEFAULT_DELIVERY_DELAY_MS: u64 = 1_000;

/// Default delay before a simulated "read" acknowledgement, in milliseconds
pub const DEFAULT_READ_DELAY_MS: u64 = 3_000;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_IDENTITY_KEY: &str = "causerie-identity-key-v1";
pub const KDF_CONTEXT_KEY_WRAP: &str = "causerie-key-wrap-v1";
pub const KDF_CONTEXT_BACKUP_KEY: &str = "causerie-backup-key-v1";
