use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite / SQLCipher error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Snapshot or backup JSON could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Hex decoding error.
    #[error("Hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),

    /// Stored key material has the wrong shape.
    #[error("Corrupt key material for identity {0}")]
    CorruptKey(String),

    /// Backup encryption failed.
    #[error("Crypto error: {0}")]
    Crypto(#[from] causerie_shared::CryptoError),

    /// Backup could not be opened.
    #[error("Backup error: {0}")]
    Backup(String),

    /// The in-memory store's lock was poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    LockPoisoned,

    /// Injected failure (in-memory store only).
    #[error("Simulated storage failure")]
    Unavailable,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
