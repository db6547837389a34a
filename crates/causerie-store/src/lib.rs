//! # causerie-store
//!
//! Local storage for Causerie. The session store persists its whole
//! conversation map as one snapshot per identity through [`Persistence`];
//! key pairs go through [`KeyStorage`]. Both seams are implemented by the
//! SQLite-backed [`Database`] and by the in-process [`MemoryStore`].

pub mod backup;
pub mod database;
pub mod keys;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod snapshots;

mod error;

pub use backup::{BackupPayload, ImportStats};
pub use database::Database;
pub use error::{Result, StoreError};
pub use keys::KeyStorage;
pub use memory::MemoryStore;
pub use models::*;
pub use snapshots::{Persistence, Snapshot};
