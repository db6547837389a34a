//! Whole-map snapshot persistence.
//!
//! The session store writes the entire conversation map after every
//! mutation; [`Persistence`] is the seam it writes through.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use causerie_shared::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Conversation;

/// Full serialized conversation map of one identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub saved_at: DateTime<Utc>,
    pub conversations: Vec<Conversation>,
}

impl Snapshot {
    pub fn new(conversations: Vec<Conversation>) -> Self {
        Self {
            saved_at: Utc::now(),
            conversations,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Key-value blob store for snapshots, keyed by local identity. Last write
/// wins; no conflict resolution.
pub trait Persistence: Send {
    fn load(&self, identity: &UserId) -> Result<Option<Snapshot>>;
    fn save(&self, identity: &UserId, snapshot: &Snapshot) -> Result<()>;
}

impl Persistence for Database {
    fn load(&self, identity: &UserId) -> Result<Option<Snapshot>> {
        let json: String = match self.conn().query_row(
            "SELECT json FROM snapshots WHERE identity_id = ?1",
            params![identity.as_str()],
            |row| row.get(0),
        ) {
            Ok(json) => json,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(other) => return Err(StoreError::Sqlite(other)),
        };

        Snapshot::from_json(&json).map(Some)
    }

    fn save(&self, identity: &UserId, snapshot: &Snapshot) -> Result<()> {
        let json = snapshot.to_json()?;
        self.conn().execute(
            "INSERT OR REPLACE INTO snapshots (identity_id, json, saved_at)
             VALUES (?1, ?2, ?3)",
            params![identity.as_str(), json, snapshot.saved_at.to_rfc3339()],
        )?;

        tracing::debug!(
            identity = %identity,
            conversations = snapshot.conversations.len(),
            bytes = json.len(),
            "snapshot saved"
        );
        Ok(())
    }
}

impl Database {
    /// When the last snapshot for `identity` was written, if ever.
    pub fn last_saved_at(&self, identity: &UserId) -> Result<DateTime<Utc>> {
        let ts_str: String = self
            .conn()
            .query_row(
                "SELECT saved_at FROM snapshots WHERE identity_id = ?1",
                params![identity.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        Ok(DateTime::parse_from_rfc3339(&ts_str)?.with_timezone(&Utc))
    }
}
