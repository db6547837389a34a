//! v001 -- Initial schema creation.
//!
//! Creates the two core tables: `snapshots` (one conversation-map blob per
//! local identity) and `key_pairs` (one X25519 key pair per local identity).

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Snapshots
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS snapshots (
    identity_id TEXT PRIMARY KEY NOT NULL,   -- local user id
    json        TEXT NOT NULL,               -- serialized Snapshot
    saved_at    TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Key pairs
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS key_pairs (
    identity_id TEXT PRIMARY KEY NOT NULL,   -- local user id
    secret_key  TEXT NOT NULL,               -- hex-encoded 32-byte X25519 secret
    public_key  TEXT NOT NULL,               -- hex-encoded 32-byte X25519 public
    created_at  TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
