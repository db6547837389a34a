use chrono::Utc;
use rusqlite::params;

use causerie_shared::identity::KeyPairExport;
use causerie_shared::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Where the key manager keeps the one key pair of each local identity.
pub trait KeyStorage {
    fn store_key_pair(&self, identity: &UserId, key_pair: &KeyPairExport) -> Result<()>;
    fn load_key_pair(&self, identity: &UserId) -> Result<Option<KeyPairExport>>;
}

impl KeyStorage for Database {
    fn store_key_pair(&self, identity: &UserId, key_pair: &KeyPairExport) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO key_pairs (identity_id, secret_key, public_key, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                identity.as_str(),
                hex::encode(key_pair.secret_key),
                hex::encode(key_pair.public_key),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn load_key_pair(&self, identity: &UserId) -> Result<Option<KeyPairExport>> {
        let (secret_hex, public_hex): (String, String) = match self.conn().query_row(
            "SELECT secret_key, public_key FROM key_pairs WHERE identity_id = ?1",
            params![identity.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        ) {
            Ok(pair) => pair,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(other) => return Err(StoreError::Sqlite(other)),
        };

        Ok(Some(KeyPairExport {
            secret_key: decode_key(identity, &secret_hex)?,
            public_key: decode_key(identity, &public_hex)?,
        }))
    }
}

fn decode_key(identity: &UserId, hex_str: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_str)?;
    bytes
        .try_into()
        .map_err(|_| StoreError::CorruptKey(identity.to_string()))
}
