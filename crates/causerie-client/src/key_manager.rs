//! Holds the local identity's key pair. The secret half never leaves this
//! module: envelopes and sealed files are opened here.

use chrono::Utc;
use rand::RngCore;
use tracing::{debug, info};

use causerie_shared::protocol::{self, SealedFile};
use causerie_shared::{Envelope, KeyPair, MessagePayload, UserId};
use causerie_store::{KeyStorage, StoreError};

use crate::error::{ClientError, Result};

struct ActiveIdentity {
    user_id: UserId,
    keys: KeyPair,
}

#[derive(Default)]
pub struct KeyManager {
    active: Option<ActiveIdentity>,
}

impl KeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a fresh key pair for `user_id`, persist it and make it active.
    /// Replaces whatever pair was active before.
    pub fn initialize(&mut self, user_id: &UserId, storage: &dyn KeyStorage) -> Result<[u8; 32]> {
        let mut seed = Vec::with_capacity(8 + 32);
        seed.extend_from_slice(&Utc::now().timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
        let mut random = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut random);
        seed.extend_from_slice(&random);

        let keys = KeyPair::derive(user_id, &seed);
        storage.store_key_pair(user_id, &keys.to_export())?;

        let public_key = keys.public_key_bytes();
        info!(user = %user_id, public_key = %hex::encode(public_key), "key pair initialized");

        self.active = Some(ActiveIdentity {
            user_id: user_id.clone(),
            keys,
        });
        Ok(public_key)
    }

    /// Reuse the key pair persisted for `user_id`, deriving one only if none
    /// exists yet.
    pub fn load_or_initialize(
        &mut self,
        user_id: &UserId,
        storage: &dyn KeyStorage,
    ) -> Result<[u8; 32]> {
        let Some(export) = storage.load_key_pair(user_id)? else {
            return self.initialize(user_id, storage);
        };

        let keys = KeyPair::from_export(&export)
            .map_err(|_| StoreError::CorruptKey(user_id.to_string()))?;
        let public_key = keys.public_key_bytes();
        debug!(user = %user_id, "key pair loaded");

        self.active = Some(ActiveIdentity {
            user_id: user_id.clone(),
            keys,
        });
        Ok(public_key)
    }

    /// Public half of the active pair, `None` before initialization.
    pub fn public_key(&self) -> Option<[u8; 32]> {
        self.active.as_ref().map(|a| a.keys.public_key_bytes())
    }

    pub fn identity(&self) -> Result<&UserId> {
        self.active
            .as_ref()
            .map(|a| &a.user_id)
            .ok_or(ClientError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.active.is_some()
    }

    /// Open an envelope addressed to the active identity.
    pub fn open(&self, envelope: &Envelope) -> Result<MessagePayload> {
        let active = self.active.as_ref().ok_or(ClientError::NotInitialized)?;
        Ok(protocol::open(envelope, &active.user_id, &active.keys)?)
    }

    /// Open the entry addressed to `recipient_id` with the local secret.
    /// Fails with `NotAddressed` when there is no such entry, and with a
    /// crypto error when the entry was wrapped for someone else's key.
    pub fn open_as(&self, envelope: &Envelope, recipient_id: &UserId) -> Result<MessagePayload> {
        let active = self.active.as_ref().ok_or(ClientError::NotInitialized)?;
        Ok(protocol::open(envelope, recipient_id, &active.keys)?)
    }

    pub fn open_file(&self, sealed: &SealedFile) -> Result<Vec<u8>> {
        let active = self.active.as_ref().ok_or(ClientError::NotInitialized)?;
        Ok(protocol::open_file(sealed, &active.user_id, &active.keys)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causerie_shared::protocol::{seal, EnvelopeHeader};
    use causerie_shared::{MessageId, MessageType, Recipient};
    use causerie_store::MemoryStore;

    fn envelope_for(user: &str, public_key: [u8; 32]) -> Envelope {
        let header = EnvelopeHeader {
            message_id: MessageId::new(),
            conversation_id: "direct_u1_u2".into(),
            sender_id: "u1".into(),
            message_type: MessageType::Text,
            timestamp: Utc::now(),
        };
        let payload = MessagePayload {
            content: "hello".into(),
            message_type: MessageType::Text,
            attachment: None,
        };
        let recipient = Recipient {
            id: user.into(),
            public_key,
        };
        seal(header, &payload, &[recipient]).unwrap()
    }

    #[test]
    fn uninitialized_manager_refuses_everything() {
        let manager = KeyManager::new();
        assert!(manager.public_key().is_none());
        assert!(matches!(manager.identity(), Err(ClientError::NotInitialized)));

        let envelope = envelope_for("u2", [9u8; 32]);
        assert!(matches!(manager.open(&envelope), Err(ClientError::NotInitialized)));
    }

    #[test]
    fn initialize_persists_and_activates() {
        let storage = MemoryStore::new();
        let mut manager = KeyManager::new();
        let me = UserId::from("u2");

        let public_key = manager.initialize(&me, &storage).unwrap();
        assert_eq!(manager.public_key(), Some(public_key));
        assert_eq!(manager.identity().unwrap(), &me);

        let stored = storage.load_key_pair(&me).unwrap().unwrap();
        assert_eq!(stored.public_key, public_key);

        let opened = manager.open(&envelope_for("u2", public_key)).unwrap();
        assert_eq!(opened.content, "hello");
    }

    #[test]
    fn reinitialize_replaces_pair() {
        let storage = MemoryStore::new();
        let mut manager = KeyManager::new();
        let me = UserId::from("u1");

        let first = manager.initialize(&me, &storage).unwrap();
        let second = manager.initialize(&me, &storage).unwrap();
        assert_ne!(first, second);
        assert_eq!(manager.public_key(), Some(second));
    }

    #[test]
    fn load_or_initialize_reuses_stored_pair() {
        let storage = MemoryStore::new();
        let me = UserId::from("u1");

        let created = KeyManager::new().load_or_initialize(&me, &storage).unwrap();
        let reloaded = KeyManager::new().load_or_initialize(&me, &storage).unwrap();
        assert_eq!(created, reloaded);
    }

    #[test]
    fn mismatched_stored_pair_is_rejected() {
        let storage = MemoryStore::new();
        let me = UserId::from("u1");
        let mut export = KeyPair::generate().to_export();
        export.public_key = [0u8; 32];
        storage.store_key_pair(&me, &export).unwrap();

        let result = KeyManager::new().load_or_initialize(&me, &storage);
        assert!(matches!(result, Err(ClientError::Store(StoreError::CorruptKey(_)))));
    }

    #[test]
    fn envelope_for_someone_else_is_not_addressed() {
        let storage = MemoryStore::new();
        let mut manager = KeyManager::new();
        manager.initialize(&UserId::from("u3"), &storage).unwrap();

        let envelope = envelope_for("u2", KeyPair::generate().public_key_bytes());
        assert!(matches!(
            manager.open(&envelope),
            Err(ClientError::Protocol(causerie_shared::ProtocolError::NotAddressed(_)))
        ));
    }
}
