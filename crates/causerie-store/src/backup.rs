use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use causerie_shared::constants::KDF_CONTEXT_BACKUP_KEY;
use causerie_shared::crypto;
use causerie_shared::{ConversationId, UserId};

use crate::error::{Result, StoreError};
use crate::models::Conversation;

/// Full backup payload: serialized to JSON, then sealed under a key derived
/// from the user's passphrase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupPayload {
    pub created_at: DateTime<Utc>,
    /// App version that produced the backup
    pub version: String,
    pub identity_id: UserId,
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportStats {
    pub conversations_imported: usize,
    pub messages_imported: usize,
}

impl BackupPayload {
    pub fn new(identity_id: UserId, conversations: Vec<Conversation>) -> Self {
        Self {
            created_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            identity_id,
            conversations,
        }
    }

    /// Encrypt to a base64 string that can be written anywhere.
    pub fn seal(&self, passphrase: &str) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        let key = crypto::derive_key_from_passphrase(passphrase.as_bytes(), KDF_CONTEXT_BACKUP_KEY);
        let sealed = crypto::encrypt(&key, &json, self.identity_id.as_str().as_bytes())?;

        // identity id travels in clear so `open` can rebuild the AAD
        let framed = SealedBackup {
            identity_id: self.identity_id.clone(),
            data: BASE64.encode(sealed),
        };
        Ok(serde_json::to_string(&framed)?)
    }

    pub fn open(sealed: &str, passphrase: &str) -> Result<Self> {
        let framed: SealedBackup = serde_json::from_str(sealed)?;
        let data = BASE64
            .decode(&framed.data)
            .map_err(|e| StoreError::Backup(e.to_string()))?;

        let key = crypto::derive_key_from_passphrase(passphrase.as_bytes(), KDF_CONTEXT_BACKUP_KEY);
        let json = crypto::decrypt(&key, &data, framed.identity_id.as_str().as_bytes())
            .map_err(|_| StoreError::Backup("wrong passphrase or corrupted backup".into()))?;

        let payload: Self = serde_json::from_slice(&json)?;
        if payload.identity_id != framed.identity_id {
            return Err(StoreError::Backup("identity mismatch".into()));
        }
        Ok(payload)
    }

    /// Merge into an existing conversation map. Unknown conversations are
    /// added whole; known ones only gain the messages they lack. Nothing
    /// already present is overwritten.
    pub fn merge_into(&self, target: &mut HashMap<ConversationId, Conversation>) -> ImportStats {
        let mut stats = ImportStats::default();

        for conversation in &self.conversations {
            match target.get_mut(&conversation.id) {
                None => {
                    stats.conversations_imported += 1;
                    stats.messages_imported += conversation.messages.len();
                    target.insert(conversation.id.clone(), conversation.clone());
                }
                Some(existing) => {
                    let mut added = 0;
                    for message in &conversation.messages {
                        if existing.message(message.id).is_none() {
                            existing.messages.push(message.clone());
                            added += 1;
                        }
                    }
                    if added > 0 {
                        existing.messages.sort_by_key(|m| m.timestamp);
                        existing.refresh_preview();
                        stats.messages_imported += added;
                    }
                }
            }
        }

        stats
    }
}

#[derive(Serialize, Deserialize)]
struct SealedBackup {
    identity_id: UserId,
    data: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Message, Participant};
    use causerie_shared::MessageType;

    fn conversation_with(contents: &[&str]) -> Conversation {
        let mut conv = Conversation::direct(
            Participant::new("u1", "Une", [1u8; 32]),
            Participant::new("u2", "Deux", [2u8; 32]),
        );
        for content in contents {
            let id = conv.id.clone();
            conv.push_message(Message::new(id, "u1".into(), content.to_string(), MessageType::Text, None));
        }
        conv
    }

    #[test]
    fn seal_and_open() {
        let payload = BackupPayload::new("u1".into(), vec![conversation_with(&["hello"])]);
        let sealed = payload.seal("correct horse").unwrap();

        assert!(!sealed.contains("hello"));
        let opened = BackupPayload::open(&sealed, "correct horse").unwrap();
        assert_eq!(opened, payload);
    }

    #[test]
    fn wrong_passphrase_fails() {
        let payload = BackupPayload::new("u1".into(), vec![conversation_with(&["hello"])]);
        let sealed = payload.seal("correct horse").unwrap();

        assert!(matches!(
            BackupPayload::open(&sealed, "battery staple"),
            Err(StoreError::Backup(_))
        ));
    }

    #[test]
    fn merge_adds_missing_without_overwriting() {
        let original = conversation_with(&["one", "two"]);
        let payload = BackupPayload::new("u1".into(), vec![original.clone()]);

        let mut local = original.clone();
        local.messages.truncate(1);
        local.messages[0].content = "one (edited)".into();
        let mut target = HashMap::from([(local.id.clone(), local)]);

        let stats = payload.merge_into(&mut target);
        assert_eq!(stats.conversations_imported, 0);
        assert_eq!(stats.messages_imported, 1);

        let merged = &target[&original.id];
        assert_eq!(merged.messages.len(), 2);
        assert_eq!(merged.messages[0].content, "one (edited)");
        assert_eq!(merged.last_message.as_ref().unwrap().content, "two");
    }

    #[test]
    fn merge_into_empty_map() {
        let payload = BackupPayload::new("u1".into(), vec![conversation_with(&["a", "b", "c"])]);
        let mut target = HashMap::new();

        let stats = payload.merge_into(&mut target);
        assert_eq!(stats.conversations_imported, 1);
        assert_eq!(stats.messages_imported, 3);

        assert_eq!(payload.merge_into(&mut target), ImportStats::default());
    }
}
