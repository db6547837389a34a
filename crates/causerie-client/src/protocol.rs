//! Bridges stored messages and wire envelopes. Stateless: key material is
//! borrowed from the [`KeyManager`] for the duration of a call.

use std::collections::BTreeSet;

use causerie_shared::protocol::{self, EnvelopeHeader, SealedFile};
use causerie_shared::{Envelope, MessagePayload, Recipient, UserId};
use causerie_store::Message;

use crate::error::{ClientError, Result};
use crate::key_manager::KeyManager;

/// Seal `message` for `recipients`. The payload is encrypted once; only the
/// wrapped-key list grows with the recipient count.
///
/// The key manager must be initialized and its identity must be the
/// message's sender.
pub fn encrypt(message: &Message, keys: &KeyManager, recipients: &[Recipient]) -> Result<Envelope> {
    let identity = keys.identity()?;
    if *identity != message.sender_id {
        return Err(ClientError::InvalidParticipant(message.sender_id.clone()));
    }

    let header = EnvelopeHeader {
        message_id: message.id,
        conversation_id: message.conversation_id.clone(),
        sender_id: message.sender_id.clone(),
        message_type: message.message_type,
        timestamp: message.timestamp,
    };
    let payload = MessagePayload {
        content: message.content.clone(),
        message_type: message.message_type,
        attachment: message.attachment.clone(),
    };

    Ok(protocol::seal(header, &payload, recipients)?)
}

/// Open the entry for `counterparty_id` and rebuild the message. Delivery
/// and read sets start empty; the caller fills them from context.
pub fn decrypt(envelope: &Envelope, counterparty_id: &UserId, keys: &KeyManager) -> Result<Message> {
    let payload = keys.open_as(envelope, counterparty_id)?;

    Ok(Message {
        id: envelope.message_id,
        conversation_id: envelope.conversation_id.clone(),
        sender_id: envelope.sender_id.clone(),
        content: payload.content,
        message_type: payload.message_type,
        timestamp: envelope.timestamp,
        encrypted: true,
        attachment: payload.attachment,
        delivered_to: BTreeSet::new(),
        read_by: BTreeSet::new(),
        deleted: false,
        delete_scope: None,
        edited_at: None,
        reactions: Vec::new(),
    })
}

pub fn encrypt_file(data: &[u8], keys: &KeyManager, recipients: &[Recipient]) -> Result<SealedFile> {
    keys.identity()?;
    Ok(protocol::seal_file(data, recipients)?)
}

pub fn decrypt_file(sealed: &SealedFile, keys: &KeyManager) -> Result<Vec<u8>> {
    keys.open_file(sealed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use causerie_shared::{Attachment, MessageType, ProtocolError};
    use causerie_store::MemoryStore;

    struct Peer {
        id: UserId,
        keys: KeyManager,
    }

    fn peer(id: &str, storage: &MemoryStore) -> Peer {
        let id = UserId::from(id);
        let mut keys = KeyManager::new();
        keys.initialize(&id, storage).unwrap();
        Peer { id, keys }
    }

    fn recipient(peer: &Peer) -> Recipient {
        Recipient {
            id: peer.id.clone(),
            public_key: peer.keys.public_key().unwrap(),
        }
    }

    fn voice_note() -> Message {
        Message::new(
            "group_1_abc".into(),
            "u1".into(),
            "listen to this".into(),
            MessageType::Voice,
            Some(Attachment {
                file_name: "note.ogg".into(),
                mime_type: "audio/ogg".into(),
                size_bytes: 4096,
                blake3_hash: "00".repeat(32),
                storage_ref: None,
                duration_secs: Some(12),
            }),
        )
    }

    #[test]
    fn every_recipient_recovers_the_message() {
        let storage = MemoryStore::new();
        let u1 = peer("u1", &storage);
        let u2 = peer("u2", &storage);
        let u3 = peer("u3", &storage);
        let message = voice_note();

        let envelope = encrypt(&message, &u1.keys, &[recipient(&u2), recipient(&u3)]).unwrap();
        assert_eq!(envelope.keys.len(), 2);

        for p in [&u2, &u3] {
            let opened = decrypt(&envelope, &p.id, &p.keys).unwrap();
            assert_eq!(opened.id, message.id);
            assert_eq!(opened.content, message.content);
            assert_eq!(opened.message_type, MessageType::Voice);
            assert_eq!(opened.attachment, message.attachment);
            assert!(opened.encrypted);
            assert!(opened.delivered_to.is_empty() && opened.read_by.is_empty());
        }
    }

    #[test]
    fn absent_counterparty_is_not_addressed() {
        let storage = MemoryStore::new();
        let u1 = peer("u1", &storage);
        let u2 = peer("u2", &storage);
        let envelope = encrypt(&voice_note(), &u1.keys, &[recipient(&u2)]).unwrap();

        let result = decrypt(&envelope, &UserId::from("u9"), &u2.keys);
        assert!(matches!(
            result,
            Err(ClientError::Protocol(ProtocolError::NotAddressed(_)))
        ));
    }

    #[test]
    fn sealing_requires_an_initialized_identity() {
        let storage = MemoryStore::new();
        let u2 = peer("u2", &storage);
        let uninitialized = KeyManager::new();

        assert!(matches!(
            encrypt(&voice_note(), &uninitialized, &[]),
            Err(ClientError::NotInitialized)
        ));
        assert!(matches!(
            encrypt(&voice_note(), &uninitialized, &[recipient(&u2)]),
            Err(ClientError::NotInitialized)
        ));
        assert!(matches!(
            encrypt_file(b"data", &uninitialized, &[recipient(&u2)]),
            Err(ClientError::NotInitialized)
        ));
    }

    #[test]
    fn sealing_as_someone_else_is_rejected() {
        let storage = MemoryStore::new();
        let u2 = peer("u2", &storage);

        // voice_note() is sent by u1
        assert!(matches!(
            encrypt(&voice_note(), &u2.keys, &[recipient(&u2)]),
            Err(ClientError::InvalidParticipant(id)) if id == UserId::from("u1")
        ));
    }

    #[test]
    fn another_recipients_entry_cannot_be_unwrapped() {
        let storage = MemoryStore::new();
        let u1 = peer("u1", &storage);
        let u2 = peer("u2", &storage);
        let u3 = peer("u3", &storage);
        let envelope = encrypt(&voice_note(), &u1.keys, &[recipient(&u2), recipient(&u3)]).unwrap();

        let result = decrypt(&envelope, &u2.id, &u3.keys);
        assert!(matches!(result, Err(ClientError::Protocol(ProtocolError::Crypto(_)))));
    }

    #[test]
    fn empty_recipient_list_is_never_addressed() {
        let storage = MemoryStore::new();
        let u1 = peer("u1", &storage);
        let envelope = encrypt(&voice_note(), &u1.keys, &[]).unwrap();

        assert!(envelope.keys.is_empty());
        assert!(!envelope.payload.is_empty());
        assert!(matches!(
            decrypt(&envelope, &u1.id, &u1.keys),
            Err(ClientError::Protocol(ProtocolError::NotAddressed(_)))
        ));
    }

    #[test]
    fn file_roundtrip() {
        let storage = MemoryStore::new();
        let u2 = peer("u2", &storage);
        let data = vec![7u8; 10_000];

        let sealed = encrypt_file(&data, &u2.keys, &[recipient(&u2)]).unwrap();
        assert_eq!(decrypt_file(&sealed, &u2.keys).unwrap(), data);
    }
}
