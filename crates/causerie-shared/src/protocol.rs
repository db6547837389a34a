//! Envelope format: one payload encrypted under a per-message content key,
//! plus that content key wrapped once per recipient.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_FILE_SIZE, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
use crate::crypto::{self, SymmetricKey, WrappedKey};
use crate::error::ProtocolError;
use crate::identity::KeyPair;
use crate::types::{Attachment, ConversationId, MessageId, MessageType, UserId};

/// Plaintext sealed inside an envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePayload {
    pub content: String,
    pub message_type: MessageType,
    pub attachment: Option<Attachment>,
}

/// A recipient an envelope can be addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub id: UserId,
    pub public_key: [u8; 32],
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WrappedKeyEntry {
    pub recipient_id: UserId,
    pub wrapped_key: WrappedKey,
}

/// Routing metadata of an envelope. Travels in clear.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
}

/// Transport-ready form of a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    pub version: u8,
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    /// XChaCha20-Poly1305 over the bincode payload: nonce || ciphertext
    pub payload: Vec<u8>,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub keys: Vec<WrappedKeyEntry>,
}

impl Envelope {
    pub fn header(&self) -> EnvelopeHeader {
        EnvelopeHeader {
            message_id: self.message_id,
            conversation_id: self.conversation_id.clone(),
            sender_id: self.sender_id.clone(),
            message_type: self.message_type,
            timestamp: self.timestamp,
        }
    }

    pub fn is_addressed_to(&self, user_id: &UserId) -> bool {
        self.entry_for(user_id).is_some()
    }

    pub fn recipient_ids(&self) -> impl Iterator<Item = &UserId> {
        self.keys.iter().map(|entry| &entry.recipient_id)
    }

    fn entry_for(&self, user_id: &UserId) -> Option<&WrappedKeyEntry> {
        self.keys.iter().find(|entry| &entry.recipient_id == user_id)
    }

    /// Serialize to binary (bincode)
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from binary, rejecting unknown versions
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        let envelope: Self = bincode::deserialize(data)?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope)
    }
}

/// Encrypt `payload` once and wrap its content key for every recipient.
/// An empty recipient list still yields a valid payload-bearing envelope.
pub fn seal(
    header: EnvelopeHeader,
    payload: &MessagePayload,
    recipients: &[Recipient],
) -> Result<Envelope, ProtocolError> {
    let plaintext = bincode::serialize(payload)?;
    if plaintext.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: plaintext.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let content_key = crypto::generate_symmetric_key();
    let aad = payload_aad(&header.message_id, &header.conversation_id);
    let sealed = crypto::encrypt(&content_key, &plaintext, &aad)?;
    let keys = wrap_for_all(&content_key, &header.message_id.0.to_string(), recipients)?;

    Ok(Envelope {
        version: PROTOCOL_VERSION,
        message_id: header.message_id,
        conversation_id: header.conversation_id,
        sender_id: header.sender_id,
        payload: sealed,
        message_type: header.message_type,
        timestamp: header.timestamp,
        keys,
    })
}

/// Open an envelope as `recipient_id`, using that identity's key pair.
pub fn open(
    envelope: &Envelope,
    recipient_id: &UserId,
    keys: &KeyPair,
) -> Result<MessagePayload, ProtocolError> {
    if envelope.version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(envelope.version));
    }
    let entry = envelope
        .entry_for(recipient_id)
        .ok_or_else(|| ProtocolError::NotAddressed(recipient_id.clone()))?;

    let wrap_aad = wrap_aad(&envelope.message_id.0.to_string(), recipient_id);
    let content_key = keys.unwrap_content_key(&entry.wrapped_key, &wrap_aad)?;

    let aad = payload_aad(&envelope.message_id, &envelope.conversation_id);
    let plaintext = crypto::decrypt(&content_key, &envelope.payload, &aad)?;
    Ok(bincode::deserialize(&plaintext)?)
}

/// Binary attachment sealed the same way as a message payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SealedFile {
    pub file_id: uuid::Uuid,
    /// BLAKE3 hash of the plaintext (hex), checked after decryption.
    pub content_hash: String,
    pub ciphertext: Vec<u8>,
    pub keys: Vec<WrappedKeyEntry>,
}

pub fn seal_file(data: &[u8], recipients: &[Recipient]) -> Result<SealedFile, ProtocolError> {
    if data.len() > MAX_FILE_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: data.len(),
            max: MAX_FILE_SIZE,
        });
    }

    let file_id = uuid::Uuid::new_v4();
    let content_key = crypto::generate_symmetric_key();
    let ciphertext = crypto::encrypt(&content_key, data, file_id.as_bytes())?;
    let keys = wrap_for_all(&content_key, &file_id.to_string(), recipients)?;

    Ok(SealedFile {
        file_id,
        content_hash: crypto::content_hash(data),
        ciphertext,
        keys,
    })
}

pub fn open_file(
    sealed: &SealedFile,
    recipient_id: &UserId,
    keys: &KeyPair,
) -> Result<Vec<u8>, ProtocolError> {
    let entry = sealed
        .keys
        .iter()
        .find(|entry| &entry.recipient_id == recipient_id)
        .ok_or_else(|| ProtocolError::NotAddressed(recipient_id.clone()))?;

    let wrap_aad = wrap_aad(&sealed.file_id.to_string(), recipient_id);
    let content_key = keys.unwrap_content_key(&entry.wrapped_key, &wrap_aad)?;
    let data = crypto::decrypt(&content_key, &sealed.ciphertext, sealed.file_id.as_bytes())?;

    if crypto::content_hash(&data) != sealed.content_hash {
        return Err(ProtocolError::IntegrityMismatch);
    }
    Ok(data)
}

fn wrap_for_all(
    content_key: &SymmetricKey,
    object_id: &str,
    recipients: &[Recipient],
) -> Result<Vec<WrappedKeyEntry>, ProtocolError> {
    recipients
        .iter()
        .map(|recipient| {
            let aad = wrap_aad(object_id, &recipient.id);
            let wrapped_key = crypto::wrap_key(&recipient.public_key, content_key, &aad)?;
            Ok(WrappedKeyEntry {
                recipient_id: recipient.id.clone(),
                wrapped_key,
            })
        })
        .collect()
}

fn payload_aad(message_id: &MessageId, conversation_id: &ConversationId) -> Vec<u8> {
    let mut aad = Vec::with_capacity(16 + conversation_id.as_str().len());
    aad.extend_from_slice(message_id.0.as_bytes());
    aad.extend_from_slice(conversation_id.as_str().as_bytes());
    aad
}

// Binds a wrapped key to its object and recipient so entries cannot be
// swapped between recipients.
fn wrap_aad(object_id: &str, recipient_id: &UserId) -> Vec<u8> {
    format!("{}:{}", object_id, recipient_id).into_bytes()
}
