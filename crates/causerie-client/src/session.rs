//! The session store: sole owner and writer of one identity's conversations.
//!
//! Every mutation follows the same order: change the in-memory map, write
//! the full snapshot through [`Persistence`], then publish on the
//! [`EventBus`]. A handler that reads persisted state therefore always sees
//! the change that triggered it. Save failures are logged and the store
//! keeps running in memory.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use causerie_shared::{
    Attachment, ConversationId, Envelope, MessageId, MessageType, UserId, UserStatus,
};
use causerie_store::{
    BackupPayload, Conversation, DeleteScope, GroupSettings, ImportStats, Message, Participant,
    Persistence, Reaction, Snapshot,
};

use crate::error::{ClientError, Result};
use crate::events::{ChatEvent, EventBus, EventKind, SubscriptionId};
use crate::key_manager::KeyManager;
use crate::protocol;
use crate::transport::{DeliveryTransport, Receipt, ReceiptKind};

/// What the caller supplies to send a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub content: String,
    pub message_type: MessageType,
    pub attachment: Option<Attachment>,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            message_type: MessageType::Text,
            attachment: None,
        }
    }

    pub fn with_attachment(
        content: impl Into<String>,
        message_type: MessageType,
        attachment: Attachment,
    ) -> Self {
        Self {
            content: content.into(),
            message_type,
            attachment: Some(attachment),
        }
    }
}

pub struct SessionStore {
    local: Participant,
    keys: KeyManager,
    conversations: HashMap<ConversationId, Conversation>,
    persistence: Box<dyn Persistence>,
    transport: Box<dyn DeliveryTransport>,
    events: EventBus,
}

impl SessionStore {
    /// Bind a store to the identity `keys` was initialized for and load its
    /// last snapshot. A snapshot that cannot be read is logged and the store
    /// starts empty.
    pub fn open(
        keys: KeyManager,
        display_name: impl Into<String>,
        persistence: Box<dyn Persistence>,
        transport: Box<dyn DeliveryTransport>,
    ) -> Result<Self> {
        let user_id = keys.identity()?.clone();
        let public_key = keys.public_key().ok_or(ClientError::NotInitialized)?;
        let local = Participant::new(user_id.as_str(), display_name, public_key);

        let conversations: HashMap<ConversationId, Conversation> =
            match persistence.load(&local.id) {
                Ok(Some(snapshot)) => snapshot
                    .conversations
                    .into_iter()
                    .map(|c| (c.id.clone(), c))
                    .collect(),
                Ok(None) => HashMap::new(),
                Err(e) => {
                    error!(identity = %local.id, error = %e, "failed to load snapshot, starting empty");
                    HashMap::new()
                }
            };

        info!(identity = %local.id, conversations = conversations.len(), "session opened");

        Ok(Self {
            local,
            keys,
            conversations,
            persistence,
            transport,
            events: EventBus::new(),
        })
    }

    // -- Queries --------------------------------------------------------

    pub fn local_user(&self) -> &Participant {
        &self.local
    }

    pub fn identity(&self) -> &UserId {
        &self.local.id
    }

    pub fn key_manager(&self) -> &KeyManager {
        &self.keys
    }

    /// Most recently updated first.
    pub fn conversations(&self) -> Vec<&Conversation> {
        let mut list: Vec<&Conversation> = self.conversations.values().collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    pub fn unread_count(&self, conversation_id: &ConversationId) -> Result<usize> {
        self.conversations
            .get(conversation_id)
            .map(|c| c.unread_count(&self.local.id))
            .ok_or_else(|| ClientError::ConversationNotFound(conversation_id.clone()))
    }

    /// Case-insensitive substring search over every live message, newest
    /// first.
    pub fn search_messages(&self, query: &str) -> Vec<&Message> {
        let needle = query.to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<&Message> = self
            .conversations
            .values()
            .flat_map(|c| c.messages.iter())
            .filter(|m| !m.deleted && m.content.to_lowercase().contains(&needle))
            .collect();
        hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        hits
    }

    // -- Subscriptions --------------------------------------------------

    pub fn on<F>(&mut self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&ChatEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, handler)
    }

    pub fn off(&mut self, kind: EventKind, id: SubscriptionId) -> bool {
        self.events.off(kind, id)
    }

    // -- Conversations --------------------------------------------------

    /// Open (or return the existing) one-to-one conversation with `other`.
    pub fn create_direct_conversation(&mut self, other: Participant) -> Result<Conversation> {
        if other.id == self.local.id {
            return Err(ClientError::InvalidParticipant(other.id));
        }

        let id = ConversationId::direct(&self.local.id, &other.id);
        if let Some(existing) = self.conversations.get(&id) {
            debug!(conversation = %id, "direct conversation already exists");
            return Ok(existing.clone());
        }

        let conversation = Conversation::direct(self.local.clone(), other);
        self.conversations.insert(id.clone(), conversation.clone());
        info!(conversation = %id, "direct conversation created");

        self.persist();
        self.events.emit(&ChatEvent::ChatCreated {
            conversation: conversation.clone(),
        });
        Ok(conversation)
    }

    /// Always creates a new group, with the local user as first participant
    /// and sole admin.
    pub fn create_group_conversation(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        participants: Vec<Participant>,
    ) -> Result<Conversation> {
        let others: Vec<Participant> = participants
            .into_iter()
            .filter(|p| p.id != self.local.id)
            .collect();

        let conversation =
            Conversation::group(self.local.clone(), name.into(), description.into(), others);
        let id = conversation.id.clone();
        self.conversations.insert(id.clone(), conversation.clone());
        info!(conversation = %id, participants = conversation.participants.len(), "group created");

        self.persist();
        self.events.emit(&ChatEvent::ChatCreated {
            conversation: conversation.clone(),
        });
        Ok(conversation)
    }

    pub fn set_pinned(&mut self, conversation_id: &ConversationId, pinned: bool) -> Result<()> {
        let conversation = find_mut(&mut self.conversations, conversation_id)?;
        if conversation.pinned == pinned {
            return Ok(());
        }
        conversation.pinned = pinned;
        let event = ChatEvent::ChatUpdated {
            conversation: conversation.clone(),
        };

        self.persist();
        self.events.emit(&event);
        Ok(())
    }

    pub fn set_archived(&mut self, conversation_id: &ConversationId, archived: bool) -> Result<()> {
        let conversation = find_mut(&mut self.conversations, conversation_id)?;
        if conversation.archived == archived {
            return Ok(());
        }
        conversation.archived = archived;
        let event = ChatEvent::ChatUpdated {
            conversation: conversation.clone(),
        };

        self.persist();
        self.events.emit(&event);
        Ok(())
    }

    /// Replace a group's settings. Admins only; the new admin set must be
    /// non-empty and made of participants.
    pub fn update_group_settings(
        &mut self,
        conversation_id: &ConversationId,
        settings: GroupSettings,
    ) -> Result<()> {
        let me = self.local.id.clone();
        let conversation = find_mut(&mut self.conversations, conversation_id)?;
        if !conversation.is_admin(&me) {
            return Err(ClientError::PermissionDenied {
                user: me,
                action: "update group settings",
            });
        }
        if settings.admins.is_empty() {
            return Err(ClientError::PermissionDenied {
                user: me,
                action: "remove every admin",
            });
        }
        if let Some(outsider) = settings.admins.iter().find(|a| !conversation.is_participant(a)) {
            return Err(ClientError::InvalidParticipant(outsider.clone()));
        }

        if let Some(group) = conversation.group.as_mut() {
            group.settings = settings;
        }
        conversation.updated_at = Utc::now();
        let event = ChatEvent::ChatUpdated {
            conversation: conversation.clone(),
        };
        info!(conversation = %conversation_id, "group settings updated");

        self.persist();
        self.events.emit(&event);
        Ok(())
    }

    /// Returns `false` when `participant` was already a member.
    pub fn add_participant(
        &mut self,
        conversation_id: &ConversationId,
        participant: Participant,
    ) -> Result<bool> {
        let me = self.local.id.clone();
        let conversation = find_mut(&mut self.conversations, conversation_id)?;
        let allowed = match conversation.group.as_ref() {
            Some(group) => {
                conversation.is_admin(&me) || group.settings.members_can_add_participants
            }
            None => false,
        };
        if !allowed {
            return Err(ClientError::PermissionDenied {
                user: me,
                action: "add participants",
            });
        }
        if conversation.is_participant(&participant.id) {
            debug!(conversation = %conversation_id, user = %participant.id, "already a participant");
            return Ok(false);
        }

        info!(conversation = %conversation_id, user = %participant.id, "participant added");
        conversation.participants.push(participant);
        conversation.updated_at = Utc::now();
        let event = ChatEvent::ChatUpdated {
            conversation: conversation.clone(),
        };

        self.persist();
        self.events.emit(&event);
        Ok(true)
    }

    /// Change a group's name, and its description when one is given.
    pub fn rename_group(
        &mut self,
        conversation_id: &ConversationId,
        name: impl Into<String>,
        description: Option<String>,
    ) -> Result<()> {
        let me = self.local.id.clone();
        let conversation = find_mut(&mut self.conversations, conversation_id)?;
        let is_admin = conversation.is_admin(&me);
        let Some(group) = conversation.group.as_mut() else {
            return Err(ClientError::PermissionDenied {
                user: me,
                action: "rename a direct conversation",
            });
        };
        if !is_admin && !group.settings.members_can_edit_info {
            return Err(ClientError::PermissionDenied {
                user: me,
                action: "edit group info",
            });
        }

        group.name = name.into();
        if let Some(description) = description {
            group.description = description;
        }
        conversation.updated_at = Utc::now();
        let event = ChatEvent::ChatUpdated {
            conversation: conversation.clone(),
        };

        self.persist();
        self.events.emit(&event);
        Ok(())
    }

    // -- Messages -------------------------------------------------------

    /// Seal `draft` for every other participant, hand the envelope to the
    /// transport and append the plaintext locally.
    pub fn send_message(
        &mut self,
        conversation_id: &ConversationId,
        draft: MessageDraft,
    ) -> Result<Message> {
        let me = self.local.id.clone();
        let conversation = find_mut(&mut self.conversations, conversation_id)?;

        let mut message = Message::new(
            conversation_id.clone(),
            me.clone(),
            draft.content,
            draft.message_type,
            draft.attachment,
        );
        let recipients = conversation.recipients_excluding(&me);
        let envelope = protocol::encrypt(&message, &self.keys, &recipients)?;
        self.transport.dispatch(&envelope);

        message.encrypted = true;
        conversation.push_message(message.clone());
        let event = ChatEvent::MessageReceived {
            conversation: conversation.clone(),
            message: message.clone(),
        };
        info!(
            conversation = %conversation_id,
            message = %message.id,
            recipients = recipients.len(),
            payload_bytes = envelope.payload.len(),
            "message sent"
        );

        self.persist();
        self.events.emit(&event);
        Ok(message)
    }

    /// Open an inbound envelope and append it. Returns `None` for a message
    /// that is already in the history.
    pub fn receive_envelope(&mut self, envelope: &Envelope) -> Result<Option<Message>> {
        let me = self.local.id.clone();
        let conversation = find_mut(&mut self.conversations, &envelope.conversation_id)?;

        if conversation.message(envelope.message_id).is_some() {
            debug!(message = %envelope.message_id, "duplicate envelope ignored");
            return Ok(None);
        }
        if !conversation.is_participant(&envelope.sender_id) {
            return Err(ClientError::InvalidParticipant(envelope.sender_id.clone()));
        }

        let mut message = protocol::decrypt(envelope, &me, &self.keys)?;
        message.delivered_to.insert(me);

        conversation.push_message(message.clone());
        let event = ChatEvent::MessageReceived {
            conversation: conversation.clone(),
            message: message.clone(),
        };
        info!(
            conversation = %envelope.conversation_id,
            message = %message.id,
            sender = %message.sender_id,
            "message received"
        );

        self.persist();
        self.events.emit(&event);
        Ok(Some(message))
    }

    /// Returns `false` without touching anything unless the local user sent
    /// the message and it has not been deleted for everyone.
    pub fn edit_message(
        &mut self,
        message_id: MessageId,
        conversation_id: &ConversationId,
        content: impl Into<String>,
    ) -> Result<bool> {
        let me = self.local.id.clone();
        let conversation = find_mut(&mut self.conversations, conversation_id)?;
        let message = find_message_mut(conversation, message_id)?;

        if message.sender_id != me || message.is_tombstone() {
            debug!(message = %message_id, "edit ignored: not the sender or message deleted");
            return Ok(false);
        }

        message.content = content.into();
        message.edited_at = Some(Utc::now());
        let edited = message.clone();
        conversation.refresh_preview();
        let event = ChatEvent::MessageEdited {
            conversation_id: conversation_id.clone(),
            message: edited,
        };

        self.persist();
        self.events.emit(&event);
        Ok(true)
    }

    /// `Sender` removes the local copy. `Everyone` leaves a tombstone and is
    /// only honoured for the local user's own messages. Returns `false` for
    /// a no-op.
    pub fn delete_message(
        &mut self,
        message_id: MessageId,
        conversation_id: &ConversationId,
        scope: DeleteScope,
    ) -> Result<bool> {
        let me = self.local.id.clone();
        let conversation = find_mut(&mut self.conversations, conversation_id)?;

        match scope {
            DeleteScope::Sender => {
                find_message_mut(conversation, message_id)?;
                conversation.messages.retain(|m| m.id != message_id);
            }
            DeleteScope::Everyone => {
                let message = find_message_mut(conversation, message_id)?;
                if message.sender_id != me || message.is_tombstone() {
                    debug!(message = %message_id, "delete for everyone ignored");
                    return Ok(false);
                }
                message.tombstone();
            }
        }
        conversation.refresh_preview();
        self.transport.cancel(message_id);
        info!(conversation = %conversation_id, message = %message_id, ?scope, "message deleted");

        self.persist();
        self.events.emit(&ChatEvent::MessageDeleted {
            conversation_id: conversation_id.clone(),
            message_id,
            scope,
        });
        Ok(true)
    }

    /// Set the local user's reaction, replacing any previous one.
    pub fn add_reaction(
        &mut self,
        message_id: MessageId,
        conversation_id: &ConversationId,
        emoji: &str,
    ) -> Result<Reaction> {
        let me = self.local.id.clone();
        let conversation = find_mut(&mut self.conversations, conversation_id)?;
        let reaction = find_message_mut(conversation, message_id)?.set_reaction(&me, emoji);
        conversation.refresh_preview();

        self.persist();
        self.events.emit(&ChatEvent::ReactionAdded {
            conversation_id: conversation_id.clone(),
            message_id,
            reaction: reaction.clone(),
        });
        Ok(reaction)
    }

    pub fn remove_reaction(
        &mut self,
        message_id: MessageId,
        conversation_id: &ConversationId,
    ) -> Result<bool> {
        let me = self.local.id.clone();
        let conversation = find_mut(&mut self.conversations, conversation_id)?;
        if !find_message_mut(conversation, message_id)?.remove_reaction(&me) {
            return Ok(false);
        }
        conversation.refresh_preview();

        self.persist();
        self.events.emit(&ChatEvent::ReactionRemoved {
            conversation_id: conversation_id.clone(),
            message_id,
            user_id: me,
        });
        Ok(true)
    }

    /// Add the local user to every read set in the conversation. Returns how
    /// many messages were newly marked; zero means nothing was written.
    pub fn mark_as_read(&mut self, conversation_id: &ConversationId) -> Result<usize> {
        let me = self.local.id.clone();
        let conversation = find_mut(&mut self.conversations, conversation_id)?;

        let mut count = 0;
        for message in conversation.messages.iter_mut() {
            if !message.read_by.contains(&me) {
                message.read_by.insert(me.clone());
                count += 1;
            }
        }
        if count == 0 {
            debug!(conversation = %conversation_id, "nothing to mark as read");
            return Ok(0);
        }
        conversation.refresh_preview();

        self.persist();
        self.events.emit(&ChatEvent::MessagesRead {
            conversation_id: conversation_id.clone(),
            reader_id: me,
            count,
        });
        Ok(count)
    }

    /// Remove messages older than their group's retention. Returns how many
    /// were removed.
    pub fn purge_expired_messages(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = Vec::new();
        let mut touched = Vec::new();

        for conversation in self.conversations.values_mut() {
            let Some(retention) = conversation
                .group
                .as_ref()
                .map(|g| g.settings.disappearing_messages_secs)
                .filter(|secs| *secs > 0)
            else {
                continue;
            };
            let Some(cutoff) = chrono::Duration::from_std(std::time::Duration::from_secs(retention))
                .ok()
                .and_then(|ttl| now.checked_sub_signed(ttl))
            else {
                continue;
            };

            let before = conversation.messages.len();
            conversation.messages.retain(|m| {
                let keep = m.timestamp > cutoff;
                if !keep {
                    removed.push(m.id);
                }
                keep
            });
            if conversation.messages.len() != before {
                conversation.refresh_preview();
                touched.push(conversation.clone());
            }
        }

        if removed.is_empty() {
            return 0;
        }
        for id in &removed {
            self.transport.cancel(*id);
        }
        info!(removed = removed.len(), conversations = touched.len(), "expired messages purged");

        self.persist();
        for conversation in touched {
            self.events.emit(&ChatEvent::ChatUpdated { conversation });
        }
        removed.len()
    }

    // -- Signals --------------------------------------------------------

    pub fn set_typing(&mut self, conversation_id: &ConversationId, is_typing: bool) -> Result<()> {
        if !self.conversations.contains_key(conversation_id) {
            return Err(ClientError::ConversationNotFound(conversation_id.clone()));
        }
        self.events.emit(&ChatEvent::TypingIndicator {
            conversation_id: conversation_id.clone(),
            user_id: self.local.id.clone(),
            is_typing,
        });
        Ok(())
    }

    pub fn update_online_status(&mut self, status: UserStatus) {
        self.local.status = status;
        self.events.emit(&ChatEvent::OnlineStatusChanged {
            user_id: self.local.id.clone(),
            status,
        });
    }

    // -- Receipts -------------------------------------------------------

    /// Apply every receipt the transport has due by `now`. Returns how many
    /// changed state.
    pub fn process_receipts(&mut self, now: Instant) -> usize {
        let receipts = self.transport.poll_receipts(now);
        receipts.iter().filter(|r| self.apply_receipt(r)).count()
    }

    /// Record one acknowledgement. Receipts for unknown or deleted messages,
    /// and repeats, are dropped and return `false`.
    pub fn apply_receipt(&mut self, receipt: &Receipt) -> bool {
        let Some(conversation) = self.conversations.get_mut(&receipt.conversation_id) else {
            debug!(conversation = %receipt.conversation_id, "receipt for unknown conversation dropped");
            return false;
        };
        let Some(message) = conversation.message_mut(receipt.message_id) else {
            debug!(message = %receipt.message_id, "receipt for unknown message dropped");
            return false;
        };
        if message.deleted {
            debug!(message = %receipt.message_id, "receipt for deleted message dropped");
            return false;
        }

        let changed = match receipt.kind {
            ReceiptKind::Delivered => message.delivered_to.insert(receipt.recipient_id.clone()),
            ReceiptKind::Read => {
                // read implies delivered
                message.delivered_to.insert(receipt.recipient_id.clone());
                message.read_by.insert(receipt.recipient_id.clone())
            }
        };
        if !changed {
            return false;
        }
        conversation.refresh_preview();

        let event = match receipt.kind {
            ReceiptKind::Delivered => ChatEvent::MessageDelivered {
                conversation_id: receipt.conversation_id.clone(),
                message_id: receipt.message_id,
                recipient_id: receipt.recipient_id.clone(),
            },
            ReceiptKind::Read => ChatEvent::MessageRead {
                conversation_id: receipt.conversation_id.clone(),
                message_id: receipt.message_id,
                reader_id: receipt.recipient_id.clone(),
            },
        };

        self.persist();
        self.events.emit(&event);
        true
    }

    // -- Backup ---------------------------------------------------------

    /// Seal every conversation under `passphrase`.
    pub fn export_backup(&self, passphrase: &str) -> Result<String> {
        let payload = BackupPayload::new(self.local.id.clone(), self.sorted_conversations());
        let sealed = payload.seal(passphrase)?;
        info!(conversations = payload.conversations.len(), "backup exported");
        Ok(sealed)
    }

    /// Merge a backup of the same identity. Existing conversations and
    /// messages are never overwritten.
    pub fn import_backup(&mut self, sealed: &str, passphrase: &str) -> Result<ImportStats> {
        let payload = BackupPayload::open(sealed, passphrase)?;
        if payload.identity_id != self.local.id {
            return Err(ClientError::InvalidParticipant(payload.identity_id));
        }

        let stats = payload.merge_into(&mut self.conversations);
        info!(
            conversations = stats.conversations_imported,
            messages = stats.messages_imported,
            "backup imported"
        );
        if stats == ImportStats::default() {
            return Ok(stats);
        }

        self.persist();
        for id in payload.conversations.iter().map(|c| &c.id) {
            if let Some(conversation) = self.conversations.get(id) {
                self.events.emit(&ChatEvent::ChatUpdated {
                    conversation: conversation.clone(),
                });
            }
        }
        Ok(stats)
    }

    // -- Internals ------------------------------------------------------

    fn sorted_conversations(&self) -> Vec<Conversation> {
        let mut list: Vec<Conversation> = self.conversations.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    fn persist(&self) {
        let snapshot = Snapshot::new(self.sorted_conversations());
        if let Err(e) = self.persistence.save(&self.local.id, &snapshot) {
            error!(identity = %self.local.id, error = %e, "failed to persist snapshot, continuing in memory");
        }
    }
}

fn find_mut<'a>(
    conversations: &'a mut HashMap<ConversationId, Conversation>,
    id: &ConversationId,
) -> Result<&'a mut Conversation> {
    conversations
        .get_mut(id)
        .ok_or_else(|| ClientError::ConversationNotFound(id.clone()))
}

fn find_message_mut(conversation: &mut Conversation, id: MessageId) -> Result<&mut Message> {
    let conversation_id = conversation.id.clone();
    conversation
        .message_mut(id)
        .ok_or(ClientError::MessageNotFound {
            conversation: conversation_id,
            message: id,
        })
}
