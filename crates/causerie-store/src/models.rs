//! Domain model persisted as part of the conversation snapshot.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be written
//! into the snapshot blob and handed directly to the UI layer.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use causerie_shared::constants::DELETED_MESSAGE_TOMBSTONE;
use causerie_shared::{Attachment, ConversationId, MessageId, MessageType, Recipient, UserId, UserStatus};

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// A user identity as seen by the local device: only the public half of its
/// key pair is ever known here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub id: UserId,
    pub display_name: String,
    pub status: UserStatus,
    /// X25519 public key content keys are wrapped to.
    pub public_key: [u8; 32],
}

impl Participant {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, public_key: [u8; 32]) -> Self {
        Self {
            id: UserId::new(id),
            display_name: display_name.into(),
            status: UserStatus::Online,
            public_key,
        }
    }

    pub fn recipient(&self) -> Recipient {
        Recipient {
            id: self.id.clone(),
            public_key: self.public_key,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

/// Group policy. Defaults: members may add others, may not edit info,
/// disappearing messages disabled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupSettings {
    pub admins: BTreeSet<UserId>,
    pub members_can_add_participants: bool,
    pub members_can_edit_info: bool,
    /// Retention in seconds; 0 disables disappearing messages.
    pub disappearing_messages_secs: u64,
}

impl GroupSettings {
    pub fn with_admin(admin: UserId) -> Self {
        Self {
            admins: BTreeSet::from([admin]),
            members_can_add_participants: true,
            members_can_edit_info: false,
            disappearing_messages_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupInfo {
    pub name: String,
    pub description: String,
    pub settings: GroupSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    pub participants: Vec<Participant>,
    pub messages: Vec<Message>,
    /// Copy of the newest message, kept for list previews.
    pub last_message: Option<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pinned: bool,
    pub archived: bool,
    /// Present for groups only.
    pub group: Option<GroupInfo>,
}

impl Conversation {
    pub fn direct(local: Participant, other: Participant) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::direct(&local.id, &other.id),
            kind: ConversationKind::Direct,
            participants: vec![local, other],
            messages: Vec::new(),
            last_message: None,
            created_at: now,
            updated_at: now,
            pinned: false,
            archived: false,
            group: None,
        }
    }

    /// New group with `creator` as first participant and sole admin.
    /// Duplicate participants are dropped.
    pub fn group(
        creator: Participant,
        name: String,
        description: String,
        participants: Vec<Participant>,
    ) -> Self {
        let now = Utc::now();
        let settings = GroupSettings::with_admin(creator.id.clone());

        let mut seen = HashSet::new();
        let members: Vec<Participant> = std::iter::once(creator)
            .chain(participants)
            .filter(|p| seen.insert(p.id.clone()))
            .collect();

        Self {
            id: ConversationId::group(),
            kind: ConversationKind::Group,
            participants: members,
            messages: Vec::new(),
            last_message: None,
            created_at: now,
            updated_at: now,
            pinned: false,
            archived: false,
            group: Some(GroupInfo {
                name,
                description,
                settings,
            }),
        }
    }

    pub fn is_participant(&self, user_id: &UserId) -> bool {
        self.participants.iter().any(|p| &p.id == user_id)
    }

    pub fn is_admin(&self, user_id: &UserId) -> bool {
        self.group
            .as_ref()
            .is_some_and(|g| g.settings.admins.contains(user_id))
    }

    /// Everyone except `sender`; these are the envelope recipients.
    pub fn recipients_excluding(&self, sender: &UserId) -> Vec<Recipient> {
        self.participants
            .iter()
            .filter(|p| &p.id != sender)
            .map(Participant::recipient)
            .collect()
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn message_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    pub fn unread_count(&self, reader: &UserId) -> usize {
        self.messages
            .iter()
            .filter(|m| &m.sender_id != reader && !m.read_by.contains(reader))
            .count()
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    /// Refresh the preview copy and the update timestamp.
    pub fn touch(&mut self) {
        self.last_message = self.messages.last().cloned();
        self.updated_at = Utc::now();
    }

    /// Refresh the preview copy only.
    pub fn refresh_preview(&mut self) {
        self.last_message = self.messages.last().cloned();
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeleteScope {
    /// Remove the local copy only.
    Sender,
    /// Keep a tombstone visible to every participant.
    Everyone,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub user_id: UserId,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// A single chat message. Content is plaintext locally; it only leaves the
/// device sealed inside an envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub encrypted: bool,
    pub attachment: Option<Attachment>,
    pub delivered_to: BTreeSet<UserId>,
    pub read_by: BTreeSet<UserId>,
    pub deleted: bool,
    pub delete_scope: Option<DeleteScope>,
    pub edited_at: Option<DateTime<Utc>>,
    pub reactions: Vec<Reaction>,
}

impl Message {
    pub fn new(
        conversation_id: ConversationId,
        sender_id: UserId,
        content: String,
        message_type: MessageType,
        attachment: Option<Attachment>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id,
            sender_id,
            content,
            message_type,
            timestamp: Utc::now(),
            encrypted: false,
            attachment,
            delivered_to: BTreeSet::new(),
            read_by: BTreeSet::new(),
            deleted: false,
            delete_scope: None,
            edited_at: None,
            reactions: Vec::new(),
        }
    }

    /// Replace any reaction `user_id` already has with `emoji`.
    pub fn set_reaction(&mut self, user_id: &UserId, emoji: &str) -> Reaction {
        self.reactions.retain(|r| &r.user_id != user_id);
        let reaction = Reaction {
            user_id: user_id.clone(),
            emoji: emoji.to_string(),
            created_at: Utc::now(),
        };
        self.reactions.push(reaction.clone());
        reaction
    }

    pub fn remove_reaction(&mut self, user_id: &UserId) -> bool {
        let before = self.reactions.len();
        self.reactions.retain(|r| &r.user_id != user_id);
        self.reactions.len() != before
    }

    /// Irreversibly redact the message, leaving a tombstone.
    pub fn tombstone(&mut self) {
        self.deleted = true;
        self.delete_scope = Some(DeleteScope::Everyone);
        self.content = DELETED_MESSAGE_TOMBSTONE.to_string();
        self.attachment = None;
    }

    pub fn is_tombstone(&self) -> bool {
        self.deleted && self.delete_scope == Some(DeleteScope::Everyone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(id: &str) -> Participant {
        Participant::new(id, id.to_uppercase(), [1u8; 32])
    }

    #[test]
    fn direct_has_two_participants() {
        let conv = Conversation::direct(participant("u2"), participant("u1"));
        assert_eq!(conv.id.as_str(), "direct_u1_u2");
        assert_eq!(conv.participants.len(), 2);
        assert!(conv.group.is_none());
        assert!(!conv.pinned && !conv.archived);
    }

    #[test]
    fn group_creator_is_sole_admin() {
        let conv = Conversation::group(
            participant("u1"),
            "Team".into(),
            "".into(),
            vec![participant("u2"), participant("u1"), participant("u3")],
        );
        assert_eq!(conv.participants.len(), 3);
        assert_eq!(conv.participants[0].id, UserId::from("u1"));
        assert!(conv.is_admin(&UserId::from("u1")));
        assert!(!conv.is_admin(&UserId::from("u2")));

        let settings = &conv.group.as_ref().unwrap().settings;
        assert!(settings.members_can_add_participants);
        assert!(!settings.members_can_edit_info);
        assert_eq!(settings.disappearing_messages_secs, 0);
    }

    #[test]
    fn reaction_replaces_previous() {
        let mut msg = Message::new("c".into(), "u1".into(), "hi".into(), MessageType::Text, None);
        let u1 = UserId::from("u1");
        msg.set_reaction(&u1, "👍");
        msg.set_reaction(&UserId::from("u2"), "😂");
        msg.set_reaction(&u1, "❤️");

        let mine: Vec<_> = msg.reactions.iter().filter(|r| r.user_id == u1).collect();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].emoji, "❤️");
        assert_eq!(msg.reactions.len(), 2);
    }

    #[test]
    fn tombstone_redacts_content() {
        let mut msg = Message::new("c".into(), "u1".into(), "secret".into(), MessageType::Text, None);
        msg.tombstone();
        assert!(msg.is_tombstone());
        assert_eq!(msg.content, DELETED_MESSAGE_TOMBSTONE);
    }

    #[test]
    fn unread_count_ignores_own_messages() {
        let mut conv = Conversation::direct(participant("u1"), participant("u2"));
        let id = conv.id.clone();
        conv.push_message(Message::new(id.clone(), "u1".into(), "a".into(), MessageType::Text, None));
        conv.push_message(Message::new(id, "u2".into(), "b".into(), MessageType::Text, None));

        assert_eq!(conv.unread_count(&UserId::from("u1")), 1);
        assert_eq!(conv.last_message.as_ref().unwrap().content, "b");
    }
}
