use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;

use causerie_shared::{ConversationId, MessageId, UserId, UserStatus};
use causerie_store::{Conversation, DeleteScope, Message, Reaction};

pub const EVENT_CHAT_CREATED: &str = "chat-created";
pub const EVENT_CHAT_UPDATED: &str = "chat-updated";
pub const EVENT_MESSAGE_RECEIVED: &str = "message-received";
pub const EVENT_MESSAGE_DELIVERED: &str = "message-delivered";
pub const EVENT_MESSAGE_READ: &str = "message-read";
pub const EVENT_MESSAGE_DELETED: &str = "message-deleted";
pub const EVENT_MESSAGE_EDITED: &str = "message-edited";
pub const EVENT_REACTION_ADDED: &str = "reaction-added";
pub const EVENT_REACTION_REMOVED: &str = "reaction-removed";
pub const EVENT_MESSAGES_READ: &str = "messages-read";
pub const EVENT_TYPING_INDICATOR: &str = "typing-indicator";
pub const EVENT_ONLINE_STATUS_CHANGED: &str = "online-status-changed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ChatCreated,
    ChatUpdated,
    MessageReceived,
    MessageDelivered,
    MessageRead,
    MessageDeleted,
    MessageEdited,
    ReactionAdded,
    ReactionRemoved,
    MessagesRead,
    TypingIndicator,
    OnlineStatusChanged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatCreated => EVENT_CHAT_CREATED,
            Self::ChatUpdated => EVENT_CHAT_UPDATED,
            Self::MessageReceived => EVENT_MESSAGE_RECEIVED,
            Self::MessageDelivered => EVENT_MESSAGE_DELIVERED,
            Self::MessageRead => EVENT_MESSAGE_READ,
            Self::MessageDeleted => EVENT_MESSAGE_DELETED,
            Self::MessageEdited => EVENT_MESSAGE_EDITED,
            Self::ReactionAdded => EVENT_REACTION_ADDED,
            Self::ReactionRemoved => EVENT_REACTION_REMOVED,
            Self::MessagesRead => EVENT_MESSAGES_READ,
            Self::TypingIndicator => EVENT_TYPING_INDICATOR,
            Self::OnlineStatusChanged => EVENT_ONLINE_STATUS_CHANGED,
        }
    }
}

/// Payloads published by the session store. Serializes with an `event`
/// tag carrying the event name so it can be forwarded to a UI as is.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ChatEvent {
    ChatCreated {
        conversation: Conversation,
    },
    ChatUpdated {
        conversation: Conversation,
    },
    MessageReceived {
        conversation: Conversation,
        message: Message,
    },
    MessageDelivered {
        conversation_id: ConversationId,
        message_id: MessageId,
        recipient_id: UserId,
    },
    MessageRead {
        conversation_id: ConversationId,
        message_id: MessageId,
        reader_id: UserId,
    },
    MessageDeleted {
        conversation_id: ConversationId,
        message_id: MessageId,
        scope: DeleteScope,
    },
    MessageEdited {
        conversation_id: ConversationId,
        message: Message,
    },
    ReactionAdded {
        conversation_id: ConversationId,
        message_id: MessageId,
        reaction: Reaction,
    },
    ReactionRemoved {
        conversation_id: ConversationId,
        message_id: MessageId,
        user_id: UserId,
    },
    MessagesRead {
        conversation_id: ConversationId,
        reader_id: UserId,
        count: usize,
    },
    TypingIndicator {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },
    OnlineStatusChanged {
        user_id: UserId,
        status: UserStatus,
    },
}

impl ChatEvent {
    /// JSON form handed to UI layers.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::ChatCreated { .. } => EventKind::ChatCreated,
            Self::ChatUpdated { .. } => EventKind::ChatUpdated,
            Self::MessageReceived { .. } => EventKind::MessageReceived,
            Self::MessageDelivered { .. } => EventKind::MessageDelivered,
            Self::MessageRead { .. } => EventKind::MessageRead,
            Self::MessageDeleted { .. } => EventKind::MessageDeleted,
            Self::MessageEdited { .. } => EventKind::MessageEdited,
            Self::ReactionAdded { .. } => EventKind::ReactionAdded,
            Self::ReactionRemoved { .. } => EventKind::ReactionRemoved,
            Self::MessagesRead { .. } => EventKind::MessagesRead,
            Self::TypingIndicator { .. } => EventKind::TypingIndicator,
            Self::OnlineStatusChanged { .. } => EventKind::OnlineStatusChanged,
        }
    }
}

pub type Handler = Arc<dyn Fn(&ChatEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Synchronous publish/subscribe map. Handlers run in registration order
/// on the publisher's thread.
#[derive(Default)]
pub struct EventBus {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(SubscriptionId, Handler)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&mut self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&ChatEvent) + Send + Sync + 'static,
    {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Returns whether a handler was removed.
    pub fn off(&mut self, kind: EventKind, id: SubscriptionId) -> bool {
        let Some(list) = self.handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sub, _)| *sub != id);
        list.len() != before
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Deliver `event` to every handler registered for its kind. A panicking
    /// handler is logged and skipped.
    pub fn emit(&self, event: &ChatEvent) {
        let kind = event.kind();
        let Some(list) = self.handlers.get(&kind) else {
            return;
        };

        for (id, handler) in list {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(event = kind.as_str(), subscription = id.0, reason = %reason, "event handler panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn typing(is_typing: bool) -> ChatEvent {
        ChatEvent::TypingIndicator {
            conversation_id: "direct_u1_u2".into(),
            user_id: "u1".into(),
            is_typing,
        }
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let mut bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            bus.on(EventKind::TypingIndicator, move |_| seen.lock().unwrap().push(tag));
        }
        bus.emit(&typing(true));

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn off_removes_only_that_subscription() {
        let mut bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));

        let c = count.clone();
        let first = bus.on(EventKind::TypingIndicator, move |_| *c.lock().unwrap() += 1);
        let c = count.clone();
        bus.on(EventKind::TypingIndicator, move |_| *c.lock().unwrap() += 10);

        assert!(bus.off(EventKind::TypingIndicator, first));
        assert!(!bus.off(EventKind::TypingIndicator, first));
        bus.emit(&typing(false));

        assert_eq!(*count.lock().unwrap(), 10);
        assert_eq!(bus.handler_count(EventKind::TypingIndicator), 1);
    }

    #[test]
    fn other_kinds_are_not_notified() {
        let mut bus = EventBus::new();
        let hit = Arc::new(Mutex::new(false));
        let h = hit.clone();
        bus.on(EventKind::MessageReceived, move |_| *h.lock().unwrap() = true);

        bus.emit(&typing(true));
        assert!(!*hit.lock().unwrap());
    }

    #[test]
    fn panicking_handler_does_not_stop_the_rest() {
        let mut bus = EventBus::new();
        let reached = Arc::new(Mutex::new(false));

        bus.on(EventKind::TypingIndicator, |_| panic!("listener bug"));
        let r = reached.clone();
        bus.on(EventKind::TypingIndicator, move |_| *r.lock().unwrap() = true);

        bus.emit(&typing(true));
        assert!(*reached.lock().unwrap());
    }

    #[test]
    fn serialized_tag_is_the_event_name() {
        let json: serde_json::Value = serde_json::from_str(&typing(true).to_json().unwrap()).unwrap();
        assert_eq!(json["event"], EVENT_TYPING_INDICATOR);
        assert_eq!(json["is_typing"], true);
        assert_eq!(typing(true).kind().as_str(), "typing-indicator");
    }
}
