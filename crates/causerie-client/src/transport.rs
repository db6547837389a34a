//! Delivery seam between the session store and whatever moves envelopes.
//!
//! Nothing here touches the network. [`SimulatedTransport`] stands in for a
//! peer that acknowledges after fixed delays; [`NullTransport`] and
//! [`RecordingTransport`] never acknowledge, which lets tests exercise the
//! late and never-delivered orderings deterministically.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use causerie_shared::constants::{DEFAULT_DELIVERY_DELAY_MS, DEFAULT_READ_DELAY_MS};
use causerie_shared::{ConversationId, Envelope, MessageId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptKind {
    Delivered,
    Read,
}

/// Acknowledgement from one recipient for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub recipient_id: UserId,
    pub kind: ReceiptKind,
}

pub trait DeliveryTransport: Send {
    /// Hand an envelope over for delivery to every recipient it carries.
    fn dispatch(&mut self, envelope: &Envelope);

    /// Receipts that have become due by `now`, oldest first.
    fn poll_receipts(&mut self, now: Instant) -> Vec<Receipt>;

    /// Drop any pending acknowledgement for `message_id`.
    fn cancel(&mut self, message_id: MessageId);
}

/// Acknowledges every recipient after fixed delays.
pub struct SimulatedTransport {
    delivery_delay: Duration,
    read_delay: Duration,
    pending: Vec<(Instant, Receipt)>,
}

impl SimulatedTransport {
    pub fn new(delivery_delay: Duration, read_delay: Duration) -> Self {
        Self {
            delivery_delay,
            read_delay,
            pending: Vec::new(),
        }
    }

    pub fn dispatch_at(&mut self, envelope: &Envelope, at: Instant) {
        for recipient_id in envelope.recipient_ids() {
            for (delay, kind) in [
                (self.delivery_delay, ReceiptKind::Delivered),
                (self.read_delay, ReceiptKind::Read),
            ] {
                self.pending.push((
                    at + delay,
                    Receipt {
                        message_id: envelope.message_id,
                        conversation_id: envelope.conversation_id.clone(),
                        recipient_id: recipient_id.clone(),
                        kind,
                    },
                ));
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_DELIVERY_DELAY_MS),
            Duration::from_millis(DEFAULT_READ_DELAY_MS),
        )
    }
}

impl DeliveryTransport for SimulatedTransport {
    fn dispatch(&mut self, envelope: &Envelope) {
        self.dispatch_at(envelope, Instant::now());
    }

    fn poll_receipts(&mut self, now: Instant) -> Vec<Receipt> {
        let (mut due, later): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|(at, _)| *at <= now);
        self.pending = later;

        due.sort_by_key(|(at, _)| *at);
        due.into_iter().map(|(_, receipt)| receipt).collect()
    }

    fn cancel(&mut self, message_id: MessageId) {
        self.pending.retain(|(_, r)| r.message_id != message_id);
    }
}

/// Discards envelopes and never acknowledges.
#[derive(Debug, Default)]
pub struct NullTransport;

impl DeliveryTransport for NullTransport {
    fn dispatch(&mut self, _envelope: &Envelope) {}

    fn poll_receipts(&mut self, _now: Instant) -> Vec<Receipt> {
        Vec::new()
    }

    fn cancel(&mut self, _message_id: MessageId) {}
}

/// Keeps dispatched envelopes in a shared outbox and never acknowledges.
/// Clones share the outbox, so one can be boxed into a session while
/// another drains it.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    outbox: Arc<Mutex<Vec<Envelope>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every envelope dispatched since the last call.
    pub fn drain(&self) -> Vec<Envelope> {
        match self.outbox.lock() {
            Ok(mut outbox) => std::mem::take(&mut *outbox),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl DeliveryTransport for RecordingTransport {
    fn dispatch(&mut self, envelope: &Envelope) {
        match self.outbox.lock() {
            Ok(mut outbox) => outbox.push(envelope.clone()),
            Err(poisoned) => poisoned.into_inner().push(envelope.clone()),
        }
    }

    fn poll_receipts(&mut self, _now: Instant) -> Vec<Receipt> {
        Vec::new()
    }

    fn cancel(&mut self, _message_id: MessageId) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use causerie_shared::protocol::{seal, EnvelopeHeader};
    use causerie_shared::{KeyPair, MessagePayload, MessageType, Recipient};

    fn envelope(recipients: &[&str]) -> Envelope {
        let header = EnvelopeHeader {
            message_id: MessageId::new(),
            conversation_id: "group_1_abc".into(),
            sender_id: "u1".into(),
            message_type: MessageType::Text,
            timestamp: chrono::Utc::now(),
        };
        let payload = MessagePayload {
            content: "hi".into(),
            message_type: MessageType::Text,
            attachment: None,
        };
        let recipients: Vec<Recipient> = recipients
            .iter()
            .map(|id| Recipient {
                id: UserId::from(*id),
                public_key: KeyPair::generate().public_key_bytes(),
            })
            .collect();
        seal(header, &payload, &recipients).unwrap()
    }

    #[test]
    fn receipts_become_due_after_their_delays() {
        let mut transport = SimulatedTransport::default();
        let start = Instant::now();
        let env = envelope(&["u2", "u3"]);
        transport.dispatch_at(&env, start);
        assert_eq!(transport.pending_count(), 4);

        assert!(transport.poll_receipts(start).is_empty());

        let delivered = transport.poll_receipts(start + Duration::from_millis(1_000));
        assert_eq!(delivered.len(), 2);
        assert!(delivered.iter().all(|r| r.kind == ReceiptKind::Delivered));

        let read = transport.poll_receipts(start + Duration::from_secs(10));
        assert_eq!(read.len(), 2);
        assert!(read.iter().all(|r| r.kind == ReceiptKind::Read));
        assert_eq!(transport.pending_count(), 0);
    }

    #[test]
    fn late_poll_yields_delivered_before_read() {
        let mut transport = SimulatedTransport::default();
        let start = Instant::now();
        transport.dispatch_at(&envelope(&["u2"]), start);

        let receipts = transport.poll_receipts(start + Duration::from_secs(60));
        let kinds: Vec<_> = receipts.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![ReceiptKind::Delivered, ReceiptKind::Read]);
    }

    #[test]
    fn cancel_drops_pending_receipts() {
        let mut transport = SimulatedTransport::default();
        let start = Instant::now();
        let keep = envelope(&["u2"]);
        let dropped = envelope(&["u2"]);
        transport.dispatch_at(&keep, start);
        transport.dispatch_at(&dropped, start);

        transport.cancel(dropped.message_id);
        let receipts = transport.poll_receipts(start + Duration::from_secs(60));
        assert_eq!(receipts.len(), 2);
        assert!(receipts.iter().all(|r| r.message_id == keep.message_id));
    }

    #[test]
    fn envelope_without_recipients_is_never_acknowledged() {
        let mut transport = SimulatedTransport::default();
        transport.dispatch(&envelope(&[]));
        assert_eq!(transport.pending_count(), 0);
    }

    #[test]
    fn recording_transport_shares_its_outbox() {
        let recorder = RecordingTransport::new();
        let mut boxed: Box<dyn DeliveryTransport> = Box::new(recorder.clone());
        let env = envelope(&["u2"]);

        boxed.dispatch(&env);
        assert!(boxed.poll_receipts(Instant::now() + Duration::from_secs(60)).is_empty());

        assert_eq!(recorder.drain(), vec![env]);
        assert!(recorder.drain().is_empty());
    }
}
