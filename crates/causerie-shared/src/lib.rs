//! # causerie-shared
//!
//! Types and primitives shared by every Causerie crate: identifiers, the
//! X25519 identity key pair, XChaCha20-Poly1305 helpers, and the envelope
//! protocol that seals a message once and wraps its content key per
//! recipient.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod types;

pub use error::{CryptoError, IdentityError, ProtocolError};
pub use identity::KeyPair;
pub use protocol::{Envelope, MessagePayload, Recipient};
pub use types::{Attachment, ConversationId, MessageId, MessageType, UserId, UserStatus};
