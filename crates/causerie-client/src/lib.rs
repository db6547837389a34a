//! # causerie-client
//!
//! Session layer of Causerie: the key manager, the message protocol that
//! seals and opens envelopes, and the [`SessionStore`] that owns one
//! identity's conversations.
//!
//! ```no_run
//! use causerie_client::{ClientConfig, KeyManager, MessageDraft, SessionStore};
//! use causerie_shared::UserId;
//! use causerie_store::Participant;
//!
//! # fn main() -> causerie_client::Result<()> {
//! causerie_client::init_tracing();
//! let config = ClientConfig::from_env();
//! let db = config.open_database()?;
//!
//! let me = UserId::from("u1");
//! let mut keys = KeyManager::new();
//! keys.load_or_initialize(&me, &db)?;
//!
//! let mut session = SessionStore::open(keys, "Alice", Box::new(db), config.transport())?;
//! # let bob_public_key = [7u8; 32];
//! let bob = Participant::new("u2", "Bob", bob_public_key);
//! let chat = session.create_direct_conversation(bob)?;
//! session.send_message(&chat.id, MessageDraft::text("hello"))?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod key_manager;
pub mod protocol;
pub mod pump;
pub mod session;
pub mod transport;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use events::{ChatEvent, EventKind, SubscriptionId};
pub use key_manager::KeyManager;
pub use pump::spawn_receipt_pump;
pub use session::{MessageDraft, SessionStore};
pub use transport::{
    DeliveryTransport, NullTransport, Receipt, ReceiptKind, RecordingTransport, SimulatedTransport,
};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default filter. Calling it twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("causerie_client=debug,causerie_store=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();

    tracing::info!("Causerie session layer ready");
}
