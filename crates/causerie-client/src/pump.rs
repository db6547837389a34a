use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::session::SessionStore;

/// Shortest tick the pump accepts; smaller periods are raised to this.
pub const MIN_PUMP_INTERVAL: Duration = Duration::from_millis(1);

/// Periodically apply due receipts and purge expired messages.
///
/// The task holds only a weak reference and stops once the last strong
/// handle to the session is dropped. The lock is taken inside a block and
/// released before the next await. `every` below [`MIN_PUMP_INTERVAL`]
/// (including zero) is raised to it.
pub fn spawn_receipt_pump(session: &Arc<Mutex<SessionStore>>, every: Duration) -> JoinHandle<()> {
    let session: Weak<Mutex<SessionStore>> = Arc::downgrade(session);
    if every < MIN_PUMP_INTERVAL {
        warn!(requested_ms = every.as_millis() as u64, "receipt pump interval too small, clamping");
    }
    let every = every.max(MIN_PUMP_INTERVAL);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(session) = session.upgrade() else {
                info!("session dropped, stopping receipt pump");
                break;
            };

            let (applied, purged) = {
                let mut guard = match session.lock() {
                    Ok(g) => g,
                    Err(_) => {
                        warn!("session lock poisoned, stopping receipt pump");
                        break;
                    }
                };
                let applied = guard.process_receipts(Instant::now());
                let purged = guard.purge_expired_messages(Utc::now());
                (applied, purged)
            };

            if applied > 0 || purged > 0 {
                debug!(applied, purged, "receipt pump tick");
            }
        }
    })
}
