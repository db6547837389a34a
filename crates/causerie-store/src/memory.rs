//! In-process store implementing both [`Persistence`] and [`KeyStorage`].
//!
//! Clones share the same maps, so a test can hand one clone to the session
//! store and inspect what was written through another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use causerie_shared::identity::KeyPairExport;
use causerie_shared::UserId;

use crate::error::{Result, StoreError};
use crate::keys::KeyStorage;
use crate::snapshots::{Persistence, Snapshot};

#[derive(Clone, Default)]
pub struct MemoryStore {
    // Snapshots are kept as JSON so loads exercise the same date
    // round-trip as the database.
    snapshots: Arc<Mutex<HashMap<UserId, String>>>,
    key_pairs: Arc<Mutex<HashMap<UserId, KeyPairExport>>>,
    fail_saves: Arc<AtomicBool>,
    saves: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save` fail until reset.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful snapshot writes so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Store raw JSON for `identity`, bypassing serialization.
    pub fn put_raw(&self, identity: &UserId, json: &str) -> Result<()> {
        self.snapshots
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .insert(identity.clone(), json.to_string());
        Ok(())
    }
}

impl Persistence for MemoryStore {
    fn load(&self, identity: &UserId) -> Result<Option<Snapshot>> {
        let guard = self.snapshots.lock().map_err(|_| StoreError::LockPoisoned)?;
        guard
            .get(identity)
            .map(|json| Snapshot::from_json(json))
            .transpose()
    }

    fn save(&self, identity: &UserId, snapshot: &Snapshot) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        let json = snapshot.to_json()?;
        self.snapshots
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .insert(identity.clone(), json);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl KeyStorage for MemoryStore {
    fn store_key_pair(&self, identity: &UserId, key_pair: &KeyPairExport) -> Result<()> {
        self.key_pairs
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .insert(identity.clone(), key_pair.clone());
        Ok(())
    }

    fn load_key_pair(&self, identity: &UserId) -> Result<Option<KeyPairExport>> {
        let guard = self.key_pairs.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(guard.get(identity).cloned())
    }
}
