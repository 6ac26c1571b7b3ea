//! Awareness: transient per-replica presence state (name, color, cursor).
//!
//! Awareness is not part of the document: it is ephemeral, carries no
//! history and converges by per-replica clock: the highest clock for a
//! replica wins. Clearing a state broadcasts a tombstone so peers drop the
//! entry.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crdt::ReplicaId;
use crate::{Subscription, SyncError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct AwarenessEntry {
    clock: u64,
    /// `None` means the replica cleared its state (or left)
    state: Option<Value>,
}

/// Notification payload: which replicas changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AwarenessEvent {
    pub changed: Vec<ReplicaId>,
}

type AwarenessCallback = Box<dyn Fn(&AwarenessEvent) + Send + Sync>;

/// Presence map for one document replica.
pub struct Awareness {
    local: ReplicaId,
    entries: Mutex<BTreeMap<ReplicaId, AwarenessEntry>>,
    observers: Mutex<Vec<(u64, AwarenessCallback)>>,
    next_subscription: AtomicU64,
}

impl Awareness {
    pub fn new(local: ReplicaId) -> Self {
        Self {
            local,
            entries: Mutex::new(BTreeMap::new()),
            observers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn replica_id(&self) -> ReplicaId {
        self.local
    }

    /// Set (or clear, with `None`) this replica's state.
    pub fn set_local_state(&self, state: Option<Value>) {
        {
            let mut entries = self.entries.lock();
            let clock = entries.get(&self.local).map_or(0, |e| e.clock) + 1;
            entries.insert(self.local, AwarenessEntry { clock, state });
        }
        self.notify(&AwarenessEvent {
            changed: vec![self.local],
        });
    }

    pub fn local_state(&self) -> Option<Value> {
        self.entries
            .lock()
            .get(&self.local)
            .and_then(|e| e.state.clone())
    }

    /// All live states, local included.
    pub fn all_states(&self) -> BTreeMap<ReplicaId, Value> {
        self.entries
            .lock()
            .iter()
            .filter_map(|(id, e)| e.state.clone().map(|s| (*id, s)))
            .collect()
    }

    /// Encode the full presence map for the transport.
    pub fn encode(&self) -> Vec<u8> {
        let entries = self.entries.lock();
        serde_json::to_vec(&*entries).expect("awareness map serializes")
    }

    /// Merge a peer's presence map; higher clock per replica wins.
    pub fn apply_encoded(&self, bytes: &[u8]) -> Result<(), SyncError> {
        let incoming: BTreeMap<ReplicaId, AwarenessEntry> =
            serde_json::from_slice(bytes).map_err(|e| SyncError::Decode(e.to_string()))?;
        let mut changed = Vec::new();
        {
            let mut entries = self.entries.lock();
            for (id, entry) in incoming {
                let newer = entries.get(&id).map_or(true, |e| entry.clock > e.clock);
                if newer {
                    entries.insert(id, entry);
                    changed.push(id);
                }
            }
        }
        if !changed.is_empty() {
            self.notify(&AwarenessEvent { changed });
        }
        Ok(())
    }

    pub fn on_change(
        &self,
        callback: impl Fn(&AwarenessEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().push((id, Box::new(callback)));
        Subscription(id)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.observers.lock().retain(|(id, _)| *id != subscription.0);
    }

    fn notify(&self, event: &AwarenessEvent) {
        for (_, callback) in self.observers.lock().iter() {
            callback(event);
        }
    }
}
