//! The replicated document: typed collections over the CRDT kernel,
//! transactions with batched change events, and local undo/redo.
//!
//! All mutation goes through [`SyncDocument::transact`]; the convenience
//! setters are single-op transactions. One transaction produces at most one
//! [`ChangeEvent`], fired synchronously after the document lock is released.
//! Observers must not mutate the document from inside a callback; defer to a
//! task if follow-up writes are needed. Violations trip a `debug_assert`
//! in debug builds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::crdt::{
    ElemId, LwwMap, OrderKey, ReplicaId, SequenceCrdt, Stamp, StateVector,
};
use crate::{Subscription, SyncError};

/// Origin tag for edits made by this user on this device. Only these are
/// undoable.
pub const LOCAL_ORIGIN: &str = "local";

/// Origin tag for updates merged in from the transport.
pub const REMOTE_ORIGIN: &str = "remote";

// ============================================================================
// Replicated state
// ============================================================================

/// The full CRDT value of a document. Also the wire shape: an update is a
/// (possibly partial) `DocumentState`, and a snapshot is an update that
/// happens to carry everything.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentState {
    pub tasks: LwwMap,
    pub projects: LwwMap,
    pub team_members: LwwMap,
    pub audit_findings: SequenceCrdt,
}

impl DocumentState {
    pub fn merge(&mut self, other: &DocumentState) {
        self.tasks.merge(&other.tasks);
        self.projects.merge(&other.projects);
        self.team_members.merge(&other.team_members);
        self.audit_findings.merge(&other.audit_findings);
    }

    pub fn delta_since(&self, vector: &StateVector) -> DocumentState {
        DocumentState {
            tasks: self.tasks.delta_since(vector),
            projects: self.projects.delta_since(vector),
            team_members: self.team_members.delta_since(vector),
            audit_findings: self.audit_findings.delta_since(vector),
        }
    }

    pub fn state_vector(&self) -> StateVector {
        let mut vector = StateVector::default();
        for register in self
            .tasks
            .registers()
            .chain(self.projects.registers())
            .chain(self.team_members.registers())
        {
            vector.observe(register.stamp);
        }
        for stamp in self.audit_findings.stamps() {
            vector.observe(stamp);
        }
        vector
    }

    fn map(&self, collection: MapCollection) -> &LwwMap {
        match collection {
            MapCollection::Tasks => &self.tasks,
            MapCollection::Projects => &self.projects,
            MapCollection::TeamMembers => &self.team_members,
        }
    }

    fn map_mut(&mut self, collection: MapCollection) -> &mut LwwMap {
        match collection {
            MapCollection::Tasks => &mut self.tasks,
            MapCollection::Projects => &mut self.projects,
            MapCollection::TeamMembers => &mut self.team_members,
        }
    }
}

// ============================================================================
// Change events
// ============================================================================

/// Which collection a change touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Tasks,
    Projects,
    TeamMembers,
    AuditFindings,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MapCollection {
    Tasks,
    Projects,
    TeamMembers,
}

impl From<MapCollection> for Collection {
    fn from(c: MapCollection) -> Self {
        match c {
            MapCollection::Tasks => Collection::Tasks,
            MapCollection::Projects => Collection::Projects,
            MapCollection::TeamMembers => Collection::TeamMembers,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Set,
    Removed,
    Inserted,
}

/// One touched entry within a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    pub collection: Collection,
    /// Entity id for map collections, element id for the findings sequence
    pub key: String,
    pub kind: ChangeKind,
}

/// The single observable event a transaction produces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub origin: String,
    pub changes: Vec<Change>,
}

type ChangeCallback = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

// ============================================================================
// Undo history
// ============================================================================

enum InverseOp {
    /// Restore a map key to its prior value (`None` restores the tombstone)
    MapRestore {
        collection: MapCollection,
        key: String,
        prior: Option<Value>,
    },
    /// Remove a sequence element inserted by the forward op
    SeqRemove { id: ElemId },
    /// Re-create a removed sequence value at its old position
    SeqRestore { key: OrderKey, value: Value },
}

struct HistoryEntry {
    inverses: Vec<InverseOp>,
}

// ============================================================================
// SyncDocument
// ============================================================================

struct Inner {
    state: DocumentState,
    clock: u64,
    elem_counter: u64,
    undo_stack: Vec<HistoryEntry>,
    redo_stack: Vec<HistoryEntry>,
}

/// A replica of the shared project document.
pub struct SyncDocument {
    replica: ReplicaId,
    inner: Mutex<Inner>,
    observers: Mutex<Vec<(u64, ChangeCallback)>>,
    next_subscription: AtomicU64,
    /// Thread currently delivering change callbacks, if any
    notifying: Mutex<Option<ThreadId>>,
}

impl Default for SyncDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncDocument {
    pub fn new() -> Self {
        Self::with_replica(ReplicaId::generate())
    }

    pub fn with_replica(replica: ReplicaId) -> Self {
        Self {
            replica,
            inner: Mutex::new(Inner {
                state: DocumentState::default(),
                clock: 0,
                elem_counter: 0,
                undo_stack: Vec::new(),
                redo_stack: Vec::new(),
            }),
            observers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            notifying: Mutex::new(None),
        }
    }

    pub fn replica_id(&self) -> ReplicaId {
        self.replica
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Run several mutations as one atomic batch: observers see either none
    /// or all of them, in a single event.
    pub fn transact<R>(&self, origin: &str, f: impl FnOnce(&mut Transaction<'_>) -> R) -> R {
        self.assert_not_in_callback();
        let (result, event) = {
            let mut inner = self.inner.lock();
            let mut txn = Transaction {
                inner: &mut *inner,
                replica: self.replica,
                changes: Vec::new(),
                inverses: Vec::new(),
            };
            let result = f(&mut txn);
            let changes = std::mem::take(&mut txn.changes);
            let inverses = std::mem::take(&mut txn.inverses);
            drop(txn);

            if !changes.is_empty() && origin == LOCAL_ORIGIN {
                inner.undo_stack.push(HistoryEntry { inverses });
                inner.redo_stack.clear();
            }
            let event = (!changes.is_empty()).then(|| ChangeEvent {
                origin: origin.to_string(),
                changes,
            });
            (result, event)
        };
        if let Some(event) = event {
            self.notify(&event);
        }
        result
    }

    // ------------------------------------------------------------------
    // Convenience single-op mutations
    // ------------------------------------------------------------------

    pub fn set_task(&self, id: &str, data: Value, origin: &str) {
        self.transact(origin, |txn| txn.set_task(id, data));
    }

    pub fn delete_task(&self, id: &str, origin: &str) {
        self.transact(origin, |txn| txn.delete_task(id));
    }

    pub fn set_project(&self, id: &str, data: Value, origin: &str) {
        self.transact(origin, |txn| txn.set_project(id, data));
    }

    pub fn delete_project(&self, id: &str, origin: &str) {
        self.transact(origin, |txn| txn.delete_project(id));
    }

    pub fn set_team_member(&self, id: &str, data: Value, origin: &str) {
        self.transact(origin, |txn| txn.set_team_member(id, data));
    }

    pub fn delete_team_member(&self, id: &str, origin: &str) {
        self.transact(origin, |txn| txn.delete_team_member(id));
    }

    pub fn insert_finding(&self, index: usize, data: Value, origin: &str) {
        self.transact(origin, |txn| txn.insert_finding(index, data));
    }

    pub fn remove_finding(&self, index: usize, origin: &str) {
        self.transact(origin, |txn| txn.remove_finding(index));
    }

    // ------------------------------------------------------------------
    // Reads (always fresh copies)
    // ------------------------------------------------------------------

    pub fn get_task(&self, id: &str) -> Option<Value> {
        self.inner.lock().state.tasks.get(id).cloned()
    }

    pub fn tasks(&self) -> Vec<(String, Value)> {
        self.read_map(MapCollection::Tasks)
    }

    pub fn get_project(&self, id: &str) -> Option<Value> {
        self.inner.lock().state.projects.get(id).cloned()
    }

    pub fn projects(&self) -> Vec<(String, Value)> {
        self.read_map(MapCollection::Projects)
    }

    pub fn get_team_member(&self, id: &str) -> Option<Value> {
        self.inner.lock().state.team_members.get(id).cloned()
    }

    pub fn team_members(&self) -> Vec<(String, Value)> {
        self.read_map(MapCollection::TeamMembers)
    }

    pub fn findings(&self) -> Vec<Value> {
        self.inner.lock().state.audit_findings.values()
    }

    fn read_map(&self, collection: MapCollection) -> Vec<(String, Value)> {
        self.inner
            .lock()
            .state
            .map(collection)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// A clone of the full replicated state (tests, persistence).
    pub fn state(&self) -> DocumentState {
        self.inner.lock().state.clone()
    }

    pub fn state_vector(&self) -> StateVector {
        self.inner.lock().state.state_vector()
    }

    // ------------------------------------------------------------------
    // Undo / redo (local origin only)
    // ------------------------------------------------------------------

    pub fn undo(&self) -> bool {
        self.replay_history(true)
    }

    pub fn redo(&self) -> bool {
        self.replay_history(false)
    }

    fn replay_history(&self, undo: bool) -> bool {
        self.assert_not_in_callback();
        let event = {
            let mut inner = self.inner.lock();
            let entry = if undo {
                inner.undo_stack.pop()
            } else {
                inner.redo_stack.pop()
            };
            let Some(entry) = entry else {
                return false;
            };

            let mut changes = Vec::new();
            let mut opposite = Vec::new();
            // Inverses run newest-first so multi-op transactions unwind
            // in reverse order.
            for op in entry.inverses.into_iter().rev() {
                let (back, change) = apply_inverse(&mut inner, self.replica, op);
                opposite.push(back);
                changes.push(change);
            }
            let entry = HistoryEntry { inverses: opposite };
            if undo {
                inner.redo_stack.push(entry);
            } else {
                inner.undo_stack.push(entry);
            }
            ChangeEvent {
                origin: LOCAL_ORIGIN.to_string(),
                changes,
            }
        };
        self.notify(&event);
        true
    }

    // ------------------------------------------------------------------
    // Updates and snapshots
    // ------------------------------------------------------------------

    /// Encode everything the given state vector has not seen.
    pub fn encode_update_since(&self, vector: &StateVector) -> Vec<u8> {
        let delta = self.inner.lock().state.delta_since(vector);
        serde_json::to_vec(&delta).expect("document state serializes")
    }

    /// Snapshot: an update carrying the full state.
    pub fn create_snapshot(&self) -> Vec<u8> {
        self.encode_update_since(&StateVector::default())
    }

    /// Merge an incoming update. Never destructive: concurrent local edits
    /// survive on their merge rank.
    pub fn apply_update(&self, bytes: &[u8], origin: &str) -> Result<(), SyncError> {
        self.assert_not_in_callback();
        let delta: DocumentState =
            serde_json::from_slice(bytes).map_err(|e| SyncError::Decode(e.to_string()))?;
        let event = {
            let mut inner = self.inner.lock();
            let changes = diff_delta(&inner.state, &delta);
            inner.state.merge(&delta);
            // Lamport receive rule: jump past everything we have seen.
            inner.clock = inner.clock.max(delta.state_vector().max_clock());
            (!changes.is_empty()).then(|| ChangeEvent {
                origin: origin.to_string(),
                changes,
            })
        };
        if let Some(event) = event {
            debug!(changes = event.changes.len(), origin = %event.origin, "merged update");
            self.notify(&event);
        }
        Ok(())
    }

    /// Apply a snapshot via CRDT merge.
    pub fn restore_from_snapshot(&self, bytes: &[u8]) -> Result<(), SyncError> {
        self.apply_update(bytes, REMOTE_ORIGIN)
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    pub fn on_change(&self, callback: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Subscription {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().push((id, Box::new(callback)));
        Subscription(id)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.observers.lock().retain(|(id, _)| *id != subscription.0);
    }

    fn notify(&self, event: &ChangeEvent) {
        *self.notifying.lock() = Some(std::thread::current().id());
        let observers = self.observers.lock();
        for (_, callback) in observers.iter() {
            callback(event);
        }
        drop(observers);
        *self.notifying.lock() = None;
    }

    /// Callbacks fire synchronously from the mutation site and must not call
    /// back in with further mutations; that would observe the document
    /// mid-notification and can deadlock on the observer list.
    fn assert_not_in_callback(&self) {
        debug_assert!(
            *self.notifying.lock() != Some(std::thread::current().id()),
            "document mutated from inside a change callback; defer to a task instead"
        );
    }
}

/// Mutation surface inside [`SyncDocument::transact`].
pub struct Transaction<'a> {
    inner: &'a mut Inner,
    replica: ReplicaId,
    changes: Vec<Change>,
    inverses: Vec<InverseOp>,
}

impl Transaction<'_> {
    pub fn set_task(&mut self, id: &str, data: Value) {
        self.map_set(MapCollection::Tasks, id, data);
    }

    pub fn delete_task(&mut self, id: &str) {
        self.map_remove(MapCollection::Tasks, id);
    }

    pub fn set_project(&mut self, id: &str, data: Value) {
        self.map_set(MapCollection::Projects, id, data);
    }

    pub fn delete_project(&mut self, id: &str) {
        self.map_remove(MapCollection::Projects, id);
    }

    pub fn set_team_member(&mut self, id: &str, data: Value) {
        self.map_set(MapCollection::TeamMembers, id, data);
    }

    pub fn delete_team_member(&mut self, id: &str) {
        self.map_remove(MapCollection::TeamMembers, id);
    }

    pub fn insert_finding(&mut self, index: usize, data: Value) {
        let stamp = self.next_stamp();
        self.inner.elem_counter += 1;
        let id = ElemId {
            replica: self.replica,
            counter: self.inner.elem_counter,
        };
        self.inner
            .state
            .audit_findings
            .insert_at(index, data, id, stamp);
        self.inverses.push(InverseOp::SeqRemove { id });
        self.changes.push(Change {
            collection: Collection::AuditFindings,
            key: id.to_string(),
            kind: ChangeKind::Inserted,
        });
    }

    pub fn remove_finding(&mut self, index: usize) {
        let stamp = self.next_stamp();
        if let Some((id, key, value)) = self.inner.state.audit_findings.remove_at(index, stamp) {
            self.inverses.push(InverseOp::SeqRestore { key, value });
            self.changes.push(Change {
                collection: Collection::AuditFindings,
                key: id.to_string(),
                kind: ChangeKind::Removed,
            });
        }
    }

    fn map_set(&mut self, collection: MapCollection, id: &str, data: Value) {
        let stamp = self.next_stamp();
        let prior = self.inner.state.map(collection).get(id).cloned();
        self.inner.state.map_mut(collection).set(id, data, stamp);
        self.inverses.push(InverseOp::MapRestore {
            collection,
            key: id.to_string(),
            prior,
        });
        self.changes.push(Change {
            collection: collection.into(),
            key: id.to_string(),
            kind: ChangeKind::Set,
        });
    }

    fn map_remove(&mut self, collection: MapCollection, id: &str) {
        let stamp = self.next_stamp();
        let prior = self.inner.state.map(collection).get(id).cloned();
        self.inner.state.map_mut(collection).remove(id, stamp);
        self.inverses.push(InverseOp::MapRestore {
            collection,
            key: id.to_string(),
            prior,
        });
        self.changes.push(Change {
            collection: collection.into(),
            key: id.to_string(),
            kind: ChangeKind::Removed,
        });
    }

    fn next_stamp(&mut self) -> Stamp {
        self.inner.clock += 1;
        Stamp {
            clock: self.inner.clock,
            replica: self.replica,
        }
    }
}

/// Apply one inverse op, returning its own inverse plus the change notice.
fn apply_inverse(inner: &mut Inner, replica: ReplicaId, op: InverseOp) -> (InverseOp, Change) {
    inner.clock += 1;
    let stamp = Stamp {
        clock: inner.clock,
        replica,
    };
    match op {
        InverseOp::MapRestore {
            collection,
            key,
            prior,
        } => {
            let current = inner.state.map(collection).get(&key).cloned();
            let kind = match &prior {
                Some(value) => {
                    inner.state.map_mut(collection).set(&key, value.clone(), stamp);
                    ChangeKind::Set
                }
                None => {
                    inner.state.map_mut(collection).remove(&key, stamp);
                    ChangeKind::Removed
                }
            };
            (
                InverseOp::MapRestore {
                    collection,
                    key: key.clone(),
                    prior: current,
                },
                Change {
                    collection: collection.into(),
                    key,
                    kind,
                },
            )
        }
        InverseOp::SeqRemove { id } => {
            let restored = inner.state.audit_findings.remove_by_id(id, stamp);
            let back = match restored {
                Some((key, value)) => InverseOp::SeqRestore { key, value },
                // Element already gone (e.g. removed remotely); undoing the
                // removal then has nothing to restore.
                None => InverseOp::SeqRemove { id },
            };
            (
                back,
                Change {
                    collection: Collection::AuditFindings,
                    key: id.to_string(),
                    kind: ChangeKind::Removed,
                },
            )
        }
        InverseOp::SeqRestore { key, value } => {
            inner.elem_counter += 1;
            let id = ElemId {
                replica,
                counter: inner.elem_counter,
            };
            inner
                .state
                .audit_findings
                .insert_with_key(key, value, id, stamp);
            (
                InverseOp::SeqRemove { id },
                Change {
                    collection: Collection::AuditFindings,
                    key: id.to_string(),
                    kind: ChangeKind::Inserted,
                },
            )
        }
    }
}

/// Which live entries an incoming delta would change, computed before the
/// merge actually runs.
fn diff_delta(current: &DocumentState, delta: &DocumentState) -> Vec<Change> {
    let mut changes = Vec::new();
    let mut probe = current.clone();
    probe.merge(delta);

    for (collection, before, after) in [
        (Collection::Tasks, &current.tasks, &probe.tasks),
        (Collection::Projects, &current.projects, &probe.projects),
        (
            Collection::TeamMembers,
            &current.team_members,
            &probe.team_members,
        ),
    ] {
        for key in delta_keys(before, after) {
            let kind = if after.contains_key(&key) {
                ChangeKind::Set
            } else {
                ChangeKind::Removed
            };
            changes.push(Change {
                collection,
                key,
                kind,
            });
        }
    }

    if current.audit_findings.values() != probe.audit_findings.values() {
        changes.push(Change {
            collection: Collection::AuditFindings,
            key: String::new(),
            kind: ChangeKind::Set,
        });
    }
    changes
}

/// Keys whose live value differs between two map versions.
fn delta_keys(before: &LwwMap, after: &LwwMap) -> Vec<String> {
    let mut keys = Vec::new();
    for (key, value) in after.iter() {
        if before.get(key) != Some(value) {
            keys.push(key.clone());
        }
    }
    for (key, _) in before.iter() {
        if after.get(key).is_none() {
            keys.push(key.clone());
        }
    }
    keys
}
