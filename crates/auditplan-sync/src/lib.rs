//! # auditplan-sync
//!
//! Offline-capable replication for auditplan project data.
//!
//! A [`SyncDocument`] is a conflict-free replicated document holding the
//! `tasks`, `projects` and `team_members` maps plus the ordered
//! `audit_findings` sequence. Replicas edit independently, including fully
//! offline, and converge when updates are exchanged, in any order.
//! [`SyncService`] wraps a document with a transport session, presence
//! ([`Awareness`]), local persistence and status reporting; [`OfflineStore`]
//! is the companion queue for replaying higher-level intents after
//! reconnection.
//!
//! ```rust
//! use auditplan_sync::{SyncDocument, LOCAL_ORIGIN};
//! use serde_json::json;
//!
//! let doc = SyncDocument::new();
//! doc.set_task("t1", json!({"title": "Scoping"}), LOCAL_ORIGIN);
//!
//! // Snapshots are plain bytes; another replica merges them losslessly.
//! let other = SyncDocument::new();
//! other.restore_from_snapshot(&doc.create_snapshot()).unwrap();
//! assert_eq!(other.get_task("t1"), doc.get_task("t1"));
//! ```

use thiserror::Error;

pub mod awareness;
pub mod crdt;
pub mod doc;
pub mod offline;
pub mod persistence;
pub mod service;
pub mod transport;

pub use awareness::{Awareness, AwarenessEvent};
pub use crdt::{ElemId, ReplicaId, Stamp, StateVector};
pub use doc::{
    Change, ChangeEvent, ChangeKind, Collection, DocumentState, SyncDocument, Transaction,
    LOCAL_ORIGIN, REMOTE_ORIGIN,
};
pub use offline::{ConflictStrategy, OfflineStore, OpType, QueuedOperation};
pub use persistence::{DocumentPersistence, PersistenceStatus};
pub use service::{PersistenceOptions, SyncOptions, SyncService, SyncStatus};
pub use transport::{Frame, MemoryTransport, Transport, TransportSession};

/// Handle for deregistering a callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subscription(pub(crate) u64);

// ============================================================================
// Errors
// ============================================================================

/// Transport and document-update failures. Transport problems are also
/// mirrored into [`SyncStatus`](service::SyncStatus).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed update: {0}")]
    Decode(String),

    /// The connect future was dropped before the session opened. Also the
    /// exact string recorded in `SyncStatus.error` on cancellation.
    #[error("cancelled")]
    Cancelled,

    #[error("not connected")]
    NotConnected,
}

/// Local persistence failures. The in-memory document survives all of them.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("persistence io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("persistence encoding error: {0}")]
    Encoding(String),
}

/// Offline queue failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueueError {
    #[error("no mergeable queued operations for {entity} '{entity_id}'")]
    ConflictUnresolvable { entity: String, entity_id: String },

    #[error("offline storage error: {0}")]
    Storage(String),
}
