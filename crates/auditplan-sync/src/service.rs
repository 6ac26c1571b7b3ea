//! The sync service: owns one document replica, its awareness, the
//! transport session lifecycle and the local persistence sink.
//!
//! Status is the error surface for transport and persistence problems;
//! operations on the document itself never fail because of connectivity.
//! `get_status` hands out a fresh clone every time; callers can never mutate
//! the service's own view.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::awareness::{Awareness, AwarenessEvent};
use crate::crdt::StateVector;
use crate::doc::{SyncDocument, LOCAL_ORIGIN, REMOTE_ORIGIN};
use crate::persistence::{DocumentPersistence, PersistenceStatus};
use crate::transport::{Frame, Transport};
use crate::{Subscription, SyncError};

// ============================================================================
// Options & status
// ============================================================================

/// Local persistence configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct PersistenceOptions {
    pub enabled: bool,
    /// Store name (directory under `directory`)
    pub name: String,
    /// Base directory for the store
    #[serde(default = "default_persistence_dir")]
    pub directory: std::path::PathBuf,
}

fn default_persistence_dir() -> std::path::PathBuf {
    std::path::PathBuf::from(".auditplan")
}

impl Default for PersistenceOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            name: "auditplan".to_string(),
            directory: default_persistence_dir(),
        }
    }
}

/// Service configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct SyncOptions {
    pub document_id: String,
    pub transport_url: String,
    #[serde(default)]
    pub persistence: PersistenceOptions,
    #[serde(default = "default_awareness")]
    pub awareness: bool,
}

fn default_awareness() -> bool {
    true
}

impl SyncOptions {
    pub fn new(document_id: impl Into<String>, transport_url: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            transport_url: transport_url.into(),
            persistence: PersistenceOptions::default(),
            awareness: true,
        }
    }

    pub fn with_persistence(mut self, directory: impl Into<std::path::PathBuf>, name: impl Into<String>) -> Self {
        self.persistence = PersistenceOptions {
            enabled: true,
            name: name.into(),
            directory: directory.into(),
        };
        self
    }
}

/// Connection and persistence health, as seen by the UI.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub connected: bool,
    pub syncing: bool,
    /// Local transactions not yet shipped to any peer
    pub pending_changes: usize,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

type StatusCallback = Box<dyn Fn(&SyncStatus) + Send + Sync>;
type StatusObservers = Arc<Mutex<Vec<(u64, StatusCallback)>>>;

fn update_status(
    status: &Mutex<SyncStatus>,
    observers: &StatusObservers,
    f: impl FnOnce(&mut SyncStatus),
) {
    let snapshot = {
        let mut status = status.lock();
        f(&mut status);
        status.clone()
    };
    for (_, callback) in observers.lock().iter() {
        callback(&snapshot);
    }
}

/// Marks the connect attempt as cancelled if the future is dropped before it
/// resolves.
struct CancelGuard {
    armed: bool,
    status: Arc<Mutex<SyncStatus>>,
    observers: StatusObservers,
}

impl CancelGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            update_status(&self.status, &self.observers, |s| {
                s.connected = false;
                s.syncing = false;
                s.error = Some(SyncError::Cancelled.to_string());
            });
        }
    }
}

// ============================================================================
// Service
// ============================================================================

struct Session {
    outbound: tokio::sync::mpsc::UnboundedSender<Frame>,
    reader: JoinHandle<()>,
    doc_subscription: Subscription,
}

/// One live replica of a document plus its sync machinery.
pub struct SyncService {
    doc: Arc<SyncDocument>,
    awareness: Arc<Awareness>,
    transport: Arc<dyn Transport>,
    options: SyncOptions,
    status: Arc<Mutex<SyncStatus>>,
    status_observers: StatusObservers,
    next_subscription: AtomicU64,
    session: Arc<Mutex<Option<Session>>>,
    persistence: Option<Arc<DocumentPersistence>>,
    persistence_synced: AtomicBool,
    dirty: Arc<AtomicBool>,
}

impl SyncService {
    pub fn new(options: SyncOptions, transport: Arc<dyn Transport>) -> Self {
        let doc = Arc::new(SyncDocument::new());
        let awareness = Arc::new(Awareness::new(doc.replica_id()));
        let persistence = options.persistence.enabled.then(|| {
            Arc::new(DocumentPersistence::new(
                options.persistence.directory.clone(),
                options.persistence.name.clone(),
            ))
        });

        let status = Arc::new(Mutex::new(SyncStatus::default()));
        let status_observers: StatusObservers = Arc::new(Mutex::new(Vec::new()));
        let session: Arc<Mutex<Option<Session>>> = Arc::new(Mutex::new(None));
        let dirty = Arc::new(AtomicBool::new(false));

        // Track pending local work and persistence dirtiness regardless of
        // connection state.
        {
            let status = status.clone();
            let observers = status_observers.clone();
            let session = session.clone();
            let dirty = dirty.clone();
            doc.on_change(move |event| {
                dirty.store(true, Ordering::SeqCst);
                if event.origin != REMOTE_ORIGIN && session.lock().is_none() {
                    update_status(&status, &observers, |s| s.pending_changes += 1);
                }
            });
        }

        Self {
            doc,
            awareness,
            transport,
            options,
            status,
            status_observers,
            next_subscription: AtomicU64::new(1),
            session,
            persistence,
            persistence_synced: AtomicBool::new(false),
            dirty,
        }
    }

    /// The replicated document this service owns.
    pub fn document(&self) -> &Arc<SyncDocument> {
        &self.doc
    }

    // ------------------------------------------------------------------
    // Transport lifecycle
    // ------------------------------------------------------------------

    /// Open a transport session and start exchanging updates.
    ///
    /// Cancellable: dropping the future before it resolves records
    /// `error: "cancelled"` and leaves the service disconnected.
    pub async fn connect(&self) -> Result<(), SyncError> {
        update_status(&self.status, &self.status_observers, |s| {
            s.syncing = true;
            s.error = None;
        });
        let mut guard = CancelGuard {
            armed: true,
            status: self.status.clone(),
            observers: self.status_observers.clone(),
        };

        let opened = self
            .transport
            .open(&self.options.transport_url, &self.options.document_id)
            .await;
        let session = match opened {
            Ok(session) => session,
            Err(e) => {
                guard.disarm();
                update_status(&self.status, &self.status_observers, |s| {
                    s.syncing = false;
                    s.connected = false;
                    s.error = Some(e.to_string());
                });
                return Err(e);
            }
        };
        let crate::transport::TransportSession {
            outbound,
            mut inbound,
        } = session;

        // Opening handshake: push our full state and ask peers for theirs.
        // Merge is idempotent, so reconnects converge no matter what was
        // missed while offline.
        let _ = outbound.send(Frame::Update(self.doc.create_snapshot()));
        let sv = serde_json::to_vec(&self.doc.state_vector()).expect("state vector serializes");
        let _ = outbound.send(Frame::SyncRequest(sv));
        if self.options.awareness {
            let _ = outbound.send(Frame::Awareness(self.awareness.encode()));
        }

        // Reader: merge everything the wire hands us.
        let reader = {
            let doc = self.doc.clone();
            let awareness = self.awareness.clone();
            let status = self.status.clone();
            let observers = self.status_observers.clone();
            let reply = outbound.clone();
            let send_awareness = self.options.awareness;
            tokio::spawn(async move {
                while let Some(frame) = inbound.recv().await {
                    match frame {
                        Frame::Update(bytes) => match doc.apply_update(&bytes, REMOTE_ORIGIN) {
                            Ok(()) => update_status(&status, &observers, |s| {
                                s.last_sync_time = Some(Utc::now());
                            }),
                            Err(e) => {
                                warn!(error = %e, "dropping malformed update");
                                update_status(&status, &observers, |s| {
                                    s.error = Some(e.to_string());
                                });
                            }
                        },
                        Frame::SyncRequest(bytes) => {
                            match serde_json::from_slice::<StateVector>(&bytes) {
                                Ok(vector) => {
                                    let _ = reply
                                        .send(Frame::Update(doc.encode_update_since(&vector)));
                                    if send_awareness {
                                        let _ =
                                            reply.send(Frame::Awareness(awareness.encode()));
                                    }
                                }
                                Err(e) => warn!(error = %e, "dropping malformed sync request"),
                            }
                        }
                        Frame::Awareness(bytes) => {
                            let _ = awareness.apply_encoded(&bytes);
                        }
                    }
                }
                // Wire closed under us.
                update_status(&status, &observers, |s| {
                    s.connected = false;
                    s.syncing = false;
                });
            })
        };

        // Writer: ship a delta after every non-remote transaction.
        let doc_subscription = {
            let doc = self.doc.clone();
            let outbound = outbound.clone();
            let status = self.status.clone();
            let observers = self.status_observers.clone();
            let last_sent = Mutex::new(self.doc.state_vector());
            self.doc.on_change(move |event| {
                if event.origin == REMOTE_ORIGIN {
                    return;
                }
                let update = {
                    let mut sent = last_sent.lock();
                    let update = doc.encode_update_since(&sent);
                    *sent = doc.state_vector();
                    update
                };
                if outbound.send(Frame::Update(update)).is_ok() {
                    update_status(&status, &observers, |s| {
                        s.pending_changes = 0;
                        s.last_sync_time = Some(Utc::now());
                    });
                }
            })
        };

        *self.session.lock() = Some(Session {
            outbound,
            reader,
            doc_subscription,
        });

        guard.disarm();
        update_status(&self.status, &self.status_observers, |s| {
            s.connected = true;
            s.syncing = false;
            s.pending_changes = 0;
            s.last_sync_time = Some(Utc::now());
        });
        info!(document = %self.options.document_id, "connected");
        self.persist_now().await;
        Ok(())
    }

    /// Tear the session down. The document stays fully usable offline.
    pub async fn disconnect(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            self.doc.unsubscribe(session.doc_subscription);
            session.reader.abort();
            drop(session.outbound);
            info!(document = %self.options.document_id, "disconnected");
        }
        update_status(&self.status, &self.status_observers, |s| {
            s.connected = false;
            s.syncing = false;
        });
        self.persist_now().await;
    }

    pub fn is_connected(&self) -> bool {
        self.status.lock().connected
    }

    /// Ask connected peers for anything this replica is missing, without
    /// tearing the session down. Useful after the UI replays queued offline
    /// intents and wants to confirm convergence.
    pub fn request_sync(&self) -> Result<(), SyncError> {
        let session = self.session.lock();
        let Some(session) = session.as_ref() else {
            return Err(SyncError::NotConnected);
        };
        let sv = serde_json::to_vec(&self.doc.state_vector()).expect("state vector serializes");
        session
            .outbound
            .send(Frame::SyncRequest(sv))
            .map_err(|_| SyncError::NotConnected)
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// A fresh copy of the current status.
    pub fn get_status(&self) -> SyncStatus {
        self.status.lock().clone()
    }

    pub fn on_status_change(
        &self,
        callback: impl Fn(&SyncStatus) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.status_observers.lock().push((id, Box::new(callback)));
        Subscription(id)
    }

    pub fn unsubscribe_status(&self, subscription: Subscription) {
        self.status_observers
            .lock()
            .retain(|(id, _)| *id != subscription.0);
    }

    // ------------------------------------------------------------------
    // Awareness
    // ------------------------------------------------------------------

    /// Set this replica's presence state and broadcast it if connected.
    pub fn set_awareness_state(&self, state: Option<Value>) {
        self.awareness.set_local_state(state);
        if self.options.awareness {
            if let Some(session) = self.session.lock().as_ref() {
                let _ = session.outbound.send(Frame::Awareness(self.awareness.encode()));
            }
        }
    }

    pub fn get_local_awareness_state(&self) -> Option<Value> {
        self.awareness.local_state()
    }

    pub fn get_all_awareness_states(
        &self,
    ) -> std::collections::BTreeMap<crate::crdt::ReplicaId, Value> {
        self.awareness.all_states()
    }

    pub fn on_awareness_change(
        &self,
        callback: impl Fn(&AwarenessEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.awareness.on_change(callback)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn is_persistence_enabled(&self) -> bool {
        self.persistence.is_some()
    }

    /// Load the locally persisted snapshot into the replica. Resolves `true`
    /// once the store contents are in memory.
    pub async fn wait_for_persistence(&self) -> bool {
        let Some(persistence) = &self.persistence else {
            return false;
        };
        match persistence.load(&self.options.document_id).await {
            Ok(Some(bytes)) => {
                if let Err(e) = self.doc.restore_from_snapshot(&bytes) {
                    warn!(error = %e, "persisted snapshot did not decode");
                    update_status(&self.status, &self.status_observers, |s| {
                        s.error = Some(e.to_string());
                    });
                    return false;
                }
                self.persistence_synced.store(true, Ordering::SeqCst);
                debug!(document = %self.options.document_id, "persistence loaded");
                true
            }
            Ok(None) => {
                // Nothing stored yet; the store is trivially in sync.
                self.persistence_synced.store(true, Ordering::SeqCst);
                true
            }
            Err(e) => {
                update_status(&self.status, &self.status_observers, |s| {
                    s.error = Some(e.to_string());
                });
                false
            }
        }
    }

    pub fn get_persistence_status(&self) -> PersistenceStatus {
        PersistenceStatus {
            enabled: self.persistence.is_some(),
            synced: self.persistence_synced.load(Ordering::SeqCst),
            name: self
                .persistence
                .as_ref()
                .map_or_else(|| self.options.persistence.name.clone(), |p| p.name().to_string()),
        }
    }

    pub async fn clear_persistence(&self) {
        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.clear(&self.options.document_id).await {
                update_status(&self.status, &self.status_observers, |s| {
                    s.error = Some(e.to_string());
                });
            }
            self.persistence_synced.store(false, Ordering::SeqCst);
        }
    }

    pub async fn set_metadata(&self, key: &str, value: Value) {
        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence
                .set_metadata(&self.options.document_id, key, value)
                .await
            {
                update_status(&self.status, &self.status_observers, |s| {
                    s.error = Some(e.to_string());
                });
            }
        }
    }

    pub async fn get_metadata(&self, key: &str) -> Option<Value> {
        let persistence = self.persistence.as_ref()?;
        persistence
            .get_metadata(&self.options.document_id, key)
            .await
            .ok()
            .flatten()
    }

    /// Write the current snapshot out if anything changed since the last
    /// write. Also called on connect/disconnect.
    pub async fn persist_now(&self) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return;
        }
        let snapshot = self.doc.create_snapshot();
        if let Err(e) = persistence.store(&self.options.document_id, &snapshot).await {
            warn!(error = %e, "persistence write failed; document stays in memory");
            self.dirty.store(true, Ordering::SeqCst);
            update_status(&self.status, &self.status_observers, |s| {
                s.error = Some(e.to_string());
            });
        }
    }

    // ------------------------------------------------------------------
    // Document conveniences (mirror the document API with local origin)
    // ------------------------------------------------------------------

    pub fn set_task(&self, id: &str, data: Value) {
        self.doc.set_task(id, data, LOCAL_ORIGIN);
    }

    pub fn delete_task(&self, id: &str) {
        self.doc.delete_task(id, LOCAL_ORIGIN);
    }

    pub fn undo(&self) -> bool {
        self.doc.undo()
    }

    pub fn redo(&self) -> bool {
        self.doc.redo()
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        if let Some(session) = self.session.lock().take() {
            session.reader.abort();
        }
    }
}
