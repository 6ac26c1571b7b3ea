//! The transport seam: how update and awareness frames travel between
//! replicas of a document.
//!
//! The real wire (websocket or otherwise) lives outside this crate; the
//! service only needs [`Transport::open`] returning a pair of channels. The
//! in-memory hub below is the reference implementation, used by tests and by
//! same-process collaboration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::SyncError;

/// One opaque message on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// CRDT update (possibly a full snapshot)
    Update(Vec<u8>),
    /// "Send me what I'm missing": an encoded state vector. Peers answer
    /// with an Update delta; an Update never triggers a reply, so the
    /// exchange cannot loop.
    SyncRequest(Vec<u8>),
    /// Awareness presence map
    Awareness(Vec<u8>),
}

/// An open duplex session for one document.
pub struct TransportSession {
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub inbound: mpsc::UnboundedReceiver<Frame>,
}

/// Something that can open sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &str, document_id: &str) -> Result<TransportSession, SyncError>;
}

// ============================================================================
// In-memory hub
// ============================================================================

struct Peer {
    id: u64,
    sender: mpsc::UnboundedSender<Frame>,
}

type Rooms = Arc<Mutex<HashMap<String, Vec<Peer>>>>;

/// Broadcast hub connecting every session opened on the same
/// (url, document id) pair. Frames from one peer fan out to all others.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    rooms: Rooms,
    next_peer: Arc<AtomicU64>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live peers in a room (test helper).
    pub fn peer_count(&self, url: &str, document_id: &str) -> usize {
        self.rooms
            .lock()
            .get(&room_key(url, document_id))
            .map_or(0, |peers| peers.len())
    }
}

fn room_key(url: &str, document_id: &str) -> String {
    format!("{url}#{document_id}")
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, url: &str, document_id: &str) -> Result<TransportSession, SyncError> {
        let key = room_key(url, document_id);
        let peer_id = self.next_peer.fetch_add(1, Ordering::Relaxed);

        let (to_peer, inbound) = mpsc::unbounded_channel();
        let (outbound, mut from_peer) = mpsc::unbounded_channel::<Frame>();

        self.rooms.lock().entry(key.clone()).or_default().push(Peer {
            id: peer_id,
            sender: to_peer,
        });
        debug!(room = %key, peer = peer_id, "peer joined");

        let rooms = self.rooms.clone();
        tokio::spawn(async move {
            while let Some(frame) = from_peer.recv().await {
                let targets: Vec<mpsc::UnboundedSender<Frame>> = {
                    let rooms = rooms.lock();
                    rooms
                        .get(&key)
                        .map(|peers| {
                            peers
                                .iter()
                                .filter(|p| p.id != peer_id)
                                .map(|p| p.sender.clone())
                                .collect()
                        })
                        .unwrap_or_default()
                };
                for target in targets {
                    let _ = target.send(frame.clone());
                }
            }
            // Session dropped; leave the room.
            let mut rooms = rooms.lock();
            if let Some(peers) = rooms.get_mut(&key) {
                peers.retain(|p| p.id != peer_id);
                if peers.is_empty() {
                    rooms.remove(&key);
                }
            }
            debug!(room = %key, peer = peer_id, "peer left");
        });

        Ok(TransportSession { outbound, inbound })
    }
}
