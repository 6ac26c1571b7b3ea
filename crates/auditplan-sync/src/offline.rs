//! Companion offline store: a namespaced key-value area plus a queue of
//! higher-level intents to replay after reconnection.
//!
//! This store is deliberately separate from the CRDT document; it has
//! different merge semantics and different failure modes. Queue timestamps are supplied
//! by the caller (they describe when the intent was captured); ties preserve
//! insertion order through a monotonic sequence number.

use std::collections::BTreeMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;
use tracing::debug;

use crate::QueueError;

/// Intent kind for a queued operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    Create,
    Update,
    Delete,
}

/// A queued offline intent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: String,
    pub op_type: OpType,
    /// Entity kind, e.g. "task"
    pub entity: String,
    pub entity_id: String,
    /// Payload; `Null` for deletes
    pub data: Value,
    /// Capture time in milliseconds since the epoch, caller-supplied
    pub timestamp: i64,
}

/// How overlapping fields resolve when merging queued operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    LastWriteWins,
    FirstWriteWins,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct OfflineData {
    kv: BTreeMap<String, BTreeMap<String, Value>>,
    queue: Vec<QueuedEntry>,
    next_seq: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct QueuedEntry {
    seq: u64,
    op: QueuedOperation,
}

/// Namespaced KV plus operation queue, optionally file-backed.
pub struct OfflineStore {
    path: Option<PathBuf>,
    data: Mutex<OfflineData>,
}

impl OfflineStore {
    /// Purely in-memory store.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(OfflineData::default()),
        }
    }

    /// File-backed store; [`OfflineStore::restore`] reloads previous contents.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            data: Mutex::new(OfflineData::default()),
        }
    }

    /// Restore contents from disk (no-op for in-memory stores or when the
    /// file does not exist yet).
    pub async fn restore(&self) -> Result<(), QueueError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        match fs::read(path).await {
            Ok(bytes) => {
                let data: OfflineData = serde_json::from_slice(&bytes)
                    .map_err(|e| QueueError::Storage(e.to_string()))?;
                debug!(queued = data.queue.len(), "offline store loaded");
                *self.data.lock() = data;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(QueueError::Storage(e.to_string())),
        }
    }

    async fn flush(&self) -> Result<(), QueueError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let encoded = {
            let data = self.data.lock();
            serde_json::to_vec(&*data).map_err(|e| QueueError::Storage(e.to_string()))?
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| QueueError::Storage(e.to_string()))?;
        }
        fs::write(path, encoded)
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))
    }

    // ------------------------------------------------------------------
    // Key-value area
    // ------------------------------------------------------------------

    pub async fn save(&self, namespace: &str, key: &str, value: Value) -> Result<(), QueueError> {
        self.data
            .lock()
            .kv
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.flush().await
    }

    pub fn load(&self, namespace: &str, key: &str) -> Option<Value> {
        self.data
            .lock()
            .kv
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned()
    }

    // ------------------------------------------------------------------
    // Operation queue
    // ------------------------------------------------------------------

    pub async fn queue_operation(&self, op: QueuedOperation) -> Result<(), QueueError> {
        {
            let mut data = self.data.lock();
            data.next_seq += 1;
            let seq = data.next_seq;
            data.queue.push(QueuedEntry { seq, op });
        }
        self.flush().await
    }

    /// Pending operations, timestamp ascending; ties keep insertion order.
    pub fn get_pending_operations(&self) -> Vec<QueuedOperation> {
        let data = self.data.lock();
        let mut entries: Vec<&QueuedEntry> = data.queue.iter().collect();
        entries.sort_by_key(|e| (e.op.timestamp, e.seq));
        entries.into_iter().map(|e| e.op.clone()).collect()
    }

    pub async fn remove_operation(&self, id: &str) -> Result<(), QueueError> {
        self.data.lock().queue.retain(|e| e.op.id != id);
        self.flush().await
    }

    pub fn get_queue_count(&self) -> usize {
        self.data.lock().queue.len()
    }

    pub async fn clear_queue(&self) -> Result<(), QueueError> {
        self.data.lock().queue.clear();
        self.flush().await
    }

    /// Queued operations touching one entity, timestamp ascending.
    pub fn detect_conflicts(&self, entity: &str, entity_id: &str) -> Vec<QueuedOperation> {
        self.get_pending_operations()
            .into_iter()
            .filter(|op| op.entity == entity && op.entity_id == entity_id)
            .collect()
    }

    /// Merge all queued operations for an entity into one value.
    ///
    /// Both strategies union every field across the operations; they differ
    /// only in which side wins on overlapping keys. Deletes carry no data
    /// and are skipped; a non-object payload cannot be field-merged.
    pub fn resolve_conflicts(
        &self,
        entity: &str,
        entity_id: &str,
        strategy: ConflictStrategy,
    ) -> Result<Value, QueueError> {
        let ops = self.detect_conflicts(entity, entity_id);
        let mut merged = Map::new();
        let mut mergeable = 0usize;

        for op in &ops {
            let object = match &op.data {
                Value::Object(map) => map,
                Value::Null => continue,
                _ => {
                    return Err(QueueError::ConflictUnresolvable {
                        entity: entity.to_string(),
                        entity_id: entity_id.to_string(),
                    })
                }
            };
            mergeable += 1;
            for (key, value) in object {
                match strategy {
                    ConflictStrategy::LastWriteWins => {
                        // Ascending order: later operations overwrite.
                        merged.insert(key.clone(), value.clone());
                    }
                    ConflictStrategy::FirstWriteWins => {
                        merged.entry(key.clone()).or_insert_with(|| value.clone());
                    }
                }
            }
        }

        if mergeable == 0 {
            return Err(QueueError::ConflictUnresolvable {
                entity: entity.to_string(),
                entity_id: entity_id.to_string(),
            });
        }
        Ok(Value::Object(merged))
    }

    // ------------------------------------------------------------------
    // Housekeeping
    // ------------------------------------------------------------------

    /// Approximate bytes the store occupies when serialized.
    pub fn estimate_storage_size(&self) -> usize {
        let data = self.data.lock();
        serde_json::to_vec(&*data).map(|b| b.len()).unwrap_or(0)
    }

    pub async fn clear_all(&self) -> Result<(), QueueError> {
        *self.data.lock() = OfflineData::default();
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(id: &str, entity_id: &str, data: Value, timestamp: i64) -> QueuedOperation {
        QueuedOperation {
            id: id.to_string(),
            op_type: OpType::Update,
            entity: "task".to_string(),
            entity_id: entity_id.to_string(),
            data,
            timestamp,
        }
    }

    #[tokio::test]
    async fn kv_round_trip() {
        let store = OfflineStore::in_memory();
        store.save("drafts", "t1", json!({"title": "x"})).await.unwrap();
        assert_eq!(store.load("drafts", "t1"), Some(json!({"title": "x"})));
        assert_eq!(store.load("drafts", "missing"), None);
        assert_eq!(store.load("other", "t1"), None);
    }

    #[tokio::test]
    async fn queue_orders_by_timestamp_then_insertion() {
        let store = OfflineStore::in_memory();
        store.queue_operation(op("b", "t1", json!({}), 200)).await.unwrap();
        store.queue_operation(op("a", "t1", json!({}), 100)).await.unwrap();
        store.queue_operation(op("c", "t1", json!({}), 200)).await.unwrap();

        let ids: Vec<String> = store
            .get_pending_operations()
            .into_iter()
            .map(|o| o.id)
            .collect();
        // 100 first, then the two 200s in insertion order.
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(store.get_queue_count(), 3);

        store.remove_operation("b").await.unwrap();
        assert_eq!(store.get_queue_count(), 2);
        store.clear_queue().await.unwrap();
        assert_eq!(store.get_queue_count(), 0);
    }

    #[tokio::test]
    async fn conflicts_are_scoped_to_one_entity() {
        let store = OfflineStore::in_memory();
        store.queue_operation(op("a", "t1", json!({"x": 1}), 1)).await.unwrap();
        store.queue_operation(op("b", "t2", json!({"x": 2}), 2)).await.unwrap();
        store.queue_operation(op("c", "t1", json!({"y": 3}), 3)).await.unwrap();

        let conflicts = store.detect_conflicts("task", "t1");
        assert_eq!(conflicts.len(), 2);
        assert!(store.detect_conflicts("task", "t9").is_empty());
    }

    #[tokio::test]
    async fn resolve_unions_fields_with_strategy_on_overlap() {
        let store = OfflineStore::in_memory();
        store
            .queue_operation(op("a", "t1", json!({"title": "old", "status": "pending"}), 100))
            .await
            .unwrap();
        store
            .queue_operation(op("b", "t1", json!({"title": "new", "priority": "high"}), 200))
            .await
            .unwrap();

        let last = store
            .resolve_conflicts("task", "t1", ConflictStrategy::LastWriteWins)
            .unwrap();
        assert_eq!(
            last,
            json!({"title": "new", "status": "pending", "priority": "high"})
        );

        let first = store
            .resolve_conflicts("task", "t1", ConflictStrategy::FirstWriteWins)
            .unwrap();
        assert_eq!(
            first,
            json!({"title": "old", "status": "pending", "priority": "high"})
        );
    }

    #[tokio::test]
    async fn resolve_skips_deletes_but_needs_objects() {
        let store = OfflineStore::in_memory();
        let mut delete = op("a", "t1", Value::Null, 50);
        delete.op_type = OpType::Delete;
        store.queue_operation(delete).await.unwrap();

        // Only a delete: nothing mergeable.
        assert!(matches!(
            store.resolve_conflicts("task", "t1", ConflictStrategy::LastWriteWins),
            Err(QueueError::ConflictUnresolvable { .. })
        ));

        store.queue_operation(op("b", "t1", json!({"x": 1}), 60)).await.unwrap();
        assert_eq!(
            store
                .resolve_conflicts("task", "t1", ConflictStrategy::LastWriteWins)
                .unwrap(),
            json!({"x": 1})
        );

        // A scalar payload cannot be field-merged.
        store.queue_operation(op("c", "t1", json!(42), 70)).await.unwrap();
        assert!(matches!(
            store.resolve_conflicts("task", "t1", ConflictStrategy::LastWriteWins),
            Err(QueueError::ConflictUnresolvable { .. })
        ));
    }

    #[tokio::test]
    async fn survives_restart_when_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline.json");

        {
            let store = OfflineStore::at_path(&path);
            store.save("drafts", "t1", json!(1)).await.unwrap();
            store.queue_operation(op("a", "t1", json!({"x": 1}), 1)).await.unwrap();
        }

        let store = OfflineStore::at_path(&path);
        assert_eq!(store.get_queue_count(), 0);
        store.restore().await.unwrap();
        assert_eq!(store.get_queue_count(), 1);
        assert_eq!(store.load("drafts", "t1"), Some(json!(1)));

        assert!(store.estimate_storage_size() > 0);
        store.clear_all().await.unwrap();
        assert_eq!(store.get_queue_count(), 0);
    }
}
