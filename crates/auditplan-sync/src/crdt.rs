//! The replication kernel: last-write-wins registers, tombstoned maps, an
//! ordered sequence with stable position keys, and state vectors for delta
//! encoding.
//!
//! Merge is commutative, associative and idempotent, so replicas converge to
//! the same state regardless of the order updates arrive in. Ties between
//! equal clocks break on replica id, which makes the outcome deterministic
//! rather than arbitrary.
//!
//! Removals are tombstones: a deleted key keeps its stamp so that a stale
//! concurrent write cannot resurrect it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identity of one replica of a document.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ReplicaId(Uuid);

impl ReplicaId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lamport stamp: logical clock first, replica id as the tie-breaker.
/// The derived ordering is the merge ordering.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Stamp {
    pub clock: u64,
    pub replica: ReplicaId,
}

/// A last-write-wins cell. `None` is a tombstone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Register {
    pub value: Option<Value>,
    pub stamp: Stamp,
}

impl Register {
    fn merge(&mut self, other: &Register) {
        if other.stamp > self.stamp {
            *self = other.clone();
        }
    }
}

// ============================================================================
// LwwMap
// ============================================================================

/// String-keyed map with last-write-wins per key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LwwMap {
    entries: BTreeMap<String, Register>,
}

impl LwwMap {
    /// Live value for a key; tombstones read as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).and_then(|r| r.value.as_ref())
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value, stamp: Stamp) {
        self.entries.insert(
            key.into(),
            Register {
                value: Some(value),
                stamp,
            },
        );
    }

    /// Tombstone a key. A no-op key still records the stamp so the removal
    /// wins against slower concurrent writes.
    pub fn remove(&mut self, key: impl Into<String>, stamp: Stamp) {
        self.entries
            .insert(key.into(), Register { value: None, stamp });
    }

    /// Live entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries
            .iter()
            .filter_map(|(k, r)| r.value.as_ref().map(|v| (k, v)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn merge(&mut self, other: &LwwMap) {
        for (key, register) in &other.entries {
            match self.entries.get_mut(key) {
                Some(existing) => existing.merge(register),
                None => {
                    self.entries.insert(key.clone(), register.clone());
                }
            }
        }
    }

    /// Entries not yet covered by `vector` (for delta updates).
    pub fn delta_since(&self, vector: &StateVector) -> LwwMap {
        LwwMap {
            entries: self
                .entries
                .iter()
                .filter(|(_, r)| !vector.covers(r.stamp))
                .map(|(k, r)| (k.clone(), r.clone()))
                .collect(),
        }
    }

    pub(crate) fn registers(&self) -> impl Iterator<Item = &Register> {
        self.entries.values()
    }
}

// ============================================================================
// Ordered sequence
// ============================================================================

/// Dense order key: a path of digits with "always room in between".
///
/// Keys may collide under concurrency; ordering ties then break on element
/// id, which keeps the sequence total and convergent.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderKey(Vec<u64>);

impl OrderKey {
    /// A key strictly between two neighbors (either side may be open).
    pub fn between(left: Option<&OrderKey>, right: Option<&OrderKey>) -> OrderKey {
        let l = left.map_or(&[] as &[u64], |k| k.0.as_slice());
        let r = right.map_or(&[] as &[u64], |k| k.0.as_slice());
        let mut path = Vec::new();
        let mut depth = 0;
        loop {
            let lo = l.get(depth).copied().unwrap_or(u64::MIN);
            let hi = r.get(depth).copied().unwrap_or(u64::MAX);
            if hi - lo > 1 {
                path.push(lo + (hi - lo) / 2);
                return OrderKey(path);
            }
            path.push(lo);
            depth += 1;
        }
    }
}

/// Unique element identity, minted once at insert and never reused.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ElemId {
    pub replica: ReplicaId,
    pub counter: u64,
}

impl std::fmt::Display for ElemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.replica, self.counter)
    }
}

/// One sequence slot. Deletion is a sticky tombstone flag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeqElem {
    pub key: OrderKey,
    pub id: ElemId,
    pub value: Value,
    pub stamp: Stamp,
    pub deleted: bool,
}

/// An ordered sequence with position-preserving merge.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceCrdt {
    /// Sorted by (key, id); includes tombstones
    elements: Vec<SeqElem>,
}

impl SequenceCrdt {
    /// Live values in order.
    pub fn values(&self) -> Vec<Value> {
        self.elements
            .iter()
            .filter(|e| !e.deleted)
            .map(|e| e.value.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.elements.iter().filter(|e| !e.deleted).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert at a live index (clamped to the end), returning the new
    /// element's id.
    pub fn insert_at(&mut self, index: usize, value: Value, id: ElemId, stamp: Stamp) -> ElemId {
        let live: Vec<usize> = self
            .elements
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.deleted)
            .map(|(i, _)| i)
            .collect();
        let index = index.min(live.len());
        let left = index
            .checked_sub(1)
            .and_then(|i| live.get(i))
            .map(|&i| &self.elements[i].key);
        let right = live.get(index).map(|&i| &self.elements[i].key);
        let key = OrderKey::between(left, right);

        let elem = SeqElem {
            key,
            id,
            value,
            stamp,
            deleted: false,
        };
        let at = self
            .elements
            .partition_point(|e| (&e.key, &e.id) < (&elem.key, &elem.id));
        self.elements.insert(at, elem);
        id
    }

    /// Tombstone the element at a live index; returns its id and order key.
    pub fn remove_at(&mut self, index: usize, stamp: Stamp) -> Option<(ElemId, OrderKey, Value)> {
        let position = self
            .elements
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.deleted)
            .nth(index)
            .map(|(i, _)| i)?;
        let elem = &mut self.elements[position];
        elem.deleted = true;
        elem.stamp = elem.stamp.max(stamp);
        Some((elem.id, elem.key.clone(), elem.value.clone()))
    }

    /// Tombstone an element by identity; returns its key and value.
    pub fn remove_by_id(&mut self, id: ElemId, stamp: Stamp) -> Option<(OrderKey, Value)> {
        let elem = self.elements.iter_mut().find(|e| e.id == id && !e.deleted)?;
        elem.deleted = true;
        elem.stamp = elem.stamp.max(stamp);
        Some((elem.key.clone(), elem.value.clone()))
    }

    /// Re-create a value at a given order key (used by undo; tombstones are
    /// permanent, so restoration mints a fresh element).
    pub fn insert_with_key(&mut self, key: OrderKey, value: Value, id: ElemId, stamp: Stamp) {
        let elem = SeqElem {
            key,
            id,
            value,
            stamp,
            deleted: false,
        };
        let at = self
            .elements
            .partition_point(|e| (&e.key, &e.id) < (&elem.key, &elem.id));
        self.elements.insert(at, elem);
    }

    pub fn merge(&mut self, other: &SequenceCrdt) {
        for incoming in &other.elements {
            match self.elements.iter_mut().find(|e| e.id == incoming.id) {
                Some(existing) => {
                    // Same identity: deletion is sticky, stamps take the max.
                    existing.deleted |= incoming.deleted;
                    if incoming.stamp > existing.stamp {
                        existing.stamp = incoming.stamp;
                        existing.value = incoming.value.clone();
                    }
                }
                None => {
                    let at = self
                        .elements
                        .partition_point(|e| (&e.key, &e.id) < (&incoming.key, &incoming.id));
                    self.elements.insert(at, incoming.clone());
                }
            }
        }
    }

    pub fn delta_since(&self, vector: &StateVector) -> SequenceCrdt {
        SequenceCrdt {
            elements: self
                .elements
                .iter()
                .filter(|e| !vector.covers(e.stamp))
                .cloned()
                .collect(),
        }
    }

    pub(crate) fn stamps(&self) -> impl Iterator<Item = Stamp> + '_ {
        self.elements.iter().map(|e| e.stamp)
    }
}

// ============================================================================
// StateVector
// ============================================================================

/// Per-replica high-water marks; "what this replica has already seen".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVector {
    clocks: BTreeMap<ReplicaId, u64>,
}

impl StateVector {
    pub fn observe(&mut self, stamp: Stamp) {
        let entry = self.clocks.entry(stamp.replica).or_insert(0);
        if stamp.clock > *entry {
            *entry = stamp.clock;
        }
    }

    pub fn covers(&self, stamp: Stamp) -> bool {
        self.clocks
            .get(&stamp.replica)
            .is_some_and(|&clock| clock >= stamp.clock)
    }

    pub fn max_clock(&self) -> u64 {
        self.clocks.values().copied().max().unwrap_or(0)
    }
}
