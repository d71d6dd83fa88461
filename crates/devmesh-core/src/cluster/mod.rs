//! Replicated-state primitives consumed by the core.
//!
//! The cluster transport (replication, consensus, failure detection) is an
//! external concern. The core only depends on two narrow traits:
//!
//! - [`ReplicatedMap`]: cluster-wide key/value map with per-key serialized
//!   read-modify-write and a watch stream of applied updates.
//! - [`LeaderElector`]: per-topic leader election with an ordered
//!   candidate log, used for device mastership.
//!
//! [`MemoryCluster`] is an in-process implementation of both, shared by
//! any number of simulated nodes. Tests run the full subsystem on it.

mod memory;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::CoreError;
use crate::model::{DeviceId, NodeId};

pub use memory::{ClusterNode, MemoryCluster};

/// Outcome of a `compute` closure.
#[derive(Debug)]
pub enum Mutation<V> {
    /// Leave the entry as it is. No update is produced.
    Keep,
    /// Replace (or create) the entry.
    Put(V),
    /// Delete the entry.
    Remove,
}

/// One applied mutation, as seen by the writer and by every watcher.
#[derive(Debug)]
pub struct MapUpdate<K, V> {
    pub key: K,
    pub old: Option<Arc<V>>,
    pub new: Option<Arc<V>>,
    /// Cluster-wide replication sequence. Strictly increasing per key.
    pub version: u64,
    /// Node that issued the write.
    pub origin: NodeId,
}

impl<K: Clone, V> Clone for MapUpdate<K, V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            old: self.old.clone(),
            new: self.new.clone(),
            version: self.version,
            origin: self.origin.clone(),
        }
    }
}

/// Cluster-wide map with per-key ordering.
///
/// Reads are served from the local replica and observe every write this
/// node has applied. `compute` runs the closure while holding the key's
/// exclusive slot, so concurrent writers to one key are serialized and
/// each sees the result of the previous one.
pub trait ReplicatedMap<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<Arc<V>>;

    fn values(&self) -> Vec<Arc<V>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically read-modify-write one key. Returns the applied update,
    /// or `None` when the closure chose [`Mutation::Keep`].
    fn compute(
        &self,
        key: &K,
        f: &mut dyn FnMut(Option<&Arc<V>>) -> Mutation<V>,
    ) -> Option<MapUpdate<K, V>>;

    /// Subscribe to every update applied cluster-wide, including this
    /// node's own writes.
    fn watch(&self) -> broadcast::Receiver<MapUpdate<K, V>>;
}

/// Current state of one election topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leadership {
    pub topic: DeviceId,
    pub leader: Option<NodeId>,
    /// Bumped on every leader change; lets observers drop stale views.
    pub term: u64,
    /// Election log: candidates in the order they will be promoted.
    pub candidates: Vec<NodeId>,
}

impl Leadership {
    pub fn is_leader(&self, node: &NodeId) -> bool {
        self.leader.as_ref() == Some(node)
    }

    pub fn is_candidate(&self, node: &NodeId) -> bool {
        self.candidates.contains(node)
    }
}

/// Leader election keyed by device.
///
/// Guarantees at most one leader per topic at any term. Candidacy calls
/// are asynchronous because real implementations round-trip to a
/// consensus group; queries answer from the local view and never block.
pub trait LeaderElector: Send + Sync {
    fn local_node(&self) -> &NodeId;

    /// Join the election for `topic` (idempotent) and return its state.
    fn run_for_leadership<'a>(
        &'a self,
        topic: &'a DeviceId,
    ) -> BoxFuture<'a, Result<Leadership, CoreError>>;

    /// Leave the election for `topic`. If this node led it, the next
    /// candidate is promoted. A no-op for non-candidates.
    fn withdraw<'a>(&'a self, topic: &'a DeviceId) -> BoxFuture<'a, Result<(), CoreError>>;

    fn leadership(&self, topic: &DeviceId) -> Option<Leadership>;

    fn leaderships(&self) -> Vec<Leadership>;

    /// Subscribe to leadership changes on every topic.
    fn watch(&self) -> broadcast::Receiver<Leadership>;
}
