// ── In-process cluster primitive ──
//
// One shared hub stands in for the replicated map and the election
// service. Each simulated controller gets a `ClusterNode` handle bound to
// its NodeId. Per-key ordering comes from doing the mutation, the version
// assignment and the broadcast while the key's DashMap slot is held.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{LeaderElector, Leadership, MapUpdate, Mutation, ReplicatedMap};
use crate::error::CoreError;
use crate::model::{Device, DeviceId, NodeId};

const DEFAULT_WATCH_CAPACITY: usize = 1024;

type DeviceUpdate = MapUpdate<DeviceId, Device>;

/// Shared state of the simulated cluster. Cheap to clone.
#[derive(Clone)]
pub struct MemoryCluster {
    inner: Arc<ClusterInner>,
}

struct ClusterInner {
    devices: DashMap<DeviceId, Arc<Device>>,
    sequence: AtomicU64,
    device_tx: broadcast::Sender<DeviceUpdate>,
    elections: DashMap<DeviceId, Leadership>,
    election_tx: broadcast::Sender<Leadership>,
    failed: DashSet<NodeId>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_WATCH_CAPACITY)
    }

    /// Create a cluster whose watch channels buffer `capacity` updates per
    /// subscriber before it starts lagging.
    pub fn with_capacity(capacity: usize) -> Self {
        let (device_tx, _) = broadcast::channel(capacity);
        let (election_tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(ClusterInner {
                devices: DashMap::new(),
                sequence: AtomicU64::new(0),
                device_tx,
                elections: DashMap::new(),
                election_tx,
                failed: DashSet::new(),
            }),
        }
    }

    /// Handle for one member of the cluster.
    pub fn node(&self, id: impl Into<NodeId>) -> ClusterNode {
        ClusterNode {
            cluster: self.clone(),
            node: id.into(),
        }
    }

    /// Simulate the failure detector declaring `node` dead: it is dropped
    /// from every election, promoting the next candidate wherever it led.
    pub fn fail_node(&self, node: &NodeId) {
        info!(node = %node, "node declared failed");
        self.inner.failed.insert(node.clone());
        for mut election in self.inner.elections.iter_mut() {
            if remove_candidate(election.value_mut(), node) {
                let _ = self.inner.election_tx.send(election.value().clone());
            }
        }
    }

    /// Readmit a previously failed node. It holds no candidacies until it
    /// runs for leadership again.
    pub fn recover_node(&self, node: &NodeId) {
        self.inner.failed.remove(node);
    }

    fn next_version(&self) -> u64 {
        self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn publish(&self, update: &DeviceUpdate) {
        // No subscribers is fine: nobody is watching yet.
        let _ = self.inner.device_tx.send(update.clone());
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove `node` from the election log. Returns `true` if the leader
/// changed as a result.
fn remove_candidate(election: &mut Leadership, node: &NodeId) -> bool {
    let before = election.candidates.len();
    election.candidates.retain(|c| c != node);
    if election.candidates.len() == before || !election.is_leader(node) {
        return false;
    }
    election.leader = election.candidates.first().cloned();
    election.term += 1;
    true
}

// ── ClusterNode ──────────────────────────────────────────────────────

/// A single node's view of the [`MemoryCluster`].
#[derive(Clone)]
pub struct ClusterNode {
    cluster: MemoryCluster,
    node: NodeId,
}

impl ClusterNode {
    pub fn id(&self) -> &NodeId {
        &self.node
    }

    fn update(&self, key: &DeviceId, old: Option<Arc<Device>>, new: Option<Arc<Device>>) -> DeviceUpdate {
        DeviceUpdate {
            key: key.clone(),
            old,
            new,
            version: self.cluster.next_version(),
            origin: self.node.clone(),
        }
    }
}

impl ReplicatedMap<DeviceId, Device> for ClusterNode {
    fn get(&self, key: &DeviceId) -> Option<Arc<Device>> {
        self.cluster
            .inner
            .devices
            .get(key)
            .map(|r| Arc::clone(r.value()))
    }

    fn values(&self) -> Vec<Arc<Device>> {
        self.cluster
            .inner
            .devices
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect()
    }

    fn len(&self) -> usize {
        self.cluster.inner.devices.len()
    }

    fn compute(
        &self,
        key: &DeviceId,
        f: &mut dyn FnMut(Option<&Arc<Device>>) -> Mutation<Device>,
    ) -> Option<DeviceUpdate> {
        match self.cluster.inner.devices.entry(key.clone()) {
            Entry::Occupied(mut slot) => match f(Some(slot.get())) {
                Mutation::Keep => None,
                Mutation::Put(device) => {
                    let new = Arc::new(device);
                    let old = slot.insert(Arc::clone(&new));
                    let update = self.update(key, Some(old), Some(new));
                    self.cluster.publish(&update);
                    Some(update)
                }
                Mutation::Remove => {
                    let update = self.update(key, Some(Arc::clone(slot.get())), None);
                    self.cluster.publish(&update);
                    slot.remove();
                    Some(update)
                }
            },
            Entry::Vacant(slot) => match f(None) {
                Mutation::Keep | Mutation::Remove => None,
                Mutation::Put(device) => {
                    let new = Arc::new(device);
                    let _guard = slot.insert(Arc::clone(&new));
                    let update = self.update(key, None, Some(new));
                    self.cluster.publish(&update);
                    Some(update)
                }
            },
        }
    }

    fn watch(&self) -> broadcast::Receiver<DeviceUpdate> {
        self.cluster.inner.device_tx.subscribe()
    }
}

impl LeaderElector for ClusterNode {
    fn local_node(&self) -> &NodeId {
        &self.node
    }

    fn run_for_leadership<'a>(
        &'a self,
        topic: &'a DeviceId,
    ) -> BoxFuture<'a, Result<Leadership, CoreError>> {
        async move {
            let inner = &self.cluster.inner;
            if inner.failed.contains(&self.node) {
                return Err(CoreError::NodeUnavailable {
                    node: self.node.to_string(),
                });
            }

            let mut election = inner
                .elections
                .entry(topic.clone())
                .or_insert_with(|| Leadership {
                    topic: topic.clone(),
                    leader: None,
                    term: 0,
                    candidates: Vec::new(),
                });

            let mut changed = false;
            if !election.is_candidate(&self.node) {
                election.candidates.push(self.node.clone());
                changed = true;
            }
            if election.leader.is_none() {
                election.leader = Some(self.node.clone());
                election.term += 1;
                changed = true;
            }

            let snapshot = election.clone();
            if changed {
                debug!(device = %topic, leader = ?snapshot.leader, term = snapshot.term, "election updated");
                let _ = inner.election_tx.send(snapshot.clone());
            }
            Ok(snapshot)
        }
        .boxed()
    }

    fn withdraw<'a>(&'a self, topic: &'a DeviceId) -> BoxFuture<'a, Result<(), CoreError>> {
        async move {
            let inner = &self.cluster.inner;
            if let Some(mut election) = inner.elections.get_mut(topic) {
                let was_candidate = election.is_candidate(&self.node);
                let leader_changed = remove_candidate(&mut election, &self.node);
                if was_candidate {
                    debug!(device = %topic, node = %self.node, leader_changed, "withdrew from election");
                    let _ = inner.election_tx.send(election.clone());
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn leadership(&self, topic: &DeviceId) -> Option<Leadership> {
        self.cluster
            .inner
            .elections
            .get(topic)
            .map(|r| r.value().clone())
    }

    fn leaderships(&self) -> Vec<Leadership> {
        self.cluster
            .inner
            .elections
            .iter()
            .map(|r| r.value().clone())
            .collect()
    }

    fn watch(&self) -> broadcast::Receiver<Leadership> {
        self.cluster.inner.election_tx.subscribe()
    }
}
