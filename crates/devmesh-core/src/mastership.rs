// ── Mastership arbiter ──
//
// Maps the election primitive onto per-device roles for the local node.
// Role queries answer from a local cache and never block; requests and
// relinquishments round-trip to the elector.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::{LeaderElector, Leadership};
use crate::error::CoreError;
use crate::model::{DeviceId, MastershipRole, NodeId};

/// A change of the local node's role for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleTransition {
    pub device: DeviceId,
    pub old: MastershipRole,
    pub new: MastershipRole,
}

#[derive(Debug, Clone, Copy)]
struct RoleEntry {
    role: MastershipRole,
    /// Election term the role was derived from.
    term: u64,
}

/// Role of `node` according to one leadership record.
fn role_in(leadership: &Leadership, node: &NodeId) -> MastershipRole {
    if leadership.is_leader(node) {
        MastershipRole::Master
    } else if leadership.is_candidate(node) {
        MastershipRole::Standby
    } else {
        MastershipRole::None
    }
}

/// Per-device mastership for the local node.
///
/// Every detected transition is published on the channel handed out by
/// [`new`](Self::new). The device manager drains it to notify providers.
pub struct MastershipService {
    elector: Arc<dyn LeaderElector>,
    roles: DashMap<DeviceId, RoleEntry>,
    transitions: mpsc::UnboundedSender<RoleTransition>,
}

impl MastershipService {
    pub fn new(
        elector: Arc<dyn LeaderElector>,
    ) -> (Self, mpsc::UnboundedReceiver<RoleTransition>) {
        let (transitions, rx) = mpsc::unbounded_channel();
        let service = Self {
            elector,
            roles: DashMap::new(),
            transitions,
        };
        (service, rx)
    }

    pub fn local_node(&self) -> &NodeId {
        self.elector.local_node()
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// This node's last-known role for `device`. `None` when unknown.
    pub fn get_local_role(&self, device: &DeviceId) -> MastershipRole {
        self.roles
            .get(device)
            .map_or(MastershipRole::None, |e| e.role)
    }

    /// Current master of `device` as seen by the local elector view.
    pub fn master_for(&self, device: &DeviceId) -> Option<NodeId> {
        self.elector.leadership(device)?.leader
    }

    /// Devices `node` currently masters. May be stale right after a
    /// transition.
    pub fn get_devices_of(&self, node: &NodeId) -> BTreeSet<DeviceId> {
        self.elector
            .leaderships()
            .into_iter()
            .filter(|l| l.is_leader(node))
            .map(|l| l.topic)
            .collect()
    }

    // ── Requests ─────────────────────────────────────────────────────

    /// Become or confirm master of `device`.
    ///
    /// Losing the race is not an error: the returned role is `Standby`.
    pub async fn request_role_for(&self, device: &DeviceId) -> Result<MastershipRole, CoreError> {
        let (role, transition) = self.resolve(device).await?;
        if let Some(transition) = transition {
            self.publish(transition);
        }
        Ok(role)
    }

    /// Like [`request_role_for`](Self::request_role_for), but hands the
    /// first resolution of a device back to the caller instead of
    /// publishing it. Later transitions are published as usual.
    pub(crate) async fn acquire(
        &self,
        device: &DeviceId,
    ) -> Result<(MastershipRole, Option<RoleTransition>), CoreError> {
        let (role, transition) = self.resolve(device).await?;
        match transition {
            Some(t) if t.old == MastershipRole::None => Ok((role, Some(t))),
            Some(t) => {
                self.publish(t);
                Ok((role, None))
            }
            None => Ok((role, None)),
        }
    }

    /// Give up any role held for `device`. Idempotent.
    pub async fn relinquish_mastership(&self, device: &DeviceId) -> Result<(), CoreError> {
        let held = self
            .elector
            .leadership(device)
            .is_some_and(|l| l.is_candidate(self.local_node()));
        if !held && !self.roles.contains_key(device) {
            return Ok(());
        }

        self.elector.withdraw(device).await?;
        if let Some((_, entry)) = self.roles.remove(device) {
            if entry.role != MastershipRole::None {
                info!(device = %device, role = %entry.role, "relinquished mastership");
                self.publish(RoleTransition {
                    device: device.clone(),
                    old: entry.role,
                    new: MastershipRole::None,
                });
            }
        }
        Ok(())
    }

    async fn resolve(
        &self,
        device: &DeviceId,
    ) -> Result<(MastershipRole, Option<RoleTransition>), CoreError> {
        let granted = self.elector.run_for_leadership(device).await?;
        // The local view may already hold a later term than the reply.
        let leadership = self
            .elector
            .leadership(device)
            .filter(|l| l.term > granted.term)
            .unwrap_or(granted);

        let new = role_in(&leadership, self.local_node());
        let mut entry = self.roles.entry(device.clone()).or_insert(RoleEntry {
            role: MastershipRole::None,
            term: 0,
        });
        if leadership.term < entry.term {
            return Ok((entry.role, None));
        }
        entry.term = leadership.term;
        let old = std::mem::replace(&mut entry.role, new);
        drop(entry);

        debug!(device = %device, role = %new, term = leadership.term, "mastership resolved");
        let transition = (old != new).then(|| RoleTransition {
            device: device.clone(),
            old,
            new,
        });
        Ok((new, transition))
    }

    // ── Leadership watch ─────────────────────────────────────────────

    /// Apply one observed leadership change.
    ///
    /// Only devices this node asked for are tracked, and only a newer term
    /// than the cached one can move the role.
    fn observe(&self, leadership: &Leadership) -> Option<RoleTransition> {
        let mut entry = self.roles.get_mut(&leadership.topic)?;
        if entry.role == MastershipRole::None || leadership.term <= entry.term {
            return None;
        }
        let new = role_in(leadership, self.local_node());
        entry.term = leadership.term;
        let old = std::mem::replace(&mut entry.role, new);
        drop(entry);

        if new == MastershipRole::None {
            self.roles
                .remove_if(&leadership.topic, |_, e| e.role == MastershipRole::None);
        }
        (old != new).then(|| RoleTransition {
            device: leadership.topic.clone(),
            old,
            new,
        })
    }

    /// Re-read every tracked device from the elector's local view. Used
    /// after the watch stream lagged.
    fn resync(&self) {
        let tracked: Vec<DeviceId> = self.roles.iter().map(|r| r.key().clone()).collect();
        for device in tracked {
            if let Some(leadership) = self.elector.leadership(&device) {
                if let Some(t) = self.observe(&leadership) {
                    self.publish(t);
                }
            }
        }
    }

    fn publish(&self, transition: RoleTransition) {
        debug!(
            device = %transition.device,
            old = %transition.old,
            new = %transition.new,
            "role transition"
        );
        // The receiver only goes away when the owning manager is dropped.
        let _ = self.transitions.send(transition);
    }

    /// Follow leadership changes until cancelled. Subscribes before
    /// returning, so no change made after this call is missed.
    pub(crate) fn run_watch(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.elector.watch();
        async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    result = rx.recv() => match result {
                        Ok(leadership) => {
                            if let Some(t) = self.observe(&leadership) {
                                self.publish(t);
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!(skipped = n, "mastership watch lagged; resyncing");
                            self.resync();
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!("mastership watch stopped");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::cluster::MemoryCluster;

    fn did(s: &str) -> DeviceId {
        DeviceId::parse(s).unwrap()
    }

    fn service(
        cluster: &MemoryCluster,
        node: &str,
    ) -> (Arc<MastershipService>, mpsc::UnboundedReceiver<RoleTransition>) {
        let (svc, rx) = MastershipService::new(Arc::new(cluster.node(node)));
        (Arc::new(svc), rx)
    }

    #[tokio::test]
    async fn unknown_device_has_no_role() {
        let (a, _rx) = service(&MemoryCluster::new(), "a");
        assert_eq!(a.get_local_role(&did("of:foo")), MastershipRole::None);
        assert!(a.master_for(&did("of:foo")).is_none());
    }

    #[tokio::test]
    async fn first_requester_masters_second_stands_by() {
        let cluster = MemoryCluster::new();
        let (a, mut a_rx) = service(&cluster, "a");
        let (b, _b_rx) = service(&cluster, "b");
        let id = did("of:foo");

        assert_eq!(a.request_role_for(&id).await.unwrap(), MastershipRole::Master);
        assert_eq!(b.request_role_for(&id).await.unwrap(), MastershipRole::Standby);
        assert_eq!(a.get_local_role(&id), MastershipRole::Master);
        assert_eq!(a.master_for(&id), Some(NodeId::from("a")));
        assert_eq!(
            a.get_devices_of(&NodeId::from("a")).into_iter().collect::<Vec<_>>(),
            vec![id.clone()]
        );
        assert!(a.get_devices_of(&NodeId::from("b")).is_empty());

        let t = a_rx.try_recv().unwrap();
        assert_eq!((t.old, t.new), (MastershipRole::None, MastershipRole::Master));
    }

    #[tokio::test]
    async fn acquire_returns_first_resolution_without_publishing() {
        let (a, mut rx) = service(&MemoryCluster::new(), "a");
        let id = did("of:foo");

        let (role, first) = a.acquire(&id).await.unwrap();
        assert_eq!(role, MastershipRole::Master);
        assert_eq!(first.unwrap().new, MastershipRole::Master);
        assert!(rx.try_recv().is_err());

        let (role, again) = a.acquire(&id).await.unwrap();
        assert_eq!(role, MastershipRole::Master);
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn relinquish_promotes_standby_through_watch() {
        let cluster = MemoryCluster::new();
        let (a, _a_rx) = service(&cluster, "a");
        let (b, mut b_rx) = service(&cluster, "b");
        let id = did("of:foo");
        let cancel = CancellationToken::new();

        a.request_role_for(&id).await.unwrap();
        b.request_role_for(&id).await.unwrap();
        let _ = b_rx.try_recv();

        let watch = tokio::spawn(Arc::clone(&b).run_watch(cancel.clone()));

        a.relinquish_mastership(&id).await.unwrap();
        assert_eq!(a.get_local_role(&id), MastershipRole::None);

        let t = tokio::time::timeout(std::time::Duration::from_secs(1), b_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!((t.old, t.new), (MastershipRole::Standby, MastershipRole::Master));
        assert_eq!(b.get_local_role(&id), MastershipRole::Master);

        cancel.cancel();
        watch.await.unwrap();
    }

    #[tokio::test]
    async fn relinquish_without_role_is_noop() {
        let (a, mut rx) = service(&MemoryCluster::new(), "a");
        a.relinquish_mastership(&did("of:foo")).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stale_terms_are_ignored() {
        let cluster = MemoryCluster::new();
        let (a, _rx) = service(&cluster, "a");
        let id = did("of:foo");
        a.roles.insert(id.clone(), RoleEntry { role: MastershipRole::Standby, term: 3 });

        let stale = Leadership {
            topic: id.clone(),
            leader: Some(NodeId::from("a")),
            term: 2,
            candidates: vec![NodeId::from("a")],
        };
        assert!(a.observe(&stale).is_none());
        assert_eq!(a.get_local_role(&id), MastershipRole::Standby);

        let fresh = Leadership { term: 4, ..stale };
        assert_eq!(a.observe(&fresh).unwrap().new, MastershipRole::Master);
    }
}
