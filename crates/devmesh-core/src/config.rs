// ── Runtime configuration ──
//
// Tuning knobs for one controller node. The core never reads config
// files; `devmesh-config` (or the embedding process) builds a
// `CoreConfig` and hands it in.

use std::time::Duration;

use crate::model::NodeId;

/// Configuration for one controller node's device subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Identity of this node in the cluster.
    pub node_id: NodeId,
    /// Upper bound for driver `connect`, `disconnect` and `is_reachable`.
    pub handshake_timeout: Duration,
    /// Upper bound for provider and driver role-change acknowledgments.
    pub role_change_timeout: Duration,
    /// Per-listener event queue depth before posting applies backpressure.
    pub event_queue_capacity: usize,
    /// Buffer of the in-process cluster watch channels.
    pub replication_buffer: usize,
}

impl CoreConfig {
    /// Defaults with an explicit node id.
    pub fn for_node(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Self::default()
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::random(),
            handshake_timeout: Duration::from_secs(10),
            role_change_timeout: Duration::from_secs(5),
            event_queue_capacity: 256,
            replication_buffer: 1024,
        }
    }
}
