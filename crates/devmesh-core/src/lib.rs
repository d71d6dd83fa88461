//! Distributed device-state and mastership core for a network controller
//! cluster.
//!
//! Every controller node runs one [`DeviceManager`]. Together they keep a
//! replicated view of all network devices and their ports, agree on one
//! master node per device, and notify local listeners of every change:
//!
//! - **[`DeviceManager`]**: Facade owning the subsystem. Providers write
//!   through the [`DeviceProviderService`] they receive on registration;
//!   applications read, subscribe and administer through the manager.
//!   [`activate()`](DeviceManager::activate) spawns the background tasks
//!   that follow replicated updates and leadership changes.
//!
//! - **[`DeviceStore`]**: Device and port state on top of a
//!   [`ReplicatedMap`]. Each write is one per-key `compute`, and every
//!   material change is reported as [`DeviceEvent`]s.
//!
//! - **[`MastershipService`]**: Per-device roles derived from a
//!   [`LeaderElector`]. Role queries answer locally and never block.
//!
//! - **Providers** ([`provider`]): [`DeviceProvider`] per URI scheme and
//!   [`DeviceHandshaker`] per device session, driven with timeouts by the
//!   [`HandshakeSupervisor`].
//!
//! - **[`EventDispatcher`]**: Bounded per-listener queues with
//!   independent delivery, exposed as callbacks or as an [`EventStream`].
//!
//! The cluster transport is injected. [`MemoryCluster`] implements both
//! primitives in-process for tests and single-node deployments.

pub mod cluster;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod mastership;
pub mod model;
pub mod provider;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use cluster::{ClusterNode, LeaderElector, Leadership, MapUpdate, MemoryCluster, Mutation, ReplicatedMap};
pub use config::CoreConfig;
pub use dispatch::{DeviceListener, EventDispatcher, EventFilter, EventStream, ListenerId};
pub use error::CoreError;
pub use manager::DeviceManager;
pub use mastership::{MastershipService, RoleTransition};
pub use provider::{
    DeviceHandshaker, DeviceProvider, DeviceProviderService, HandshakeState, HandshakeSupervisor,
    ProviderRegistry,
};
pub use store::DeviceStore;

// Re-export model types at the crate root for ergonomics.
pub use model::{
    Device, DeviceDescription, DeviceEvent, DeviceEventType, DeviceId, DeviceType, MastershipRole,
    NodeId, Port, PortDescription, PortNumber, PortType, ProviderId,
};
