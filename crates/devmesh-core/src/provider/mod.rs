//! Pluggable device providers and protocol drivers.
//!
//! A [`DeviceProvider`] represents one protocol family (one URI scheme).
//! It reports device state into the core through the
//! [`DeviceProviderService`] it receives on registration, and the core
//! calls back into it for probes and role changes.
//!
//! A [`DeviceHandshaker`] is the per-device session of a protocol driver.
//! The core drives it through the [`HandshakeSupervisor`], which applies
//! the configured timeouts.

mod handshake;
mod registry;
mod service;

use futures_util::future::BoxFuture;

use crate::error::CoreError;
use crate::model::{DeviceId, MastershipRole, ProviderId};

pub use handshake::{HandshakeState, HandshakeSupervisor};
pub use registry::ProviderRegistry;
pub use service::DeviceProviderService;

/// A protocol family that discovers and manages devices of one scheme.
///
/// Both callbacks are notifications: the core logs a failure and moves on.
pub trait DeviceProvider: Send + Sync {
    fn id(&self) -> &ProviderId;

    /// Refresh the description and ports of `device`.
    fn trigger_probe<'a>(&'a self, device: &'a DeviceId) -> BoxFuture<'a, Result<(), CoreError>>;

    /// This node's role for `device` changed to `role`.
    fn role_changed<'a>(
        &'a self,
        device: &'a DeviceId,
        role: MastershipRole,
    ) -> BoxFuture<'a, Result<(), CoreError>>;
}

/// Per-device session state machine implemented by protocol drivers.
///
/// `Disconnected -> Connecting -> Connected -> Disconnected`. Every call
/// must resolve; the core bounds each one with a timeout and treats an
/// unresolved future as failure.
pub trait DeviceHandshaker: Send + Sync {
    /// Open the session. On success the driver reports the device through
    /// its provider service.
    fn connect(&self) -> BoxFuture<'_, bool>;

    /// Tear down the session. Resolves `true` once cleanup completed, even
    /// if nothing was connected.
    fn disconnect(&self) -> BoxFuture<'_, bool>;

    /// Point-in-time liveness probe. Must not change session state.
    fn is_reachable(&self) -> BoxFuture<'_, bool>;

    /// Acknowledge a role change, returning the role the driver applied.
    fn role_changed(&self, role: MastershipRole) -> BoxFuture<'_, MastershipRole>;
}
