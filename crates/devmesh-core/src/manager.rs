// ── Device manager ──
//
// Single entry point of the device subsystem. Providers write through the
// services they get on registration; applications read, subscribe and
// administer through this facade. Owns the store, the mastership arbiter,
// the provider registry, the handshake supervisor and the dispatcher.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::{LeaderElector, ReplicatedMap};
use crate::config::CoreConfig;
use crate::dispatch::{DeviceListener, EventDispatcher, EventFilter, EventStream, ListenerId};
use crate::error::CoreError;
use crate::mastership::{MastershipService, RoleTransition};
use crate::model::{
    Device, DeviceDescription, DeviceEvent, DeviceEventType, DeviceId, MastershipRole, NodeId,
    Port, PortDescription, PortNumber, ProviderId,
};
use crate::provider::{DeviceProvider, DeviceProviderService, HandshakeSupervisor, ProviderRegistry};
use crate::store::{DeviceStore, DeviceUpdate};

// ── DeviceManager ────────────────────────────────────────────────

/// The device subsystem of one controller node.
///
/// Cheap to clone; every clone drives the same state. Call
/// [`activate()`](Self::activate) to start following the cluster.
#[derive(Clone)]
pub struct DeviceManager {
    inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    config: CoreConfig,
    store: DeviceStore,
    mastership: Arc<MastershipService>,
    registry: ProviderRegistry,
    handshakes: HandshakeSupervisor,
    dispatcher: EventDispatcher,
    cancel: CancellationToken,
    /// Child token for the current activation; replaced on re-activation.
    cancel_child: Mutex<CancellationToken>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    /// Taken by the mastership task while active, handed back on exit.
    transitions_rx: Mutex<Option<mpsc::UnboundedReceiver<RoleTransition>>>,
}

impl DeviceManager {
    /// Build the subsystem on top of the cluster primitives. Does not
    /// start any background work.
    pub fn new(
        config: CoreConfig,
        devices: Arc<dyn ReplicatedMap<DeviceId, Device>>,
        elector: Arc<dyn LeaderElector>,
    ) -> Self {
        let node = elector.local_node().clone();
        if node != config.node_id {
            warn!(configured = %config.node_id, elector = %node, "node id differs from elector; using elector");
        }

        let (mastership, transitions_rx) = MastershipService::new(elector);
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();

        Self {
            inner: Arc::new(ManagerInner {
                store: DeviceStore::new(node, devices),
                mastership: Arc::new(mastership),
                registry: ProviderRegistry::new(),
                handshakes: HandshakeSupervisor::new(
                    config.handshake_timeout,
                    config.role_change_timeout,
                ),
                dispatcher: EventDispatcher::new(config.event_queue_capacity),
                cancel,
                cancel_child: Mutex::new(cancel_child),
                task_handles: Mutex::new(Vec::new()),
                transitions_rx: Mutex::new(Some(transitions_rx)),
                config,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ManagerInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<ManagerInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    pub fn local_node(&self) -> &NodeId {
        self.inner.mastership.local_node()
    }

    pub fn handshakes(&self) -> &HandshakeSupervisor {
        &self.inner.handshakes
    }

    pub fn mastership(&self) -> &MastershipService {
        &self.inner.mastership
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Start the replica bridge and the mastership tasks. A no-op while
    /// already active.
    pub async fn activate(&self) {
        let mut handles = self.inner.task_handles.lock().await;
        if !handles.is_empty() {
            debug!("device manager already active");
            return;
        }

        let child = self.inner.cancel.child_token();
        *self.inner.cancel_child.lock().await = child.clone();

        let replica_rx = self.inner.store.watch();
        handles.push(tokio::spawn(replica_bridge_task(
            self.clone(),
            replica_rx,
            child.clone(),
        )));

        handles.push(tokio::spawn(
            Arc::clone(&self.inner.mastership).run_watch(child.clone()),
        ));

        if let Some(rx) = self.inner.transitions_rx.lock().await.take() {
            handles.push(tokio::spawn(mastership_task(self.clone(), rx, child)));
        }

        info!(node = %self.local_node(), "device manager activated");
    }

    /// Stop and join all background tasks. Listeners stay registered.
    pub async fn deactivate(&self) {
        self.inner.cancel_child.lock().await.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!(node = %self.local_node(), "device manager deactivated");
    }

    /// Permanently stop the manager. Cancels the parent token, so a later
    /// `activate()` starts tasks that exit immediately.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.deactivate().await;
    }

    // ── Provider registry ────────────────────────────────────────

    /// Register `provider` and return the service it reports through.
    pub fn register_provider(
        &self,
        provider: Arc<dyn DeviceProvider>,
    ) -> Result<DeviceProviderService, CoreError> {
        let id = provider.id().clone();
        let token = self.inner.registry.register(provider)?;
        Ok(DeviceProviderService::new(id, self.downgrade(), token))
    }

    /// Remove a provider. Services issued for it stop having any effect.
    pub fn unregister_provider(&self, id: &ProviderId) -> bool {
        self.inner.registry.unregister(id)
    }

    pub fn get_providers(&self) -> Vec<ProviderId> {
        self.inner.registry.provider_ids().as_ref().clone()
    }

    // ── Provider write path ──────────────────────────────────────

    /// A provider connected to `device`.
    ///
    /// The description is always stored, whatever this node's role. The
    /// first time a device is seen (or comes back), the current role is
    /// asserted to the provider once.
    pub(crate) async fn device_connected(
        &self,
        provider: &ProviderId,
        device: &DeviceId,
        description: &DeviceDescription,
    ) -> Result<(), CoreError> {
        let event = self
            .inner
            .store
            .create_or_update_device(provider, device, description);
        let reactivated = event.as_ref().is_some_and(|e| {
            matches!(
                e.event_type,
                DeviceEventType::DeviceAdded | DeviceEventType::DeviceAvailabilityChanged
            )
        });
        if let Some(event) = event {
            self.post(vec![event]).await;
        }

        let mastership = &self.inner.mastership;
        let (role, first) = match mastership.get_local_role(device) {
            MastershipRole::None => mastership.acquire(device).await?,
            role => (role, None),
        };

        if reactivated || first.is_some() {
            debug!(device = %device, role = %role, "asserting role to provider");
            self.notify_role(device, role);
        }
        Ok(())
    }

    pub(crate) async fn device_disconnected(&self, device: &DeviceId) {
        if let Some(event) = self.inner.store.mark_offline(device) {
            self.post(vec![event]).await;
        }
    }

    pub(crate) async fn update_ports(
        &self,
        provider: &ProviderId,
        device: &DeviceId,
        ports: &[PortDescription],
    ) -> Result<(), CoreError> {
        let events = self.inner.store.update_ports(provider, device, ports)?;
        self.post(events).await;
        Ok(())
    }

    pub(crate) async fn port_status_changed(&self, device: &DeviceId, port: &PortDescription) {
        if let Some(event) = self.inner.store.update_port_status(device, port) {
            self.post(vec![event]).await;
        }
    }

    // ── Reads ────────────────────────────────────────────────────

    pub fn get_device(&self, device: &DeviceId) -> Option<Arc<Device>> {
        self.inner.store.get_device(device)
    }

    pub fn get_devices(&self) -> Vec<Arc<Device>> {
        self.inner.store.get_devices()
    }

    pub fn get_device_count(&self) -> usize {
        self.inner.store.get_device_count()
    }

    pub fn is_available(&self, device: &DeviceId) -> bool {
        self.inner.store.is_available(device)
    }

    pub fn get_ports(&self, device: &DeviceId) -> Vec<Port> {
        self.inner.store.get_ports(device)
    }

    pub fn get_port(&self, device: &DeviceId, number: PortNumber) -> Option<Port> {
        self.inner.store.get_port(device, number)
    }

    /// Local role for `device`; `None` when the replica lacks the device.
    pub fn get_role(&self, device: &DeviceId) -> MastershipRole {
        if self.inner.store.get_device(device).is_none() {
            return MastershipRole::None;
        }
        self.inner.mastership.get_local_role(device)
    }

    pub fn get_master(&self, device: &DeviceId) -> Option<NodeId> {
        self.inner.mastership.master_for(device)
    }

    pub fn get_devices_of(&self, node: &NodeId) -> BTreeSet<DeviceId> {
        self.inner.mastership.get_devices_of(node)
    }

    // ── Admin ────────────────────────────────────────────────────

    /// Request mastership of `device` for this node.
    pub async fn request_role_for(&self, device: &DeviceId) -> Result<MastershipRole, CoreError> {
        self.inner.mastership.request_role_for(device).await
    }

    /// Delete `device` and its ports, and give up any role held for it.
    /// Removing an unknown device is a no-op.
    pub async fn remove_device(&self, device: &DeviceId) -> Result<(), CoreError> {
        if let Some(event) = self.inner.store.remove_device(device) {
            info!(device = %device, "device removed");
            self.post(vec![event]).await;
        }
        self.inner.mastership.relinquish_mastership(device).await
    }

    /// Ask the owning provider to re-probe `device`. Only the master
    /// probes; returns whether a probe was issued.
    pub fn probe_device(&self, device: &DeviceId) -> Result<bool, CoreError> {
        if !self.get_role(device).is_master() {
            return Ok(false);
        }
        let provider = self.provider_for(device)?;
        self.spawn_probe(provider, device.clone());
        Ok(true)
    }

    // ── Listeners ────────────────────────────────────────────────

    /// Register a callback listener for every event.
    pub fn add_listener(&self, listener: Arc<dyn DeviceListener>) -> ListenerId {
        self.inner.dispatcher.add_listener(listener, EventFilter::All)
    }

    pub fn add_filtered_listener(
        &self,
        listener: Arc<dyn DeviceListener>,
        filter: EventFilter,
    ) -> ListenerId {
        self.inner.dispatcher.add_listener(listener, filter)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.dispatcher.remove_listener(id)
    }

    pub fn subscribe(&self, filter: EventFilter) -> EventStream {
        self.inner.dispatcher.subscribe(filter)
    }

    // ── Internals ────────────────────────────────────────────────

    async fn post(&self, events: Vec<DeviceEvent>) {
        if !events.is_empty() {
            self.inner.dispatcher.post(events).await;
        }
    }

    fn provider_for(&self, device: &DeviceId) -> Result<Arc<dyn DeviceProvider>, CoreError> {
        self.inner
            .registry
            .get(device.scheme())
            .ok_or_else(|| CoreError::ProviderNotFound {
                scheme: device.scheme().to_owned(),
            })
    }

    /// Tell the provider and the driver session about `role`, without
    /// waiting for either.
    fn notify_role(&self, device: &DeviceId, role: MastershipRole) {
        if let Ok(provider) = self.provider_for(device) {
            let device = device.clone();
            let limit = self.inner.config.role_change_timeout;
            tokio::spawn(async move {
                match timeout(limit, provider.role_changed(&device, role)).await {
                    Ok(Ok(())) => debug!(device = %device, role = %role, "provider notified"),
                    Ok(Err(e)) => warn!(device = %device, role = %role, error = %e, "provider role change failed"),
                    Err(_) => warn!(device = %device, role = %role, "provider role change timed out"),
                }
            });
        } else {
            debug!(device = %device, "no provider for scheme; role change not forwarded");
        }
        self.inner.handshakes.role_changed(device, role);
    }

    fn spawn_probe(&self, provider: Arc<dyn DeviceProvider>, device: DeviceId) {
        let limit = self.inner.config.handshake_timeout;
        tokio::spawn(async move {
            match timeout(limit, provider.trigger_probe(&device)).await {
                Ok(Ok(())) => debug!(device = %device, "probe issued"),
                Ok(Err(e)) => warn!(device = %device, error = %e, "probe failed"),
                Err(_) => warn!(device = %device, "probe timed out"),
            }
        });
    }

    async fn handle_transition(&self, transition: RoleTransition) {
        let Some(device) = self.inner.store.get_device(&transition.device) else {
            debug!(device = %transition.device, "role transition for unknown device ignored");
            return;
        };

        info!(
            device = %transition.device,
            old = %transition.old,
            new = %transition.new,
            "mastership changed"
        );
        self.notify_role(&transition.device, transition.new);
        if transition.new.is_master() {
            if let Ok(provider) = self.provider_for(&transition.device) {
                self.spawn_probe(provider, transition.device.clone());
            }
        }
        self.post(vec![DeviceEvent::new(
            DeviceEventType::DeviceMastershipChanged,
            device,
        )])
        .await;
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Turn updates written by other nodes into local events.
async fn replica_bridge_task(
    manager: DeviceManager,
    mut rx: tokio::sync::broadcast::Receiver<DeviceUpdate>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = rx.recv() => match result {
                Ok(update) => {
                    let events = manager.inner.store.apply_remote(&update);
                    let removed = events
                        .iter()
                        .any(|e| e.event_type == DeviceEventType::DeviceRemoved);
                    manager.post(events).await;
                    if removed {
                        if let Err(e) = manager.inner.mastership.relinquish_mastership(&update.key).await {
                            warn!(device = %update.key, error = %e, "relinquish after remote removal failed");
                        }
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(skipped = n, "replica bridge lagged; events for skipped updates lost");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("replica bridge stopped");
}

/// Act on role transitions published by the arbiter.
async fn mastership_task(
    manager: DeviceManager,
    mut rx: mpsc::UnboundedReceiver<RoleTransition>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(transition) => manager.handle_transition(transition).await,
                None => break,
            },
        }
    }
    *manager.inner.transitions_rx.lock().await = Some(rx);
    debug!("mastership task stopped");
}
