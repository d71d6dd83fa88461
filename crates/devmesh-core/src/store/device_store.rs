// ── Replicated device store ──
//
// Authoritative view of every known device and its ports. Each write is a
// single `compute` on the replicated map, so concurrent writers to one
// device are serialized by the primitive rather than by a lock here.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::merge::device_events;
use crate::cluster::{MapUpdate, Mutation, ReplicatedMap};
use crate::error::CoreError;
use crate::model::{
    Device, DeviceDescription, DeviceEvent, DeviceId, NodeId, Port, PortDescription, PortNumber,
    ProviderId,
};

pub type DeviceUpdate = MapUpdate<DeviceId, Device>;

/// Device and port state for one node, backed by a [`ReplicatedMap`].
///
/// Reads hit the local replica and observe this node's own writes
/// immediately; writes made elsewhere arrive through
/// [`apply_remote`](Self::apply_remote).
pub struct DeviceStore {
    node: NodeId,
    map: Arc<dyn ReplicatedMap<DeviceId, Device>>,
    /// Highest replication version applied per device, for dropping
    /// replayed or reordered inbound updates.
    applied: DashMap<DeviceId, u64>,
}

impl DeviceStore {
    pub fn new(node: NodeId, map: Arc<dyn ReplicatedMap<DeviceId, Device>>) -> Self {
        Self {
            node,
            map,
            applied: DashMap::new(),
        }
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Merge a provider description into the stored device, marking it
    /// available.
    ///
    /// Returns `DeviceAdded` for a new device, `DeviceUpdated` when any
    /// description field changed, `DeviceAvailabilityChanged` when only
    /// availability came back, and `None` for a re-applied description.
    pub fn create_or_update_device(
        &self,
        provider_id: &ProviderId,
        device_id: &DeviceId,
        description: &DeviceDescription,
    ) -> Option<DeviceEvent> {
        let update = self.map.compute(device_id, &mut |current| match current {
            None => Mutation::Put(Device::from_description(
                device_id.clone(),
                provider_id.clone(),
                description,
                true,
            )),
            Some(existing) => {
                let mut next = Device::clone(existing);
                next.apply_description(provider_id, description);
                next.available = true;
                if next == **existing {
                    Mutation::Keep
                } else {
                    Mutation::Put(next)
                }
            }
        })?;
        self.record(&update).into_iter().next()
    }

    /// Mark a device unavailable. Description and ports are retained.
    pub fn mark_offline(&self, device_id: &DeviceId) -> Option<DeviceEvent> {
        let update = self.map.compute(device_id, &mut |current| match current {
            Some(existing) if existing.available => {
                let mut next = Device::clone(existing);
                next.available = false;
                Mutation::Put(next)
            }
            _ => Mutation::Keep,
        })?;
        self.record(&update).into_iter().next()
    }

    /// Replace the full port set of a device.
    ///
    /// Ports missing from `ports` are removed, changed ones updated and new
    /// ones added, one event each. An unknown device is materialized from
    /// an empty description, unavailable, and reported as added first.
    pub fn update_ports(
        &self,
        provider_id: &ProviderId,
        device_id: &DeviceId,
        ports: &[PortDescription],
    ) -> Result<Vec<DeviceEvent>, CoreError> {
        let mut incoming = BTreeMap::new();
        for desc in ports {
            let port = Port::from_description(device_id.clone(), desc);
            if incoming.insert(desc.number, port).is_some() {
                return Err(CoreError::DuplicatePort {
                    device: device_id.to_string(),
                    port: desc.number.value(),
                });
            }
        }

        let update = self.map.compute(device_id, &mut |current| match current {
            None => {
                debug!(device = %device_id, "ports reported for unknown device; materializing");
                let mut device = Device::from_description(
                    device_id.clone(),
                    provider_id.clone(),
                    &DeviceDescription::empty(device_id.as_str()),
                    false,
                );
                device.ports.clone_from(&incoming);
                Mutation::Put(device)
            }
            Some(existing) if existing.ports == incoming => Mutation::Keep,
            Some(existing) => {
                let mut next = Device::clone(existing);
                next.ports.clone_from(&incoming);
                Mutation::Put(next)
            }
        });

        Ok(update.map(|u| self.record(&u)).unwrap_or_default())
    }

    /// Targeted single-port update. Identical attributes are a no-op; a
    /// port number the device did not have yet is added.
    pub fn update_port_status(
        &self,
        device_id: &DeviceId,
        description: &PortDescription,
    ) -> Option<DeviceEvent> {
        if self.map.get(device_id).is_none() {
            debug!(device = %device_id, port = %description.number, "port status for unknown device ignored");
            return None;
        }

        let update = self.map.compute(device_id, &mut |current| match current {
            Some(existing) => match existing.ports.get(&description.number) {
                Some(port) if port.matches(description) => Mutation::Keep,
                _ => {
                    let mut next = Device::clone(existing);
                    next.ports.insert(
                        description.number,
                        Port::from_description(device_id.clone(), description),
                    );
                    Mutation::Put(next)
                }
            },
            None => Mutation::Keep,
        })?;
        self.record(&update).into_iter().next()
    }

    /// Destructively remove a device and all of its ports.
    pub fn remove_device(&self, device_id: &DeviceId) -> Option<DeviceEvent> {
        let update = self.map.compute(device_id, &mut |current| {
            if current.is_some() {
                Mutation::Remove
            } else {
                Mutation::Keep
            }
        })?;
        self.record(&update).into_iter().next()
    }

    // ── Replication ──────────────────────────────────────────────────

    /// Translate an update replicated from the cluster into events.
    ///
    /// This node's own writes were already reported by the writing call
    /// and are skipped, as is anything not newer than the last version
    /// applied for that device.
    pub fn apply_remote(&self, update: &DeviceUpdate) -> Vec<DeviceEvent> {
        if update.origin == self.node {
            return Vec::new();
        }

        {
            let mut last = self.applied.entry(update.key.clone()).or_insert(0);
            if update.version <= *last {
                trace!(device = %update.key, version = update.version, "dropping stale replica update");
                return Vec::new();
            }
            *last = update.version;
        }

        device_events(update.old.as_ref(), update.new.as_ref())
    }

    /// Subscribe to replicated updates from the underlying map.
    pub fn watch(&self) -> broadcast::Receiver<DeviceUpdate> {
        self.map.watch()
    }

    fn record(&self, update: &DeviceUpdate) -> Vec<DeviceEvent> {
        self.applied
            .entry(update.key.clone())
            .and_modify(|v| *v = (*v).max(update.version))
            .or_insert(update.version);
        device_events(update.old.as_ref(), update.new.as_ref())
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get_device(&self, device_id: &DeviceId) -> Option<Arc<Device>> {
        self.map.get(device_id)
    }

    pub fn get_devices(&self) -> Vec<Arc<Device>> {
        self.map.values()
    }

    pub fn get_device_count(&self) -> usize {
        self.map.len()
    }

    pub fn is_available(&self, device_id: &DeviceId) -> bool {
        self.map.get(device_id).is_some_and(|d| d.available)
    }

    pub fn get_ports(&self, device_id: &DeviceId) -> Vec<Port> {
        self.map
            .get(device_id)
            .map(|d| d.ports.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_port(&self, device_id: &DeviceId, number: PortNumber) -> Option<Port> {
        self.map.get(device_id)?.port(number).cloned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::cluster::MemoryCluster;
    use crate::model::{DeviceEventType, DeviceType};

    fn pid() -> ProviderId {
        ProviderId::new("of", "foo")
    }

    fn did(s: &str) -> DeviceId {
        DeviceId::parse(s).unwrap()
    }

    fn desc(id: &DeviceId, sw: &str) -> DeviceDescription {
        DeviceDescription::new(id.as_str(), DeviceType::Switch, "whitebox", "1.1.x", sw, "43311-12345")
    }

    fn store_on(cluster: &MemoryCluster, node: &str) -> DeviceStore {
        DeviceStore::new(NodeId::from(node), Arc::new(cluster.node(node)))
    }

    fn types(events: &[DeviceEvent]) -> Vec<DeviceEventType> {
        events.iter().map(|e| e.event_type).collect()
    }

    #[test]
    fn create_then_reapply_is_idempotent() {
        let store = store_on(&MemoryCluster::new(), "a");
        let id = did("of:foo");

        let added = store.create_or_update_device(&pid(), &id, &desc(&id, "3.8.1")).unwrap();
        assert_eq!(added.event_type, DeviceEventType::DeviceAdded);
        assert!(store.create_or_update_device(&pid(), &id, &desc(&id, "3.8.1")).is_none());
        assert_eq!(store.get_device(&id).unwrap().sw_version, "3.8.1");
    }

    #[test]
    fn changed_field_is_an_update() {
        let store = store_on(&MemoryCluster::new(), "a");
        let id = did("of:foo");
        store.create_or_update_device(&pid(), &id, &desc(&id, "3.8.1"));

        let ev = store.create_or_update_device(&pid(), &id, &desc(&id, "3.9.5")).unwrap();
        assert_eq!(ev.event_type, DeviceEventType::DeviceUpdated);
        assert_eq!(ev.subject.sw_version, "3.9.5");
    }

    #[test]
    fn offline_keeps_description_and_reconnect_flips_availability() {
        let store = store_on(&MemoryCluster::new(), "a");
        let id = did("of:foo");
        store.create_or_update_device(&pid(), &id, &desc(&id, "3.8.1"));
        store.update_ports(&pid(), &id, &[PortDescription::new(1, true)]).unwrap();

        let ev = store.mark_offline(&id).unwrap();
        assert_eq!(ev.event_type, DeviceEventType::DeviceAvailabilityChanged);
        assert!(store.mark_offline(&id).is_none());
        assert!(!store.is_available(&id));
        assert_eq!(store.get_ports(&id).len(), 1);

        let ev = store.create_or_update_device(&pid(), &id, &desc(&id, "3.8.1")).unwrap();
        assert_eq!(ev.event_type, DeviceEventType::DeviceAvailabilityChanged);
        assert!(store.is_available(&id));
        assert_eq!(store.get_device_count(), 1);
    }

    #[test]
    fn mark_offline_of_unknown_device_is_noop() {
        let store = store_on(&MemoryCluster::new(), "a");
        assert!(store.mark_offline(&did("of:nope")).is_none());
    }

    #[test]
    fn update_ports_materializes_unknown_device() {
        let store = store_on(&MemoryCluster::new(), "a");
        let id = did("of:late");

        let events = store
            .update_ports(&pid(), &id, &[PortDescription::new(1, true), PortDescription::new(2, true)])
            .unwrap();

        assert_eq!(
            types(&events),
            vec![
                DeviceEventType::DeviceAdded,
                DeviceEventType::PortAdded,
                DeviceEventType::PortAdded
            ]
        );
        let device = store.get_device(&id).unwrap();
        assert!(!device.available);
        assert_eq!(device.manufacturer, "");
        assert_eq!(device.provider_id, pid());
    }

    #[test]
    fn duplicate_port_in_batch_is_rejected_without_writing() {
        let store = store_on(&MemoryCluster::new(), "a");
        let id = did("of:foo");
        store.create_or_update_device(&pid(), &id, &desc(&id, "3.8.1"));

        let err = store
            .update_ports(&pid(), &id, &[PortDescription::new(1, true), PortDescription::new(1, false)])
            .unwrap_err();

        assert!(matches!(err, CoreError::DuplicatePort { port: 1, .. }));
        assert!(store.get_ports(&id).is_empty());
    }

    #[test]
    fn identical_port_batch_produces_no_events() {
        let store = store_on(&MemoryCluster::new(), "a");
        let id = did("of:foo");
        let batch = [PortDescription::new(1, true)];
        store.update_ports(&pid(), &id, &batch).unwrap();
        assert!(store.update_ports(&pid(), &id, &batch).unwrap().is_empty());
    }

    #[test]
    fn port_status_updates_adds_and_ignores_repeats() {
        let store = store_on(&MemoryCluster::new(), "a");
        let id = did("of:foo");
        store.create_or_update_device(&pid(), &id, &desc(&id, "3.8.1"));
        store.update_ports(&pid(), &id, &[PortDescription::new(1, true)]).unwrap();

        let ev = store.update_port_status(&id, &PortDescription::new(1, false)).unwrap();
        assert_eq!(ev.event_type, DeviceEventType::PortUpdated);
        assert!(!ev.port.unwrap().enabled);
        assert!(store.update_port_status(&id, &PortDescription::new(1, false)).is_none());

        let ev = store.update_port_status(&id, &PortDescription::new(7, true)).unwrap();
        assert_eq!(ev.event_type, DeviceEventType::PortAdded);
        assert!(store.update_port_status(&did("of:nope"), &PortDescription::new(1, true)).is_none());
    }

    #[test]
    fn remove_drops_device_and_ports() {
        let store = store_on(&MemoryCluster::new(), "a");
        let id = did("of:foo");
        store.create_or_update_device(&pid(), &id, &desc(&id, "3.8.1"));
        store.update_ports(&pid(), &id, &[PortDescription::new(1, true)]).unwrap();

        let ev = store.remove_device(&id).unwrap();
        assert_eq!(ev.event_type, DeviceEventType::DeviceRemoved);
        assert!(store.get_device(&id).is_none());
        assert!(store.get_ports(&id).is_empty());
        assert!(store.get_port(&id, PortNumber::new(1)).is_none());
        assert!(store.remove_device(&id).is_none());
    }

    #[test]
    fn remote_updates_are_reported_once_and_replays_dropped() {
        let cluster = MemoryCluster::new();
        let a = store_on(&cluster, "a");
        let b = store_on(&cluster, "b");
        let mut rx = b.watch();
        let id = did("of:foo");

        a.create_or_update_device(&pid(), &id, &desc(&id, "3.8.1"));
        let update = rx.try_recv().unwrap();

        // The writer never re-reports its own update.
        assert!(a.apply_remote(&update).is_empty());

        let events = b.apply_remote(&update);
        assert_eq!(types(&events), vec![DeviceEventType::DeviceAdded]);
        assert!(b.apply_remote(&update).is_empty());
        assert!(b.get_device(&id).is_some());
    }
}
