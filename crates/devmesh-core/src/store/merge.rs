// ── Snapshot diffing ──
//
// Turns a pair of device snapshots into the events a listener should see.
// Used for local writes and for updates replicated from other nodes, so
// both paths agree on what counts as a material change.

use std::sync::Arc;

use crate::model::{Device, DeviceEvent, DeviceEventType};

/// Events describing the transition `old -> new` of one device.
///
/// At most one device-level event is produced, followed by port events in
/// ascending port order: additions and updates first, then removals.
/// Removing a device reports only `DeviceRemoved`.
pub(crate) fn device_events(old: Option<&Arc<Device>>, new: Option<&Arc<Device>>) -> Vec<DeviceEvent> {
    match (old, new) {
        (None, None) => Vec::new(),
        (Some(old), None) => vec![DeviceEvent::new(
            DeviceEventType::DeviceRemoved,
            Arc::clone(old),
        )],
        (None, Some(new)) => {
            let mut events = vec![DeviceEvent::new(
                DeviceEventType::DeviceAdded,
                Arc::clone(new),
            )];
            events.extend(port_events(None, new));
            events
        }
        (Some(old), Some(new)) => {
            let mut events = Vec::new();
            if !old.same_description(new) {
                events.push(DeviceEvent::new(
                    DeviceEventType::DeviceUpdated,
                    Arc::clone(new),
                ));
            } else if old.available != new.available {
                events.push(DeviceEvent::new(
                    DeviceEventType::DeviceAvailabilityChanged,
                    Arc::clone(new),
                ));
            }
            events.extend(port_events(Some(old), new));
            events
        }
    }
}

fn port_events(old: Option<&Arc<Device>>, new: &Arc<Device>) -> Vec<DeviceEvent> {
    let mut events = Vec::new();

    for (number, port) in &new.ports {
        let previous = old.and_then(|o| o.ports.get(number));
        let event_type = match previous {
            None => DeviceEventType::PortAdded,
            Some(prev) if prev != port => DeviceEventType::PortUpdated,
            Some(_) => continue,
        };
        events.push(DeviceEvent::for_port(event_type, Arc::clone(new), port.clone()));
    }

    if let Some(old) = old {
        for (number, port) in &old.ports {
            if !new.ports.contains_key(number) {
                events.push(DeviceEvent::for_port(
                    DeviceEventType::PortRemoved,
                    Arc::clone(new),
                    port.clone(),
                ));
            }
        }
    }

    events
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{DeviceDescription, DeviceId, DeviceType, Port, PortDescription, ProviderId};

    fn base() -> Device {
        let id = DeviceId::parse("of:foo").unwrap();
        let desc = DeviceDescription::new("of:foo", DeviceType::Switch, "whitebox", "1.1.x", "3.8.1", "1");
        Device::from_description(id, ProviderId::new("of", "foo"), &desc, true)
    }

    fn with_ports(mut d: Device, ports: &[(u64, bool)]) -> Arc<Device> {
        d.ports = ports
            .iter()
            .map(|&(n, enabled)| {
                let p = Port::from_description(d.id.clone(), &PortDescription::new(n, enabled));
                (p.number, p)
            })
            .collect();
        Arc::new(d)
    }

    fn types(events: &[DeviceEvent]) -> Vec<DeviceEventType> {
        events.iter().map(|e| e.event_type).collect()
    }

    #[test]
    fn identical_snapshots_produce_nothing() {
        let d = Arc::new(base());
        assert!(device_events(Some(&d), Some(&Arc::new(base()))).is_empty());
    }

    #[test]
    fn description_change_wins_over_availability() {
        let old = Arc::new({
            let mut d = base();
            d.available = false;
            d
        });
        let new = Arc::new({
            let mut d = base();
            d.sw_version = "3.9.5".into();
            d
        });
        assert_eq!(
            types(&device_events(Some(&old), Some(&new))),
            vec![DeviceEventType::DeviceUpdated]
        );
    }

    #[test]
    fn port_diff_orders_updates_before_removals() {
        let old = with_ports(base(), &[(1, true), (2, true), (3, true)]);
        let new = with_ports(base(), &[(1, false), (3, true)]);
        let events = device_events(Some(&old), Some(&new));

        assert_eq!(
            types(&events),
            vec![DeviceEventType::PortUpdated, DeviceEventType::PortRemoved]
        );
        assert_eq!(events[0].port.as_ref().unwrap().number.value(), 1);
        assert_eq!(events[1].port.as_ref().unwrap().number.value(), 2);
    }

    #[test]
    fn new_device_with_ports_reports_ports_after_device() {
        let new = with_ports(base(), &[(1, true), (2, true)]);
        assert_eq!(
            types(&device_events(None, Some(&new))),
            vec![
                DeviceEventType::DeviceAdded,
                DeviceEventType::PortAdded,
                DeviceEventType::PortAdded
            ]
        );
    }

    #[test]
    fn removal_reports_only_the_device() {
        let old = with_ports(base(), &[(1, true), (2, true)]);
        assert_eq!(
            types(&device_events(Some(&old), None)),
            vec![DeviceEventType::DeviceRemoved]
        );
    }
}
