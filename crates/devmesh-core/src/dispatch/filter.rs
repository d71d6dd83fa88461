// ── Filter predicates for event subscriptions ──

use crate::model::{DeviceEvent, DeviceEventType, DeviceId};

/// Selects which events a subscriber receives.
#[derive(Default)]
pub enum EventFilter {
    #[default]
    All,
    ByDevice(DeviceId),
    ByType(DeviceEventType),
    Custom(Box<dyn Fn(&DeviceEvent) -> bool + Send + Sync>),
}

impl EventFilter {
    pub fn matches(&self, event: &DeviceEvent) -> bool {
        match self {
            Self::All => true,
            Self::ByDevice(id) => event.device_id() == id,
            Self::ByType(t) => event.event_type == *t,
            Self::Custom(f) => f(event),
        }
    }
}

impl std::fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::ByDevice(id) => f.debug_tuple("ByDevice").field(id).finish(),
            Self::ByType(t) => f.debug_tuple("ByType").field(t).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
