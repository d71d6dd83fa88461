// ── Device event types ──

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::device::{Device, Port};
use super::id::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceEventType {
    DeviceAdded,
    DeviceUpdated,
    DeviceRemoved,
    DeviceAvailabilityChanged,
    DeviceMastershipChanged,
    PortAdded,
    PortUpdated,
    PortRemoved,
}

impl DeviceEventType {
    pub fn is_port_event(self) -> bool {
        matches!(self, Self::PortAdded | Self::PortUpdated | Self::PortRemoved)
    }
}

/// A change to the device state observed by this node.
///
/// `subject` is the device snapshot right after the change (right before
/// it for `DeviceRemoved`). Port events carry the affected port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub event_type: DeviceEventType,
    pub subject: Arc<Device>,
    pub port: Option<Port>,
    pub time: DateTime<Utc>,
}

impl DeviceEvent {
    pub fn new(event_type: DeviceEventType, subject: Arc<Device>) -> Self {
        Self {
            event_type,
            subject,
            port: None,
            time: Utc::now(),
        }
    }

    pub fn for_port(event_type: DeviceEventType, subject: Arc<Device>, port: Port) -> Self {
        Self {
            event_type,
            subject,
            port: Some(port),
            time: Utc::now(),
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.subject.id
    }
}
