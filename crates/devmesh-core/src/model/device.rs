// ── Device domain types ──

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::id::{DeviceId, PortNumber, ProviderId};

/// Canonical device type reported by a provider.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[non_exhaustive]
pub enum DeviceType {
    Switch,
    Router,
    Roadm,
    Controller,
    Virtual,
    #[default]
    Other,
}

/// Physical medium of a port.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum PortType {
    #[default]
    Copper,
    Fiber,
    Virtual,
}

/// An external observation of a device's identity and capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescription {
    pub uri: String,
    pub device_type: DeviceType,
    pub manufacturer: String,
    pub hw_version: String,
    pub sw_version: String,
    pub serial: String,
}

impl DeviceDescription {
    pub fn new(
        uri: impl Into<String>,
        device_type: DeviceType,
        manufacturer: impl Into<String>,
        hw_version: impl Into<String>,
        sw_version: impl Into<String>,
        serial: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            device_type,
            manufacturer: manufacturer.into(),
            hw_version: hw_version.into(),
            sw_version: sw_version.into(),
            serial: serial.into(),
        }
    }

    /// Placeholder used when ports arrive for a device nobody described yet.
    pub fn empty(uri: impl Into<String>) -> Self {
        Self::new(uri, DeviceType::Other, "", "", "", "")
    }
}

/// Provider-reported state of a single port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescription {
    pub number: PortNumber,
    pub enabled: bool,
    pub port_type: PortType,
    pub speed_mbps: Option<u64>,
}

impl PortDescription {
    pub fn new(number: impl Into<PortNumber>, enabled: bool) -> Self {
        Self {
            number: number.into(),
            enabled,
            port_type: PortType::default(),
            speed_mbps: None,
        }
    }

    pub fn with_type(mut self, port_type: PortType) -> Self {
        self.port_type = port_type;
        self
    }

    pub fn with_speed(mut self, speed_mbps: u64) -> Self {
        self.speed_mbps = Some(speed_mbps);
        self
    }
}

/// A port as held by the store. Identity is `(device, number)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub device: DeviceId,
    pub number: PortNumber,
    pub enabled: bool,
    pub port_type: PortType,
    pub speed_mbps: Option<u64>,
}

impl Port {
    pub fn from_description(device: DeviceId, desc: &PortDescription) -> Self {
        Self {
            device,
            number: desc.number,
            enabled: desc.enabled,
            port_type: desc.port_type,
            speed_mbps: desc.speed_mbps,
        }
    }

    /// Whether the description carries the same attributes as this port.
    pub fn matches(&self, desc: &PortDescription) -> bool {
        self.number == desc.number
            && self.enabled == desc.enabled
            && self.port_type == desc.port_type
            && self.speed_mbps == desc.speed_mbps
    }
}

/// The store's merged view of one device.
///
/// Only the device store produces new values of this type; everyone else
/// sees immutable `Arc<Device>` snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub provider_id: ProviderId,
    pub uri: String,
    pub device_type: DeviceType,
    pub manufacturer: String,
    pub hw_version: String,
    pub sw_version: String,
    pub serial: String,
    pub available: bool,
    pub ports: BTreeMap<PortNumber, Port>,
}

impl Device {
    pub(crate) fn from_description(
        id: DeviceId,
        provider_id: ProviderId,
        desc: &DeviceDescription,
        available: bool,
    ) -> Self {
        Self {
            id,
            provider_id,
            uri: desc.uri.clone(),
            device_type: desc.device_type,
            manufacturer: desc.manufacturer.clone(),
            hw_version: desc.hw_version.clone(),
            sw_version: desc.sw_version.clone(),
            serial: desc.serial.clone(),
            available,
            ports: BTreeMap::new(),
        }
    }

    /// Copy description fields over this device, leaving ports and
    /// availability untouched.
    pub(crate) fn apply_description(&mut self, provider_id: &ProviderId, desc: &DeviceDescription) {
        self.provider_id = provider_id.clone();
        self.uri.clone_from(&desc.uri);
        self.device_type = desc.device_type;
        self.manufacturer.clone_from(&desc.manufacturer);
        self.hw_version.clone_from(&desc.hw_version);
        self.sw_version.clone_from(&desc.sw_version);
        self.serial.clone_from(&desc.serial);
    }

    /// Field-level comparison used to decide whether an update is material.
    pub fn same_description(&self, other: &Device) -> bool {
        self.provider_id == other.provider_id
            && self.uri == other.uri
            && self.device_type == other.device_type
            && self.manufacturer == other.manufacturer
            && self.hw_version == other.hw_version
            && self.sw_version == other.sw_version
            && self.serial == other.serial
    }

    pub fn port(&self, number: PortNumber) -> Option<&Port> {
        self.ports.get(&number)
    }
}
