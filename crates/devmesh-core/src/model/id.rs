// ── Core identity types ──
//
// DeviceId, ProviderId, NodeId and PortNumber form the keys of every
// replicated map and every event in the subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;
use uuid::Uuid;

use crate::error::CoreError;

// ── DeviceId ────────────────────────────────────────────────────────

/// Globally unique, immutable identifier of a device.
///
/// Always a URI whose scheme names the provider family that owns the
/// device, e.g. `of:0000000000000001` or `snmp:10.0.0.1:161`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(Url);

impl DeviceId {
    /// Parse and validate a device URI.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, CoreError> {
        let raw = raw.as_ref();
        let url = Url::parse(raw).map_err(|e| CoreError::InvalidDeviceId {
            value: raw.to_owned(),
            reason: e.to_string(),
        })?;

        let specific = url.as_str().split_once(':').map_or("", |(_, rest)| rest);
        if specific.is_empty() {
            return Err(CoreError::InvalidDeviceId {
                value: raw.to_owned(),
                reason: "empty scheme-specific part".into(),
            });
        }

        Ok(Self(url))
    }

    /// Provider scheme this device belongs to.
    pub fn scheme(&self) -> &str {
        self.0.scheme()
    }

    pub fn uri(&self) -> &Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl FromStr for DeviceId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0.into()
    }
}

// ── ProviderId ──────────────────────────────────────────────────────

/// Identifies a device-provider implementation.
///
/// Only the scheme participates in routing: at most one provider per
/// scheme may be registered at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderId {
    scheme: String,
    name: String,
}

impl ProviderId {
    pub fn new(scheme: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into().to_lowercase(),
            name: name.into(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.name)
    }
}

// ── NodeId ──────────────────────────────────────────────────────────

/// Identifies a controller instance in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh node id for instances started without explicit identity.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ── PortNumber ──────────────────────────────────────────────────────

/// Port number, unique within one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortNumber(u64);

impl PortNumber {
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PortNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PortNumber {
    fn from(n: u64) -> Self {
        Self(n)
    }
}
