// ── Domain model ──
//
// Identity, device/port descriptions, mastership roles and events. Every
// type here is a plain value; mutation happens only inside the store.

pub mod device;
pub mod event;
pub mod id;
pub mod role;

// ── Re-exports ──────────────────────────────────────────────────────

pub use device::{Device, DeviceDescription, DeviceType, Port, PortDescription, PortType};
pub use event::{DeviceEvent, DeviceEventType};
pub use id::{DeviceId, NodeId, PortNumber, ProviderId};
pub use role::MastershipRole;
