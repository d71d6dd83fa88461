//! Replicated device and port state.
//!
//! [`DeviceStore`] owns every mutation of [`Device`](crate::model::Device)
//! values and reports each material change as a list of
//! [`DeviceEvent`](crate::model::DeviceEvent)s. Local writes and updates
//! replicated from other nodes go through the same diffing routine.

mod device_store;
mod merge;

pub use device_store::{DeviceStore, DeviceUpdate};
