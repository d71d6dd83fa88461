// ── Mastership role ──

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A node's relationship to a given device.
///
/// At most one node in the cluster holds `Master` for a device at any
/// logical time; every other node observing it holds `Standby` or `None`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum MastershipRole {
    Master,
    Standby,
    #[default]
    None,
}

impl MastershipRole {
    pub fn is_master(self) -> bool {
        matches!(self, Self::Master)
    }
}
