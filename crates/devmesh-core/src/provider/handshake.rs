// ── Handshake supervisor ──
//
// Owns the per-device driver sessions and wraps every driver call in the
// configured timeout so a stuck driver can never hang the core.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::DeviceHandshaker;
use crate::model::{DeviceId, MastershipRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum HandshakeState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

struct Session {
    handshaker: Arc<dyn DeviceHandshaker>,
    state: HandshakeState,
}

/// One driver session per device, with bounded calls.
pub struct HandshakeSupervisor {
    sessions: DashMap<DeviceId, Session>,
    call_timeout: Duration,
    role_timeout: Duration,
}

impl HandshakeSupervisor {
    pub fn new(call_timeout: Duration, role_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            call_timeout,
            role_timeout,
        }
    }

    pub fn state(&self, device: &DeviceId) -> HandshakeState {
        self.sessions
            .get(device)
            .map_or(HandshakeState::Disconnected, |s| s.state)
    }

    pub fn connected_devices(&self) -> Vec<DeviceId> {
        self.sessions
            .iter()
            .filter(|s| s.state == HandshakeState::Connected)
            .map(|s| s.key().clone())
            .collect()
    }

    /// Open a session for `device` through `handshaker`.
    ///
    /// A `false` result or a timeout leaves the device disconnected.
    pub async fn connect(&self, device: &DeviceId, handshaker: Arc<dyn DeviceHandshaker>) -> bool {
        let previous = self.sessions.insert(
            device.clone(),
            Session {
                handshaker: Arc::clone(&handshaker),
                state: HandshakeState::Connecting,
            },
        );
        if previous.is_some() {
            debug!(device = %device, "replacing existing driver session");
        }

        let connected = match timeout(self.call_timeout, handshaker.connect()).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(device = %device, "driver connect failed");
                false
            }
            Err(_) => {
                warn!(device = %device, timeout = ?self.call_timeout, "driver connect timed out");
                false
            }
        };

        // Only touch the slot if it still belongs to this attempt.
        if connected {
            if let Some(mut session) = self.sessions.get_mut(device) {
                if Arc::ptr_eq(&session.handshaker, &handshaker) {
                    session.state = HandshakeState::Connected;
                    info!(device = %device, "driver session connected");
                }
            }
        } else {
            self.sessions
                .remove_if(device, |_, s| Arc::ptr_eq(&s.handshaker, &handshaker));
        }
        connected
    }

    /// Close the session for `device`.
    ///
    /// The local session is dropped before the driver is called. Unknown
    /// devices resolve `true`; a driver that does not confirm in time
    /// resolves `false`.
    pub async fn disconnect(&self, device: &DeviceId) -> bool {
        let Some((_, session)) = self.sessions.remove(device) else {
            return true;
        };

        match timeout(self.call_timeout, session.handshaker.disconnect()).await {
            Ok(done) => {
                debug!(device = %device, done, "driver session closed");
                done
            }
            Err(_) => {
                warn!(device = %device, "driver disconnect timed out; session dropped");
                false
            }
        }
    }

    /// Ask the driver whether `device` is reachable right now.
    pub async fn is_reachable(&self, device: &DeviceId) -> bool {
        let Some(handshaker) = self.sessions.get(device).map(|s| Arc::clone(&s.handshaker)) else {
            return false;
        };
        timeout(self.call_timeout, handshaker.is_reachable())
            .await
            .unwrap_or_else(|_| {
                debug!(device = %device, "reachability probe timed out");
                false
            })
    }

    /// Forward a role change to the device's driver without waiting for it.
    pub fn role_changed(&self, device: &DeviceId, role: MastershipRole) {
        let Some(handshaker) = self.sessions.get(device).map(|s| Arc::clone(&s.handshaker)) else {
            return;
        };
        let device = device.clone();
        let role_timeout = self.role_timeout;
        tokio::spawn(async move {
            match timeout(role_timeout, handshaker.role_changed(role)).await {
                Ok(applied) if applied == role => {
                    debug!(device = %device, role = %role, "driver acknowledged role");
                }
                Ok(applied) => {
                    warn!(device = %device, requested = %role, applied = %applied, "driver applied a different role");
                }
                Err(_) => warn!(device = %device, role = %role, "driver role change timed out"),
            }
        });
    }
}
