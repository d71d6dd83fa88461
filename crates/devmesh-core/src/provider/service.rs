// ── Provider service ──
//
// The capability a provider receives on registration. Every call is
// checked against the registration token and the device's scheme before
// it reaches the manager.

use std::sync::Weak;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::CoreError;
use crate::manager::{DeviceManager, ManagerInner};
use crate::model::{DeviceDescription, DeviceId, PortDescription, ProviderId};

/// Write access to the device subsystem for one registered provider.
///
/// Once the provider is unregistered every call fails with
/// [`CoreError::ProviderRevoked`] and leaves state untouched.
#[derive(Clone)]
pub struct DeviceProviderService {
    provider: ProviderId,
    manager: Weak<ManagerInner>,
    token: CancellationToken,
}

impl DeviceProviderService {
    pub(crate) fn new(provider: ProviderId, manager: Weak<ManagerInner>, token: CancellationToken) -> Self {
        Self {
            provider,
            manager,
            token,
        }
    }

    pub fn provider_id(&self) -> &ProviderId {
        &self.provider
    }

    pub fn is_revoked(&self) -> bool {
        self.token.is_cancelled() || self.manager.strong_count() == 0
    }

    /// Report that `device` is connected, with its current description.
    pub async fn device_connected(
        &self,
        device: &DeviceId,
        description: &DeviceDescription,
    ) -> Result<(), CoreError> {
        self.manager_for(device)?
            .device_connected(&self.provider, device, description)
            .await
    }

    /// Report that `device` went offline. Its description and ports are
    /// kept.
    pub async fn device_disconnected(&self, device: &DeviceId) -> Result<(), CoreError> {
        self.manager_for(device)?.device_disconnected(device).await;
        Ok(())
    }

    /// Report the complete current port set of `device`.
    pub async fn update_ports(
        &self,
        device: &DeviceId,
        ports: &[PortDescription],
    ) -> Result<(), CoreError> {
        self.manager_for(device)?
            .update_ports(&self.provider, device, ports)
            .await
    }

    /// Report a change of a single port.
    pub async fn port_status_changed(
        &self,
        device: &DeviceId,
        port: &PortDescription,
    ) -> Result<(), CoreError> {
        self.manager_for(device)?
            .port_status_changed(device, port)
            .await;
        Ok(())
    }

    fn manager_for(&self, device: &DeviceId) -> Result<DeviceManager, CoreError> {
        if self.token.is_cancelled() {
            debug!(provider = %self.provider, device = %device, "call through revoked provider service");
            return Err(self.revoked());
        }
        if device.scheme() != self.provider.scheme() {
            return Err(CoreError::SchemeMismatch {
                device: device.to_string(),
                scheme: self.provider.scheme().to_owned(),
            });
        }
        self.manager
            .upgrade()
            .map(DeviceManager::from_inner)
            .ok_or_else(|| self.revoked())
    }

    fn revoked(&self) -> CoreError {
        CoreError::ProviderRevoked {
            provider: self.provider.to_string(),
        }
    }
}

impl std::fmt::Debug for DeviceProviderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceProviderService")
            .field("provider", &self.provider)
            .field("revoked", &self.is_revoked())
            .finish_non_exhaustive()
    }
}
