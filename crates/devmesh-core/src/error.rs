// ── Core error types ──
//
// Only write operations that violate a contract surface an error.
// Idempotent no-ops (re-applying a description, disconnecting an offline
// device, removing an unknown device) are successful `None` results, and
// losing a mastership race is a STANDBY role, never an error.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Validation errors ────────────────────────────────────────────
    #[error("Invalid device id '{value}': {reason}")]
    InvalidDeviceId { value: String, reason: String },

    #[error("Duplicate port {port} in update batch for device {device}")]
    DuplicatePort { device: String, port: u64 },

    #[error("Device {device} does not belong to provider scheme '{scheme}'")]
    SchemeMismatch { device: String, scheme: String },

    // ── Provider registry errors ─────────────────────────────────────
    #[error("A provider for scheme '{scheme}' is already registered")]
    DuplicateProvider { scheme: String },

    #[error("Provider {provider} has been unregistered")]
    ProviderRevoked { provider: String },

    #[error("No provider registered for scheme '{scheme}'")]
    ProviderNotFound { scheme: String },

    // ── Driver errors ────────────────────────────────────────────────
    #[error("Driver operation '{operation}' failed: {message}")]
    Driver { operation: String, message: String },

    // ── Cluster errors ───────────────────────────────────────────────
    #[error("Cluster primitive error: {message}")]
    Cluster { message: String },

    #[error("Node {node} is not an active cluster member")]
    NodeUnavailable { node: String },
}

impl CoreError {
    /// Whether this error reports bad caller input (as opposed to a
    /// runtime failure of a driver or the cluster).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidDeviceId { .. }
                | Self::DuplicatePort { .. }
                | Self::SchemeMismatch { .. }
                | Self::DuplicateProvider { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_classified() {
        let err = CoreError::DuplicatePort {
            device: "of:1".into(),
            port: 3,
        };
        assert!(err.is_validation());
        assert_eq!(
            err.to_string(),
            "Duplicate port 3 in update batch for device of:1"
        );

        let err = CoreError::Driver {
            operation: "connect".into(),
            message: "connection refused".into(),
        };
        assert!(!err.is_validation());
    }
}
