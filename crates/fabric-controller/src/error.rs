//! Error types for each controller stage.
//!
//! - [`ConfigError`]: the topology file could not be loaded
//! - [`CompositionError`]: an intent could not be turned into entries
//! - [`SyncError`]: one install step failed
//! - [`ObservationError`]: a poll read failed or a session was lost

use crate::intent::IntentKind;
use fabric_p4rt::{ChannelError, SchemaError};
use fabric_types::DeviceId;
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration field '{field}': {message}")]
    Invalid { field: String, message: String },

    #[error("device {0} is declared twice")]
    DuplicateDevice(DeviceId),

    #[error("{context} refers to unknown device {device}")]
    UnknownDevice { context: String, device: DeviceId },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn unknown_device(context: impl Into<String>, device: &DeviceId) -> Self {
        ConfigError::UnknownDevice {
            context: context.into(),
            device: device.clone(),
        }
    }
}

/// An intent that cannot be composed. Raised before any device I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositionError {
    #[error("unknown intent kind: {0:?}")]
    UnknownKind(String),

    #[error("{kind} intent is missing parameter '{name}'")]
    MissingParameter {
        kind: IntentKind,
        name: &'static str,
    },

    #[error("{kind} intent has invalid parameter '{name}': {reason}")]
    InvalidParameter {
        kind: IntentKind,
        name: &'static str,
        reason: String,
    },

    #[error("intent targets unknown device {0}")]
    UnknownDevice(DeviceId),

    #[error("tunnel id {tunnel_id} is already in use on {device}")]
    DuplicateTunnelId { tunnel_id: u16, device: DeviceId },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl CompositionError {
    pub fn missing(kind: IntentKind, name: &'static str) -> Self {
        CompositionError::MissingParameter { kind, name }
    }

    pub fn invalid(kind: IntentKind, name: &'static str, reason: impl ToString) -> Self {
        CompositionError::InvalidParameter {
            kind,
            name,
            reason: reason.to_string(),
        }
    }
}

/// Failure of a single install step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("no session for device {0}")]
    NoSession(DeviceId),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl SyncError {
    /// Returns true if the device's session is no longer usable.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::NoSession(_) => false,
            SyncError::Channel(e) => e.is_fatal(),
        }
    }
}

/// Observation loop errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObservationError {
    #[error("no session for device {0}")]
    NoSession(DeviceId),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("session lost, observation stopped: {0}")]
    SessionLost(ChannelError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_p4rt::StatusCode;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_composition_error_display() {
        let err = CompositionError::missing(IntentKind::Tunnel, "tunnel_id");
        assert_eq!(err.to_string(), "tunnel intent is missing parameter 'tunnel_id'");

        let err = CompositionError::invalid(IntentKind::PortRewrite, "port", "must be 0-511");
        assert_eq!(
            err.to_string(),
            "port-rewrite intent has invalid parameter 'port': must be 0-511"
        );
    }

    #[test]
    fn test_sync_error_fatality() {
        let s1 = DeviceId::new("s1").unwrap();
        assert!(!SyncError::NoSession(s1.clone()).is_fatal());
        assert!(!SyncError::from(ChannelError::rejected(
            &s1,
            StatusCode::AlreadyExists,
            "exists"
        ))
        .is_fatal());
        assert!(SyncError::from(ChannelError::transport(&s1, "reset")).is_fatal());
    }

    #[test]
    fn test_config_error_helpers() {
        let err = ConfigError::invalid("observe.interval_ms", "must be positive");
        assert_eq!(
            err.to_string(),
            "invalid configuration field 'observe.interval_ms': must be positive"
        );
    }
}
