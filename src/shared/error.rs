// This is free and unencumbered software released into the public domain.

use super::{AuthorizationStatus, ConfigurationState, DevicePosition, DeviceType, OutputKind};
use derive_more::Display;
use std::error::Error as StdError;
use thiserror::Error;

/// Errors raised by platform objects (sessions, devices, outputs).
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("no suitable camera platform available")]
    NoDriver,

    #[error("session is not inside a configuration block")]
    NotConfiguring,

    #[error("session is not configured")]
    NotConfigured,

    #[error("device is locked for configuration by another client")]
    DeviceLocked,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("queue closed")]
    Closed,

    #[error("driver error while {context}")]
    DriverError {
        context: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("{0}")]
    Other(String),
}

impl CameraError {
    #[inline]
    pub fn driver(context: &'static str, source: impl StdError + Send + Sync + 'static) -> Self {
        Self::DriverError {
            context,
            source: Box::new(source),
        }
    }

    #[inline]
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    #[inline]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    #[inline]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Why a configuration pass stopped short of `Ready`.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("camera access is not authorized ({status})")]
    PermissionDenied { status: AuthorizationStatus },

    #[error("no {device_type} device at position {position}")]
    DeviceUnavailable {
        device_type: DeviceType,
        position: DevicePosition,
    },

    #[error("could not create the device input")]
    InputCreationFailed(#[source] CameraError),

    #[error("could not add the device input to the session")]
    InputRejected,

    #[error("could not add the {0} output to the session")]
    OutputRejected(OutputKind),

    #[error("could not lock the device for configuration")]
    DeviceLockFailed(#[source] CameraError),

    #[error("configuration pass ended without reporting a result")]
    Abandoned,
}

impl ConfigurationError {
    /// Errors that the platform reports as hard faults rather than
    /// capability mismatches.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InputCreationFailed(_) | Self::DeviceLockFailed(_)
        )
    }

    pub fn reason(&self) -> AbortReason {
        match self {
            Self::PermissionDenied { .. } => AbortReason::PermissionDenied,
            Self::DeviceUnavailable { .. } => AbortReason::DeviceUnavailable,
            Self::InputCreationFailed(_) => AbortReason::InputCreationFailed,
            Self::InputRejected => AbortReason::InputRejected,
            Self::OutputRejected(kind) => AbortReason::OutputRejected(*kind),
            Self::DeviceLockFailed(_) => AbortReason::DeviceLockFailed,
            Self::Abandoned => AbortReason::Abandoned,
        }
    }
}

impl From<&ConfigurationError> for ConfigurationState {
    fn from(err: &ConfigurationError) -> Self {
        ConfigurationState::Aborted(err.reason())
    }
}

/// Copyable tag of a [`ConfigurationError`].
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum AbortReason {
    #[display("permission denied")]
    PermissionDenied,
    #[display("device unavailable")]
    DeviceUnavailable,
    #[display("input creation failed")]
    InputCreationFailed,
    #[display("input rejected")]
    InputRejected,
    #[display("{_0} output rejected")]
    OutputRejected(OutputKind),
    #[display("device lock failed")]
    DeviceLockFailed,
    #[display("abandoned")]
    Abandoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors() {
        assert!(ConfigurationError::InputCreationFailed(CameraError::Closed).is_fatal());
        assert!(ConfigurationError::DeviceLockFailed(CameraError::DeviceLocked).is_fatal());
        assert!(!ConfigurationError::InputRejected.is_fatal());
        assert!(!ConfigurationError::OutputRejected(OutputKind::Video).is_fatal());
    }

    #[test]
    fn output_rejection_names_the_output() {
        let err = ConfigurationError::OutputRejected(OutputKind::Depth);
        assert_eq!(err.to_string(), "could not add the depth output to the session");
        assert_eq!(err.reason().to_string(), "depth output rejected");
    }

    #[test]
    fn lock_failure_keeps_its_source() {
        let err = ConfigurationError::DeviceLockFailed(CameraError::DeviceLocked);
        let source = err.source().map(|s| s.to_string());
        assert_eq!(
            source.as_deref(),
            Some("device is locked for configuration by another client")
        );
    }
}
