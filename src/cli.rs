// This is free and unencumbered software released into the public domain.

//! CLI helpers (error reporting, verbosity handling).
//!
//! This module must compile even when the crate feature `cli` is disabled,
//! because the library is built in non-CLI configurations.

#[cfg(feature = "cli")]
use crate::shared::{CameraError, ConfigurationError};

#[cfg(feature = "cli")]
use asimov_module::SysexitsError::{self, *};

#[cfg(feature = "cli")]
use clientele::StandardOptions;

#[cfg(feature = "cli")]
pub fn handle_error(err: &CameraError, flags: &StandardOptions) -> SysexitsError {
    #[cfg(feature = "tracing")]
    {
        asimov_module::tracing::error!(target: "asimov_depth_sync", %err, "camera command failed");

        if flags.debug || flags.verbose >= 2 {
            debug!(?err, "detailed error");
        }
    }

    report_error(err, flags);
    map_error_to_sysexit(err)
}

#[cfg(feature = "cli")]
pub fn handle_configuration_error(
    err: &ConfigurationError,
    flags: &StandardOptions,
) -> SysexitsError {
    #[cfg(feature = "tracing")]
    asimov_module::tracing::error!(
        target: "asimov_depth_sync",
        %err,
        fatal = err.is_fatal(),
        "capture session configuration failed"
    );

    report_error(err, flags);
    map_configuration_error_to_sysexit(err)
}

#[cfg(feature = "cli")]
pub fn info_user(flags: &StandardOptions, msg: &str) {
    if flags.debug || flags.verbose >= 1 {
        eprintln!("INFO: {msg}");
    }

    #[cfg(feature = "tracing")]
    asimov_module::tracing::info!(target: "asimov_depth_sync", "{msg}");
}

#[cfg(feature = "cli")]
pub fn warn_user(flags: &StandardOptions, msg: &str) {
    if flags.debug || flags.verbose >= 1 {
        eprintln!("WARN: {msg}");
    }

    #[cfg(feature = "tracing")]
    asimov_module::tracing::warn!(target: "asimov_depth_sync", "{msg}");
}

#[cfg(feature = "cli")]
pub fn warn_user_with_error(flags: &StandardOptions, msg: &str, error: &dyn std::error::Error) {
    if flags.debug || flags.verbose >= 2 {
        eprintln!("WARN: {msg}: {error}");
    } else if flags.verbose >= 1 {
        eprintln!("WARN: {msg}");
    }

    #[cfg(feature = "tracing")]
    asimov_module::tracing::warn!(target: "asimov_depth_sync", error = %error, "{msg}");
}

#[cfg(feature = "cli")]
fn report_error(err: &dyn std::error::Error, flags: &StandardOptions) {
    use std::io::Write;

    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "ERROR: {err}");

    if flags.debug || flags.verbose >= 2 {
        let mut source = err.source();
        while let Some(cause) = source {
            let _ = writeln!(stderr, "  Caused by: {}", cause);
            source = cause.source();
        }
    }
}

#[cfg(feature = "cli")]
pub fn map_error_to_sysexit(err: &CameraError) -> SysexitsError {
    match err {
        CameraError::NoDriver => EX_UNAVAILABLE,
        CameraError::NotConfiguring | CameraError::NotConfigured => EX_SOFTWARE,
        CameraError::DeviceLocked => EX_TEMPFAIL,
        CameraError::InvalidConfig(_) => EX_USAGE,
        CameraError::Unsupported(_) => EX_UNAVAILABLE,
        CameraError::Closed => EX_SOFTWARE,
        CameraError::DriverError { .. } => EX_SOFTWARE,
        CameraError::Other(_) => EX_SOFTWARE,
    }
}

/// Fatal escalations (input creation, device lock) map to `EX_SOFTWARE`;
/// capability mismatches map to `EX_UNAVAILABLE`.
#[cfg(feature = "cli")]
pub fn map_configuration_error_to_sysexit(err: &ConfigurationError) -> SysexitsError {
    match err {
        ConfigurationError::PermissionDenied { .. } => EX_NOPERM,
        ConfigurationError::DeviceUnavailable { .. } => EX_UNAVAILABLE,
        ConfigurationError::InputRejected | ConfigurationError::OutputRejected(_) => {
            EX_UNAVAILABLE
        },
        ConfigurationError::InputCreationFailed(_) | ConfigurationError::DeviceLockFailed(_) => {
            EX_SOFTWARE
        },
        ConfigurationError::Abandoned => EX_SOFTWARE,
    }
}

// When `cli` is disabled, keep the module linkable without exposing CLI-only types.
#[cfg(not(feature = "cli"))]
#[inline]
pub fn info_user(_msg: &str) {}

#[cfg(not(feature = "cli"))]
#[inline]
pub fn warn_user(_msg: &str) {}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;
    use crate::shared::{AuthorizationStatus, OutputKind};

    #[test]
    fn fatal_configuration_errors_are_software_failures() {
        assert!(matches!(
            map_configuration_error_to_sysexit(&ConfigurationError::DeviceLockFailed(
                CameraError::DeviceLocked
            )),
            EX_SOFTWARE
        ));
        assert!(matches!(
            map_configuration_error_to_sysexit(&ConfigurationError::InputCreationFailed(
                CameraError::Closed
            )),
            EX_SOFTWARE
        ));
    }

    #[test]
    fn capability_mismatches_are_unavailable() {
        assert!(matches!(
            map_configuration_error_to_sysexit(&ConfigurationError::OutputRejected(
                OutputKind::Depth
            )),
            EX_UNAVAILABLE
        ));
        assert!(matches!(
            map_configuration_error_to_sysexit(&ConfigurationError::PermissionDenied {
                status: AuthorizationStatus::Denied
            }),
            EX_NOPERM
        ));
    }
}
