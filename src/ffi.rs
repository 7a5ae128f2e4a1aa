// This is free and unencumbered software released into the public domain.

// iOS-only FFI for the AVFoundation-backed synchronized capture session.
// Exposed as a C ABI for use from Swift/Objective-C.

use crate::shared::{
    BundleReport, BundleSink, CameraError, ConfigurationError, ConfiguredSession, DataKind,
    DevicePosition, DeviceType, DropReason, SerialQueue, SessionConfig, SessionConfigurator,
    drivers::avf::AvfPlatform,
};
use core::ffi::{c_char, c_double, c_void};
use std::{ffi::CStr, str::FromStr, sync::Arc};

/// One output's slot in a synchronized bundle, as seen from C.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct AsimovDepthSyncFrame {
    /// Platform-assigned output identifier.
    pub output: u32,
    /// `0` for a video sample buffer, `1` for depth data.
    pub kind: u32,
    /// Presentation time in seconds.
    pub timestamp: c_double,
    pub dropped: bool,
    /// `-1` when delivered; otherwise `0` late data, `1` out of buffers,
    /// `2` discontinuity.
    pub reason: i32,
}

/// C-style bundle callback that Swift will implement.
///
/// `frames` is only valid for the duration of the callback. Callbacks run on
/// the session's data queue, one at a time.
pub type AsimovDepthSyncBundleCallback =
    extern "C" fn(frames: *const AsimovDepthSyncFrame, count: usize, user_data: *mut c_void);

/// Error codes returned by the FFI API.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AsimovDepthSyncErrorCode {
    Ok = 0,
    /// No suitable capture platform available.
    NoDriver = 1,
    /// No matching camera device.
    NoCamera = 2,
    /// Underlying AVFoundation error.
    DriverError = 3,
    /// Invalid arguments passed via the FFI boundary.
    InvalidArgument = 4,
    /// Camera access was denied or restricted.
    PermissionDenied = 5,
    /// The session could not be wired together.
    ConfigurationFailed = 6,
}

impl From<CameraError> for AsimovDepthSyncErrorCode {
    fn from(err: CameraError) -> Self {
        match err {
            CameraError::NoDriver => Self::NoDriver,
            CameraError::InvalidConfig(_) => Self::InvalidArgument,
            _ => Self::DriverError,
        }
    }
}

impl From<ConfigurationError> for AsimovDepthSyncErrorCode {
    fn from(err: ConfigurationError) -> Self {
        match err {
            ConfigurationError::PermissionDenied { .. } => Self::PermissionDenied,
            ConfigurationError::DeviceUnavailable { .. } => Self::NoCamera,
            ConfigurationError::InputCreationFailed(_) | ConfigurationError::DeviceLockFailed(_) => {
                Self::DriverError
            },
            _ => Self::ConfigurationFailed,
        }
    }
}

/// Internal handle we keep on the Rust side.
///
/// Swift only sees this as an opaque `void*`.
pub struct AsimovDepthSyncHandle {
    session: ConfiguredSession,
    session_queue: Arc<SerialQueue>,
}

impl Drop for AsimovDepthSyncHandle {
    fn drop(&mut self) {
        self.session.stop_running();
        self.session_queue.stop();
    }
}

/// Parses an optional C string; `NULL` or `""` yields `None`.
fn optional_c_str<T: FromStr>(s: *const c_char) -> Result<Option<T>, AsimovDepthSyncErrorCode> {
    if s.is_null() {
        return Ok(None);
    }
    let s = unsafe { CStr::from_ptr(s) }
        .to_str()
        .map_err(|_| AsimovDepthSyncErrorCode::InvalidArgument)?;
    if s.trim().is_empty() {
        return Ok(None);
    }
    s.parse()
        .map(Some)
        .map_err(|_| AsimovDepthSyncErrorCode::InvalidArgument)
}

fn c_frames(report: &BundleReport) -> Vec<AsimovDepthSyncFrame> {
    report
        .frames
        .iter()
        .map(|f| AsimovDepthSyncFrame {
            output: f.output.0,
            kind: match f.kind {
                DataKind::Buffer => 0,
                DataKind::Depth => 1,
            },
            timestamp: f.timestamp.as_secs_f64(),
            dropped: f.dropped,
            reason: match f.dropped_reason {
                None => -1,
                Some(DropReason::LateData) => 0,
                Some(DropReason::OutOfBuffers) => 1,
                Some(DropReason::Discontinuity) => 2,
            },
        })
        .collect()
}

fn make_bundle_sink(callback: AsimovDepthSyncBundleCallback, user_data: *mut c_void) -> BundleSink {
    // Only the pointer bits are captured, so the sink stays `Send + Sync`.
    let user_bits = user_data as usize;

    Arc::new(move |report: &BundleReport| {
        let frames = c_frames(report);
        callback(frames.as_ptr(), frames.len(), user_bits as *mut c_void);
    })
}

/// Configure a synchronized video + depth capture session.
///
/// Parameters:
/// - `device_type`: `"dual"`, `"true-depth"`, ...; NULL or "" = dual camera.
/// - `position`: `"back"`, `"front"`; NULL or "" = back.
/// - `bundle_callback`: called for every synchronized bundle.
/// - `user_data`: opaque pointer passed back into `bundle_callback`.
/// - `out_handle`: [out] pointer to receive an opaque session handle.
///
/// Threading:
/// - Blocks until configuration finishes, including the camera permission
///   prompt when access is still undetermined. Do not call on the main thread.
#[unsafe(no_mangle)]
pub extern "C" fn asimov_depth_sync_open(
    device_type: *const c_char,
    position: *const c_char,
    bundle_callback: AsimovDepthSyncBundleCallback,
    user_data: *mut c_void,
    out_handle: *mut *mut c_void,
) -> AsimovDepthSyncErrorCode {
    if out_handle.is_null() {
        return AsimovDepthSyncErrorCode::InvalidArgument;
    }

    let device_type = match optional_c_str::<DeviceType>(device_type) {
        Ok(t) => t.unwrap_or_default(),
        Err(e) => return e,
    };
    let position = match optional_c_str::<DevicePosition>(position) {
        Ok(p) => p.unwrap_or_default(),
        Err(e) => return e,
    };

    let config = SessionConfig::new(device_type, position);
    let session_queue = match SerialQueue::new(config.session_queue_label.clone()) {
        Ok(q) => Arc::new(q),
        Err(e) => return e.into(),
    };
    let configurator = match SessionConfigurator::new(Arc::new(AvfPlatform::new()), config) {
        Ok(c) => c,
        Err(e) => return e.into(),
    };

    let handle = configurator
        .with_bundle_sink(make_bundle_sink(bundle_callback, user_data))
        .spawn(&session_queue);

    match handle.wait() {
        Ok(session) => {
            let handle = Box::new(AsimovDepthSyncHandle {
                session,
                session_queue,
            });

            unsafe {
                *out_handle = Box::into_raw(handle) as *mut c_void;
            }

            AsimovDepthSyncErrorCode::Ok
        },
        Err(e) => e.into(),
    }
}

/// Start capturing.
#[unsafe(no_mangle)]
pub extern "C" fn asimov_depth_sync_start(handle: *mut c_void) -> AsimovDepthSyncErrorCode {
    if handle.is_null() {
        return AsimovDepthSyncErrorCode::InvalidArgument;
    }

    let handle = unsafe { &mut *(handle as *mut AsimovDepthSyncHandle) };
    handle
        .session
        .start_running()
        .map(|_| AsimovDepthSyncErrorCode::Ok)
        .unwrap_or_else(Into::into)
}

/// Stop capturing. Calling `stop` multiple times is safe.
///
/// Waits for the bundle being delivered, so it must not be called from
/// inside the bundle callback.
#[unsafe(no_mangle)]
pub extern "C" fn asimov_depth_sync_stop(handle: *mut c_void) -> AsimovDepthSyncErrorCode {
    if handle.is_null() {
        return AsimovDepthSyncErrorCode::InvalidArgument;
    }

    let handle = unsafe { &mut *(handle as *mut AsimovDepthSyncHandle) };
    handle.session.stop_running();
    AsimovDepthSyncErrorCode::Ok
}

/// Free the session handle and all associated resources.
///
/// After this call, the `handle` must not be used again. A running session
/// is stopped first.
#[unsafe(no_mangle)]
pub extern "C" fn asimov_depth_sync_free(handle: *mut c_void) {
    if handle.is_null() {
        return;
    }

    unsafe {
        drop(Box::from_raw(handle as *mut AsimovDepthSyncHandle));
    }
}
