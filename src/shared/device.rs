// This is free and unencumbered software released into the public domain.

use super::{CameraError, MediaTime};
use derive_more::Display;
use std::{any::Any, str::FromStr, sync::Arc};

#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Hash)]
pub enum DeviceType {
    #[default]
    #[display("dual")]
    BuiltInDualCamera,
    #[display("dual-wide")]
    BuiltInDualWideCamera,
    #[display("wide-angle")]
    BuiltInWideAngleCamera,
    #[display("true-depth")]
    BuiltInTrueDepthCamera,
    #[display("lidar-depth")]
    BuiltInLiDARDepthCamera,
    #[display("external")]
    External,
}

impl DeviceType {
    pub const ALL: [DeviceType; 6] = [
        DeviceType::BuiltInDualCamera,
        DeviceType::BuiltInDualWideCamera,
        DeviceType::BuiltInWideAngleCamera,
        DeviceType::BuiltInTrueDepthCamera,
        DeviceType::BuiltInLiDARDepthCamera,
        DeviceType::External,
    ];
}

impl FromStr for DeviceType {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| CameraError::invalid_config(format!("unknown device type '{s}'")))
    }
}

#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Hash)]
pub enum DevicePosition {
    #[display("unspecified")]
    Unspecified,
    #[default]
    #[display("back")]
    Back,
    #[display("front")]
    Front,
}

impl FromStr for DevicePosition {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unspecified" | "any" => Ok(Self::Unspecified),
            "back" | "rear" => Ok(Self::Back),
            "front" => Ok(Self::Front),
            other => Err(CameraError::invalid_config(format!(
                "unknown device position '{other}'"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum MediaType {
    #[display("video")]
    Video,
    #[display("depth data")]
    DepthData,
}

/// Catalog entry for a capture device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub device_type: DeviceType,
    pub position: DevicePosition,
    pub depth_capable: bool,
}

/// A physical camera as exposed by the platform.
///
/// Methods take `&self`: platform devices are shared handles and the
/// exclusive configuration lock is the only mutable state they expose.
pub trait CaptureDevice: Send + Sync {
    fn info(&self) -> DeviceInfo;

    fn device_type(&self) -> DeviceType {
        self.info().device_type
    }

    fn position(&self) -> DevicePosition {
        self.info().position
    }

    /// Minimum frame duration of the first frame-rate range of the active
    /// depth format, if a depth format is active.
    fn active_depth_min_frame_duration(&self) -> Option<MediaTime>;

    fn active_video_min_frame_duration(&self) -> MediaTime;

    fn lock_for_configuration(&self) -> Result<(), CameraError>;

    /// Only valid while the configuration lock is held.
    fn set_active_video_min_frame_duration(&self, duration: MediaTime);

    fn unlock_for_configuration(&self);

    fn as_any(&self) -> &dyn Any;
}

pub type SharedDevice = Arc<dyn CaptureDevice>;

/// A device wrapped for attachment to a session.
#[derive(Clone)]
pub struct DeviceInput {
    device: SharedDevice,
    native: Option<Arc<dyn Any + Send + Sync>>,
}

impl DeviceInput {
    pub fn new(device: SharedDevice) -> Self {
        Self {
            device,
            native: None,
        }
    }

    /// Carries the platform's own input object along with the device.
    pub fn with_native<T: Any + Send + Sync>(mut self, native: T) -> Self {
        self.native = Some(Arc::new(native));
        self
    }

    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    pub fn native<T: Any>(&self) -> Option<&T> {
        self.native.as_deref()?.downcast_ref::<T>()
    }
}

impl core::fmt::Debug for DeviceInput {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceInput")
            .field("device", &self.device.info().id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_device_type() {
        assert_eq!(
            "true-depth".parse::<DeviceType>().ok(),
            Some(DeviceType::BuiltInTrueDepthCamera)
        );
        assert_eq!("Dual".parse::<DeviceType>().ok(), Some(DeviceType::BuiltInDualCamera));
        assert!("fisheye".parse::<DeviceType>().is_err());
    }

    #[test]
    fn parse_position() {
        assert_eq!("rear".parse::<DevicePosition>().ok(), Some(DevicePosition::Back));
        assert_eq!("FRONT".parse::<DevicePosition>().ok(), Some(DevicePosition::Front));
        assert!("left".parse::<DevicePosition>().is_err());
    }
}
