// This is free and unencumbered software released into the public domain.

use super::{CameraError, CapturePlatform};
use std::sync::Arc;

/// Platform names [`open_platform`] understands on this build.
pub fn available_platforms() -> Vec<&'static str> {
    let mut names = Vec::new();
    if cfg!(all(feature = "avf", any(target_os = "ios", target_os = "macos"))) {
        names.push("avf");
    }
    if cfg!(feature = "simulated") {
        names.push("simulated");
    }
    names
}

/// Opens the named platform, or the best available one for an empty name.
pub fn open_platform(name: impl AsRef<str>) -> Result<Arc<dyn CapturePlatform>, CameraError> {
    let name = name.as_ref().trim();
    let name = if name.is_empty() {
        available_platforms()
            .first()
            .copied()
            .ok_or(CameraError::NoDriver)?
    } else {
        name
    };

    cfg_if::cfg_if! {
        if #[cfg(all(feature = "avf", any(target_os = "ios", target_os = "macos")))] {
            if name == "avf" {
                return Ok(Arc::new(super::drivers::avf::AvfPlatform::new()));
            }
        }
    }

    cfg_if::cfg_if! {
        if #[cfg(feature = "simulated")] {
            if name == "simulated" {
                return Ok(Arc::new(super::drivers::simulated::SimulatedPlatform::default()));
            }
        }
    }

    Err(CameraError::unsupported(format!("camera platform '{name}'")))
}

#[cfg(all(test, feature = "simulated"))]
mod tests {
    use super::*;

    #[test]
    fn opens_simulated_by_name() {
        let platform = open_platform("simulated").expect("simulated platform");
        assert_eq!(platform.name(), "simulated");
    }

    #[test]
    fn unknown_platform_is_unsupported() {
        assert!(matches!(
            open_platform("v4l2"),
            Err(CameraError::Unsupported(_))
        ));
    }

    #[test]
    fn empty_name_picks_first_available() {
        let platform = open_platform("").expect("default platform");
        assert_eq!(platform.name(), available_platforms()[0]);
    }
}
