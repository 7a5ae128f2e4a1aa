// This is free and unencumbered software released into the public domain.

use crate::shared::{DevicePosition, DeviceType, PixelFormat};
use derive_more::Display;

#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq)]
pub enum SessionPreset {
    #[default]
    #[display("photo")]
    Photo,
    #[display("high")]
    High,
    #[display("medium")]
    Medium,
    #[display("low")]
    Low,
    #[display("input-priority")]
    InputPriority,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub device_type: DeviceType,
    pub position: DevicePosition,
    pub preset: SessionPreset,
    pub pixel_format: PixelFormat,
    pub high_resolution_capture: bool,
    pub session_queue_label: String,
    pub data_queue_label: String,
    pub diagnostics: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::BuiltInDualCamera,
            position: DevicePosition::Back,
            preset: SessionPreset::Photo,
            pixel_format: PixelFormat::Bgra8,
            high_resolution_capture: true,
            session_queue_label: "session queue".into(),
            data_queue_label: "data queue".into(),
            diagnostics: false,
        }
    }
}

impl SessionConfig {
    pub fn new(device_type: DeviceType, position: DevicePosition) -> Self {
        Self {
            device_type,
            position,
            ..Default::default()
        }
    }

    pub fn with_preset(mut self, preset: SessionPreset) -> Self {
        self.preset = preset;
        self
    }

    pub fn with_pixel_format(mut self, fmt: PixelFormat) -> Self {
        self.pixel_format = fmt;
        self
    }

    pub fn with_high_resolution_capture(mut self, enabled: bool) -> Self {
        self.high_resolution_capture = enabled;
        self
    }

    pub fn with_queue_labels(
        mut self,
        session_queue: impl Into<String>,
        data_queue: impl Into<String>,
    ) -> Self {
        self.session_queue_label = session_queue.into();
        self.data_queue_label = data_queue.into();
        self
    }

    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }
}
