// This is free and unencumbered software released into the public domain.

use super::{
    DepthDataDelegate, MediaType, OutputId, PixelFormat, SerialQueue, VideoDataDelegate,
};
use derive_more::Display;
use std::{any::Any, sync::Arc};

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum OutputKind {
    #[display("video")]
    Video,
    #[display("photo")]
    Photo,
    #[display("depth")]
    Depth,
}

/// Behaviour shared by every output a session can carry.
pub trait CaptureOutput: Send {
    fn id(&self) -> OutputId;
    fn kind(&self) -> OutputKind;
    fn as_any(&self) -> &dyn Any;
}

/// A per-media link between the session input and an output.
pub trait CaptureConnection: Send {
    fn media_type(&self) -> MediaType;
    fn is_enabled(&self) -> bool;
    fn set_enabled(&mut self, enabled: bool);
}

pub trait VideoDataOutput: CaptureOutput {
    fn pixel_format(&self) -> PixelFormat;
    fn set_pixel_format(&mut self, format: PixelFormat);

    /// Delegate callbacks run on `queue`.
    fn set_sample_buffer_delegate(
        &mut self,
        delegate: Arc<dyn VideoDataDelegate>,
        queue: Arc<SerialQueue>,
    );
}

pub trait PhotoOutput: CaptureOutput {
    fn is_high_resolution_capture_enabled(&self) -> bool;
    fn set_high_resolution_capture_enabled(&mut self, enabled: bool);

    /// Only meaningful once the output is attached to a session whose input
    /// can produce depth.
    fn is_depth_data_delivery_supported(&self) -> bool;
    fn is_depth_data_delivery_enabled(&self) -> bool;
    fn set_depth_data_delivery_enabled(&mut self, enabled: bool);
}

pub trait DepthDataOutput: CaptureOutput {
    fn is_filtering_enabled(&self) -> bool;
    fn set_filtering_enabled(&mut self, enabled: bool);

    /// Delegate callbacks run on `queue`.
    fn set_delegate(&mut self, delegate: Arc<dyn DepthDataDelegate>, queue: Arc<SerialQueue>);

    fn connection(&self, media_type: MediaType) -> Option<Box<dyn CaptureConnection>>;
}
