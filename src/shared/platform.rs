// This is free and unencumbered software released into the public domain.

use crate::shared::{
    AccessCompletion, AuthorizationStatus, CameraError, CaptureOutput, DataOutputSynchronizer,
    DepthDataOutput, DeviceInfo, DeviceInput, DevicePosition, DeviceType, MediaType, OutputId,
    PhotoOutput, SessionPreset, SharedDevice, VideoDataOutput,
};

/// A camera stack: authorization, device discovery, and factories for the
/// session objects the configurator wires together.
pub trait CapturePlatform: dogma::Named + Send + Sync {
    fn authorization_status(&self, media_type: MediaType) -> AuthorizationStatus;

    /// Asks the user for access. `completion` is called exactly once.
    fn request_access(&self, media_type: MediaType, completion: AccessCompletion);

    fn devices(&self) -> Result<Vec<DeviceInfo>, CameraError>;

    fn default_device(
        &self,
        device_type: DeviceType,
        media_type: MediaType,
        position: DevicePosition,
    ) -> Option<SharedDevice>;

    fn device_input(&self, device: &SharedDevice) -> Result<DeviceInput, CameraError>;

    fn new_session(&self) -> Box<dyn CaptureSession>;

    fn video_data_output(&self) -> Box<dyn VideoDataOutput>;

    fn photo_output(&self) -> Box<dyn PhotoOutput>;

    fn depth_data_output(&self) -> Box<dyn DepthDataOutput>;

    fn data_output_synchronizer(
        &self,
        outputs: &[&dyn CaptureOutput],
    ) -> Box<dyn DataOutputSynchronizer>;
}

/// A capture pipeline: one input, any number of outputs.
///
/// Inputs and outputs may only be added between `begin_configuration` and
/// `commit_configuration`; adding outside that bracket fails with
/// [`CameraError::NotConfiguring`].
pub trait CaptureSession: Send {
    fn begin_configuration(&mut self);

    fn commit_configuration(&mut self);

    fn is_configuring(&self) -> bool;

    fn set_preset(&mut self, preset: SessionPreset);

    fn can_add_input(&self, input: &DeviceInput) -> bool;

    fn add_input(&mut self, input: DeviceInput) -> Result<(), CameraError>;

    fn can_add_output(&self, output: &dyn CaptureOutput) -> bool;

    fn add_output(&mut self, output: &dyn CaptureOutput) -> Result<(), CameraError>;

    fn outputs(&self) -> Vec<OutputId>;

    fn start_running(&mut self) -> Result<(), CameraError>;

    fn stop_running(&mut self);

    fn is_running(&self) -> bool;
}
