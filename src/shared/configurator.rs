// This is free and unencumbered software released into the public domain.

use crate::shared::{
    AbortReason, AuthorizationStatus, BundleSink, CameraError, CaptureDevice, CaptureOutput, CapturePlatform,
    CaptureSession, ConfigurationError, DataOutputSynchronizer, DepthDataDelegate,
    DepthDataOutput, DeviceInput, MediaTime, MediaType, OutputId, OutputKind,
    PendingAuthorization, PhotoOutput, SerialQueue, SessionConfig, SharedDevice,
    SynchronizedOutputDispatcher, TracingDataDelegate, VideoDataDelegate, VideoDataOutput,
    authorize_blocking,
};
use derive_more::Display;
use scopeguard::defer;
use std::sync::{
    Arc, Mutex,
    mpsc::{Receiver, sync_channel},
};

/// Progress of one configuration pass.
///
/// `Ready` and `Aborted` are terminal; recovering from `Aborted` takes a new
/// [`SessionConfigurator`].
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum ConfigurationState {
    #[display("unconfigured")]
    Unconfigured,
    #[display("configuring")]
    Configuring,
    #[display("ready")]
    Ready,
    #[display("aborted ({_0})")]
    Aborted(AbortReason),
}

impl ConfigurationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Aborted(_))
    }
}

#[derive(Clone, Debug)]
struct StateCell(Arc<Mutex<ConfigurationState>>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(ConfigurationState::Unconfigured)))
    }

    fn get(&self) -> ConfigurationState {
        *self.0.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set(&self, next: ConfigurationState) {
        let mut state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        let from = *state;
        debug!(%from, to = %next, "configuration state");
        *state = next;
    }
}

/// Builds the capture pipeline: device → input → {video, photo, depth}
/// outputs, with the video and depth outputs joined by a synchronizer.
pub struct SessionConfigurator {
    platform: Arc<dyn CapturePlatform>,
    config: SessionConfig,
    data_queue: Arc<SerialQueue>,
    video_delegate: Arc<dyn VideoDataDelegate>,
    depth_delegate: Arc<dyn DepthDataDelegate>,
    dispatcher: Arc<SynchronizedOutputDispatcher>,
}

impl SessionConfigurator {
    /// Creates the configurator together with its data output queue.
    pub fn new(platform: Arc<dyn CapturePlatform>, config: SessionConfig) -> Result<Self, CameraError> {
        let data_queue = Arc::new(SerialQueue::new(config.data_queue_label.clone())?);
        Ok(Self {
            platform,
            config,
            data_queue,
            video_delegate: Arc::new(TracingDataDelegate),
            depth_delegate: Arc::new(TracingDataDelegate),
            dispatcher: Arc::new(SynchronizedOutputDispatcher::new()),
        })
    }

    pub fn with_video_delegate(mut self, delegate: Arc<dyn VideoDataDelegate>) -> Self {
        self.video_delegate = delegate;
        self
    }

    pub fn with_depth_delegate(mut self, delegate: Arc<dyn DepthDataDelegate>) -> Self {
        self.depth_delegate = delegate;
        self
    }

    pub fn with_bundle_sink(self, sink: BundleSink) -> Self {
        self.dispatcher.add_sink(sink);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn data_queue(&self) -> &Arc<SerialQueue> {
        &self.data_queue
    }

    pub fn dispatcher(&self) -> &Arc<SynchronizedOutputDispatcher> {
        &self.dispatcher
    }

    /// Runs the whole pass on the calling thread, blocking on the
    /// authorization request if one is needed.
    pub fn configure(self) -> Result<ConfiguredSession, ConfigurationError> {
        let status = authorize_blocking(&*self.platform, MediaType::Video);
        self.run(status, &StateCell::new())
    }

    /// Schedules the pass on `session_queue`.
    ///
    /// When authorization is undetermined the queue is suspended until the
    /// platform answers, so the pass never starts before the answer is in.
    pub fn spawn(self, session_queue: &Arc<SerialQueue>) -> ConfigurationHandle {
        let state = StateCell::new();
        let (tx, rx) = sync_channel(1);

        let pending = PendingAuthorization::request(&*self.platform, MediaType::Video, session_queue);

        let state2 = state.clone();
        let dispatched = session_queue.dispatch(move || {
            let result = self.run(pending.status(), &state2);
            let _ = tx.send(result);
        });
        if let Err(err) = dispatched {
            warn!(%err, "could not schedule configuration");
            state.set(ConfigurationState::Aborted(AbortReason::Abandoned));
        }

        ConfigurationHandle { state, rx }
    }

    fn run(
        self,
        status: AuthorizationStatus,
        state: &StateCell,
    ) -> Result<ConfiguredSession, ConfigurationError> {
        state.set(ConfigurationState::Configuring);
        let result = self.configure_authorized(status);
        match &result {
            Ok(ready) => {
                state.set(ConfigurationState::Ready);
                info!(
                    depth_visualization = ready.depth_visualization_enabled,
                    synchronized = ready.synchronizer.is_some(),
                    "capture session configured"
                );
            },
            Err(err) => {
                state.set(ConfigurationState::from(err));
                warn!(%err, fatal = err.is_fatal(), "capture session configuration aborted");
            },
        }
        result
    }

    fn configure_authorized(
        self,
        status: AuthorizationStatus,
    ) -> Result<ConfiguredSession, ConfigurationError> {
        if !status.is_authorized() {
            return Err(ConfigurationError::PermissionDenied { status });
        }

        let config = &self.config;
        let device = self
            .platform
            .default_device(config.device_type, MediaType::Video, config.position)
            .ok_or(ConfigurationError::DeviceUnavailable {
                device_type: config.device_type,
                position: config.position,
            })?;

        if config.diagnostics {
            let info = device.info();
            info!(platform = %self.platform.name(), device = %info.id, name = %info.name, "selected device");
        }

        let input = self
            .platform
            .device_input(&device)
            .map_err(ConfigurationError::InputCreationFailed)?;

        let mut session = self.platform.new_session();
        session.begin_configuration();
        session.set_preset(config.preset);

        let wired = self.wire(&mut *session, &device, input);

        // The block is closed on every path, including aborts.
        session.commit_configuration();
        let wired = wired?;

        Ok(ConfiguredSession {
            device,
            session,
            video_output: wired.video,
            photo_output: wired.photo,
            depth_output: wired.depth,
            synchronizer: wired.synchronizer,
            dispatcher: self.dispatcher,
            data_queue: self.data_queue,
            depth_visualization_enabled: wired.depth_visualization_enabled,
            depth_data_delivery_enabled: wired.depth_data_delivery_enabled,
        })
    }

    fn wire(
        &self,
        session: &mut dyn CaptureSession,
        device: &SharedDevice,
        input: DeviceInput,
    ) -> Result<Wiring, ConfigurationError> {
        if !session.can_add_input(&input) {
            return Err(ConfigurationError::InputRejected);
        }
        session
            .add_input(input)
            .map_err(|_| ConfigurationError::InputRejected)?;

        let mut video = self.platform.video_data_output();
        attach(session, video.as_ref())?;
        video.set_pixel_format(self.config.pixel_format);
        video.set_sample_buffer_delegate(
            Arc::clone(&self.video_delegate),
            Arc::clone(&self.data_queue),
        );

        let mut photo = self.platform.photo_output();
        attach(session, photo.as_ref())?;
        photo.set_high_resolution_capture_enabled(self.config.high_resolution_capture);
        let depth_delivery_supported = photo.is_depth_data_delivery_supported();
        if depth_delivery_supported {
            photo.set_depth_data_delivery_enabled(true);
        } else {
            info!("depth data delivery is not supported by this device");
        }

        let mut depth = self.platform.depth_data_output();
        attach(session, depth.as_ref())?;
        depth.set_delegate(
            Arc::clone(&self.depth_delegate),
            Arc::clone(&self.data_queue),
        );
        depth.set_filtering_enabled(false);

        let depth_visualization_enabled = match depth.connection(MediaType::DepthData) {
            Some(mut connection) => {
                connection.set_enabled(true);
                true
            },
            None => {
                warn!("no connection for depth data, depth visualization disabled");
                false
            },
        };

        let synchronizer = if depth_visualization_enabled {
            let outputs: [&dyn CaptureOutput; 2] = [video.as_ref(), depth.as_ref()];
            let mut synchronizer = self.platform.data_output_synchronizer(&outputs);
            synchronizer.set_delegate(
                Arc::clone(&self.dispatcher) as _,
                Arc::clone(&self.data_queue),
            );
            Some(synchronizer)
        } else {
            info!("output synchronizer left unset");
            None
        };

        if depth_delivery_supported {
            if let Some(duration) = device.active_depth_min_frame_duration() {
                align_video_frame_duration(device.as_ref(), duration)?;
            }
        }

        Ok(Wiring {
            video,
            photo,
            depth,
            synchronizer,
            depth_visualization_enabled,
            depth_data_delivery_enabled: depth_delivery_supported,
        })
    }
}

impl core::fmt::Debug for SessionConfigurator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionConfigurator")
            .field("platform", &self.platform.name())
            .field("config", &self.config)
            .finish()
    }
}

struct Wiring {
    video: Box<dyn VideoDataOutput>,
    photo: Box<dyn PhotoOutput>,
    depth: Box<dyn DepthDataOutput>,
    synchronizer: Option<Box<dyn DataOutputSynchronizer>>,
    depth_visualization_enabled: bool,
    depth_data_delivery_enabled: bool,
}

fn attach(
    session: &mut dyn CaptureSession,
    output: &dyn CaptureOutput,
) -> Result<(), ConfigurationError> {
    let kind = output.kind();
    if !session.can_add_output(output) {
        return Err(ConfigurationError::OutputRejected(kind));
    }
    session.add_output(output).map_err(|err| {
        debug!(%kind, %err, "add_output failed after can_add_output");
        ConfigurationError::OutputRejected(kind)
    })
}

fn align_video_frame_duration(
    device: &dyn CaptureDevice,
    duration: MediaTime,
) -> Result<(), ConfigurationError> {
    device
        .lock_for_configuration()
        .map_err(ConfigurationError::DeviceLockFailed)?;
    defer! {
        device.unlock_for_configuration();
    }
    device.set_active_video_min_frame_duration(duration);
    debug!(%duration, "video min frame duration aligned to depth format");
    Ok(())
}

/// Result of a pass scheduled with [`SessionConfigurator::spawn`].
#[derive(Debug)]
pub struct ConfigurationHandle {
    state: StateCell,
    rx: Receiver<Result<ConfiguredSession, ConfigurationError>>,
}

impl ConfigurationHandle {
    pub fn state(&self) -> ConfigurationState {
        self.state.get()
    }

    /// Blocks until the pass finishes.
    pub fn wait(self) -> Result<ConfiguredSession, ConfigurationError> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => {
                self.state
                    .set(ConfigurationState::Aborted(AbortReason::Abandoned));
                Err(ConfigurationError::Abandoned)
            },
        }
    }
}

/// A session that passed configuration. Stops running on drop.
pub struct ConfiguredSession {
    device: SharedDevice,
    session: Box<dyn CaptureSession>,
    video_output: Box<dyn VideoDataOutput>,
    photo_output: Box<dyn PhotoOutput>,
    depth_output: Box<dyn DepthDataOutput>,
    synchronizer: Option<Box<dyn DataOutputSynchronizer>>,
    dispatcher: Arc<SynchronizedOutputDispatcher>,
    data_queue: Arc<SerialQueue>,
    depth_visualization_enabled: bool,
    depth_data_delivery_enabled: bool,
}

impl ConfiguredSession {
    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    pub fn session(&self) -> &dyn CaptureSession {
        self.session.as_ref()
    }

    pub fn video_output(&self) -> &dyn VideoDataOutput {
        self.video_output.as_ref()
    }

    pub fn photo_output(&self) -> &dyn PhotoOutput {
        self.photo_output.as_ref()
    }

    pub fn depth_output(&self) -> &dyn DepthDataOutput {
        self.depth_output.as_ref()
    }

    pub fn output_id(&self, kind: OutputKind) -> OutputId {
        match kind {
            OutputKind::Video => self.video_output.id(),
            OutputKind::Photo => self.photo_output.id(),
            OutputKind::Depth => self.depth_output.id(),
        }
    }

    pub fn synchronizer(&self) -> Option<&dyn DataOutputSynchronizer> {
        self.synchronizer.as_deref()
    }

    pub fn dispatcher(&self) -> &Arc<SynchronizedOutputDispatcher> {
        &self.dispatcher
    }

    pub fn data_queue(&self) -> &Arc<SerialQueue> {
        &self.data_queue
    }

    pub fn depth_visualization_enabled(&self) -> bool {
        self.depth_visualization_enabled
    }

    pub fn depth_data_delivery_enabled(&self) -> bool {
        self.depth_data_delivery_enabled
    }

    pub fn start_running(&mut self) -> Result<(), CameraError> {
        self.session.start_running()?;
        info!("session started");
        Ok(())
    }

    /// Stops capture. Returns once the delivery in flight has finished; no
    /// frames remain queued behind it.
    pub fn stop_running(&mut self) {
        if self.session.is_running() {
            self.session.stop_running();
            info!("session stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }
}

impl core::fmt::Debug for ConfiguredSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConfiguredSession")
            .field("device", &self.device.info().id)
            .field("outputs", &self.session.outputs())
            .field("synchronized", &self.synchronizer.is_some())
            .field("depth_visualization_enabled", &self.depth_visualization_enabled)
            .finish()
    }
}

impl Drop for ConfiguredSession {
    fn drop(&mut self) {
        self.stop_running();
    }
}
