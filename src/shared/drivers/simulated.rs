// This is free and unencumbered software released into the public domain.

//! In-process capture platform.
//!
//! Honours the same contracts as a hardware backend (configuration
//! bracketing, capability checks, delegate queues, exclusive device lock)
//! and produces synthetic BGRA video and `f32` depth frames. Every tick
//! yields one frame per attached output; a synchronizer simply groups the
//! frames of the same tick.

use crate::shared::{
    AccessCompletion, AuthorizationStatus, CameraError, CaptureConnection, CaptureDevice,
    CaptureOutput, CapturePlatform, CaptureSession, DataOutputSynchronizer, DepthDataDelegate,
    DepthDataOutput, DepthFrame, DeviceInfo, DeviceInput, DevicePosition, DeviceType,
    DropReason, MediaTime, MediaType, OutputId, OutputKind, PhotoOutput, PixelFormat,
    SerialQueue, SessionPreset, SharedDevice, SynchronizedData, SynchronizedDataCollection,
    SynchronizedDataDelegate, SynchronizedDepthData, SynchronizedSampleBufferData,
    VideoDataDelegate, VideoDataOutput, VideoFrame,
};
use std::{
    any::Any,
    borrow::Cow,
    collections::{BTreeMap, BTreeSet},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

/// A device the simulated platform exposes.
#[derive(Clone, Debug)]
pub struct SimulatedDeviceSpec {
    pub info: DeviceInfo,
    pub video_min_frame_duration: MediaTime,
    pub depth_min_frame_duration: Option<MediaTime>,
}

impl SimulatedDeviceSpec {
    pub fn new(id: impl Into<String>, device_type: DeviceType, position: DevicePosition) -> Self {
        let id = id.into();
        Self {
            info: DeviceInfo {
                name: format!("Simulated {device_type} camera ({position})"),
                id,
                device_type,
                position,
                depth_capable: true,
            },
            video_min_frame_duration: MediaTime::from_fps(30),
            depth_min_frame_duration: Some(MediaTime::from_fps(24)),
        }
    }

    pub fn without_depth(mut self) -> Self {
        self.info.depth_capable = false;
        self.depth_min_frame_duration = None;
        self
    }

    pub fn with_video_frame_duration(mut self, duration: MediaTime) -> Self {
        self.video_min_frame_duration = duration;
        self
    }

    pub fn with_depth_frame_duration(mut self, duration: Option<MediaTime>) -> Self {
        self.depth_min_frame_duration = duration;
        self
    }
}

/// Knobs for the simulated platform's behaviour.
#[derive(Clone, Debug)]
pub struct SimulatedConfig {
    pub authorization: AuthorizationStatus,
    /// Answer given to an access request; `None` holds the request until
    /// [`SimulatedPlatform::answer_access`] is called.
    pub access_answer: Option<bool>,
    pub devices: Vec<SimulatedDeviceSpec>,
    pub input_error: bool,
    pub reject_input: bool,
    pub reject_outputs: Vec<OutputKind>,
    pub depth_delivery_supported: bool,
    pub depth_connection: bool,
    pub lock_fails: bool,
    pub video_size: (usize, usize),
    pub depth_size: (usize, usize),
    pub drop_video_every: Option<u64>,
    pub drop_depth_every: Option<u64>,
    /// Whether a running session generates ticks on its own thread.
    pub autorun: bool,
    /// Called with every journal entry, on the thread that made the call.
    pub observer: Option<EventObserver>,
}

/// Callback run for each [`SessionEvent`] as it is recorded.
#[derive(Clone)]
pub struct EventObserver(Arc<dyn Fn(&SessionEvent) + Send + Sync>);

impl core::fmt::Debug for EventObserver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("EventObserver")
    }
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            authorization: AuthorizationStatus::Authorized,
            access_answer: Some(true),
            devices: vec![
                SimulatedDeviceSpec::new(
                    "sim:dual-back",
                    DeviceType::BuiltInDualCamera,
                    DevicePosition::Back,
                ),
                SimulatedDeviceSpec::new(
                    "sim:true-depth-front",
                    DeviceType::BuiltInTrueDepthCamera,
                    DevicePosition::Front,
                ),
                SimulatedDeviceSpec::new(
                    "sim:wide-back",
                    DeviceType::BuiltInWideAngleCamera,
                    DevicePosition::Back,
                )
                .without_depth(),
            ],
            input_error: false,
            reject_input: false,
            reject_outputs: Vec::new(),
            depth_delivery_supported: true,
            depth_connection: true,
            lock_fails: false,
            video_size: (64, 48),
            depth_size: (32, 24),
            drop_video_every: None,
            drop_depth_every: None,
            autorun: true,
            observer: None,
        }
    }
}

impl SimulatedConfig {
    pub fn with_authorization(mut self, status: AuthorizationStatus) -> Self {
        self.authorization = status;
        self
    }

    pub fn with_access_answer(mut self, answer: Option<bool>) -> Self {
        self.access_answer = answer;
        self
    }

    pub fn with_devices(mut self, devices: Vec<SimulatedDeviceSpec>) -> Self {
        self.devices = devices;
        self
    }

    pub fn with_input_error(mut self, fails: bool) -> Self {
        self.input_error = fails;
        self
    }

    pub fn with_input_rejected(mut self, rejected: bool) -> Self {
        self.reject_input = rejected;
        self
    }

    pub fn with_output_rejected(mut self, kind: OutputKind) -> Self {
        self.reject_outputs.push(kind);
        self
    }

    pub fn with_depth_delivery_supported(mut self, supported: bool) -> Self {
        self.depth_delivery_supported = supported;
        self
    }

    pub fn with_depth_connection(mut self, present: bool) -> Self {
        self.depth_connection = present;
        self
    }

    pub fn with_lock_failure(mut self, fails: bool) -> Self {
        self.lock_fails = fails;
        self
    }

    pub fn with_drop_video_every(mut self, n: Option<u64>) -> Self {
        self.drop_video_every = n.filter(|n| *n > 0);
        self
    }

    pub fn with_drop_depth_every(mut self, n: Option<u64>) -> Self {
        self.drop_depth_every = n.filter(|n| *n > 0);
        self
    }

    pub fn with_observer(
        mut self,
        observer: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(EventObserver(Arc::new(observer)));
        self
    }

    pub fn with_autorun(mut self, autorun: bool) -> Self {
        self.autorun = autorun;
        self
    }
}

/// Calls observed by the simulated platform, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    AccessRequested,
    SessionCreated,
    BeginConfiguration,
    SetPreset(SessionPreset),
    AddInput(String),
    AddOutput(OutputKind, OutputId),
    CommitConfiguration,
    HighResolutionCapture(bool),
    PhotoDepthDelivery(bool),
    DepthFiltering(bool),
    ConnectionEnabled(MediaType, bool),
    SynchronizerCreated(Vec<OutputId>),
    VideoFrameDuration(MediaTime),
    StartRunning,
    StopRunning,
}

type VideoRoute = (Arc<dyn VideoDataDelegate>, Arc<SerialQueue>);
type DepthRoute = (Arc<dyn DepthDataDelegate>, Arc<SerialQueue>);
type SyncRoute = (Arc<dyn SynchronizedDataDelegate>, Arc<SerialQueue>);
type Delivery = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Routes {
    kinds: BTreeMap<OutputId, OutputKind>,
    attached: BTreeSet<OutputId>,
    video: BTreeMap<OutputId, VideoRoute>,
    depth: BTreeMap<OutputId, DepthRoute>,
    depth_filtering: BTreeMap<OutputId, bool>,
    depth_enabled: BTreeSet<OutputId>,
    synchronizers: Vec<(Vec<OutputId>, Option<SyncRoute>)>,
}

struct SimState {
    config: SimulatedConfig,
    authorization: Mutex<AuthorizationStatus>,
    pending_access: Mutex<Vec<AccessCompletion>>,
    journal: Mutex<Vec<SessionEvent>>,
    routes: Mutex<Routes>,
    next_id: AtomicU32,
    ticks: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl SimState {
    fn record(&self, event: SessionEvent) {
        trace!(?event, "simulated platform");
        lock(&self.journal).push(event.clone());
        if let Some(EventObserver(observer)) = &self.config.observer {
            observer(&event);
        }
    }

    fn register_output(&self, kind: OutputKind) -> OutputId {
        let id = OutputId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        lock(&self.routes).kinds.insert(id, kind);
        id
    }

    fn is_attached(&self, id: OutputId) -> bool {
        lock(&self.routes).attached.contains(&id)
    }

    fn should_drop(every: Option<u64>, tick: u64) -> bool {
        matches!(every, Some(n) if n > 0 && tick % n == n - 1)
    }

    /// Produces one tick's worth of frames for every attached output and
    /// hands each callback to its queue, waiting for it to finish.
    ///
    /// A `late` tick stands for frames the consumer was too slow to take:
    /// every slot is reported dropped as late data.
    fn tick(&self, frame_duration: MediaTime, late: bool) {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed);
        let timestamp = MediaTime::new(
            tick as i64 * frame_duration.value,
            frame_duration.timescale,
        );

        let video_slot = SynchronizedData::SampleBuffer(if late {
            SynchronizedSampleBufferData::dropped(timestamp, DropReason::LateData)
        } else if Self::should_drop(self.config.drop_video_every, tick) {
            SynchronizedSampleBufferData::dropped(timestamp, DropReason::OutOfBuffers)
        } else {
            SynchronizedSampleBufferData::delivered(self.video_frame(tick, timestamp))
        });
        let depth_slot = |filtered: bool| {
            SynchronizedData::Depth(
                if late || Self::should_drop(self.config.drop_depth_every, tick) {
                    SynchronizedDepthData::dropped(timestamp, DropReason::LateData)
                } else {
                    let mut frame = self.depth_frame(tick, timestamp);
                    frame.filtered = filtered;
                    SynchronizedDepthData::delivered(frame)
                },
            )
        };

        let mut deliveries: Vec<(Arc<SerialQueue>, Delivery)> = Vec::new();
        {
            let routes = lock(&self.routes);
            let produces = |id: &OutputId| -> bool {
                routes.attached.contains(id)
                    && match routes.kinds.get(id) {
                        Some(OutputKind::Video) => true,
                        Some(OutputKind::Depth) => routes.depth_enabled.contains(id),
                        _ => false,
                    }
            };

            let mut synchronized = BTreeSet::new();
            for (outputs, route) in &routes.synchronizers {
                let Some((delegate, queue)) = route else {
                    continue;
                };
                let mut collection = SynchronizedDataCollection::new();
                for id in outputs.iter().copied().filter(|id| produces(id)) {
                    synchronized.insert(id);
                    match routes.kinds.get(&id) {
                        Some(OutputKind::Video) => collection.insert(id, video_slot.clone()),
                        Some(OutputKind::Depth) => {
                            let filtered =
                                routes.depth_filtering.get(&id).copied().unwrap_or(false);
                            collection.insert(id, depth_slot(filtered))
                        },
                        _ => {},
                    }
                }
                if collection.is_empty() {
                    continue;
                }
                let delegate = Arc::clone(delegate);
                deliveries.push((
                    Arc::clone(queue),
                    Box::new(move || delegate.did_output_synchronized_data(&collection)),
                ));
            }

            for (id, (delegate, queue)) in &routes.video {
                if synchronized.contains(id) || !produces(id) {
                    continue;
                }
                let (id, delegate) = (*id, Arc::clone(delegate));
                let slot = video_slot.clone();
                deliveries.push((
                    Arc::clone(queue),
                    Box::new(move || {
                        if let SynchronizedData::SampleBuffer(data) = slot {
                            match (data.sample_buffer, data.dropped_reason) {
                                (Some(frame), _) => delegate.did_output_video_frame(id, &frame),
                                (None, reason) => delegate.did_drop_video_frame(
                                    id,
                                    reason.unwrap_or(DropReason::LateData),
                                ),
                            }
                        }
                    }),
                ));
            }

            for (id, (delegate, queue)) in &routes.depth {
                if synchronized.contains(id) || !produces(id) {
                    continue;
                }
                let filtered = routes.depth_filtering.get(id).copied().unwrap_or(false);
                let (id, delegate) = (*id, Arc::clone(delegate));
                let slot = depth_slot(filtered);
                deliveries.push((
                    Arc::clone(queue),
                    Box::new(move || {
                        if let SynchronizedData::Depth(data) = slot {
                            match (data.depth_data, data.dropped_reason) {
                                (Some(frame), _) => delegate.did_output_depth_data(id, &frame),
                                (None, reason) => delegate.did_drop_depth_data(
                                    id,
                                    reason.unwrap_or(DropReason::LateData),
                                ),
                            }
                        }
                    }),
                ));
            }
        }

        for (queue, delivery) in deliveries {
            if let Err(err) = queue.sync(delivery) {
                debug!(queue = queue.label(), %err, "simulated frame not delivered");
            }
        }
    }

    /// Accounts for frame slots that passed without being produced.
    fn skip(&self, ticks: u64) {
        self.ticks.fetch_add(ticks, Ordering::Relaxed);
    }

    fn video_frame(&self, tick: u64, timestamp: MediaTime) -> VideoFrame {
        let (width, height) = self.config.video_size;
        let stride = width * PixelFormat::Bgra8.bytes_per_pixel();
        let mut data = Vec::with_capacity(stride * height);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8, y as u8, tick as u8, 0xff]);
            }
        }
        VideoFrame::new_bgra(data, width, height, stride, timestamp)
    }

    fn depth_frame(&self, tick: u64, timestamp: MediaTime) -> DepthFrame {
        let (width, height) = self.config.depth_size;
        let samples: Vec<f32> = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| 1.0 + (x + y) as f32 * 0.01 + (tick % 100) as f32 * 0.001)
            .collect();
        DepthFrame::from_samples(&samples, width, height, timestamp)
    }
}

/// The simulated camera stack. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SimulatedPlatform {
    state: Arc<SimState>,
}

impl SimulatedPlatform {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            state: Arc::new(SimState {
                authorization: Mutex::new(config.authorization),
                config,
                pending_access: Mutex::new(Vec::new()),
                journal: Mutex::new(Vec::new()),
                routes: Mutex::new(Routes::default()),
                next_id: AtomicU32::new(0),
                ticks: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &SimulatedConfig {
        &self.state.config
    }

    /// Everything the platform has been asked to do so far.
    pub fn journal(&self) -> Vec<SessionEvent> {
        lock(&self.state.journal).clone()
    }

    pub fn sessions_created(&self) -> usize {
        lock(&self.state.journal)
            .iter()
            .filter(|e| **e == SessionEvent::SessionCreated)
            .count()
    }

    /// Answers every access request still waiting for the user.
    pub fn answer_access(&self, granted: bool) -> usize {
        let pending: Vec<AccessCompletion> = lock(&self.state.pending_access).drain(..).collect();
        let n = pending.len();
        *lock(&self.state.authorization) = if granted {
            AuthorizationStatus::Authorized
        } else {
            AuthorizationStatus::Denied
        };
        for completion in pending {
            completion(granted);
        }
        n
    }

    /// Emits one tick at `frame_duration` spacing and returns once every
    /// callback it produced has run.
    pub fn tick(&self, frame_duration: MediaTime) {
        self.state.tick(frame_duration, false);
    }

    pub fn ticks(&self) -> u64 {
        self.state.ticks.load(Ordering::Relaxed)
    }
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new(SimulatedConfig::default())
    }
}

impl core::fmt::Debug for SimulatedPlatform {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimulatedPlatform")
            .field("config", &self.state.config)
            .finish()
    }
}

impl dogma::Named for SimulatedPlatform {
    fn name(&self) -> Cow<'_, str> {
        "simulated".into()
    }
}

impl CapturePlatform for SimulatedPlatform {
    fn authorization_status(&self, _media_type: MediaType) -> AuthorizationStatus {
        *lock(&self.state.authorization)
    }

    fn request_access(&self, _media_type: MediaType, completion: AccessCompletion) {
        self.state.record(SessionEvent::AccessRequested);
        match self.state.config.access_answer {
            Some(granted) => {
                let platform = self.clone();
                lock(&self.state.pending_access).push(completion);
                // Answer from another thread, the way a permission dialog would.
                std::thread::spawn(move || {
                    platform.answer_access(granted);
                });
            },
            None => lock(&self.state.pending_access).push(completion),
        }
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>, CameraError> {
        Ok(self
            .state
            .config
            .devices
            .iter()
            .map(|d| d.info.clone())
            .collect())
    }

    fn default_device(
        &self,
        device_type: DeviceType,
        media_type: MediaType,
        position: DevicePosition,
    ) -> Option<SharedDevice> {
        if media_type != MediaType::Video {
            return None;
        }
        self.state
            .config
            .devices
            .iter()
            .find(|d| {
                d.info.device_type == device_type
                    && (position == DevicePosition::Unspecified || d.info.position == position)
            })
            .map(|spec| {
                Arc::new(SimulatedDevice {
                    spec: spec.clone(),
                    video_min_frame_duration: Mutex::new(spec.video_min_frame_duration),
                    locked: AtomicBool::new(false),
                    lock_fails: self.state.config.lock_fails,
                    state: Arc::clone(&self.state),
                }) as SharedDevice
            })
    }

    fn device_input(&self, device: &SharedDevice) -> Result<DeviceInput, CameraError> {
        if self.state.config.input_error {
            return Err(CameraError::driver(
                "creating device input",
                std::io::Error::other(format!("{} is in use", device.info().id)),
            ));
        }
        Ok(DeviceInput::new(Arc::clone(device)))
    }

    fn new_session(&self) -> Box<dyn CaptureSession> {
        self.state.record(SessionEvent::SessionCreated);
        Box::new(SimulatedSession {
            state: Arc::clone(&self.state),
            configuring: false,
            input: None,
            outputs: Vec::new(),
            generator: None,
        })
    }

    fn video_data_output(&self) -> Box<dyn VideoDataOutput> {
        Box::new(SimulatedVideoOutput {
            id: self.state.register_output(OutputKind::Video),
            pixel_format: PixelFormat::Bgra8,
            state: Arc::clone(&self.state),
        })
    }

    fn photo_output(&self) -> Box<dyn PhotoOutput> {
        Box::new(SimulatedPhotoOutput {
            id: self.state.register_output(OutputKind::Photo),
            high_resolution: false,
            depth_delivery: false,
            state: Arc::clone(&self.state),
        })
    }

    fn depth_data_output(&self) -> Box<dyn DepthDataOutput> {
        let id = self.state.register_output(OutputKind::Depth);
        lock(&self.state.routes).depth_filtering.insert(id, true);
        Box::new(SimulatedDepthOutput {
            id,
            state: Arc::clone(&self.state),
        })
    }

    fn data_output_synchronizer(
        &self,
        outputs: &[&dyn CaptureOutput],
    ) -> Box<dyn DataOutputSynchronizer> {
        let ids: Vec<OutputId> = outputs.iter().map(|o| o.id()).collect();
        self.state
            .record(SessionEvent::SynchronizerCreated(ids.clone()));
        let index = {
            let mut routes = lock(&self.state.routes);
            routes.synchronizers.push((ids.clone(), None));
            routes.synchronizers.len() - 1
        };
        Box::new(SimulatedSynchronizer {
            index,
            outputs: ids,
            state: Arc::clone(&self.state),
        })
    }
}

struct SimulatedDevice {
    spec: SimulatedDeviceSpec,
    video_min_frame_duration: Mutex<MediaTime>,
    locked: AtomicBool,
    lock_fails: bool,
    state: Arc<SimState>,
}

impl CaptureDevice for SimulatedDevice {
    fn info(&self) -> DeviceInfo {
        self.spec.info.clone()
    }

    fn active_depth_min_frame_duration(&self) -> Option<MediaTime> {
        self.spec.depth_min_frame_duration
    }

    fn active_video_min_frame_duration(&self) -> MediaTime {
        *lock(&self.video_min_frame_duration)
    }

    fn lock_for_configuration(&self) -> Result<(), CameraError> {
        if self.lock_fails {
            return Err(CameraError::DeviceLocked);
        }
        if self.locked.swap(true, Ordering::AcqRel) {
            return Err(CameraError::DeviceLocked);
        }
        Ok(())
    }

    fn set_active_video_min_frame_duration(&self, duration: MediaTime) {
        if !self.locked.load(Ordering::Acquire) {
            warn!(device = %self.spec.info.id, "frame duration change without configuration lock ignored");
            return;
        }
        *lock(&self.video_min_frame_duration) = duration;
        self.state.record(SessionEvent::VideoFrameDuration(duration));
    }

    fn unlock_for_configuration(&self) {
        self.locked.store(false, Ordering::Release);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Generator {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl Generator {
    fn spawn(state: Arc<SimState>, device: SharedDevice) -> Result<Self, CameraError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = Arc::clone(&stop);
        let join = std::thread::Builder::new()
            .name("simulated capture".into())
            .spawn(move || {
                let mut next = Instant::now();
                while !stop2.load(Ordering::Relaxed) {
                    let duration = device.active_video_min_frame_duration();
                    let period = Duration::from_secs_f64(duration.as_secs_f64().max(0.001));
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        std::thread::sleep(next - now);
                    }
                    if stop2.load(Ordering::Relaxed) {
                        break;
                    }

                    // Slots that passed while the last delivery was running are lost.
                    let behind = Instant::now().saturating_duration_since(next);
                    let missed = (behind.as_secs_f64() / period.as_secs_f64()) as u64;
                    if missed > 0 {
                        state.skip(missed);
                        next = Instant::now();
                    }
                    state.tick(duration, missed > 0);
                }
            })
            .map_err(|e| CameraError::driver("spawning simulated capture thread", e))?;
        Ok(Self {
            stop,
            join: Some(join),
        })
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

struct SimulatedSession {
    state: Arc<SimState>,
    configuring: bool,
    input: Option<DeviceInput>,
    outputs: Vec<OutputId>,
    generator: Option<Generator>,
}

impl CaptureSession for SimulatedSession {
    fn begin_configuration(&mut self) {
        self.configuring = true;
        self.state.record(SessionEvent::BeginConfiguration);
    }

    fn commit_configuration(&mut self) {
        self.configuring = false;
        self.state.record(SessionEvent::CommitConfiguration);
    }

    fn is_configuring(&self) -> bool {
        self.configuring
    }

    fn set_preset(&mut self, preset: SessionPreset) {
        self.state.record(SessionEvent::SetPreset(preset));
    }

    fn can_add_input(&self, _input: &DeviceInput) -> bool {
        !self.state.config.reject_input && self.input.is_none()
    }

    fn add_input(&mut self, input: DeviceInput) -> Result<(), CameraError> {
        if !self.configuring {
            return Err(CameraError::NotConfiguring);
        }
        if !self.can_add_input(&input) {
            return Err(CameraError::unsupported("input not accepted by session"));
        }
        self.state
            .record(SessionEvent::AddInput(input.device().info().id));
        self.input = Some(input);
        Ok(())
    }

    fn can_add_output(&self, output: &dyn CaptureOutput) -> bool {
        !self.state.config.reject_outputs.contains(&output.kind())
            && !self.state.is_attached(output.id())
    }

    fn add_output(&mut self, output: &dyn CaptureOutput) -> Result<(), CameraError> {
        if !self.configuring {
            return Err(CameraError::NotConfiguring);
        }
        if !self.can_add_output(output) {
            return Err(CameraError::unsupported(format!(
                "{} output not accepted by session",
                output.kind()
            )));
        }
        lock(&self.state.routes).attached.insert(output.id());
        self.outputs.push(output.id());
        self.state
            .record(SessionEvent::AddOutput(output.kind(), output.id()));
        Ok(())
    }

    fn outputs(&self) -> Vec<OutputId> {
        self.outputs.clone()
    }

    fn start_running(&mut self) -> Result<(), CameraError> {
        if self.generator.is_some() {
            return Ok(());
        }
        let Some(input) = self.input.as_ref() else {
            return Err(CameraError::NotConfigured);
        };
        self.state.record(SessionEvent::StartRunning);
        self.generator = if self.state.config.autorun {
            Some(Generator::spawn(
                Arc::clone(&self.state),
                Arc::clone(input.device()),
            )?)
        } else {
            Some(Generator {
                stop: Arc::new(AtomicBool::new(false)),
                join: None,
            })
        };
        Ok(())
    }

    fn stop_running(&mut self) {
        if let Some(mut generator) = self.generator.take() {
            generator.stop();
            self.state.record(SessionEvent::StopRunning);
        }
    }

    fn is_running(&self) -> bool {
        self.generator.is_some()
    }
}

impl Drop for SimulatedSession {
    fn drop(&mut self) {
        self.stop_running();
    }
}

struct SimulatedVideoOutput {
    id: OutputId,
    pixel_format: PixelFormat,
    state: Arc<SimState>,
}

impl CaptureOutput for SimulatedVideoOutput {
    fn id(&self) -> OutputId {
        self.id
    }

    fn kind(&self) -> OutputKind {
        OutputKind::Video
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl VideoDataOutput for SimulatedVideoOutput {
    fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn set_pixel_format(&mut self, format: PixelFormat) {
        self.pixel_format = format;
    }

    fn set_sample_buffer_delegate(
        &mut self,
        delegate: Arc<dyn VideoDataDelegate>,
        queue: Arc<SerialQueue>,
    ) {
        lock(&self.state.routes)
            .video
            .insert(self.id, (delegate, queue));
    }
}

struct SimulatedPhotoOutput {
    id: OutputId,
    high_resolution: bool,
    depth_delivery: bool,
    state: Arc<SimState>,
}

impl CaptureOutput for SimulatedPhotoOutput {
    fn id(&self) -> OutputId {
        self.id
    }

    fn kind(&self) -> OutputKind {
        OutputKind::Photo
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PhotoOutput for SimulatedPhotoOutput {
    fn is_high_resolution_capture_enabled(&self) -> bool {
        self.high_resolution
    }

    fn set_high_resolution_capture_enabled(&mut self, enabled: bool) {
        self.high_resolution = enabled;
        self.state
            .record(SessionEvent::HighResolutionCapture(enabled));
    }

    fn is_depth_data_delivery_supported(&self) -> bool {
        self.state.config.depth_delivery_supported && self.state.is_attached(self.id)
    }

    fn is_depth_data_delivery_enabled(&self) -> bool {
        self.depth_delivery
    }

    fn set_depth_data_delivery_enabled(&mut self, enabled: bool) {
        if enabled && !self.is_depth_data_delivery_supported() {
            warn!("depth data delivery requested on an output that cannot deliver it");
            return;
        }
        self.depth_delivery = enabled;
        self.state.record(SessionEvent::PhotoDepthDelivery(enabled));
    }
}

struct SimulatedDepthOutput {
    id: OutputId,
    state: Arc<SimState>,
}

impl CaptureOutput for SimulatedDepthOutput {
    fn id(&self) -> OutputId {
        self.id
    }

    fn kind(&self) -> OutputKind {
        OutputKind::Depth
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl DepthDataOutput for SimulatedDepthOutput {
    fn is_filtering_enabled(&self) -> bool {
        lock(&self.state.routes)
            .depth_filtering
            .get(&self.id)
            .copied()
            .unwrap_or(true)
    }

    fn set_filtering_enabled(&mut self, enabled: bool) {
        lock(&self.state.routes)
            .depth_filtering
            .insert(self.id, enabled);
        self.state.record(SessionEvent::DepthFiltering(enabled));
    }

    fn set_delegate(&mut self, delegate: Arc<dyn DepthDataDelegate>, queue: Arc<SerialQueue>) {
        lock(&self.state.routes)
            .depth
            .insert(self.id, (delegate, queue));
    }

    fn connection(&self, media_type: MediaType) -> Option<Box<dyn CaptureConnection>> {
        if media_type != MediaType::DepthData
            || !self.state.config.depth_connection
            || !self.state.is_attached(self.id)
        {
            return None;
        }
        Some(Box::new(SimulatedConnection {
            output: self.id,
            media_type,
            state: Arc::clone(&self.state),
        }))
    }
}

struct SimulatedConnection {
    output: OutputId,
    media_type: MediaType,
    state: Arc<SimState>,
}

impl CaptureConnection for SimulatedConnection {
    fn media_type(&self) -> MediaType {
        self.media_type
    }

    fn is_enabled(&self) -> bool {
        lock(&self.state.routes).depth_enabled.contains(&self.output)
    }

    fn set_enabled(&mut self, enabled: bool) {
        {
            let mut routes = lock(&self.state.routes);
            if enabled {
                routes.depth_enabled.insert(self.output);
            } else {
                routes.depth_enabled.remove(&self.output);
            }
        }
        self.state
            .record(SessionEvent::ConnectionEnabled(self.media_type, enabled));
    }
}

struct SimulatedSynchronizer {
    index: usize,
    outputs: Vec<OutputId>,
    state: Arc<SimState>,
}

impl DataOutputSynchronizer for SimulatedSynchronizer {
    fn data_outputs(&self) -> Vec<OutputId> {
        self.outputs.clone()
    }

    fn set_delegate(
        &mut self,
        delegate: Arc<dyn SynchronizedDataDelegate>,
        queue: Arc<SerialQueue>,
    ) {
        if let Some(slot) = lock(&self.state.routes).synchronizers.get_mut(self.index) {
            slot.1 = Some((delegate, queue));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_device_honours_type_and_position() {
        let platform = SimulatedPlatform::default();
        let dual = platform
            .default_device(DeviceType::BuiltInDualCamera, MediaType::Video, DevicePosition::Back)
            .expect("dual camera");
        assert_eq!(dual.info().id, "sim:dual-back");

        assert!(platform
            .default_device(DeviceType::BuiltInDualCamera, MediaType::Video, DevicePosition::Front)
            .is_none());
        assert!(platform
            .default_device(
                DeviceType::BuiltInTrueDepthCamera,
                MediaType::Video,
                DevicePosition::Unspecified
            )
            .is_some());
        assert!(platform
            .default_device(DeviceType::BuiltInDualCamera, MediaType::DepthData, DevicePosition::Back)
            .is_none());
    }

    #[test]
    fn device_lock_is_exclusive() {
        let platform = SimulatedPlatform::default();
        let device = platform
            .default_device(DeviceType::BuiltInDualCamera, MediaType::Video, DevicePosition::Back)
            .expect("device");

        device.set_active_video_min_frame_duration(MediaTime::from_fps(10));
        assert_eq!(device.active_video_min_frame_duration(), MediaTime::from_fps(30));

        device.lock_for_configuration().expect("first lock");
        assert!(matches!(
            device.lock_for_configuration(),
            Err(CameraError::DeviceLocked)
        ));
        device.set_active_video_min_frame_duration(MediaTime::from_fps(10));
        device.unlock_for_configuration();

        assert_eq!(device.active_video_min_frame_duration(), MediaTime::from_fps(10));
        device.lock_for_configuration().expect("relock");
        device.unlock_for_configuration();
    }

    #[test]
    fn outputs_only_attach_inside_a_configuration_block() {
        let platform = SimulatedPlatform::default();
        let mut session = platform.new_session();
        let video = platform.video_data_output();

        assert!(session.can_add_output(video.as_ref()));
        assert!(matches!(
            session.add_output(video.as_ref()),
            Err(CameraError::NotConfiguring)
        ));

        session.begin_configuration();
        session.add_output(video.as_ref()).expect("inside block");
        assert!(!session.can_add_output(video.as_ref()));
        session.commit_configuration();

        let photo = platform.photo_output();
        assert!(matches!(
            session.add_output(photo.as_ref()),
            Err(CameraError::NotConfiguring)
        ));
        assert_eq!(session.outputs(), vec![video.id()]);
    }

    #[test]
    fn held_access_request_waits_for_an_answer() {
        let platform =
            SimulatedPlatform::new(SimulatedConfig::default()
                .with_authorization(AuthorizationStatus::NotDetermined)
                .with_access_answer(None));
        let (tx, rx) = std::sync::mpsc::channel();
        platform.request_access(
            MediaType::Video,
            Box::new(move |granted| {
                let _ = tx.send(granted);
            }),
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(platform.answer_access(false), 1);
        assert_eq!(rx.recv().ok(), Some(false));
        assert_eq!(
            platform.authorization_status(MediaType::Video),
            AuthorizationStatus::Denied
        );
    }
}
