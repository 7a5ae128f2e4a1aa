// This is free and unencumbered software released into the public domain.

//! AVFoundation capture platform (iOS, macOS).
//!
//! AVFoundation delivers callbacks on a private dispatch queue. Frames are
//! copied out of their pixel buffers there and handed to the delegate on the
//! [`SerialQueue`] it was registered with. The callback waits for the
//! delegate, so a slow consumer makes AVFoundation discard late frames and
//! report them as dropped.

use crate::shared::{
    AccessCompletion, AuthorizationStatus, CameraError, CaptureConnection, CaptureDevice,
    CaptureOutput, CapturePlatform, CaptureSession, DataOutputSynchronizer, DepthDataDelegate,
    DepthDataOutput, DepthFrame, DeviceInfo, DeviceInput, DevicePosition, DeviceType, DropReason,
    MediaTime, MediaType, OutputId, OutputKind, PhotoOutput, PixelFormat, SerialQueue,
    SessionPreset, SharedDevice, SynchronizedData, SynchronizedDataCollection,
    SynchronizedDataDelegate, SynchronizedDepthData, SynchronizedSampleBufferData,
    VideoDataDelegate, VideoDataOutput, VideoFrame,
};
use block2::RcBlock;
use dispatch2::{DispatchQueue, DispatchRetained};
use objc2::{
    AllocAnyThread, DefinedClass, Message, define_class, msg_send,
    rc::Retained,
    runtime::{AnyObject, Bool, ProtocolObject},
};
use objc2_av_foundation::{
    AVAuthorizationStatus, AVCaptureConnection, AVCaptureDataOutputSynchronizer,
    AVCaptureDataOutputSynchronizerDelegate, AVCaptureDepthDataOutput,
    AVCaptureDepthDataOutputDelegate, AVCaptureDevice, AVCaptureDeviceDiscoverySession,
    AVCaptureDeviceInput, AVCaptureDevicePosition, AVCaptureDeviceType,
    AVCaptureDeviceTypeBuiltInDualCamera, AVCaptureDeviceTypeBuiltInDualWideCamera,
    AVCaptureDeviceTypeBuiltInLiDARDepthCamera, AVCaptureDeviceTypeBuiltInTrueDepthCamera,
    AVCaptureDeviceTypeBuiltInWideAngleCamera, AVCaptureDeviceTypeExternal, AVCaptureOutput,
    AVCaptureOutputDataDroppedReason, AVCapturePhotoOutput, AVCaptureSession,
    AVCaptureSessionPreset, AVCaptureSessionPresetHigh, AVCaptureSessionPresetInputPriority,
    AVCaptureSessionPresetLow, AVCaptureSessionPresetMedium, AVCaptureSessionPresetPhoto,
    AVCaptureSynchronizedDataCollection, AVCaptureSynchronizedDepthData,
    AVCaptureSynchronizedSampleBufferData, AVCaptureVideoDataOutput,
    AVCaptureVideoDataOutputSampleBufferDelegate, AVDepthData, AVMediaType,
    AVMediaTypeDepthData, AVMediaTypeVideo,
};
use objc2_core_media::{CMSampleBuffer, CMTime, CMTimeFlags};
use objc2_core_video::{
    CVPixelBuffer, CVPixelBufferGetBaseAddress, CVPixelBufferGetBytesPerRow,
    CVPixelBufferGetDataSize, CVPixelBufferGetHeight, CVPixelBufferGetWidth,
    CVPixelBufferLockBaseAddress, CVPixelBufferLockFlags, CVPixelBufferUnlockBaseAddress,
};
use objc2_foundation::{NSArray, NSDictionary, NSError, NSNumber, NSObject, NSObjectProtocol, NSString, ns_string};
use scopeguard::defer;
use std::{
    any::Any,
    borrow::Cow,
    ops::Deref,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
};

/// kCVPixelFormatType_DepthFloat32 ('fdep').
const DEPTH_FLOAT32: u32 = 0x6664_6570;

/// An AVFoundation object handed between threads.
///
/// Capture objects are configured from the session queue only, and
/// AVFoundation allows messaging them from any one thread at a time.
struct Av<T: ?Sized>(Retained<T>);

unsafe impl<T: ?Sized> Send for Av<T> {}
unsafe impl<T: ?Sized> Sync for Av<T> {}

impl<T: ?Sized + Message> Clone for Av<T> {
    fn clone(&self) -> Self {
        Av(self.0.clone())
    }
}

impl<T: ?Sized> Deref for Av<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct NsError(String);

fn ns_error(err: &NSError) -> NsError {
    NsError(err.localizedDescription().to_string())
}

fn media_time(time: CMTime) -> MediaTime {
    MediaTime::new(time.value, time.timescale)
}

fn cm_time(time: MediaTime) -> CMTime {
    CMTime {
        value: time.value,
        timescale: time.timescale,
        flags: CMTimeFlags::Valid,
        epoch: 0,
    }
}

fn av_media_type(media_type: MediaType) -> Option<&'static AVMediaType> {
    unsafe {
        match media_type {
            MediaType::Video => AVMediaTypeVideo,
            MediaType::DepthData => AVMediaTypeDepthData,
        }
    }
}

fn av_device_type(device_type: DeviceType) -> &'static AVCaptureDeviceType {
    unsafe {
        match device_type {
            DeviceType::BuiltInDualCamera => AVCaptureDeviceTypeBuiltInDualCamera,
            DeviceType::BuiltInDualWideCamera => AVCaptureDeviceTypeBuiltInDualWideCamera,
            DeviceType::BuiltInWideAngleCamera => AVCaptureDeviceTypeBuiltInWideAngleCamera,
            DeviceType::BuiltInTrueDepthCamera => AVCaptureDeviceTypeBuiltInTrueDepthCamera,
            DeviceType::BuiltInLiDARDepthCamera => AVCaptureDeviceTypeBuiltInLiDARDepthCamera,
            DeviceType::External => AVCaptureDeviceTypeExternal,
        }
    }
}

fn av_position(position: DevicePosition) -> AVCaptureDevicePosition {
    match position {
        DevicePosition::Unspecified => AVCaptureDevicePosition::Unspecified,
        DevicePosition::Back => AVCaptureDevicePosition::Back,
        DevicePosition::Front => AVCaptureDevicePosition::Front,
    }
}

fn av_preset(preset: SessionPreset) -> &'static AVCaptureSessionPreset {
    unsafe {
        match preset {
            SessionPreset::Photo => AVCaptureSessionPresetPhoto,
            SessionPreset::High => AVCaptureSessionPresetHigh,
            SessionPreset::Medium => AVCaptureSessionPresetMedium,
            SessionPreset::Low => AVCaptureSessionPresetLow,
            SessionPreset::InputPriority => AVCaptureSessionPresetInputPriority,
        }
    }
}

fn drop_reason(reason: AVCaptureOutputDataDroppedReason) -> DropReason {
    if reason == AVCaptureOutputDataDroppedReason::OutOfBuffers {
        DropReason::OutOfBuffers
    } else if reason == AVCaptureOutputDataDroppedReason::Discontinuity {
        DropReason::Discontinuity
    } else {
        DropReason::LateData
    }
}

fn device_info(device: &AVCaptureDevice) -> DeviceInfo {
    unsafe {
        let av_type = device.deviceType();
        let device_type = DeviceType::ALL
            .into_iter()
            .find(|t| &*av_type == av_device_type(*t))
            .unwrap_or(DeviceType::External);
        let position = match device.position() {
            AVCaptureDevicePosition::Back => DevicePosition::Back,
            AVCaptureDevicePosition::Front => DevicePosition::Front,
            _ => DevicePosition::Unspecified,
        };
        DeviceInfo {
            id: device.uniqueID().to_string(),
            name: device.localizedName().to_string(),
            device_type,
            position,
            depth_capable: device.activeFormat().supportedDepthDataFormats().count() > 0,
        }
    }
}

/// Runs `f` over the locked base address of `buffer`, with the buffer's
/// width, height and bytes per row.
fn with_pixels<R>(
    buffer: &CVPixelBuffer,
    f: impl FnOnce(&[u8], usize, usize, usize) -> Option<R>,
) -> Option<R> {
    unsafe {
        if CVPixelBufferLockBaseAddress(buffer, CVPixelBufferLockFlags::ReadOnly) != 0 {
            return None;
        }
        defer! {
            let _ = CVPixelBufferUnlockBaseAddress(buffer, CVPixelBufferLockFlags::ReadOnly);
        }
        let base = CVPixelBufferGetBaseAddress(buffer) as *const u8;
        if base.is_null() {
            return None;
        }
        let bytes = core::slice::from_raw_parts(base, CVPixelBufferGetDataSize(buffer));
        f(
            bytes,
            CVPixelBufferGetWidth(buffer),
            CVPixelBufferGetHeight(buffer),
            CVPixelBufferGetBytesPerRow(buffer),
        )
    }
}

/// Strips row padding.
fn packed_rows(bytes: &[u8], height: usize, bytes_per_row: usize, row_len: usize) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(row_len * height);
    for y in 0..height {
        let start = y * bytes_per_row;
        out.extend_from_slice(bytes.get(start..start + row_len)?);
    }
    Some(out)
}

fn copy_video_frame(sample_buffer: &CMSampleBuffer) -> Option<VideoFrame> {
    let timestamp = media_time(unsafe { sample_buffer.presentation_time_stamp() });
    let pixel_buffer = unsafe { CMSampleBuffer::image_buffer(sample_buffer) }?;
    with_pixels(&pixel_buffer, |bytes, width, height, bytes_per_row| {
        let row_len = width * PixelFormat::Bgra8.bytes_per_pixel();
        let data = packed_rows(bytes, height, bytes_per_row, row_len)?;
        Some(VideoFrame::new_bgra(data, width, height, row_len, timestamp))
    })
}

fn copy_depth_frame(depth: &AVDepthData, timestamp: MediaTime) -> Option<DepthFrame> {
    let converted = unsafe { depth.depthDataByConvertingToDepthDataType(DEPTH_FLOAT32) };
    let map = unsafe { converted.depthDataMap() };
    let mut frame = with_pixels(&map, |bytes, width, height, bytes_per_row| {
        let data = packed_rows(bytes, height, bytes_per_row, width * 4)?;
        let samples: Vec<f32> = data
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Some(DepthFrame::from_samples(&samples, width, height, timestamp))
    })?;
    frame.filtered = unsafe { converted.isDepthDataFiltered() };
    Some(frame)
}

struct VideoDelegateVars {
    output: OutputId,
    delegate: Arc<dyn VideoDataDelegate>,
    queue: Arc<SerialQueue>,
}

define_class!(
    #[unsafe(super(NSObject))]
    #[name = "AsimovDepthSyncVideoDelegate"]
    #[ivars = VideoDelegateVars]
    struct VideoDelegateObject;

    unsafe impl NSObjectProtocol for VideoDelegateObject {}

    unsafe impl AVCaptureVideoDataOutputSampleBufferDelegate for VideoDelegateObject {
        #[unsafe(method(captureOutput:didOutputSampleBuffer:fromConnection:))]
        unsafe fn capture_output_did_output_sample_buffer_from_connection(
            &self,
            _capture_output: &AVCaptureOutput,
            sample_buffer: &CMSampleBuffer,
            _connection: &AVCaptureConnection,
        ) {
            let vars = self.ivars();
            let Some(frame) = copy_video_frame(sample_buffer) else {
                trace!(output = %vars.output, "sample buffer without readable pixels");
                return;
            };
            let (output, delegate) = (vars.output, Arc::clone(&vars.delegate));
            let _ = vars
                .queue
                .sync(move || delegate.did_output_video_frame(output, &frame));
        }

        #[unsafe(method(captureOutput:didDropSampleBuffer:fromConnection:))]
        unsafe fn capture_output_did_drop_sample_buffer_from_connection(
            &self,
            _capture_output: &AVCaptureOutput,
            _sample_buffer: &CMSampleBuffer,
            _connection: &AVCaptureConnection,
        ) {
            // The reason rides on a sample attachment; late data is by far the common case.
            let vars = self.ivars();
            let (output, delegate) = (vars.output, Arc::clone(&vars.delegate));
            let _ = vars
                .queue
                .sync(move || delegate.did_drop_video_frame(output, DropReason::LateData));
        }
    }
);

impl VideoDelegateObject {
    fn new(vars: VideoDelegateVars) -> Retained<Self> {
        let this = Self::alloc().set_ivars(vars);
        unsafe { msg_send![super(this), init] }
    }
}

struct DepthDelegateVars {
    output: OutputId,
    delegate: Arc<dyn DepthDataDelegate>,
    queue: Arc<SerialQueue>,
}

define_class!(
    #[unsafe(super(NSObject))]
    #[name = "AsimovDepthSyncDepthDelegate"]
    #[ivars = DepthDelegateVars]
    struct DepthDelegateObject;

    unsafe impl NSObjectProtocol for DepthDelegateObject {}

    unsafe impl AVCaptureDepthDataOutputDelegate for DepthDelegateObject {
        #[unsafe(method(depthDataOutput:didOutputDepthData:timestamp:connection:))]
        unsafe fn depth_data_output_did_output_depth_data(
            &self,
            _output: &AVCaptureDepthDataOutput,
            depth_data: &AVDepthData,
            timestamp: CMTime,
            _connection: &AVCaptureConnection,
        ) {
            let vars = self.ivars();
            let Some(frame) = copy_depth_frame(depth_data, media_time(timestamp)) else {
                trace!(output = %vars.output, "depth data without readable map");
                return;
            };
            let (output, delegate) = (vars.output, Arc::clone(&vars.delegate));
            let _ = vars
                .queue
                .sync(move || delegate.did_output_depth_data(output, &frame));
        }

        #[unsafe(method(depthDataOutput:didDropDepthData:timestamp:connection:reason:))]
        unsafe fn depth_data_output_did_drop_depth_data(
            &self,
            _output: &AVCaptureDepthDataOutput,
            _depth_data: &AVDepthData,
            _timestamp: CMTime,
            _connection: &AVCaptureConnection,
            reason: AVCaptureOutputDataDroppedReason,
        ) {
            let vars = self.ivars();
            let (output, delegate, reason) =
                (vars.output, Arc::clone(&vars.delegate), drop_reason(reason));
            let _ = vars
                .queue
                .sync(move || delegate.did_drop_depth_data(output, reason));
        }
    }
);

impl DepthDelegateObject {
    fn new(vars: DepthDelegateVars) -> Retained<Self> {
        let this = Self::alloc().set_ivars(vars);
        unsafe { msg_send![super(this), init] }
    }
}

struct SynchronizerDelegateVars {
    outputs: Vec<(OutputId, Av<AVCaptureOutput>)>,
    delegate: Arc<dyn SynchronizedDataDelegate>,
    queue: Arc<SerialQueue>,
}

impl SynchronizerDelegateVars {
    fn collect(&self, collection: &AVCaptureSynchronizedDataCollection) -> SynchronizedDataCollection {
        let mut bundle = SynchronizedDataCollection::new();
        for (id, output) in &self.outputs {
            let Some(data) = (unsafe { collection.synchronizedDataForCaptureOutput(output) }) else {
                continue;
            };
            let timestamp = media_time(unsafe { data.timestamp() });
            let slot = match data.downcast::<AVCaptureSynchronizedDepthData>() {
                Ok(depth) => SynchronizedData::Depth(synchronized_depth(&depth, timestamp)),
                Err(data) => match data.downcast::<AVCaptureSynchronizedSampleBufferData>() {
                    Ok(buffer) => {
                        SynchronizedData::SampleBuffer(synchronized_buffer(&buffer, timestamp))
                    },
                    Err(_) => continue,
                },
            };
            bundle.insert(*id, slot);
        }
        bundle
    }
}

fn synchronized_depth(
    data: &AVCaptureSynchronizedDepthData,
    timestamp: MediaTime,
) -> SynchronizedDepthData {
    unsafe {
        if data.depthDataWasDropped() {
            return SynchronizedDepthData::dropped(timestamp, drop_reason(data.droppedReason()));
        }
        match copy_depth_frame(&data.depthData(), timestamp) {
            Some(frame) => SynchronizedDepthData::delivered(frame),
            None => {
                warn!(%timestamp, "unreadable depth map in synchronized bundle");
                SynchronizedDepthData::dropped(timestamp, DropReason::LateData)
            },
        }
    }
}

fn synchronized_buffer(
    data: &AVCaptureSynchronizedSampleBufferData,
    timestamp: MediaTime,
) -> SynchronizedSampleBufferData {
    unsafe {
        if data.sampleBufferWasDropped() {
            return SynchronizedSampleBufferData::dropped(
                timestamp,
                drop_reason(data.droppedReason()),
            );
        }
        match copy_video_frame(&data.sampleBuffer()) {
            Some(frame) => SynchronizedSampleBufferData::delivered(frame),
            None => {
                warn!(%timestamp, "unreadable sample buffer in synchronized bundle");
                SynchronizedSampleBufferData::dropped(timestamp, DropReason::LateData)
            },
        }
    }
}

define_class!(
    #[unsafe(super(NSObject))]
    #[name = "AsimovDepthSyncSynchronizerDelegate"]
    #[ivars = SynchronizerDelegateVars]
    struct SynchronizerDelegateObject;

    unsafe impl NSObjectProtocol for SynchronizerDelegateObject {}

    unsafe impl AVCaptureDataOutputSynchronizerDelegate for SynchronizerDelegateObject {
        #[unsafe(method(dataOutputSynchronizer:didOutputSynchronizedDataCollection:))]
        unsafe fn data_output_synchronizer_did_output_synchronized_data_collection(
            &self,
            _synchronizer: &AVCaptureDataOutputSynchronizer,
            collection: &AVCaptureSynchronizedDataCollection,
        ) {
            let vars = self.ivars();
            let bundle = vars.collect(collection);
            let delegate = Arc::clone(&vars.delegate);
            let _ = vars
                .queue
                .sync(move || delegate.did_output_synchronized_data(&bundle));
        }
    }
);

impl SynchronizerDelegateObject {
    fn new(vars: SynchronizerDelegateVars) -> Retained<Self> {
        let this = Self::alloc().set_ivars(vars);
        unsafe { msg_send![super(this), init] }
    }
}

/// The AVFoundation camera stack.
pub struct AvfPlatform {
    next_id: AtomicU32,
    callbacks: DispatchRetained<DispatchQueue>,
}

impl AvfPlatform {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(0),
            callbacks: DispatchQueue::new("asimov.depth-sync.avf", None),
        }
    }

    fn next_output_id(&self) -> OutputId {
        OutputId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

impl Default for AvfPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for AvfPlatform {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AvfPlatform").finish_non_exhaustive()
    }
}

impl dogma::Named for AvfPlatform {
    fn name(&self) -> Cow<'_, str> {
        "avf".into()
    }
}

impl CapturePlatform for AvfPlatform {
    fn authorization_status(&self, media_type: MediaType) -> AuthorizationStatus {
        let Some(media_type) = av_media_type(media_type) else {
            return AuthorizationStatus::Restricted;
        };
        match unsafe { AVCaptureDevice::authorizationStatusForMediaType(media_type) } {
            AVAuthorizationStatus::Authorized => AuthorizationStatus::Authorized,
            AVAuthorizationStatus::Denied => AuthorizationStatus::Denied,
            AVAuthorizationStatus::Restricted => AuthorizationStatus::Restricted,
            _ => AuthorizationStatus::NotDetermined,
        }
    }

    fn request_access(&self, media_type: MediaType, completion: AccessCompletion) {
        let Some(av_type) = av_media_type(media_type) else {
            warn!(%media_type, "media type unknown to AVFoundation");
            return completion(false);
        };
        let completion = Mutex::new(Some(completion));
        let handler = RcBlock::new(move |granted: Bool| {
            let taken = completion.lock().ok().and_then(|mut c| c.take());
            if let Some(completion) = taken {
                completion(granted.as_bool());
            }
        });
        unsafe { AVCaptureDevice::requestAccessForMediaType_completionHandler(av_type, &handler) };
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>, CameraError> {
        let types: Vec<&AVCaptureDeviceType> =
            DeviceType::ALL.into_iter().map(av_device_type).collect();
        let types = NSArray::from_slice(&types);
        let discovery = unsafe {
            AVCaptureDeviceDiscoverySession::discoverySessionWithDeviceTypes_mediaType_position(
                &types,
                AVMediaTypeVideo,
                AVCaptureDevicePosition::Unspecified,
            )
        };
        Ok(unsafe { discovery.devices() }
            .iter()
            .map(|device| device_info(&device))
            .collect())
    }

    fn default_device(
        &self,
        device_type: DeviceType,
        media_type: MediaType,
        position: DevicePosition,
    ) -> Option<SharedDevice> {
        let device = unsafe {
            AVCaptureDevice::defaultDeviceWithDeviceType_mediaType_position(
                av_device_type(device_type),
                Some(av_media_type(media_type)?),
                av_position(position),
            )
        }?;
        let info = device_info(&device);
        Some(Arc::new(AvfDevice {
            av: Av(device),
            info,
        }))
    }

    fn device_input(&self, device: &SharedDevice) -> Result<DeviceInput, CameraError> {
        let Some(avf) = device.as_any().downcast_ref::<AvfDevice>() else {
            return Err(CameraError::unsupported("device belongs to another platform"));
        };
        let input = unsafe { AVCaptureDeviceInput::deviceInputWithDevice_error(&avf.av) }
            .map_err(|err| CameraError::driver("creating device input", ns_error(&err)))?;
        Ok(DeviceInput::new(Arc::clone(device)).with_native(Av(input)))
    }

    fn new_session(&self) -> Box<dyn CaptureSession> {
        Box::new(AvfSession {
            av: Av(unsafe { AVCaptureSession::new() }),
            configuring: false,
            outputs: Vec::new(),
        })
    }

    fn video_data_output(&self) -> Box<dyn VideoDataOutput> {
        let av = unsafe { AVCaptureVideoDataOutput::new() };
        unsafe { av.setAlwaysDiscardsLateVideoFrames(true) };
        Box::new(AvfVideoOutput {
            id: self.next_output_id(),
            av: Av(av),
            pixel_format: PixelFormat::Bgra8,
            callbacks: self.callbacks.clone(),
            delegate: None,
        })
    }

    fn photo_output(&self) -> Box<dyn PhotoOutput> {
        Box::new(AvfPhotoOutput {
            id: self.next_output_id(),
            av: Av(unsafe { AVCapturePhotoOutput::new() }),
        })
    }

    fn depth_data_output(&self) -> Box<dyn DepthDataOutput> {
        let av = unsafe { AVCaptureDepthDataOutput::new() };
        unsafe { av.setAlwaysDiscardsLateDepthData(true) };
        Box::new(AvfDepthOutput {
            id: self.next_output_id(),
            av: Av(av),
            callbacks: self.callbacks.clone(),
            delegate: None,
        })
    }

    fn data_output_synchronizer(
        &self,
        outputs: &[&dyn CaptureOutput],
    ) -> Box<dyn DataOutputSynchronizer> {
        let natives: Vec<(OutputId, Av<AVCaptureOutput>)> = outputs
            .iter()
            .filter_map(|o| Some((o.id(), Av(native_output(*o)?.retain()))))
            .collect();
        let refs: Vec<&AVCaptureOutput> = natives.iter().map(|(_, o)| &**o).collect();
        let array = NSArray::from_slice(&refs);
        let av = unsafe {
            AVCaptureDataOutputSynchronizer::initWithDataOutputs(
                AVCaptureDataOutputSynchronizer::alloc(),
                &array,
            )
        };
        Box::new(AvfSynchronizer {
            av: Av(av),
            outputs: natives,
            callbacks: self.callbacks.clone(),
            delegate: None,
        })
    }
}

struct AvfDevice {
    av: Av<AVCaptureDevice>,
    info: DeviceInfo,
}

impl CaptureDevice for AvfDevice {
    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn active_depth_min_frame_duration(&self) -> Option<MediaTime> {
        unsafe {
            let format = self.av.activeDepthDataFormat()?;
            let range = format.videoSupportedFrameRateRanges().firstObject()?;
            Some(media_time(range.minFrameDuration()))
        }
    }

    fn active_video_min_frame_duration(&self) -> MediaTime {
        media_time(unsafe { self.av.activeVideoMinFrameDuration() })
    }

    fn lock_for_configuration(&self) -> Result<(), CameraError> {
        unsafe { self.av.lockForConfiguration() }
            .map_err(|err| CameraError::driver("locking device for configuration", ns_error(&err)))
    }

    fn set_active_video_min_frame_duration(&self, duration: MediaTime) {
        unsafe { self.av.setActiveVideoMinFrameDuration(cm_time(duration)) };
    }

    fn unlock_for_configuration(&self) {
        unsafe { self.av.unlockForConfiguration() };
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn native_output(output: &dyn CaptureOutput) -> Option<&AVCaptureOutput> {
    let any = output.as_any();
    if let Some(o) = any.downcast_ref::<AvfVideoOutput>() {
        return Some(o.av_output());
    }
    if let Some(o) = any.downcast_ref::<AvfPhotoOutput>() {
        return Some(o.av_output());
    }
    if let Some(o) = any.downcast_ref::<AvfDepthOutput>() {
        return Some(o.av_output());
    }
    None
}

struct AvfSession {
    av: Av<AVCaptureSession>,
    configuring: bool,
    outputs: Vec<OutputId>,
}

impl CaptureSession for AvfSession {
    fn begin_configuration(&mut self) {
        unsafe { self.av.beginConfiguration() };
        self.configuring = true;
    }

    fn commit_configuration(&mut self) {
        unsafe { self.av.commitConfiguration() };
        self.configuring = false;
    }

    fn is_configuring(&self) -> bool {
        self.configuring
    }

    fn set_preset(&mut self, preset: SessionPreset) {
        let av = av_preset(preset);
        if unsafe { self.av.canSetSessionPreset(av) } {
            unsafe { self.av.setSessionPreset(av) };
        } else {
            warn!(?preset, "session preset not supported, keeping the current one");
        }
    }

    fn can_add_input(&self, input: &DeviceInput) -> bool {
        input
            .native::<Av<AVCaptureDeviceInput>>()
            .is_some_and(|native| unsafe { self.av.canAddInput(native) })
    }

    fn add_input(&mut self, input: DeviceInput) -> Result<(), CameraError> {
        if !self.configuring {
            return Err(CameraError::NotConfiguring);
        }
        let Some(native) = input.native::<Av<AVCaptureDeviceInput>>() else {
            return Err(CameraError::unsupported("input belongs to another platform"));
        };
        if !unsafe { self.av.canAddInput(native) } {
            return Err(CameraError::unsupported("input not accepted by session"));
        }
        unsafe { self.av.addInput(native) };
        Ok(())
    }

    fn can_add_output(&self, output: &dyn CaptureOutput) -> bool {
        native_output(output).is_some_and(|native| unsafe { self.av.canAddOutput(native) })
    }

    fn add_output(&mut self, output: &dyn CaptureOutput) -> Result<(), CameraError> {
        if !self.configuring {
            return Err(CameraError::NotConfiguring);
        }
        let Some(native) = native_output(output) else {
            return Err(CameraError::unsupported("output belongs to another platform"));
        };
        if !unsafe { self.av.canAddOutput(native) } {
            return Err(CameraError::unsupported(format!(
                "{} output not accepted by session",
                output.kind()
            )));
        }
        unsafe { self.av.addOutput(native) };
        self.outputs.push(output.id());
        Ok(())
    }

    fn outputs(&self) -> Vec<OutputId> {
        self.outputs.clone()
    }

    fn start_running(&mut self) -> Result<(), CameraError> {
        if unsafe { self.av.inputs() }.count() == 0 {
            return Err(CameraError::NotConfigured);
        }
        unsafe { self.av.startRunning() };
        Ok(())
    }

    fn stop_running(&mut self) {
        unsafe { self.av.stopRunning() };
    }

    fn is_running(&self) -> bool {
        unsafe { self.av.isRunning() }
    }
}

struct AvfVideoOutput {
    id: OutputId,
    av: Av<AVCaptureVideoDataOutput>,
    pixel_format: PixelFormat,
    callbacks: DispatchRetained<DispatchQueue>,
    delegate: Option<Av<VideoDelegateObject>>,
}

impl AvfVideoOutput {
    fn av_output(&self) -> &AVCaptureOutput {
        &self.av
    }
}

impl CaptureOutput for AvfVideoOutput {
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

impl VideoDataOutput for AvfVideoOutput {
    fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn set_pixel_format(&mut self, format: PixelFormat) {
        // kCVPixelBufferPixelFormatTypeKey
        let key = ns_string!("PixelFormatType");
        let value = NSNumber::new_u32(format.four_cc());
        let value: &AnyObject = &value;
        let settings = NSDictionary::<NSString, AnyObject>::from_slices(&[key], &[value]);
        unsafe { self.av.setVideoSettings(Some(&settings)) };
        self.pixel_format = format;
    }

    fn set_sample_buffer_delegate(
        &mut self,
        delegate: Arc<dyn VideoDataDelegate>,
        queue: Arc<SerialQueue>,
    ) {
        let object = VideoDelegateObject::new(VideoDelegateVars {
            output: self.id,
            delegate,
            queue,
        });
        unsafe {
            self.av.setSampleBufferDelegate_queue(
                Some(ProtocolObject::from_ref(&*object)),
                Some(&self.callbacks),
            )
        };
        self.delegate = Some(Av(object));
    }
}

struct AvfPhotoOutput {
    id: OutputId,
    av: Av<AVCapturePhotoOutput>,
}

impl AvfPhotoOutput {
    fn av_output(&self) -> &AVCaptureOutput {
        &self.av
    }
}

impl CaptureOutput for AvfPhotoOutput {
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

impl PhotoOutput for AvfPhotoOutput {
    fn is_high_resolution_capture_enabled(&self) -> bool {
        unsafe { self.av.isHighResolutionCaptureEnabled() }
    }

    fn set_high_resolution_capture_enabled(&mut self, enabled: bool) {
        unsafe { self.av.setHighResolutionCaptureEnabled(enabled) };
    }

    fn is_depth_data_delivery_supported(&self) -> bool {
        unsafe { self.av.isDepthDataDeliverySupported() }
    }

    fn is_depth_data_delivery_enabled(&self) -> bool {
        unsafe { self.av.isDepthDataDeliveryEnabled() }
    }

    fn set_depth_data_delivery_enabled(&mut self, enabled: bool) {
        unsafe { self.av.setDepthDataDeliveryEnabled(enabled) };
    }
}

struct AvfDepthOutput {
    id: OutputId,
    av: Av<AVCaptureDepthDataOutput>,
    callbacks: DispatchRetained<DispatchQueue>,
    delegate: Option<Av<DepthDelegateObject>>,
}

impl AvfDepthOutput {
    fn av_output(&self) -> &AVCaptureOutput {
        &self.av
    }
}

impl CaptureOutput for AvfDepthOutput {
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

impl DepthDataOutput for AvfDepthOutput {
    fn is_filtering_enabled(&self) -> bool {
        unsafe { self.av.isFilteringEnabled() }
    }

    fn set_filtering_enabled(&mut self, enabled: bool) {
        unsafe { self.av.setFilteringEnabled(enabled) };
    }

    fn set_delegate(&mut self, delegate: Arc<dyn DepthDataDelegate>, queue: Arc<SerialQueue>) {
        let object = DepthDelegateObject::new(DepthDelegateVars {
            output: self.id,
            delegate,
            queue,
        });
        unsafe {
            self.av.setDelegate_callbackQueue(
                Some(ProtocolObject::from_ref(&*object)),
                Some(&self.callbacks),
            )
        };
        self.delegate = Some(Av(object));
    }

    fn connection(&self, media_type: MediaType) -> Option<Box<dyn CaptureConnection>> {
        let connection = unsafe { self.av.connectionWithMediaType(av_media_type(media_type)?) }?;
        Some(Box::new(AvfConnection {
            av: Av(connection),
            media_type,
        }))
    }
}

struct AvfConnection {
    av: Av<AVCaptureConnection>,
    media_type: MediaType,
}

impl CaptureConnection for AvfConnection {
    fn media_type(&self) -> MediaType {
        self.media_type
    }

    fn is_enabled(&self) -> bool {
        unsafe { self.av.isEnabled() }
    }

    fn set_enabled(&mut self, enabled: bool) {
        unsafe { self.av.setEnabled(enabled) };
    }
}

struct AvfSynchronizer {
    av: Av<AVCaptureDataOutputSynchronizer>,
    outputs: Vec<(OutputId, Av<AVCaptureOutput>)>,
    callbacks: DispatchRetained<DispatchQueue>,
    delegate: Option<Av<SynchronizerDelegateObject>>,
}

impl DataOutputSynchronizer for AvfSynchronizer {
    fn data_outputs(&self) -> Vec<OutputId> {
        self.outputs.iter().map(|(id, _)| *id).collect()
    }

    fn set_delegate(
        &mut self,
        delegate: Arc<dyn SynchronizedDataDelegate>,
        queue: Arc<SerialQueue>,
    ) {
        let object = SynchronizerDelegateObject::new(SynchronizerDelegateVars {
            outputs: self.outputs.clone(),
            delegate,
            queue,
        });
        unsafe {
            self.av.setDelegate_queue(
                Some(ProtocolObject::from_ref(&*object)),
                Some(&self.callbacks),
            )
        };
        self.delegate = Some(Av(object));
    }
}
