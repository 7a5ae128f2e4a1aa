// This is free and unencumbered software released into the public domain.

#![cfg(feature = "simulated")]

use asimov_depth_sync_module::shared::{
    AbortReason, AuthorizationStatus, BundleReport, CameraError, ConfigurationError,
    ConfigurationState, ConfiguredSession, DataKind, DevicePosition, DeviceType, DropReason,
    MediaTime, OutputId, OutputKind, SerialQueue, SessionConfig, SessionConfigurator,
    VideoDataDelegate, VideoFrame,
    drivers::simulated::{SessionEvent, SimulatedConfig, SimulatedPlatform},
};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    time::{Duration, Instant},
};

fn platform(config: SimulatedConfig) -> SimulatedPlatform {
    SimulatedPlatform::new(config.with_autorun(false))
}

fn configure(platform: &SimulatedPlatform) -> Result<ConfiguredSession, ConfigurationError> {
    SessionConfigurator::new(Arc::new(platform.clone()), SessionConfig::default())
        .expect("configurator")
        .configure()
}

fn added_outputs(journal: &[SessionEvent]) -> Vec<OutputKind> {
    journal
        .iter()
        .filter_map(|e| match e {
            SessionEvent::AddOutput(kind, _) => Some(*kind),
            _ => None,
        })
        .collect()
}

fn assert_nothing_added_after_commit(journal: &[SessionEvent]) {
    let Some(commit) = journal
        .iter()
        .position(|e| *e == SessionEvent::CommitConfiguration)
    else {
        return;
    };
    let begin = journal
        .iter()
        .position(|e| *e == SessionEvent::BeginConfiguration)
        .expect("begin before commit");
    assert!(begin < commit);
    for (i, event) in journal.iter().enumerate() {
        if matches!(event, SessionEvent::AddInput(_) | SessionEvent::AddOutput(..)) {
            assert!(i > begin && i < commit, "{event:?} outside the configuration block");
        }
    }
}

#[test]
fn authorized_device_with_depth_connection_is_ready() {
    let platform = platform(SimulatedConfig::default());
    let ready = configure(&platform).expect("ready");

    assert!(ready.depth_visualization_enabled());
    assert!(ready.depth_data_delivery_enabled());
    assert!(ready.photo_output().is_high_resolution_capture_enabled());
    assert!(!ready.depth_output().is_filtering_enabled());

    let synchronizer = ready.synchronizer().expect("synchronizer");
    assert_eq!(
        synchronizer.data_outputs(),
        vec![
            ready.output_id(OutputKind::Video),
            ready.output_id(OutputKind::Depth)
        ]
    );

    let journal = platform.journal();
    assert_eq!(
        added_outputs(&journal),
        vec![OutputKind::Video, OutputKind::Photo, OutputKind::Depth]
    );
    assert!(journal.contains(&SessionEvent::PhotoDepthDelivery(true)));
    assert!(journal.contains(&SessionEvent::DepthFiltering(false)));
    assert!(journal.contains(&SessionEvent::VideoFrameDuration(MediaTime::from_fps(24))));
    assert_eq!(journal.last(), Some(&SessionEvent::CommitConfiguration));
    assert_nothing_added_after_commit(&journal);

    assert_eq!(
        ready.device().active_video_min_frame_duration(),
        MediaTime::from_fps(24)
    );
    // The configuration lock was released.
    ready.device().lock_for_configuration().expect("lock released");
    ready.device().unlock_for_configuration();
}

#[test]
fn denied_authorization_creates_no_session() {
    for status in [AuthorizationStatus::Denied, AuthorizationStatus::Restricted] {
        let platform = platform(SimulatedConfig::default().with_authorization(status));
        let err = configure(&platform).expect_err("denied");

        assert!(matches!(err, ConfigurationError::PermissionDenied { status: s } if s == status));
        assert_eq!(platform.sessions_created(), 0);
        assert!(platform.journal().is_empty());
    }
}

#[test]
fn undetermined_authorization_is_requested_before_configuring() {
    let platform = platform(
        SimulatedConfig::default().with_authorization(AuthorizationStatus::NotDetermined),
    );
    configure(&platform).expect("granted");

    let journal = platform.journal();
    assert_eq!(journal.first(), Some(&SessionEvent::AccessRequested));
    assert_eq!(journal.get(1), Some(&SessionEvent::SessionCreated));
}

#[test]
fn refused_request_aborts() {
    let platform = platform(
        SimulatedConfig::default()
            .with_authorization(AuthorizationStatus::NotDetermined)
            .with_access_answer(Some(false)),
    );
    let err = configure(&platform).expect_err("refused");
    assert!(matches!(
        err,
        ConfigurationError::PermissionDenied {
            status: AuthorizationStatus::Denied
        }
    ));
    assert_eq!(platform.sessions_created(), 0);
}

#[test]
fn missing_device_is_unavailable() {
    let platform = platform(SimulatedConfig::default());
    let config = SessionConfig::new(DeviceType::BuiltInDualCamera, DevicePosition::Front);
    let err = SessionConfigurator::new(Arc::new(platform.clone()), config)
        .expect("configurator")
        .configure()
        .expect_err("no front dual camera");

    assert!(matches!(
        err,
        ConfigurationError::DeviceUnavailable {
            device_type: DeviceType::BuiltInDualCamera,
            position: DevicePosition::Front,
        }
    ));
    assert_eq!(platform.sessions_created(), 0);
}

#[test]
fn input_creation_failure_is_fatal() {
    let platform = platform(SimulatedConfig::default().with_input_error(true));
    let err = configure(&platform).expect_err("input error");

    assert!(err.is_fatal());
    assert!(matches!(
        err,
        ConfigurationError::InputCreationFailed(CameraError::DriverError { .. })
    ));
    assert_eq!(platform.sessions_created(), 0);
}

#[test]
fn rejected_input_closes_the_block() {
    let platform = platform(SimulatedConfig::default().with_input_rejected(true));
    let err = configure(&platform).expect_err("input rejected");

    assert!(matches!(err, ConfigurationError::InputRejected));
    let journal = platform.journal();
    assert!(added_outputs(&journal).is_empty());
    assert_eq!(journal.last(), Some(&SessionEvent::CommitConfiguration));
}

#[test]
fn rejected_video_output_skips_photo_and_depth() {
    let platform = platform(SimulatedConfig::default().with_output_rejected(OutputKind::Video));
    let err = configure(&platform).expect_err("video rejected");

    assert!(matches!(err, ConfigurationError::OutputRejected(OutputKind::Video)));
    assert_eq!(err.reason(), AbortReason::OutputRejected(OutputKind::Video));

    let journal = platform.journal();
    assert!(added_outputs(&journal).is_empty());
    assert!(!journal.iter().any(|e| matches!(
        e,
        SessionEvent::HighResolutionCapture(_)
            | SessionEvent::PhotoDepthDelivery(_)
            | SessionEvent::DepthFiltering(_)
            | SessionEvent::ConnectionEnabled(..)
            | SessionEvent::SynchronizerCreated(_)
            | SessionEvent::VideoFrameDuration(_)
    )));
    assert_eq!(journal.last(), Some(&SessionEvent::CommitConfiguration));
}

#[test]
fn rejected_depth_output_names_depth() {
    let platform = platform(SimulatedConfig::default().with_output_rejected(OutputKind::Depth));
    let err = configure(&platform).expect_err("depth rejected");

    assert!(matches!(err, ConfigurationError::OutputRejected(OutputKind::Depth)));
    assert_eq!(
        added_outputs(&platform.journal()),
        vec![OutputKind::Video, OutputKind::Photo]
    );
}

#[test]
fn rejected_photo_output_stops_before_depth() {
    let platform = platform(SimulatedConfig::default().with_output_rejected(OutputKind::Photo));
    let err = configure(&platform).expect_err("photo rejected");

    assert!(matches!(err, ConfigurationError::OutputRejected(OutputKind::Photo)));

    let journal = platform.journal();
    assert_eq!(added_outputs(&journal), vec![OutputKind::Video]);
    assert!(!journal.iter().any(|e| matches!(e, SessionEvent::DepthFiltering(_))));
    assert_eq!(journal.last(), Some(&SessionEvent::CommitConfiguration));
    assert_nothing_added_after_commit(&journal);
}

#[test]
fn missing_depth_connection_disables_visualization_only() {
    let platform = platform(SimulatedConfig::default().with_depth_connection(false));
    let ready = configure(&platform).expect("ready without depth connection");

    assert!(!ready.depth_visualization_enabled());
    assert!(ready.synchronizer().is_none());
    assert!(ready.depth_data_delivery_enabled());

    let journal = platform.journal();
    assert!(!journal.iter().any(|e| matches!(e, SessionEvent::SynchronizerCreated(_))));
    assert!(journal.contains(&SessionEvent::VideoFrameDuration(MediaTime::from_fps(24))));
}

#[test]
fn visualization_does_not_depend_on_photo_depth_delivery() {
    let platform = platform(SimulatedConfig::default().with_depth_delivery_supported(false));
    let ready = configure(&platform).expect("ready");

    assert!(ready.depth_visualization_enabled());
    assert!(ready.synchronizer().is_some());
    assert!(!ready.depth_data_delivery_enabled());
    assert!(!ready.photo_output().is_depth_data_delivery_enabled());

    let journal = platform.journal();
    assert!(!journal.iter().any(|e| matches!(e, SessionEvent::VideoFrameDuration(_))));
    assert_eq!(
        ready.device().active_video_min_frame_duration(),
        MediaTime::from_fps(30)
    );
}

#[test]
fn lock_failure_aborts_after_closing_the_block() {
    let platform = platform(SimulatedConfig::default().with_lock_failure(true));
    let err = configure(&platform).expect_err("lock failure");

    assert!(err.is_fatal());
    assert!(matches!(
        err,
        ConfigurationError::DeviceLockFailed(CameraError::DeviceLocked)
    ));

    let journal = platform.journal();
    assert_eq!(journal.last(), Some(&SessionEvent::CommitConfiguration));
    assert_nothing_added_after_commit(&journal);
}

#[test]
fn no_output_is_ever_added_after_commit() {
    let configs = [
        SimulatedConfig::default(),
        SimulatedConfig::default().with_output_rejected(OutputKind::Photo),
        SimulatedConfig::default().with_depth_connection(false),
        SimulatedConfig::default().with_lock_failure(true),
        SimulatedConfig::default().with_input_rejected(true),
    ];
    for config in configs {
        let platform = platform(config);
        let _ = configure(&platform);
        assert_nothing_added_after_commit(&platform.journal());
    }
}

#[test]
fn spawned_pass_waits_for_the_access_answer() {
    let platform = platform(
        SimulatedConfig::default()
            .with_authorization(AuthorizationStatus::NotDetermined)
            .with_access_answer(None),
    );
    let session_queue = Arc::new(SerialQueue::new("session queue").expect("queue"));

    let handle = SessionConfigurator::new(Arc::new(platform.clone()), SessionConfig::default())
        .expect("configurator")
        .spawn(&session_queue);

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(handle.state(), ConfigurationState::Unconfigured);
    assert!(session_queue.is_suspended());
    assert_eq!(platform.sessions_created(), 0);

    assert_eq!(platform.answer_access(true), 1);
    let ready = handle.wait().expect("ready");
    assert!(ready.depth_visualization_enabled());
    assert!(!session_queue.is_suspended());
}

#[test]
fn spawned_pass_is_configuring_between_answer_and_result() {
    let (begun_tx, begun_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let begun_tx = Mutex::new(begun_tx);
    let release_rx = Mutex::new(release_rx);

    let platform = platform(
        SimulatedConfig::default()
            .with_authorization(AuthorizationStatus::NotDetermined)
            .with_access_answer(None)
            .with_observer(move |event| {
                if *event == SessionEvent::BeginConfiguration {
                    let _ = begun_tx.lock().unwrap().send(());
                    let _ = release_rx
                        .lock()
                        .unwrap()
                        .recv_timeout(Duration::from_secs(5));
                }
            }),
    );
    let session_queue = Arc::new(SerialQueue::new("session queue").expect("queue"));

    let handle = SessionConfigurator::new(Arc::new(platform.clone()), SessionConfig::default())
        .expect("configurator")
        .spawn(&session_queue);
    assert_eq!(handle.state(), ConfigurationState::Unconfigured);

    platform.answer_access(true);
    begun_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("configuration block opened");
    assert_eq!(handle.state(), ConfigurationState::Configuring);
    assert!(!handle.state().is_terminal());

    release_tx.send(()).expect("release");
    session_queue.sync(|| ()).expect("drain session queue");
    assert_eq!(handle.state(), ConfigurationState::Ready);
    assert!(handle.wait().is_ok());
}

#[test]
fn spawned_pass_reports_aborted_state() {
    let platform = platform(
        SimulatedConfig::default()
            .with_authorization(AuthorizationStatus::NotDetermined)
            .with_access_answer(None),
    );
    let session_queue = Arc::new(SerialQueue::new("session queue").expect("queue"));

    let handle = SessionConfigurator::new(Arc::new(platform.clone()), SessionConfig::default())
        .expect("configurator")
        .spawn(&session_queue);
    platform.answer_access(false);

    session_queue.sync(|| ()).expect("drain session queue");
    assert_eq!(
        handle.state(),
        ConfigurationState::Aborted(AbortReason::PermissionDenied)
    );
    assert!(handle.state().is_terminal());
    assert!(matches!(
        handle.wait(),
        Err(ConfigurationError::PermissionDenied { .. })
    ));
}

#[test]
fn bundles_are_classified_on_the_data_queue() {
    let platform = platform(SimulatedConfig::default().with_drop_depth_every(Some(2)));
    let reports: Arc<Mutex<Vec<(BundleReport, bool)>>> = Arc::new(Mutex::new(Vec::new()));

    let configurator =
        SessionConfigurator::new(Arc::new(platform.clone()), SessionConfig::default())
            .expect("configurator");
    let data_queue = Arc::clone(configurator.data_queue());
    let reports2 = Arc::clone(&reports);
    let queue2 = Arc::clone(&data_queue);
    let mut ready = configurator
        .with_bundle_sink(Arc::new(move |report: &BundleReport| {
            reports2
                .lock()
                .unwrap()
                .push((report.clone(), queue2.is_current()));
        }))
        .configure()
        .expect("ready");

    ready.start_running().expect("start");
    for _ in 0..4 {
        platform.tick(MediaTime::from_fps(24));
    }
    data_queue.sync(|| ()).expect("drain data queue");

    let video = ready.output_id(OutputKind::Video);
    let depth = ready.output_id(OutputKind::Depth);
    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 4);

    for (i, (report, on_queue)) in reports.iter().enumerate() {
        assert!(*on_queue);
        assert_eq!(report.count(), 2);

        let v = report.frame(video).expect("video slot");
        assert_eq!(v.kind, DataKind::Buffer);
        assert!(!v.dropped);

        let d = report.frame(depth).expect("depth slot");
        assert_eq!(d.kind, DataKind::Depth);
        assert_eq!(d.timestamp, v.timestamp);
        assert_eq!(d.dropped, i % 2 == 1);
        if d.dropped {
            assert_eq!(d.dropped_reason, Some(DropReason::LateData));
        }
    }
}

struct CountingVideo(AtomicUsize);

impl VideoDataDelegate for CountingVideo {
    fn did_output_video_frame(&self, _output: OutputId, frame: &VideoFrame) {
        assert_eq!(frame.data.len(), frame.stride * frame.height);
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn unsynchronized_video_reaches_its_own_delegate() {
    let platform = platform(SimulatedConfig::default().with_depth_connection(false));
    let counter = Arc::new(CountingVideo(AtomicUsize::new(0)));
    let bundles = Arc::new(AtomicUsize::new(0));
    let bundles2 = Arc::clone(&bundles);

    let configurator =
        SessionConfigurator::new(Arc::new(platform.clone()), SessionConfig::default())
            .expect("configurator")
            .with_video_delegate(counter.clone())
            .with_bundle_sink(Arc::new(move |_: &BundleReport| {
                bundles2.fetch_add(1, Ordering::SeqCst);
            }));
    let data_queue = Arc::clone(configurator.data_queue());
    let mut ready = configurator.configure().expect("ready");

    ready.start_running().expect("start");
    platform.tick(MediaTime::from_fps(24));
    platform.tick(MediaTime::from_fps(24));
    data_queue.sync(|| ()).expect("drain");

    assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    assert_eq!(bundles.load(Ordering::SeqCst), 0);
}

#[test]
fn dropping_a_running_session_stops_it() {
    let platform = platform(SimulatedConfig::default());
    let mut ready = configure(&platform).expect("ready");
    ready.start_running().expect("start");
    assert!(ready.is_running());
    drop(ready);

    assert_eq!(platform.journal().last(), Some(&SessionEvent::StopRunning));
}

#[test]
fn running_session_generates_bundles_on_its_own() {
    let platform = SimulatedPlatform::new(SimulatedConfig::default());
    let bundles = Arc::new(AtomicUsize::new(0));
    let bundles2 = Arc::clone(&bundles);

    let mut ready = SessionConfigurator::new(Arc::new(platform.clone()), SessionConfig::default())
        .expect("configurator")
        .with_bundle_sink(Arc::new(move |_: &BundleReport| {
            bundles2.fetch_add(1, Ordering::SeqCst);
        }))
        .configure()
        .expect("ready");

    ready.start_running().expect("start");
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while bundles.load(Ordering::SeqCst) < 3 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    ready.stop_running();

    assert!(bundles.load(Ordering::SeqCst) >= 3);
    assert!(platform.ticks() >= 3);
}

#[test]
fn slow_consumer_holds_capture_back_instead_of_queueing() {
    let platform = SimulatedPlatform::new(SimulatedConfig::default());
    let reports: Arc<Mutex<Vec<BundleReport>>> = Arc::new(Mutex::new(Vec::new()));
    let reports2 = Arc::clone(&reports);

    let mut ready = SessionConfigurator::new(Arc::new(platform.clone()), SessionConfig::default())
        .expect("configurator")
        .with_bundle_sink(Arc::new(move |report: &BundleReport| {
            std::thread::sleep(Duration::from_millis(100));
            reports2.lock().unwrap().push(report.clone());
        }))
        .configure()
        .expect("ready");

    ready.start_running().expect("start");
    std::thread::sleep(Duration::from_millis(700));

    let stopping = Instant::now();
    ready.stop_running();
    assert!(stopping.elapsed() < Duration::from_millis(500));
    let at_stop = reports.lock().unwrap().len();

    ready.data_queue().sync(|| ()).expect("drain data queue");
    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), at_stop, "bundles were queued behind the sink");
    assert!((2..=8).contains(&at_stop), "{at_stop} bundles in 700ms");
    assert!(platform.ticks() > at_stop as u64);

    assert!(
        reports.iter().skip(1).all(|r| r
            .frames
            .iter()
            .all(|f| f.dropped && f.dropped_reason == Some(DropReason::LateData))),
        "frames the sink was too slow for are reported as late"
    );
}
