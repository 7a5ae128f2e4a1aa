// This is free and unencumbered software released into the public domain.

#[cfg(not(feature = "std"))]
compile_error!("asimov-depth-reader requires the 'std' feature");

use asimov_depth_sync_module::{
    cli,
    shared::{
        BundleReport, BundleSink, CameraError, ConfigurationError, DevicePosition, DeviceType,
        SerialQueue, SessionConfig, SessionConfigurator, open_platform,
    },
};
use asimov_module::SysexitsError::{self, *};
use clap::Parser;
use clientele::StandardOptions;
use derive_more::From;
use std::{
    error::Error as StdError,
    io::{self, Write},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

#[derive(Debug, Parser)]
struct Options {
    #[clap(flatten)]
    flags: StandardOptions,

    /// Capture platform (`avf`, `simulated`); the first available by default.
    #[arg(long, default_value = "")]
    platform: String,

    #[arg(long, default_value = "dual")]
    device_type: DeviceType,

    #[arg(long, default_value = "back")]
    position: DevicePosition,

    /// Stop after this many bundle reports.
    #[arg(short = 'n', long)]
    bundles: Option<u64>,

    /// Print at most this many bundle reports per second.
    #[arg(long, value_parser = parse_fps)]
    fps: Option<f64>,

    #[arg(
        value_name = "FORMAT",
        short = 'o',
        long = "output",
        value_enum,
        default_value = "text"
    )]
    output: OutputFormat,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Jsonl,
}

#[derive(Debug, From)]
enum Failure {
    Camera(CameraError),
    Configuration(ConfigurationError),
}

pub fn main() -> Result<SysexitsError, Box<dyn StdError>> {
    asimov_module::dotenv().ok();
    let args = asimov_module::args_os()?;
    let options = Options::parse_from(args);

    if options.flags.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(EX_OK);
    }

    if options.flags.license {
        print!("{}", include_str!("../../UNLICENSE"));
        return Ok(EX_OK);
    }

    #[cfg(feature = "tracing")]
    asimov_module::init_tracing_subscriber(&options.flags).expect("failed to initialize logging");

    let exit_code = match run_reader(&options) {
        Ok(()) => EX_OK,
        Err(Failure::Camera(err)) => cli::handle_error(&err, &options.flags),
        Err(Failure::Configuration(err)) => cli::handle_configuration_error(&err, &options.flags),
    };

    Ok(exit_code)
}

fn run_reader(opts: &Options) -> Result<(), Failure> {
    let quit = Arc::new(AtomicBool::new(false));
    {
        let quit2 = Arc::clone(&quit);
        ctrlc::set_handler(move || {
            quit2.store(true, Ordering::SeqCst);
        })
        .map_err(|e| CameraError::other(format!("{e}")))?;
    }

    let platform = open_platform(&opts.platform)?;
    cli::info_user(
        &opts.flags,
        &format!(
            "configuring {} {} camera on the {} platform",
            opts.position,
            opts.device_type,
            platform.name()
        ),
    );

    let config = SessionConfig::new(opts.device_type, opts.position)
        .with_diagnostics(opts.flags.debug || opts.flags.verbose >= 3);
    let session_queue = Arc::new(SerialQueue::new(config.session_queue_label.clone())?);

    let sink = report_sink(opts, Arc::clone(&quit));
    let handle = SessionConfigurator::new(platform, config)?
        .with_bundle_sink(sink)
        .spawn(&session_queue);

    let mut session = handle.wait()?;
    let depth_visualization = session.depth_visualization_enabled();
    if !bundle_limit_reachable(opts.bundles, depth_visualization) {
        return Err(
            CameraError::unsupported("no depth connection, so no bundle can be reported").into(),
        );
    }
    if !depth_visualization {
        cli::warn_user(
            &opts.flags,
            "no depth connection; bundles will not be reported",
        );
    }
    session.start_running()?;

    while !quit.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(50));
    }

    session.stop_running();
    session.data_queue().sync(|| ())?;
    session_queue.stop();
    Ok(())
}

fn report_sink(opts: &Options, quit: Arc<AtomicBool>) -> BundleSink {
    let limit = opts.bundles;
    let output = opts.output;
    let min_interval = opts.fps.map(|fps| Duration::from_secs_f64(1.0 / fps));
    let last_emit: Mutex<Option<Instant>> = Mutex::new(None);
    let emitted = AtomicU64::new(0);

    Arc::new(move |report: &BundleReport| {
        if quit.load(Ordering::SeqCst) {
            return;
        }

        if let Some(min_interval) = min_interval {
            let mut last = last_emit.lock().unwrap_or_else(|p| p.into_inner());
            let now = Instant::now();
            if last.is_some_and(|t| now.duration_since(t) < min_interval) {
                return;
            }
            *last = Some(now);
        }

        let n = emitted.fetch_add(1, Ordering::SeqCst) + 1;
        let line = match output {
            OutputFormat::Text => format_text(n, report),
            OutputFormat::Jsonl => report.to_json().to_string(),
        };

        let mut out = io::stdout().lock();
        if let Err(err) = writeln!(&mut out, "{line}") {
            if err.kind() == io::ErrorKind::BrokenPipe {
                quit.store(true, Ordering::SeqCst);
            }
        }

        if limit.is_some_and(|limit| n >= limit) {
            quit.store(true, Ordering::SeqCst);
        }
    })
}

fn format_text(n: u64, report: &BundleReport) -> String {
    let frames: Vec<String> = report
        .frames
        .iter()
        .map(|f| match f.dropped_reason {
            Some(reason) if f.dropped => format!(
                "{} {} {:.6} dropped ({reason})",
                f.output,
                f.kind,
                f.timestamp.as_secs_f64()
            ),
            _ if f.dropped => format!(
                "{} {} {:.6} dropped",
                f.output,
                f.kind,
                f.timestamp.as_secs_f64()
            ),
            _ => format!("{} {} {:.6}", f.output, f.kind, f.timestamp.as_secs_f64()),
        })
        .collect();
    format!("bundle {n}: {} | {}", report.count(), frames.join(" | "))
}

/// Without a depth connection nothing reaches the bundle sink, so a
/// `--bundles` limit is never met.
fn bundle_limit_reachable(limit: Option<u64>, depth_visualization: bool) -> bool {
    depth_visualization || limit.is_none()
}

fn parse_fps(s: &str) -> Result<f64, String> {
    let fps: f64 = s.parse().map_err(|_| format!("Invalid rate: {s}"))?;

    if !(0.1..=240.0).contains(&fps) {
        return Err(format!("Rate {fps} is out of reasonable range (0.1-240)"));
    }

    Ok(fps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_limit_needs_a_depth_connection() {
        assert!(bundle_limit_reachable(Some(5), true));
        assert!(bundle_limit_reachable(None, false));
        assert!(!bundle_limit_reachable(Some(5), false));
    }

    #[test]
    fn limited_run_without_depth_connection_is_unavailable() {
        let err: Failure = CameraError::unsupported("no depth connection").into();
        let Failure::Camera(err) = err else {
            panic!("expected a camera failure");
        };
        assert!(matches!(cli::map_error_to_sysexit(&err), EX_UNAVAILABLE));
    }

    #[test]
    fn fps_must_be_reasonable() {
        assert_eq!(parse_fps("30"), Ok(30.0));
        assert!(parse_fps("0").is_err());
        assert!(parse_fps("fast").is_err());
    }
}
