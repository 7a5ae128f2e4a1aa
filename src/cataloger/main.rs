// This is free and unencumbered software released into the public domain.

#[cfg(not(feature = "std"))]
compile_error!("asimov-depth-cataloger requires the 'std' feature");

use asimov_depth_sync_module::{
    cli,
    shared::{CameraError, open_platform},
};
use asimov_module::SysexitsError::{self, *};
use clap::Parser;
use clientele::StandardOptions;
use serde_json::json;
use std::error::Error as StdError;

#[derive(Debug, Parser)]
struct Options {
    #[clap(flatten)]
    flags: StandardOptions,

    /// Capture platform (`avf`, `simulated`); the first available by default.
    #[arg(long, default_value = "")]
    platform: String,

    #[arg(
        value_name = "FORMAT",
        short = 'o',
        long = "output",
        value_enum,
        default_value = "text"
    )]
    output: OutputFormat,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Jsonl,
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

    let exit_code = match run_cataloger(&options) {
        Ok(()) => EX_OK,
        Err(err) => cli::handle_error(&err, &options.flags),
    };

    Ok(exit_code)
}

fn run_cataloger(options: &Options) -> Result<(), CameraError> {
    let platform = open_platform(&options.platform)?;
    cli::info_user(
        &options.flags,
        &format!("enumerating capture devices on the {} platform", platform.name()),
    );

    let mut devices = platform.devices()?;
    if devices.is_empty() {
        cli::warn_user(&options.flags, "no capture devices found");
        return Ok(());
    }

    devices.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.name.cmp(&b.name)));

    for d in devices {
        match options.output {
            OutputFormat::Text => {
                let depth = if d.depth_capable { " [depth]" } else { "" };
                println!(
                    "{}: {} ({}, {}){depth}",
                    d.id, d.name, d.device_type, d.position
                );
            },
            OutputFormat::Jsonl => {
                println!(
                    "{}",
                    json!({
                        "id": d.id,
                        "name": d.name,
                        "type": d.device_type.to_string(),
                        "position": d.position.to_string(),
                        "depth": d.depth_capable,
                    })
                );
            },
        }
    }

    Ok(())
}
