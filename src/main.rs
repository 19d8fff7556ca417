//! # resource-controller
//!
//! Runs the control loop described by a TOML configuration file until the
//! configured runtime elapses or Ctrl-C is pressed.
//!
//! ## Usage
//!
//! ```bash
//! # Run with CSV rows on stdout, skipping the first 5 ticks
//! resource-controller --config configs/controller.toml --print --skip 5
//!
//! # Dump Prometheus metrics to stderr on exit
//! resource-controller --config configs/controller.toml --metrics
//! ```
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json` for structured JSON logs on stderr
//! - `RUST_LOG=info` sets the log level filter

use std::path::PathBuf;
use std::process::ExitCode;

use tokio_resource_controller::config::{loader, ControllerBuilder};
use tokio_resource_controller::{init_tracing, metrics, ControlError, IdAllocator};
use tracing::{error, info};

/// Parsed CLI arguments.
struct Args {
    config: PathBuf,
    /// Overrides `controller.print_output` when set.
    print: Option<bool>,
    /// Overrides `controller.skip_print_count` when set.
    skip: Option<u32>,
    dump_metrics: bool,
}

const USAGE: &str = "usage: resource-controller [--config <file>] [--print | --quiet] [--skip <n>] [--metrics]";

/// Parse command-line arguments manually.
fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        config: PathBuf::from("controller.toml"),
        print: None,
        skip: None,
        dump_metrics: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                let value = args.get(i).ok_or("--config requires a value")?;
                parsed.config = PathBuf::from(value);
            }
            "--print" | "-p" => parsed.print = Some(true),
            "--quiet" | "-q" => parsed.print = Some(false),
            "--skip" | "-s" => {
                i += 1;
                let value = args.get(i).ok_or("--skip requires a value")?;
                parsed.skip = Some(
                    value
                        .parse()
                        .map_err(|_| format!("invalid skip count: {value}"))?,
                );
            }
            "--metrics" => parsed.dump_metrics = true,
            "--help" | "-h" => return Err(USAGE.to_string()),
            other => return Err(format!("unknown argument: {other}\n{USAGE}")),
        }
        i += 1;
    }
    Ok(parsed)
}

async fn run(args: Args) -> Result<(), ControlError> {
    let config = loader::load_from_file(&args.config)?;
    let print = args.print.unwrap_or(config.controller.print_output);
    let skip = args.skip.unwrap_or(config.controller.skip_print_count);

    let mut ids = IdAllocator::new();
    let mut control_loop = ControllerBuilder::new(config).build(&mut ids)?;
    let stop = control_loop.stop_handle();

    control_loop.start(print, skip).await?;
    info!(config = %args.config.display(), print, skip, "controller started");

    let watcher = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received; stopping"),
            Err(e) => error!(error = %e, "failed to listen for Ctrl-C; stopping"),
        }
        stop.stop();
    });
    let report = control_loop.join().await;
    watcher.abort();
    let report = report?;

    info!(
        ticks = report.ticks,
        overruns = report.overruns,
        control_updates = report.final_control_updates,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "controller stopped"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = init_tracing();

    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::from(2);
        }
    };
    let dump_metrics = args.dump_metrics;

    if let Err(e) = metrics::init_metrics() {
        error!(error = %e, "metrics registry unavailable");
    }

    let result = run(args).await;
    if dump_metrics {
        eprintln!("{}", metrics::gather_text());
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "controller failed");
            ExitCode::FAILURE
        }
    }
}
