//! CLI entry point for grad-daq.
//!
//! The front controller: exactly one workflow per invocation, selected by
//! subcommand (calibration, a position run, a time run, or the scripted
//! axial survey). Hardware defaults to the simulated rig; a physical driver
//! crate plugs in by implementing `GradiometerDriver` and swapping the
//! construction below.
//!
//! # Usage
//!
//! ```bash
//! grad-daq calibrate
//! grad-daq pos-run --start-cm 0 --stop-cm 10 --samples-per-position 5 --repeats 2 --tag T1
//! grad-daq time-run --duration-secs 5 --scan-freq-hz 500 --position-cm 40
//! grad-daq axial-sweep --start-cm 0 --stop-cm 80 --stations 17
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use grad_daq::acquisition::{RunConfig, RunMode, RunSequencer, SweepKind};
use grad_daq::calibration::{CalibrationRoutine, SubmitOutcome};
use grad_daq::config::{CalibrationStore, Settings};
use grad_daq::context::AppContext;
use grad_daq::data::RunStorage;
use grad_daq::error::GradError;
use grad_daq::hardware::mock::MockGradiometer;
use grad_daq::workflow::{self, AxialSweepParams, DISPLAY_POLL_INTERVAL};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "grad-daq")]
#[command(about = "Headless gradiometer control station", long_about = None)]
struct Cli {
    /// Path to the settings document (defaults to config/gradiometer.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recalibrate the stepper belt spacing
    Calibrate,

    /// Sweep the carriage through a position range, sampling at each position
    PosRun {
        /// Sweep start, in cm
        #[arg(long, default_value_t = 0.0)]
        start_cm: f64,

        /// Sweep stop, in cm
        #[arg(long, default_value_t = 10.0)]
        stop_cm: f64,

        /// Readings averaged per sampled position
        #[arg(long, default_value_t = 5)]
        samples_per_position: u32,

        /// Number of times to repeat the measurement
        #[arg(long, default_value_t = 1)]
        repeats: u32,

        /// Tag appended to persisted file names
        #[arg(long, default_value = "run")]
        tag: String,
    },

    /// Hold one position and sample over a duration
    TimeRun {
        /// Time to scan, in seconds
        #[arg(long, default_value_t = 5)]
        duration_secs: u64,

        /// Scan frequency, in Hz
        #[arg(long, default_value_t = 500)]
        scan_freq_hz: u32,

        /// Move to this position before scanning, in cm
        #[arg(long)]
        position_cm: Option<f64>,

        /// Number of times to repeat the measurement
        #[arg(long, default_value_t = 1)]
        repeats: u32,

        /// Tag appended to persisted file names
        #[arg(long, default_value = "run")]
        tag: String,
    },

    /// Scripted axial survey: one time-run per evenly spaced station
    AxialSweep {
        /// First station, in cm
        #[arg(long, default_value_t = 0.0)]
        start_cm: f64,

        /// Last station, in cm
        #[arg(long, default_value_t = 80.0)]
        stop_cm: f64,

        /// Number of stations, endpoints included
        #[arg(long, default_value_t = 17)]
        stations: u32,

        /// Sampling duration per station, in seconds
        #[arg(long, default_value_t = 10)]
        duration_secs: u64,

        /// Scan frequency, in Hz
        #[arg(long, default_value_t = 500)]
        scan_freq_hz: u32,

        /// Tag prefix; the station position is appended per run
        #[arg(long, default_value = "axial-probe")]
        tag: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let store_path = cli.config.clone().unwrap_or_else(Settings::default_path);
    let store = CalibrationStore::new(store_path);
    let settings = store.load_or_init()?;
    grad_daq::logging::init(&settings)?;

    // Simulated rig by default; a physical driver implements
    // GradiometerDriver and replaces this construction.
    let driver = Arc::new(MockGradiometer::new());
    let ctx = AppContext::new(settings, store, driver)?;

    // Ctrl-C is the documented way to abort an in-flight run, so the
    // workflow races the interrupt signal and the exit hooks run either way.
    let result = match workflow::with_interrupt(dispatch(&cli, &ctx), interrupt_signal()).await {
        Some(result) => result,
        None => {
            tracing::warn!("interrupt received; powering the rig down");
            Ok(())
        }
    };

    ctx.shutdown().await;
    result
}

/// Resolve when the operator interrupts the process (Ctrl-C).
async fn interrupt_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        // Without a handler the workflow just runs to completion.
        tracing::warn!(%err, "failed to install interrupt handler");
        std::future::pending::<()>().await;
    }
}

async fn dispatch(cli: &Cli, ctx: &AppContext) -> Result<()> {
    match &cli.command {
        Commands::Calibrate => calibrate(ctx).await,

        Commands::PosRun {
            start_cm,
            stop_cm,
            samples_per_position,
            repeats,
            tag,
        } => {
            let sequencer = RunSequencer::new(ctx.driver(), SweepKind::Position)
                .with_storage(RunStorage::new(ctx.settings().data.output_dir.clone()));
            let config = RunConfig {
                mode: RunMode::PositionSweep {
                    start_cm: *start_cm,
                    stop_cm: *stop_cm,
                    samples_per_position: *samples_per_position,
                },
                repeats: *repeats,
                tag: tag.clone(),
            };
            workflow::execute_run(&sequencer, config, DISPLAY_POLL_INTERVAL).await?;
            Ok(())
        }

        Commands::TimeRun {
            duration_secs,
            scan_freq_hz,
            position_cm,
            repeats,
            tag,
        } => {
            let sequencer = RunSequencer::new(ctx.driver(), SweepKind::Time)
                .with_storage(RunStorage::new(ctx.settings().data.output_dir.clone()));
            let config = RunConfig {
                mode: RunMode::TimeSweep {
                    duration: Duration::from_secs(*duration_secs),
                    scan_freq_hz: *scan_freq_hz,
                    position_cm: *position_cm,
                },
                repeats: *repeats,
                tag: tag.clone(),
            };
            workflow::execute_run(&sequencer, config, DISPLAY_POLL_INTERVAL).await?;
            Ok(())
        }

        Commands::AxialSweep {
            start_cm,
            stop_cm,
            stations,
            duration_secs,
            scan_freq_hz,
            tag,
        } => {
            let sequencer = RunSequencer::new(ctx.driver(), SweepKind::Time)
                .with_storage(RunStorage::new(ctx.settings().data.output_dir.clone()));
            let params = AxialSweepParams {
                start_cm: *start_cm,
                stop_cm: *stop_cm,
                stations: *stations,
                duration: Duration::from_secs(*duration_secs),
                scan_freq_hz: *scan_freq_hz,
                tag: tag.clone(),
            };
            workflow::axial_sweep(&sequencer, params).await?;
            Ok(())
        }
    }
}

async fn calibrate(ctx: &AppContext) -> Result<()> {
    let cal_distance_cm = ctx.settings().calibration.cal_distance_cm;
    let mut routine =
        CalibrationRoutine::new(ctx.driver(), ctx.store().clone(), cal_distance_cm)?;

    println!("Calibration re-derives the stepper belt spacing, which drifts daily.");
    println!("Move the fluxgate to the far motor end of the rail and mark the zero point.");
    prompt("Press Enter when the probe is in position:").await?;

    routine.begin_measurement().await?;
    println!(
        "The carriage is now moving approximately {cal_distance_cm} cm. Once it stops, \
         tape-measure the actual travel and enter it below."
    );

    loop {
        let answer = prompt("Measured distance in cm:").await?;
        let measured: f64 = match answer.parse() {
            Ok(v) => v,
            Err(_) => {
                eprintln!("Please enter a number.");
                continue;
            }
        };

        match routine.submit(measured).await {
            Ok(SubmitOutcome::StillMoving) => {
                println!("The carriage is still moving; submit again once it has stopped.");
            }
            Ok(SubmitOutcome::Calibrated { cm_per_step }) => {
                println!("All done: {cm_per_step:.7} cm/step written to the settings document.");
                return Ok(());
            }
            Err(GradError::InvalidInput(msg)) => {
                eprintln!("{msg}");
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Read one trimmed line from stdin without blocking the runtime.
async fn prompt(message: &str) -> Result<String> {
    let message = message.to_string();
    let line = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        print!("{message} ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line.trim().to_string())
    })
    .await??;
    Ok(line)
}
