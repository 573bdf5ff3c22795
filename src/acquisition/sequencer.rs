//! Run sequencing.
//!
//! The sequencer owns the acquisition buffer and drives N repeats of a
//! parametrized sweep on a spawned task, so the interactive caller never
//! blocks on hardware. Completion and failure are published through a watch
//! channel; starting is refused outright while a previous run task is still
//! alive, so the busy guard holds even if a front-end forgets to disable its
//! start control.

use crate::acquisition::buffer::{AcquisitionBuffer, SweepKind};
use crate::data::RunStorage;
use crate::error::{GradError, GradResult};
use crate::hardware::GradiometerDriver;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Settle pause between repeats.
pub const SETTLE_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound the rig's ADC supports for time-run scan rates.
pub const MAX_SCAN_FREQ_HZ: u32 = 5000;

/// Sweep parameters for one run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunMode {
    /// Move the carriage through a range of positions, sampling at each.
    PositionSweep {
        /// Sweep origin, in cm
        start_cm: f64,
        /// Sweep destination, in cm
        stop_cm: f64,
        /// Readings averaged per sampled position
        samples_per_position: u32,
    },
    /// Hold one position and sample over a duration.
    TimeSweep {
        /// How long to sample for
        duration: Duration,
        /// ADC scan rate, in Hz
        scan_freq_hz: u32,
        /// Optional reposition before sampling begins, in cm
        position_cm: Option<f64>,
    },
}

impl RunMode {
    /// Independent variable this mode produces.
    pub fn kind(&self) -> SweepKind {
        match self {
            RunMode::PositionSweep { .. } => SweepKind::Position,
            RunMode::TimeSweep { .. } => SweepKind::Time,
        }
    }
}

/// Immutable parameters for one run invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Sweep mode and bounds
    pub mode: RunMode,
    /// Number of times to repeat the acquisition
    pub repeats: u32,
    /// Free-text tag appended to persisted file names
    pub tag: String,
}

impl RunConfig {
    /// Reject malformed operator input before any state is touched.
    pub fn validate(&self) -> GradResult<()> {
        if self.repeats == 0 {
            return Err(GradError::InvalidInput(
                "repeats must be at least 1".to_string(),
            ));
        }
        if self.tag.is_empty() {
            return Err(GradError::InvalidInput("tag must not be empty".to_string()));
        }
        if self.tag.contains(['/', '\\']) {
            return Err(GradError::InvalidInput(
                "tag must not contain path separators".to_string(),
            ));
        }
        match &self.mode {
            RunMode::PositionSweep {
                start_cm,
                stop_cm,
                samples_per_position,
            } => {
                if !(start_cm.is_finite() && stop_cm.is_finite()) {
                    return Err(GradError::InvalidInput(
                        "sweep bounds must be finite".to_string(),
                    ));
                }
                if start_cm == stop_cm {
                    return Err(GradError::InvalidInput(
                        "sweep start and stop must differ".to_string(),
                    ));
                }
                if *samples_per_position == 0 {
                    return Err(GradError::InvalidInput(
                        "samples per position must be at least 1".to_string(),
                    ));
                }
            }
            RunMode::TimeSweep {
                duration,
                scan_freq_hz,
                position_cm,
            } => {
                if duration.is_zero() {
                    return Err(GradError::InvalidInput(
                        "scan duration must be positive".to_string(),
                    ));
                }
                if *scan_freq_hz == 0 || *scan_freq_hz > MAX_SCAN_FREQ_HZ {
                    return Err(GradError::InvalidInput(format!(
                        "scan frequency must be 1-{MAX_SCAN_FREQ_HZ} Hz"
                    )));
                }
                if let Some(cm) = position_cm {
                    if !cm.is_finite() {
                        return Err(GradError::InvalidInput(
                            "measurement position must be finite".to_string(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Lifecycle of a run, published through the sequencer's watch channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    /// No run has been started yet.
    Idle,
    /// A run task is alive and on the given repeat index.
    Running {
        /// Identifier of the active run
        run_id: Uuid,
        /// Zero-based repeat currently acquiring
        repeat: u32,
    },
    /// All repeats finished.
    Complete {
        /// Identifier of the finished run
        run_id: Uuid,
    },
    /// The hardware failed mid-run; starting is possible again.
    Failed {
        /// Identifier of the failed run
        run_id: Uuid,
        /// Driver error that ended the run
        reason: String,
    },
}

impl RunState {
    /// Whether the run task has terminated (or never started).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Running { .. })
    }
}

/// Handle to one started run.
pub struct RunHandle {
    run_id: Uuid,
    rx: watch::Receiver<RunState>,
}

impl RunHandle {
    /// Identifier of this run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Current state, without blocking.
    pub fn state(&self) -> RunState {
        self.rx.borrow().clone()
    }

    /// Wait for the run to reach a terminal state.
    pub async fn wait(&mut self) -> RunState {
        while !self.rx.borrow().is_terminal() {
            if self.rx.changed().await.is_err() {
                break;
            }
        }
        self.rx.borrow().clone()
    }
}

/// Orchestrates repeated acquisitions of one sweep kind.
///
/// One sequencer exists per workflow window; it owns the buffer the display
/// layer snapshots and refuses to start while a run task is still alive.
pub struct RunSequencer {
    driver: Arc<dyn GradiometerDriver>,
    buffer: Arc<AcquisitionBuffer>,
    storage: Option<Arc<RunStorage>>,
    settle: Duration,
    state_tx: watch::Sender<RunState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RunSequencer {
    /// Create a sequencer for the given sweep kind.
    pub fn new(driver: Arc<dyn GradiometerDriver>, kind: SweepKind) -> Self {
        let (state_tx, _) = watch::channel(RunState::Idle);
        Self {
            driver,
            buffer: Arc::new(AcquisitionBuffer::new(kind)),
            storage: None,
            settle: SETTLE_INTERVAL,
            state_tx,
            task: Mutex::new(None),
        }
    }

    /// Persist every completed repeat through the given storage.
    pub fn with_storage(mut self, storage: RunStorage) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    /// Override the settle pause between repeats (tests).
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Buffer the display layer should snapshot.
    pub fn buffer(&self) -> Arc<AcquisitionBuffer> {
        Arc::clone(&self.buffer)
    }

    /// Subscribe to run state changes.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state_tx.subscribe()
    }

    /// Whether a new run may start right now.
    ///
    /// True if and only if no previous run task is still alive. A task that
    /// has already published its terminal state counts as terminated even if
    /// the runtime has not reaped it yet.
    pub fn can_start(&self) -> bool {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        let prior_alive = task.as_ref().is_some_and(|t| !t.is_finished());
        !prior_alive || self.state_tx.borrow().is_terminal()
    }

    /// Start a run.
    ///
    /// Validates the configuration, refuses while a previous run task is
    /// alive, then spawns the acquisition task: for each repeat the buffer is
    /// reset (new run number), the mode-appropriate driver call is made with
    /// the buffer as the sample sink, the repeat is persisted, and the
    /// sequencer settles before the next repeat. Position sweeps alternate
    /// direction on every repeat.
    pub fn start(&self, config: RunConfig) -> GradResult<RunHandle> {
        config.validate()?;
        if config.mode.kind() != self.buffer.kind() {
            return Err(GradError::InvalidInput(format!(
                "run mode {:?} does not match this sequencer's sweep kind {:?}",
                config.mode.kind(),
                self.buffer.kind()
            )));
        }

        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        let prior_alive = task.as_ref().is_some_and(|t| !t.is_finished());
        if prior_alive && !self.state_tx.borrow().is_terminal() {
            return Err(GradError::RunActive);
        }

        let run_id = Uuid::new_v4();
        let driver = Arc::clone(&self.driver);
        let buffer = Arc::clone(&self.buffer);
        let storage = self.storage.clone();
        let settle = self.settle;
        let state_tx = self.state_tx.clone();
        let rx = self.state_tx.subscribe();

        state_tx.send_replace(RunState::Running { run_id, repeat: 0 });
        info!(%run_id, repeats = config.repeats, tag = %config.tag, "starting run");

        *task = Some(tokio::spawn(async move {
            let RunConfig { mode, repeats, tag } = config;
            for repeat in 0..repeats {
                buffer.reset();
                state_tx.send_replace(RunState::Running { run_id, repeat });

                let result = match &mode {
                    RunMode::PositionSweep {
                        start_cm,
                        stop_cm,
                        samples_per_position,
                    } => {
                        // Even repeats sweep start->stop, odd repeats sweep
                        // back, so consecutive repeats cover the rail in
                        // opposite directions.
                        let (from, to) = if repeat % 2 == 0 {
                            (*start_cm, *stop_cm)
                        } else {
                            (*stop_cm, *start_cm)
                        };
                        driver
                            .pos_run(from, to, &tag, *samples_per_position, buffer.as_ref())
                            .await
                    }
                    RunMode::TimeSweep {
                        duration,
                        scan_freq_hz,
                        position_cm,
                    } => {
                        driver
                            .time_run(
                                *duration,
                                &tag,
                                *position_cm,
                                *scan_freq_hz,
                                buffer.as_ref(),
                            )
                            .await
                    }
                };

                if let Err(err) = result {
                    let reason = err.to_string();
                    warn!(%run_id, repeat, %reason, "run failed");
                    state_tx.send_replace(RunState::Failed { run_id, reason });
                    return;
                }

                if let Some(storage) = &storage {
                    match storage.persist(&tag, &buffer.snapshot()) {
                        Ok(path) => info!(%run_id, repeat, path = %path.display(), "repeat persisted"),
                        Err(err) => warn!(%run_id, repeat, %err, "failed to persist repeat"),
                    }
                }

                tokio::time::sleep(settle).await;
            }
            info!(%run_id, "run complete");
            state_tx.send_replace(RunState::Complete { run_id });
        }));

        Ok(RunHandle { run_id, rx })
    }
}
