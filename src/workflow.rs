//! Workflow helpers shared by the CLI front controller.
//!
//! [`execute_run`] is the headless display loop: it starts a run and polls
//! the acquisition buffer on a fixed refresh period while waiting for the
//! completion signal, mirroring how a plotting front-end would consume
//! snapshots. [`axial_sweep`] is the scripted survey the rig operators run
//! along the axial coil: evenly spaced stations, one time-run each.

use crate::acquisition::{RunConfig, RunMode, RunSequencer, RunState};
use crate::error::{GradError, GradResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Refresh period the display layer polls snapshots at.
pub const DISPLAY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Await a workflow unless the interrupt future resolves first.
///
/// Returns `None` on interrupt so the caller falls through to its exit
/// hooks. In-flight hardware motion is not cancelled; the caller simply
/// stops waiting on it before powering the rig down.
pub async fn with_interrupt<W, I>(workflow: W, interrupt: I) -> Option<W::Output>
where
    W: Future,
    I: Future<Output = ()>,
{
    tokio::select! {
        out = workflow => Some(out),
        () = interrupt => None,
    }
}

/// Start a run and poll its buffer until the run terminates.
///
/// Returns the terminal state; a hardware failure is surfaced as
/// [`GradError::Hardware`] after the sequencer has already released its busy
/// guard.
pub async fn execute_run(
    sequencer: &RunSequencer,
    config: RunConfig,
    poll_interval: Duration,
) -> GradResult<RunState> {
    let mut handle = sequencer.start(config)?;
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let final_state = loop {
        tokio::select! {
            state = handle.wait() => break state,
            _ = ticker.tick() => {
                let snapshot = sequencer.buffer().snapshot();
                info!(
                    run_number = snapshot.run_number,
                    points = snapshot.axes[0].len(),
                    "acquiring"
                );
            }
        }
    };

    match final_state {
        RunState::Failed { reason, .. } => Err(GradError::Hardware(reason)),
        state => Ok(state),
    }
}

/// Parameters for the scripted axial survey.
#[derive(Debug, Clone)]
pub struct AxialSweepParams {
    /// First station, in cm
    pub start_cm: f64,
    /// Last station, in cm
    pub stop_cm: f64,
    /// Number of evenly spaced stations (endpoints included)
    pub stations: u32,
    /// Sampling duration at each station
    pub duration: Duration,
    /// ADC scan rate, in Hz
    pub scan_freq_hz: u32,
    /// Tag prefix; the station position is appended per run
    pub tag: String,
}

/// Run one time-run at each evenly spaced station along the rail.
///
/// Stations are visited in order; a failure at any station aborts the rest
/// of the survey.
pub async fn axial_sweep(sequencer: &RunSequencer, params: AxialSweepParams) -> GradResult<()> {
    if params.stations == 0 {
        return Err(GradError::InvalidInput(
            "station count must be at least 1".to_string(),
        ));
    }
    if !(params.start_cm.is_finite() && params.stop_cm.is_finite()) {
        return Err(GradError::InvalidInput(
            "survey bounds must be finite".to_string(),
        ));
    }

    for position_cm in linspace(params.start_cm, params.stop_cm, params.stations) {
        let config = RunConfig {
            mode: RunMode::TimeSweep {
                duration: params.duration,
                scan_freq_hz: params.scan_freq_hz,
                position_cm: Some(position_cm),
            },
            repeats: 1,
            tag: format!("{}-{position_cm:.1}", params.tag),
        };
        info!(position_cm, "axial survey station");
        let mut handle = sequencer.start(config)?;
        if let RunState::Failed { reason, .. } = handle.wait().await {
            return Err(GradError::Hardware(reason));
        }
    }
    Ok(())
}

/// `count` evenly spaced values from `start` to `stop`, endpoints included.
fn linspace(start: f64, stop: f64, count: u32) -> Vec<f64> {
    if count == 1 {
        return vec![start];
    }
    let step = (stop - start) / (count - 1) as f64;
    (0..count).map(|k| start + step * k as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linspace_includes_endpoints() {
        let points = linspace(0.0, 80.0, 17);
        assert_eq!(points.len(), 17);
        assert_eq!(points[0], 0.0);
        assert_eq!(points[16], 80.0);
        assert!((points[1] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn linspace_single_station() {
        assert_eq!(linspace(4.0, 80.0, 1), vec![4.0]);
    }
}
