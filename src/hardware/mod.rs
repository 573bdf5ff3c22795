//! Hardware abstraction for the gradiometer rig.
//!
//! The physical instrument is a stepper-motor-driven carriage holding two
//! fluxgate magnetometers above a sampling channel. This module defines the
//! capability trait the rest of the crate programs against; concrete serial
//! or DAQ-card drivers live out of tree and only need to implement
//! [`GradiometerDriver`]. A simulated rig ships in [`mock`] for tests and
//! dry runs.
//!
//! # Contract
//! - All methods are async and take `&self`; implementations use interior
//!   mutability for state.
//! - Positions are in centimetres along the rail, motor end = 0.
//! - The crate never calls the driver concurrently with itself: run and
//!   calibration workflows hold a busy guard while a task is in flight.

pub mod mock;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// One magnetometer reading delivered during a run.
///
/// Field values are per axis (x, y, z) for the lower and upper fluxgates,
/// with their standard deviations over the averaging window. The carriage
/// position at sampling time rides along so consumers can derive the
/// independent variable without querying the driver again.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Carriage position when the sample was taken, in cm
    pub position_cm: f64,
    /// Lower fluxgate field per axis, in uT
    pub field_lower: [f64; 3],
    /// Upper fluxgate field per axis, in uT
    pub field_upper: [f64; 3],
    /// Standard deviation of the lower fluxgate reading per axis
    pub std_lower: [f64; 3],
    /// Standard deviation of the upper fluxgate reading per axis
    pub std_upper: [f64; 3],
}

/// Consumer of samples produced while a run is in flight.
///
/// Implementations must be cheap and non-blocking; the driver invokes
/// [`SampleSink::record`] once per logical sample from its acquisition task.
pub trait SampleSink: Send + Sync {
    /// Record one sample.
    fn record(&self, sample: Sample);
}

/// Capability trait for the motorized gradiometer.
///
/// # Contract
/// - `zero` re-references the carriage at the motor end of the rail.
/// - `go_to` blocks until motion completes and reports the motor steps taken.
/// - `pos_run` sweeps the carriage from `start_cm` to `stop_cm`, averaging
///   `samples_per_position` readings at each sampled position and delivering
///   one [`Sample`] per position to the sink, in sweep order.
/// - `time_run` optionally repositions to `position_cm` first, then samples
///   at `scan_freq_hz` for `duration`, delivering samples to the sink in
///   acquisition order.
/// - `turn_off_motors` and `close_daq_channel` are shutdown hooks and must
///   be safe to call more than once.
#[async_trait]
pub trait GradiometerDriver: Send + Sync {
    /// Re-reference the carriage position to zero at the motor end.
    async fn zero(&self) -> Result<()>;

    /// Move the carriage to an absolute position, returning the number of
    /// motor steps taken.
    async fn go_to(&self, position_cm: f64) -> Result<u64>;

    /// Sweep from `start_cm` to `stop_cm`, sampling along the way.
    async fn pos_run(
        &self,
        start_cm: f64,
        stop_cm: f64,
        tag: &str,
        samples_per_position: u32,
        sink: &dyn SampleSink,
    ) -> Result<()>;

    /// Hold position (optionally moving there first) and sample over time.
    async fn time_run(
        &self,
        duration: Duration,
        tag: &str,
        position_cm: Option<f64>,
        scan_freq_hz: u32,
        sink: &dyn SampleSink,
    ) -> Result<()>;

    /// Current carriage position, in cm.
    async fn position(&self) -> Result<f64>;

    /// De-energize the stepper coils. Best-effort shutdown hook.
    async fn turn_off_motors(&self) -> Result<()>;

    /// Release the sampling hardware channel. Best-effort shutdown hook.
    async fn close_daq_channel(&self) -> Result<()>;
}
