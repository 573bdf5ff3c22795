//! Calibration routine.
//!
//! The stepper belt spacing drifts from day to day, so the distance covered
//! per motor step is re-derived against a known commanded displacement:
//!
//! 1. **Instructions**: the operator moves the probe to the motor end of
//!    the rail and marks the zero point.
//! 2. **Measuring**: the carriage is zeroed and commanded to travel the
//!    configured calibration distance on a background task; the operator
//!    tape-measures the actual travel. Submitting while the carriage is
//!    still moving is a no-op (polled, never blocking), so the operator
//!    submits again once motion has finished.
//! 3. **Confirmed**: `cm_per_step = cal_distance_cm / steps_taken` is
//!    persisted atomically. A store failure fails the step explicitly and
//!    leaves the previous record intact; the steps already taken are kept so
//!    the operator can simply resubmit.
//!
//! The formula deliberately uses the *configured* distance, matching the
//! rig's established behavior; the operator's tape measurement is logged
//! against it so a drifting belt shows up in the record.

use crate::config::CalibrationStore;
use crate::error::{GradError, GradResult};
use crate::hardware::GradiometerDriver;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Where the routine currently is.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationPhase {
    /// Waiting for the operator to position the probe manually.
    Instructions,
    /// Carriage movement commanded; waiting for the measurement submit.
    Measuring,
    /// Scale factor derived and persisted.
    Confirmed {
        /// The persisted distance-per-step value, in cm
        cm_per_step: f64,
    },
}

/// Outcome of a submit attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The movement task is still running; nothing happened.
    StillMoving,
    /// Calibration derived and persisted.
    Calibrated {
        /// The freshly persisted scale factor, in cm
        cm_per_step: f64,
    },
}

/// Three-state calibration workflow over a driver and the settings store.
pub struct CalibrationRoutine {
    driver: Arc<dyn GradiometerDriver>,
    store: CalibrationStore,
    cal_distance_cm: f64,
    phase: CalibrationPhase,
    movement: Option<JoinHandle<anyhow::Result<u64>>>,
    steps_taken: Option<u64>,
}

impl CalibrationRoutine {
    /// Create a routine for the configured calibration displacement.
    pub fn new(
        driver: Arc<dyn GradiometerDriver>,
        store: CalibrationStore,
        cal_distance_cm: f64,
    ) -> GradResult<Self> {
        if !(cal_distance_cm.is_finite() && cal_distance_cm > 0.0) {
            return Err(GradError::InvalidInput(format!(
                "calibration distance must be positive, got {cal_distance_cm}"
            )));
        }
        Ok(Self {
            driver,
            store,
            cal_distance_cm,
            phase: CalibrationPhase::Instructions,
            movement: None,
            steps_taken: None,
        })
    }

    /// Current phase.
    pub fn phase(&self) -> &CalibrationPhase {
        &self.phase
    }

    /// Displacement the routine commands, in cm.
    pub fn cal_distance_cm(&self) -> f64 {
        self.cal_distance_cm
    }

    /// Operator finished positioning: zero the carriage and command the
    /// calibration displacement on a background task.
    pub async fn begin_measurement(&mut self) -> GradResult<()> {
        if self.phase != CalibrationPhase::Instructions {
            return Err(GradError::InvalidInput(
                "measurement already started".to_string(),
            ));
        }

        self.driver.zero().await.map_err(GradError::hardware)?;

        let driver = Arc::clone(&self.driver);
        let distance = self.cal_distance_cm;
        self.movement = Some(tokio::spawn(
            async move { driver.go_to(distance).await },
        ));
        self.phase = CalibrationPhase::Measuring;
        info!(distance_cm = distance, "calibration movement started");
        Ok(())
    }

    /// Submit the tape-measured travel distance.
    ///
    /// A no-op while the movement task is still running. Input is validated
    /// before any state changes; a store failure leaves the routine in
    /// Measuring so the operator can resubmit.
    pub async fn submit(&mut self, measured_cm: f64) -> GradResult<SubmitOutcome> {
        if self.phase != CalibrationPhase::Measuring {
            return Err(GradError::InvalidInput(
                "no measurement in progress".to_string(),
            ));
        }
        if !(measured_cm.is_finite() && measured_cm > 0.0) {
            return Err(GradError::InvalidInput(format!(
                "measured distance must be positive, got {measured_cm}"
            )));
        }

        let steps = match self.steps_taken {
            Some(steps) => steps,
            None => {
                // Polled check: honor the submit only once the movement task
                // has terminated.
                let still_moving = self.movement.as_ref().is_some_and(|t| !t.is_finished());
                if still_moving {
                    return Ok(SubmitOutcome::StillMoving);
                }
                let handle = self.movement.take().ok_or_else(|| {
                    GradError::Hardware("calibration movement task missing".to_string())
                })?;
                let steps = handle
                    .await
                    .map_err(GradError::hardware)?
                    .map_err(GradError::hardware)?;
                if steps == 0 {
                    return Err(GradError::Hardware(
                        "carriage reported zero steps taken".to_string(),
                    ));
                }
                self.steps_taken = Some(steps);
                steps
            }
        };

        let cm_per_step = self.cal_distance_cm / steps as f64;
        let discrepancy_cm = (measured_cm - self.cal_distance_cm).abs();
        if discrepancy_cm > 1.0 {
            warn!(
                measured_cm,
                configured_cm = self.cal_distance_cm,
                "tape measurement deviates from commanded displacement"
            );
        } else {
            info!(measured_cm, configured_cm = self.cal_distance_cm, steps, "measurement recorded");
        }

        self.store.update_cm_per_step(cm_per_step)?;
        self.phase = CalibrationPhase::Confirmed { cm_per_step };
        info!(cm_per_step, "calibration persisted");
        Ok(SubmitOutcome::Calibrated { cm_per_step })
    }
}
