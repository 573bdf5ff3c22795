//! # Gradiometer acquisition front-end
//!
//! This crate is the headless core of the gradiometer control station: it
//! sequences stepper-motor-driven scans of a magnetometer carriage, buffers
//! the acquired samples for live display, derives and persists the
//! distance-per-step calibration constant, and writes completed repeats to
//! disk. The CLI binary (`main.rs`) is a thin front controller over these
//! workflows; plotting front-ends consume the same snapshot API.
//!
//! ## Crate structure
//!
//! - **`acquisition`**: the run core: `AcquisitionBuffer` (per-axis sample
//!   series with snapshot reads) and `RunSequencer` (repeated sweeps driven
//!   off the interactive task, completion via watch channel).
//! - **`calibration`**: the three-state routine deriving cm-per-step from a
//!   known commanded displacement.
//! - **`config`**: figment-based settings doubling as the calibration store,
//!   with atomic write-back.
//! - **`context`**: the application context owning the device handle and the
//!   process-wide device claim.
//! - **`data`**: CSV persistence of completed repeats.
//! - **`error`**: the crate-wide `GradError` enum.
//! - **`hardware`**: the `GradiometerDriver` capability trait and a mock rig.
//! - **`logging`**: tracing-subscriber initialization.
//! - **`workflow`**: CLI-facing glue: the headless display loop and the
//!   scripted axial survey.

pub mod acquisition;
pub mod calibration;
pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod workflow;
