//! Acquisition core: per-run sample buffering and run sequencing.
//!
//! A run is N repeated acquisitions of a parametrized sweep. The
//! [`sequencer::RunSequencer`] drives the hardware off the interactive task,
//! the [`buffer::AcquisitionBuffer`] accumulates per-axis series that a
//! display layer can snapshot at any time, and completion is signalled
//! through a watch channel rather than thread-liveness polling.

pub mod buffer;
pub mod sequencer;

pub use buffer::{AcquisitionBuffer, AxisSeries, BufferSnapshot, SweepKind};
pub use sequencer::{RunConfig, RunHandle, RunMode, RunSequencer, RunState};
