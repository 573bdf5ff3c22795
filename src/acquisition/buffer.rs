//! Per-run acquisition buffer.
//!
//! Holds one series per raw magnetometer axis for the current repeat. The
//! run task is the only writer; readers take a cheap cloned snapshot under a
//! read lock, so the display layer never blocks the writer and never sees a
//! half-appended sample.
//!
//! The independent variable depends on the sweep kind:
//! - Position sweeps: carriage position plus a fixed per-axis probe offset,
//!   because the three fluxgate cores sit at different points on the mount.
//! - Time sweeps: seconds elapsed since the first sample of the current
//!   repeat (the first sample is exactly 0).

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use crate::hardware::{Sample, SampleSink};

/// Number of raw magnetometer axes (x, y, z).
pub const AXIS_COUNT: usize = 3;

/// Physical offset of each fluxgate core from the carriage reference, in cm.
pub const AXIS_OFFSETS_CM: [f64; AXIS_COUNT] = [-3.0, 0.0, -1.5];

/// Window used for the zoomed position-sweep views, in cm (exclusive bounds).
pub const ZOOM_WINDOW_CM: (f64, f64) = (30.0, 50.0);

/// Which independent variable a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepKind {
    /// Independent variable is carriage position, in cm.
    Position,
    /// Independent variable is elapsed time, in seconds.
    Time,
}

/// Ordered (independent variable, value, error) triples for one axis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AxisSeries {
    /// Independent variable (cm or seconds, per [`SweepKind`])
    pub x: Vec<f64>,
    /// Field value, in uT
    pub value: Vec<f64>,
    /// Standard deviation of the field value
    pub error: Vec<f64>,
}

impl AxisSeries {
    /// Number of points in the series.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Whether the series holds no points yet.
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Points whose independent variable falls strictly inside `(lo, hi)`.
    ///
    /// An empty result means "nothing to draw yet", never an error.
    pub fn window(&self, lo: f64, hi: f64) -> AxisSeries {
        let mut out = AxisSeries::default();
        for (i, &x) in self.x.iter().enumerate() {
            if x > lo && x < hi {
                out.x.push(x);
                out.value.push(self.value[i]);
                out.error.push(self.error[i]);
            }
        }
        out
    }

    fn push(&mut self, x: f64, value: f64, error: f64) {
        self.x.push(x);
        self.value.push(value);
        self.error.push(error);
    }
}

/// Immutable view of the buffer contents at one instant.
#[derive(Debug, Clone)]
pub struct BufferSnapshot {
    /// Repeat counter; bumped on every reset
    pub run_number: u64,
    /// Sweep kind the buffer was created for
    pub kind: SweepKind,
    /// Raw series, one per axis
    pub axes: [AxisSeries; AXIS_COUNT],
}

impl BufferSnapshot {
    /// Zoomed view of one axis over [`ZOOM_WINDOW_CM`].
    ///
    /// Only position sweeps have zoomed views; returns `None` for time
    /// sweeps and for an axis index outside the raw series, and an empty
    /// series when no point falls inside the window.
    pub fn zoomed(&self, axis: usize) -> Option<AxisSeries> {
        match self.kind {
            SweepKind::Position => {
                let (lo, hi) = ZOOM_WINDOW_CM;
                self.axes.get(axis).map(|series| series.window(lo, hi))
            }
            SweepKind::Time => None,
        }
    }
}

struct Inner {
    run_number: u64,
    started: Option<Instant>,
    axes: [AxisSeries; AXIS_COUNT],
}

/// Fixed set of per-axis series accumulated during one repeat.
///
/// Owned by exactly one run at a time; [`AcquisitionBuffer::reset`] starts a
/// fresh repeat and invalidates prior contents by bumping the run number.
pub struct AcquisitionBuffer {
    kind: SweepKind,
    inner: RwLock<Inner>,
}

impl AcquisitionBuffer {
    /// Create an empty buffer for the given sweep kind.
    pub fn new(kind: SweepKind) -> Self {
        Self {
            kind,
            inner: RwLock::new(Inner {
                run_number: 0,
                started: None,
                axes: Default::default(),
            }),
        }
    }

    /// Sweep kind this buffer produces.
    pub fn kind(&self) -> SweepKind {
        self.kind
    }

    /// Current repeat counter.
    pub fn run_number(&self) -> u64 {
        self.read().run_number
    }

    /// Clear all series and start a new repeat.
    pub fn reset(&self) {
        let mut inner = self.write();
        inner.run_number += 1;
        inner.started = None;
        inner.axes = Default::default();
    }

    /// Clone the current contents without blocking the writer for long.
    pub fn snapshot(&self) -> BufferSnapshot {
        let inner = self.read();
        BufferSnapshot {
            run_number: inner.run_number,
            kind: self.kind,
            axes: inner.axes.clone(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SampleSink for AcquisitionBuffer {
    /// Append one point per raw axis.
    ///
    /// All three series grow together under one write guard, so they are
    /// always the same length after every callback.
    fn record(&self, sample: Sample) {
        let mut inner = self.write();
        let x = match self.kind {
            SweepKind::Position => None,
            SweepKind::Time => {
                // t=0 is anchored at the first callback of the repeat.
                match inner.started {
                    Some(started) => Some(started.elapsed().as_secs_f64()),
                    None => {
                        inner.started = Some(Instant::now());
                        Some(0.0)
                    }
                }
            }
        };
        for i in 0..AXIS_COUNT {
            let xi = match self.kind {
                SweepKind::Position => sample.position_cm + AXIS_OFFSETS_CM[i],
                SweepKind::Time => x.unwrap_or(0.0),
            };
            inner.axes[i].push(xi, sample.field_lower[i], sample.std_lower[i]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_at(position_cm: f64) -> Sample {
        Sample {
            position_cm,
            field_lower: [1.0, 2.0, 3.0],
            field_upper: [0.9, 1.9, 2.9],
            std_lower: [0.1, 0.2, 0.3],
            std_upper: [0.1, 0.2, 0.3],
        }
    }

    #[test]
    fn position_mode_applies_axis_offsets() {
        let buffer = AcquisitionBuffer::new(SweepKind::Position);
        buffer.reset();
        buffer.record(sample_at(10.0));

        let snap = buffer.snapshot();
        assert_eq!(snap.axes[0].x, vec![7.0]);
        assert_eq!(snap.axes[1].x, vec![10.0]);
        assert_eq!(snap.axes[2].x, vec![8.5]);
        assert_eq!(snap.axes[1].value, vec![2.0]);
        assert_eq!(snap.axes[2].error, vec![0.3]);
    }

    #[test]
    fn time_mode_anchors_first_sample_at_zero() {
        let buffer = AcquisitionBuffer::new(SweepKind::Time);
        buffer.reset();
        buffer.record(sample_at(0.0));
        buffer.record(sample_at(0.0));
        buffer.record(sample_at(0.0));

        let snap = buffer.snapshot();
        assert_eq!(snap.axes[0].x[0], 0.0);
        assert!(snap.axes[0].x.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn reset_starts_empty_and_bumps_run_number() {
        let buffer = AcquisitionBuffer::new(SweepKind::Position);
        buffer.reset();
        buffer.record(sample_at(1.0));
        assert_eq!(buffer.run_number(), 1);

        buffer.reset();
        assert_eq!(buffer.run_number(), 2);
        let snap = buffer.snapshot();
        assert!(snap.axes.iter().all(AxisSeries::is_empty));
    }

    #[test]
    fn axes_stay_equal_length() {
        let buffer = AcquisitionBuffer::new(SweepKind::Position);
        buffer.reset();
        for k in 0..10 {
            buffer.record(sample_at(k as f64));
            let snap = buffer.snapshot();
            let len = snap.axes[0].len();
            assert!(snap.axes.iter().all(|a| a.len() == len));
        }
    }

    #[test]
    fn empty_zoom_window_is_not_an_error() {
        let buffer = AcquisitionBuffer::new(SweepKind::Position);
        buffer.reset();
        buffer.record(sample_at(10.0)); // well outside 30..50

        let snap = buffer.snapshot();
        let zoom = snap.zoomed(0).expect("position sweeps have zoom views");
        assert!(zoom.is_empty());
    }

    #[test]
    fn zoom_window_filters_strictly() {
        let buffer = AcquisitionBuffer::new(SweepKind::Position);
        buffer.reset();
        for pos in [29.0, 30.0, 31.0, 42.0, 50.0, 51.0] {
            buffer.record(sample_at(pos));
        }
        // Axis 1 has zero offset, so x equals position.
        let snap = buffer.snapshot();
        let zoom = snap.zoomed(1).expect("zoom view");
        assert_eq!(zoom.x, vec![31.0, 42.0]);
    }

    #[test]
    fn zoom_view_of_unknown_axis_is_none() {
        let buffer = AcquisitionBuffer::new(SweepKind::Position);
        buffer.reset();
        buffer.record(sample_at(40.0));
        assert!(buffer.snapshot().zoomed(AXIS_COUNT).is_none());
        assert!(buffer.snapshot().zoomed(usize::MAX).is_none());
    }

    #[test]
    fn time_sweeps_have_no_zoom_view() {
        let buffer = AcquisitionBuffer::new(SweepKind::Time);
        buffer.reset();
        buffer.record(sample_at(0.0));
        assert!(buffer.snapshot().zoomed(0).is_none());
    }
}
