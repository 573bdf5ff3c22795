//! Integration tests for the run sequencer against the simulated rig.
//!
//! Covers the full acquisition loop: repeated sweeps, buffer resets,
//! independent-variable derivation, direction alternation, the busy guard,
//! and failure surfacing.

use grad_daq::acquisition::{RunConfig, RunMode, RunSequencer, RunState, SweepKind};
use grad_daq::data::RunStorage;
use grad_daq::error::GradError;
use grad_daq::hardware::mock::{MockGradiometer, RunRecord};
use grad_daq::hardware::{GradiometerDriver, SampleSink};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn fast_rig() -> Arc<MockGradiometer> {
    Arc::new(
        MockGradiometer::new()
            .with_timing(Duration::ZERO, Duration::from_millis(1))
            .without_noise(),
    )
}

fn fast_sequencer(driver: Arc<MockGradiometer>, kind: SweepKind) -> RunSequencer {
    RunSequencer::new(driver, kind).with_settle(Duration::from_millis(1))
}

fn pos_config(start_cm: f64, stop_cm: f64, repeats: u32, tag: &str) -> RunConfig {
    RunConfig {
        mode: RunMode::PositionSweep {
            start_cm,
            stop_cm,
            samples_per_position: 5,
        },
        repeats,
        tag: tag.to_string(),
    }
}

fn time_config(duration: Duration, repeats: u32) -> RunConfig {
    RunConfig {
        mode: RunMode::TimeSweep {
            duration,
            scan_freq_hz: 500,
            position_cm: None,
        },
        repeats,
        tag: "time".to_string(),
    }
}

#[tokio::test]
async fn end_to_end_position_run() {
    let dir = tempdir().expect("tempdir");
    let rig = fast_rig();
    let sequencer = fast_sequencer(rig.clone(), SweepKind::Position)
        .with_storage(RunStorage::new(dir.path()));
    let buffer = sequencer.buffer();

    let mut handle = sequencer.start(pos_config(0.0, 10.0, 2, "T1")).expect("start");
    let state = handle.wait().await;
    assert!(matches!(state, RunState::Complete { .. }));

    // Exactly two buffer resets for two repeats.
    assert_eq!(buffer.run_number(), 2);

    // Repeat 0 sweeps start->stop, repeat 1 sweeps stop->start.
    let log = rig.run_log();
    assert_eq!(
        log,
        vec![
            RunRecord::Pos {
                start_cm: 0.0,
                stop_cm: 10.0,
                tag: "T1".to_string()
            },
            RunRecord::Pos {
                start_cm: 10.0,
                stop_cm: 0.0,
                tag: "T1".to_string()
            },
        ]
    );

    // The retained repeat is the second one: descending positions with the
    // per-axis probe offsets applied.
    let snapshot = buffer.snapshot();
    let len = snapshot.axes[0].len();
    assert!(len > 0);
    assert!(snapshot.axes.iter().all(|a| a.len() == len));
    assert_eq!(snapshot.axes[1].x[0], 10.0);
    assert_eq!(snapshot.axes[1].x[len - 1], 0.0);
    assert_eq!(snapshot.axes[0].x[0], 10.0 - 3.0);
    assert_eq!(snapshot.axes[2].x[0], 10.0 - 1.5);
    assert!(snapshot.axes[1].x.windows(2).all(|w| w[0] >= w[1]));

    // One persisted CSV per repeat.
    let files = std::fs::read_dir(dir.path()).expect("read_dir").count();
    assert_eq!(files, 2);
}

#[tokio::test]
async fn time_run_anchors_time_at_zero() {
    let rig = fast_rig();
    let sequencer = fast_sequencer(rig, SweepKind::Time);
    let buffer = sequencer.buffer();

    let mut handle = sequencer
        .start(time_config(Duration::from_millis(10), 1))
        .expect("start");
    assert!(matches!(handle.wait().await, RunState::Complete { .. }));

    let snapshot = buffer.snapshot();
    assert!(snapshot.axes[0].len() > 1);
    assert_eq!(snapshot.axes[0].x[0], 0.0);
    assert!(snapshot.axes[0].x.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn starting_is_refused_while_a_run_is_alive() {
    let rig = fast_rig();
    let sequencer = fast_sequencer(rig, SweepKind::Time);

    let mut handle = sequencer
        .start(time_config(Duration::from_millis(200), 1))
        .expect("start");
    assert!(!sequencer.can_start());

    let second = sequencer.start(time_config(Duration::from_millis(10), 1));
    assert!(matches!(second, Err(GradError::RunActive)));

    // Once the worker terminates the guard is released, and only then.
    assert!(matches!(handle.wait().await, RunState::Complete { .. }));
    assert!(sequencer.can_start());
    let mut third = sequencer
        .start(time_config(Duration::from_millis(10), 1))
        .expect("start after completion");
    assert!(matches!(third.wait().await, RunState::Complete { .. }));
}

struct FailingDriver;

#[async_trait::async_trait]
impl GradiometerDriver for FailingDriver {
    async fn zero(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn go_to(&self, _position_cm: f64) -> anyhow::Result<u64> {
        Err(anyhow::anyhow!("probe disconnected"))
    }

    async fn pos_run(
        &self,
        _start_cm: f64,
        _stop_cm: f64,
        _tag: &str,
        _samples_per_position: u32,
        _sink: &dyn SampleSink,
    ) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("probe disconnected"))
    }

    async fn time_run(
        &self,
        _duration: Duration,
        _tag: &str,
        _position_cm: Option<f64>,
        _scan_freq_hz: u32,
        _sink: &dyn SampleSink,
    ) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("probe disconnected"))
    }

    async fn position(&self) -> anyhow::Result<f64> {
        Ok(0.0)
    }

    async fn turn_off_motors(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close_daq_channel(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn hardware_failure_marks_run_failed_and_releases_guard() {
    let sequencer = fast_sequencer_with(Arc::new(FailingDriver), SweepKind::Position);

    let mut handle = sequencer.start(pos_config(0.0, 10.0, 2, "T1")).expect("start");
    match handle.wait().await {
        RunState::Failed { reason, .. } => assert!(reason.contains("probe disconnected")),
        other => panic!("expected failure, got {other:?}"),
    }

    // The failure released the guard: a new run may start.
    assert!(sequencer.can_start());
    assert!(sequencer.start(pos_config(0.0, 10.0, 1, "T2")).is_ok());
}

fn fast_sequencer_with(driver: Arc<dyn GradiometerDriver>, kind: SweepKind) -> RunSequencer {
    RunSequencer::new(driver, kind).with_settle(Duration::from_millis(1))
}

#[tokio::test]
async fn malformed_configs_are_rejected_before_any_state_change() {
    let rig = fast_rig();
    let sequencer = fast_sequencer(rig, SweepKind::Position);
    let buffer = sequencer.buffer();

    let cases = [
        pos_config(0.0, 10.0, 0, "T1"), // zero repeats
        pos_config(5.0, 5.0, 1, "T1"),  // start == stop
        pos_config(0.0, 10.0, 1, ""),   // empty tag
        pos_config(0.0, 10.0, 1, "a/b"), // path separator in tag
        RunConfig {
            mode: RunMode::PositionSweep {
                start_cm: 0.0,
                stop_cm: 10.0,
                samples_per_position: 0,
            },
            repeats: 1,
            tag: "T1".to_string(),
        },
    ];
    for config in cases {
        assert!(matches!(
            sequencer.start(config),
            Err(GradError::InvalidInput(_))
        ));
    }

    // Scan frequency outside 1..=5000 on a time sequencer.
    let time_seq = fast_sequencer(fast_rig(), SweepKind::Time);
    let mut config = time_config(Duration::from_millis(10), 1);
    if let RunMode::TimeSweep { scan_freq_hz, .. } = &mut config.mode {
        *scan_freq_hz = 5001;
    }
    assert!(matches!(
        time_seq.start(config),
        Err(GradError::InvalidInput(_))
    ));

    // Nothing ran: no reset ever happened.
    assert_eq!(buffer.run_number(), 0);
    assert!(sequencer.can_start());
}

#[tokio::test]
async fn mode_must_match_the_sequencer_sweep_kind() {
    let sequencer = fast_sequencer(fast_rig(), SweepKind::Position);
    let result = sequencer.start(time_config(Duration::from_millis(10), 1));
    assert!(matches!(result, Err(GradError::InvalidInput(_))));
}
