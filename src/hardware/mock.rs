//! Mock gradiometer implementation.
//!
//! Simulates the motorized rig for tests and dry runs without physical
//! hardware. All waits use `tokio::time::sleep`, never `std::thread::sleep`.
//!
//! Timing defaults are deliberately quick (10 ms/cm motion, 20 ms between
//! samples); tests shrink them further with [`MockGradiometer::with_timing`].

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;

use crate::hardware::{GradiometerDriver, Sample, SampleSink};

/// Record of one driver invocation, for assertions in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum RunRecord {
    /// A position sweep was requested.
    Pos {
        /// Sweep origin, in cm
        start_cm: f64,
        /// Sweep destination, in cm
        stop_cm: f64,
        /// Operator tag
        tag: String,
    },
    /// A time run was requested.
    Time {
        /// Optional reposition target, in cm
        position_cm: Option<f64>,
        /// Operator tag
        tag: String,
    },
}

/// Simulated gradiometer rig.
///
/// Tracks carriage position, produces a smooth synthetic field gradient with
/// optional noise, and logs every run invocation so tests can assert on
/// sweep direction and ordering.
pub struct MockGradiometer {
    position_cm: RwLock<f64>,
    steps_per_cm: f64,
    move_delay_per_cm: Duration,
    sample_interval: Duration,
    noise_ut: f64,
    motors_on: AtomicBool,
    channel_open: AtomicBool,
    run_log: Mutex<Vec<RunRecord>>,
}

impl MockGradiometer {
    /// Create a mock rig at position 0 with default timing.
    ///
    /// The default step scale is 8.75 steps/cm, which makes the standard
    /// 80 cm calibration displacement come out at exactly 700 steps.
    pub fn new() -> Self {
        Self {
            position_cm: RwLock::new(0.0),
            steps_per_cm: 8.75,
            move_delay_per_cm: Duration::from_millis(10),
            sample_interval: Duration::from_millis(20),
            noise_ut: 0.05,
            motors_on: AtomicBool::new(true),
            channel_open: AtomicBool::new(true),
            run_log: Mutex::new(Vec::new()),
        }
    }

    /// Override motion and sampling delays (tests).
    pub fn with_timing(mut self, move_delay_per_cm: Duration, sample_interval: Duration) -> Self {
        self.move_delay_per_cm = move_delay_per_cm;
        self.sample_interval = sample_interval;
        self
    }

    /// Override the step scale.
    pub fn with_steps_per_cm(mut self, steps_per_cm: f64) -> Self {
        self.steps_per_cm = steps_per_cm;
        self
    }

    /// Disable measurement noise for deterministic output.
    pub fn without_noise(mut self) -> Self {
        self.noise_ut = 0.0;
        self
    }

    /// Whether the stepper coils are still energized.
    pub fn motors_on(&self) -> bool {
        self.motors_on.load(Ordering::SeqCst)
    }

    /// Whether the sampling channel is still open.
    pub fn channel_open(&self) -> bool {
        self.channel_open.load(Ordering::SeqCst)
    }

    /// Invocations recorded so far, in call order.
    pub fn run_log(&self) -> Vec<RunRecord> {
        self.run_log
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn log_run(&self, record: RunRecord) {
        self.run_log
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(record);
    }

    /// Synthetic field at a position: a gentle gradient per axis with noise.
    fn sample_at(&self, position_cm: f64, averaged: u32) -> Sample {
        let mut rng = rand::thread_rng();
        let mut noise = || {
            if self.noise_ut > 0.0 {
                rng.gen_range(-self.noise_ut..self.noise_ut)
            } else {
                0.0
            }
        };
        let std = if averaged > 0 {
            self.noise_ut / (averaged as f64).sqrt()
        } else {
            self.noise_ut
        };

        let base = [
            48.0 + 0.12 * position_cm,
            -3.5 + 0.02 * position_cm,
            21.0 - 0.07 * position_cm,
        ];
        let mut field_lower = [0.0; 3];
        let mut field_upper = [0.0; 3];
        for i in 0..3 {
            field_lower[i] = base[i] + noise();
            // Upper fluxgate is further from the source and reads a fixed
            // fraction of the lower field.
            field_upper[i] = base[i] * 0.96 + noise();
        }
        Sample {
            position_cm,
            field_lower,
            field_upper,
            std_lower: [std; 3],
            std_upper: [std; 3],
        }
    }

    async fn move_to(&self, target_cm: f64) -> u64 {
        let current = *self.position_cm.read().await;
        let distance = (target_cm - current).abs();
        let delay = self.move_delay_per_cm.mul_f64(distance);
        sleep(delay).await;
        *self.position_cm.write().await = target_cm;
        (distance * self.steps_per_cm).round() as u64
    }
}

impl Default for MockGradiometer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GradiometerDriver for MockGradiometer {
    async fn zero(&self) -> Result<()> {
        *self.position_cm.write().await = 0.0;
        Ok(())
    }

    async fn go_to(&self, position_cm: f64) -> Result<u64> {
        if !position_cm.is_finite() {
            return Err(anyhow!("target position must be finite"));
        }
        Ok(self.move_to(position_cm).await)
    }

    async fn pos_run(
        &self,
        start_cm: f64,
        stop_cm: f64,
        tag: &str,
        samples_per_position: u32,
        sink: &dyn SampleSink,
    ) -> Result<()> {
        if samples_per_position == 0 {
            return Err(anyhow!("samples_per_position must be at least 1"));
        }
        self.log_run(RunRecord::Pos {
            start_cm,
            stop_cm,
            tag: tag.to_string(),
        });

        // One sampled position per centimetre of travel, endpoints included.
        let span = (stop_cm - start_cm).abs();
        let count = span.round().max(1.0) as u32;
        let step = (stop_cm - start_cm) / count as f64;

        for k in 0..=count {
            let target = if k == count {
                stop_cm
            } else {
                start_cm + step * k as f64
            };
            self.move_to(target).await;
            sleep(self.sample_interval).await;
            sink.record(self.sample_at(target, samples_per_position));
        }
        Ok(())
    }

    async fn time_run(
        &self,
        duration: Duration,
        tag: &str,
        position_cm: Option<f64>,
        scan_freq_hz: u32,
        sink: &dyn SampleSink,
    ) -> Result<()> {
        if scan_freq_hz == 0 {
            return Err(anyhow!("scan frequency must be at least 1 Hz"));
        }
        self.log_run(RunRecord::Time {
            position_cm,
            tag: tag.to_string(),
        });

        if let Some(target) = position_cm {
            self.move_to(target).await;
        }
        let held = *self.position_cm.read().await;

        // The real rig streams at scan_freq_hz and averages into chunks; the
        // mock emits one averaged sample per sample_interval.
        let callbacks = (duration.as_secs_f64() / self.sample_interval.as_secs_f64())
            .ceil()
            .max(1.0) as u32;
        let per_chunk = (scan_freq_hz as f64 * self.sample_interval.as_secs_f64()).max(1.0) as u32;

        for _ in 0..callbacks {
            sink.record(self.sample_at(held, per_chunk));
            sleep(self.sample_interval).await;
        }
        Ok(())
    }

    async fn position(&self) -> Result<f64> {
        Ok(*self.position_cm.read().await)
    }

    async fn turn_off_motors(&self) -> Result<()> {
        self.motors_on.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close_daq_channel(&self) -> Result<()> {
        self.channel_open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct CollectSink {
        samples: StdMutex<Vec<Sample>>,
    }

    impl CollectSink {
        fn new() -> Self {
            Self {
                samples: StdMutex::new(Vec::new()),
            }
        }

        fn take(&self) -> Vec<Sample> {
            self.samples
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
        }
    }

    impl SampleSink for CollectSink {
        fn record(&self, sample: Sample) {
            self.samples
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(sample);
        }
    }

    fn fast_mock() -> MockGradiometer {
        MockGradiometer::new()
            .with_timing(Duration::ZERO, Duration::from_millis(1))
            .without_noise()
    }

    #[tokio::test]
    async fn calibration_displacement_yields_700_steps() {
        let rig = fast_mock();
        rig.zero().await.expect("zero");
        let steps = rig.go_to(80.0).await.expect("go_to");
        assert_eq!(steps, 700);
    }

    #[tokio::test]
    async fn pos_run_covers_endpoints_in_order() {
        let rig = fast_mock();
        let sink = CollectSink::new();
        rig.pos_run(0.0, 10.0, "t", 5, &sink).await.expect("run");
        let samples = sink.take();
        assert_eq!(samples.len(), 11);
        assert_eq!(samples[0].position_cm, 0.0);
        assert_eq!(samples.last().map(|s| s.position_cm), Some(10.0));
        assert!(samples.windows(2).all(|w| w[0].position_cm <= w[1].position_cm));
    }

    #[tokio::test]
    async fn pos_run_sweeps_backwards_too() {
        let rig = fast_mock();
        let sink = CollectSink::new();
        rig.pos_run(10.0, 0.0, "t", 5, &sink).await.expect("run");
        let samples = sink.take();
        assert_eq!(samples[0].position_cm, 10.0);
        assert_eq!(samples.last().map(|s| s.position_cm), Some(0.0));
    }

    #[tokio::test]
    async fn upper_fluxgate_reads_a_fixed_fraction_of_the_lower() {
        let rig = fast_mock();
        let sink = CollectSink::new();
        rig.pos_run(0.0, 2.0, "t", 1, &sink).await.expect("run");
        for sample in sink.take() {
            for i in 0..3 {
                assert!((sample.field_upper[i] - sample.field_lower[i] * 0.96).abs() < 1e-9);
            }
        }
    }

    #[tokio::test]
    async fn time_run_repositions_then_holds() {
        let rig = fast_mock();
        let sink = CollectSink::new();
        rig.time_run(Duration::from_millis(5), "t", Some(4.0), 500, &sink)
            .await
            .expect("run");
        let samples = sink.take();
        assert!(!samples.is_empty());
        assert!(samples.iter().all(|s| s.position_cm == 4.0));
        assert_eq!(rig.position().await.expect("pos"), 4.0);
    }

    #[tokio::test]
    async fn shutdown_hooks_flip_flags() {
        let rig = fast_mock();
        assert!(rig.motors_on());
        assert!(rig.channel_open());
        rig.turn_off_motors().await.expect("motors");
        rig.close_daq_channel().await.expect("channel");
        assert!(!rig.motors_on());
        assert!(!rig.channel_open());
        // Hooks are idempotent.
        rig.turn_off_motors().await.expect("motors again");
    }
}
