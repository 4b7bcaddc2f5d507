//! The Bode sweep engine.
//!
//! Drives the generator across a frequency sequence and asks the
//! measurement source for `(Ue, Us, phase)` at each point, producing
//! calibrated [`BodePoint`]s through callbacks and as the final result.
//!
//! The engine borrows its instrument handles and closes nothing. Whatever
//! happens inside the loop (completion, operator abort, an instrument
//! fault), the generator output is commanded off and the source's
//! `end_of_sweep` runs before `run` returns, and the points acquired so far
//! are always part of the result.

use crate::error::{BenchError, Result};
use crate::instrument::{Channel, Generator, Waveform};
use crate::measurement::MeasurementSource;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Frequency spacing of the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepScale {
    Log,
    Lin,
}

/// Inputs of one sweep. Immutable while the sweep runs; build a new value
/// to change parameters between sweeps.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterTestConfig {
    pub generator_channel: Channel,
    pub f_min_hz: f64,
    pub f_max_hz: f64,
    pub n_points: usize,
    pub scale: SweepScale,
    pub settling: Duration,
    pub ue_rms: f64,
}

impl FilterTestConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        generator_channel: Channel,
        f_min_hz: f64,
        f_max_hz: f64,
        n_points: usize,
        scale: SweepScale,
        settling: Duration,
        ue_rms: f64,
    ) -> Result<Self> {
        let config = Self {
            generator_channel,
            f_min_hz,
            f_max_hz,
            n_points,
            scale,
            settling,
            ue_rms,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the sweep preconditions without issuing any I/O.
    ///
    /// A single-point sweep (`n_points == 1`) is legal and may have
    /// `f_min == f_max`; with two or more points the band must be a real
    /// interval.
    pub fn validate(&self) -> Result<()> {
        if self.f_min_hz <= 0.0 {
            return Err(BenchError::ConfigurationInvalid(format!(
                "f_min must be positive, got {}",
                self.f_min_hz
            )));
        }
        if self.n_points == 0 {
            return Err(BenchError::ConfigurationInvalid(
                "sweep needs at least one point".into(),
            ));
        }
        if self.n_points >= 2 && self.f_max_hz <= self.f_min_hz {
            return Err(BenchError::ConfigurationInvalid(format!(
                "f_max ({}) must exceed f_min ({})",
                self.f_max_hz, self.f_min_hz
            )));
        }
        if self.n_points == 1 && self.f_max_hz < self.f_min_hz {
            return Err(BenchError::ConfigurationInvalid(
                "f_max must not be below f_min".into(),
            ));
        }
        if self.ue_rms <= 0.0 {
            return Err(BenchError::ConfigurationInvalid(format!(
                "input amplitude must be positive, got {} Vrms",
                self.ue_rms
            )));
        }
        Ok(())
    }
}

/// One calibrated point of the transfer function.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BodePoint {
    /// Frequency as commanded to the generator.
    pub f_hz: f64,
    /// DUT input, V RMS (measured, or nominal on the multimeter path).
    pub ue_v: f64,
    /// DUT output, V RMS.
    pub us_v: f64,
    pub gain_linear: f64,
    pub gain_db: f64,
    /// CH_Us vs CH_Ue phase, degrees, oscilloscope path only.
    pub phase_deg: Option<f64>,
}

/// Floor applied when the linear gain is not positive.
pub const GAIN_DB_FLOOR: f64 = -200.0;

pub fn gain_linear(us: f64, ue: f64) -> f64 {
    if ue == 0.0 {
        0.0
    } else {
        us / ue
    }
}

pub fn gain_db(us: f64, ue: f64) -> f64 {
    let linear = gain_linear(us, ue);
    if linear <= 0.0 {
        GAIN_DB_FLOOR
    } else {
        20.0 * linear.log10()
    }
}

impl BodePoint {
    pub fn new(f_hz: f64, ue_v: f64, us_v: f64, phase_deg: Option<f64>) -> Self {
        Self {
            f_hz,
            ue_v,
            us_v,
            gain_linear: gain_linear(us_v, ue_v),
            gain_db: gain_db(us_v, ue_v),
            phase_deg,
        }
    }
}

/// The frequency sequence of a sweep.
///
/// Always `n_points` entries with exact endpoints; `[f_min]` when
/// `n_points == 1`; empty when a precondition fails (log scale with a
/// non-positive bound).
pub fn frequency_sequence(config: &FilterTestConfig) -> Vec<f64> {
    let n = config.n_points;
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![config.f_min_hz];
    }
    match config.scale {
        SweepScale::Log => {
            if config.f_min_hz <= 0.0 || config.f_max_hz <= 0.0 {
                return Vec::new();
            }
            let log_min = config.f_min_hz.log10();
            let log_max = config.f_max_hz.log10();
            let step = (log_max - log_min) / (n - 1) as f64;
            (0..n)
                .map(|i| {
                    if i == 0 {
                        config.f_min_hz
                    } else if i == n - 1 {
                        config.f_max_hz
                    } else {
                        10f64.powf(log_min + i as f64 * step)
                    }
                })
                .collect()
        }
        SweepScale::Lin => {
            let step = (config.f_max_hz - config.f_min_hz) / (n - 1) as f64;
            (0..n)
                .map(|i| {
                    if i == n - 1 {
                        config.f_max_hz
                    } else {
                        config.f_min_hz + i as f64 * step
                    }
                })
                .collect()
        }
    }
}

/// Cloneable abort flag for a sweep.
///
/// Set once from the operator thread; the sweep thread polls it at the top
/// of each iteration and between its I/O phases, so the latency of an abort
/// is bounded by one settling delay plus one instrument response.
#[derive(Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a sweep ended.
#[derive(Debug)]
pub enum SweepOutcome {
    Completed,
    Cancelled,
    Failed(BenchError),
}

/// Result of one sweep run: the points acquired so far on every exit path.
#[derive(Debug)]
pub struct SweepResult {
    pub points: Vec<BodePoint>,
    pub outcome: SweepOutcome,
}

impl SweepResult {
    pub fn is_complete(&self) -> bool {
        matches!(self.outcome, SweepOutcome::Completed)
    }
}

/// Extra stabilization before reading the first point.
const FIRST_POINT_EXTRA: Duration = Duration::from_secs(2);

type PointCallback<'a> = Box<dyn FnMut(&BodePoint, usize, usize) + 'a>;
type ProgressCallback<'a> = Box<dyn FnMut(usize, usize) + 'a>;

/// One configured sweep over borrowed instrument handles.
pub struct Sweep<'a> {
    generator: &'a mut dyn Generator,
    source: &'a mut MeasurementSource,
    config: FilterTestConfig,
    cancel: Arc<AtomicBool>,
    on_point: Option<PointCallback<'a>>,
    on_progress: Option<ProgressCallback<'a>>,
    first_point_extra: Duration,
}

impl<'a> Sweep<'a> {
    pub fn new(
        generator: &'a mut dyn Generator,
        source: &'a mut MeasurementSource,
        config: FilterTestConfig,
    ) -> Self {
        Self {
            generator,
            source,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            on_point: None,
            on_progress: None,
            first_point_extra: FIRST_POINT_EXTRA,
        }
    }

    /// Handle for the operator thread to abort the run.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    /// Callback invoked as `(point, index, n_points)` after each point.
    pub fn on_point(mut self, callback: impl FnMut(&BodePoint, usize, usize) + 'a) -> Self {
        self.on_point = Some(Box::new(callback));
        self
    }

    /// Callback invoked as `(done, n_points)` after each point's `on_point`.
    pub fn on_progress(mut self, callback: impl FnMut(usize, usize) + 'a) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// Override the first-point stabilization delay (tests).
    pub fn with_first_point_delay(mut self, delay: Duration) -> Self {
        self.first_point_extra = delay;
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Run the sweep to completion, abort, or failure.
    pub fn run(&mut self) -> SweepResult {
        self.cancel.store(false, Ordering::SeqCst);

        if let Err(e) = self.config.validate() {
            return SweepResult {
                points: Vec::new(),
                outcome: SweepOutcome::Failed(e),
            };
        }
        let frequencies = frequency_sequence(&self.config);
        if frequencies.is_empty() {
            return SweepResult {
                points: Vec::new(),
                outcome: SweepOutcome::Failed(BenchError::ConfigurationInvalid(
                    "empty frequency sequence".into(),
                )),
            };
        }

        info!(
            "sweep: {} points, {:.3} Hz .. {:.3} Hz, Ue {} Vrms",
            frequencies.len(),
            self.config.f_min_hz,
            self.config.f_max_hz,
            self.config.ue_rms
        );

        let mut points = Vec::with_capacity(frequencies.len());
        let loop_result = self.run_points(&frequencies, &mut points);

        // Output-off and source teardown run on every exit path.
        let channel = self.config.generator_channel;
        if let Err(e) = self.generator.set_output(channel, false) {
            warn!("failed to switch generator output off: {e}");
        }
        if let Err(e) = self.source.end_of_sweep() {
            warn!("measurement source teardown failed: {e}");
        }

        let outcome = match loop_result {
            Ok(true) => {
                info!("sweep aborted after {} points", points.len());
                SweepOutcome::Cancelled
            }
            Ok(false) => SweepOutcome::Completed,
            Err(e) => {
                warn!("sweep failed after {} points: {e}", points.len());
                SweepOutcome::Failed(e)
            }
        };
        SweepResult { points, outcome }
    }

    /// Inner loop. `Ok(true)` means the operator aborted.
    fn run_points(&mut self, frequencies: &[f64], points: &mut Vec<BodePoint>) -> Result<bool> {
        let channel = self.config.generator_channel;
        let n = frequencies.len();
        let amplitude_peak = self.config.ue_rms * std::f64::consts::SQRT_2;

        self.generator.set_waveform(channel, Waveform::Sine)?;
        self.generator.set_amplitude(channel, amplitude_peak)?;
        self.generator.set_offset(channel, 0.0)?;
        self.source.prepare_for_sweep()?;

        let mut prev_ue: Option<f64> = None;
        let mut prev_us: Option<f64> = None;

        for (i, &f_hz) in frequencies.iter().enumerate() {
            if self.cancelled() {
                return Ok(true);
            }

            self.generator.set_frequency(channel, f_hz)?;
            self.generator.set_output(channel, true)?;

            if self.cancelled() {
                return Ok(true);
            }

            if i == 0 {
                self.source.prepare_first_point(f_hz)?;
                thread::sleep(self.first_point_extra);
            } else {
                thread::sleep(self.config.settling);
            }

            let reading =
                self.source
                    .read_ue_us_phase(self.config.ue_rms, prev_ue, prev_us, Some(f_hz))?;

            let point = BodePoint::new(f_hz, reading.ue_v, reading.us_v, reading.phase_deg);
            points.push(point.clone());
            if let Some(callback) = self.on_point.as_mut() {
                callback(&point, i, n);
            }
            if let Some(callback) = self.on_progress.as_mut() {
                callback(i + 1, n);
            }

            prev_ue = Some(reading.ue_v);
            prev_us = Some(reading.us_v);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(
        f_min: f64,
        f_max: f64,
        n: usize,
        scale: SweepScale,
    ) -> FilterTestConfig {
        FilterTestConfig {
            generator_channel: Channel::Ch1,
            f_min_hz: f_min,
            f_max_hz: f_max,
            n_points: n,
            scale,
            settling: Duration::ZERO,
            ue_rms: 1.0,
        }
    }

    #[test]
    fn log_sequence_has_constant_ratio_and_exact_endpoints() {
        let seq = frequency_sequence(&config(10.0, 1000.0, 3, SweepScale::Log));
        assert_eq!(seq.len(), 3);
        assert_eq!(seq[0], 10.0);
        assert_eq!(seq[2], 1000.0);
        assert!((seq[1] - 100.0).abs() < 1e-9);

        let seq = frequency_sequence(&config(20.0, 20_000.0, 31, SweepScale::Log));
        let ratio = seq[1] / seq[0];
        for pair in seq.windows(2) {
            assert!((pair[1] / pair[0] - ratio).abs() < 1e-9 * ratio);
        }
    }

    #[test]
    fn lin_sequence_has_constant_difference() {
        let seq = frequency_sequence(&config(100.0, 200.0, 5, SweepScale::Lin));
        assert_eq!(seq, vec![100.0, 125.0, 150.0, 175.0, 200.0]);
    }

    #[test]
    fn single_point_sequence_is_f_min() {
        let seq = frequency_sequence(&config(1000.0, 1000.0, 1, SweepScale::Lin));
        assert_eq!(seq, vec![1000.0]);
    }

    #[test]
    fn log_sequence_with_bad_bound_is_empty() {
        let mut bad = config(10.0, 1000.0, 3, SweepScale::Log);
        bad.f_min_hz = -1.0;
        assert!(frequency_sequence(&bad).is_empty());
    }

    #[test]
    fn gain_laws() {
        assert!((gain_linear(0.707, 1.0) - 0.707).abs() < 1e-12);
        assert_eq!(gain_linear(1.0, 0.0), 0.0);
        assert!((gain_db(0.707, 1.0) - -3.0116).abs() < 1e-3);
        assert_eq!(gain_db(0.0, 1.0), GAIN_DB_FLOOR);
        assert_eq!(gain_db(1.0, 0.0), GAIN_DB_FLOOR);
    }

    #[test]
    fn config_validation() {
        assert!(config(10.0, 1000.0, 3, SweepScale::Log).validate().is_ok());
        assert!(config(1000.0, 1000.0, 1, SweepScale::Lin).validate().is_ok());
        assert!(config(-10.0, 1000.0, 3, SweepScale::Log).validate().is_err());
        assert!(config(1000.0, 10.0, 3, SweepScale::Lin).validate().is_err());
        assert!(config(10.0, 1000.0, 0, SweepScale::Lin).validate().is_err());

        let mut zero_ue = config(10.0, 1000.0, 3, SweepScale::Log);
        zero_ue.ue_rms = 0.0;
        assert!(zero_ue.validate().is_err());
    }

    #[test]
    fn bode_point_carries_gains() {
        let point = BodePoint::new(1000.0, 1.0, 0.707, None);
        assert!((point.gain_linear - 0.707).abs() < 1e-12);
        assert!((point.gain_db - -3.01).abs() < 0.01);
    }
}
