//! Measurement sources for the sweep engine.
//!
//! A measurement source answers one question per sweep point: "what are
//! (Ue, Us, phase) at this frequency?". Two adapters exist, the multimeter
//! (amplitude only, Ue taken as the configured nominal) and the
//! oscilloscope (both amplitudes plus the CH2-vs-CH1 phase), plus a
//! switchable container that delegates to whichever is selected.
//!
//! The set of sources is closed, so dispatch is a plain `match` on the
//! [`MeasurementSource`] enum rather than trait objects.

use crate::error::{BenchError, Result};
use crate::instrument::{Channel, Coupling, Multimeter, PhaseReading, Scope, ScopeMeasurement};
use crate::protocol::scope::{scale_for_rms, snap_horizontal};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// Which concrete source a switchable container delegates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Multimeter,
    Oscilloscope,
}

/// One answer from a source: both amplitudes in V RMS plus the phase in
/// degrees when the source can resolve it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointReading {
    pub ue_v: f64,
    pub us_v: f64,
    pub phase_deg: Option<f64>,
}

/// Map degraded-reading errors (timeout, malformed reply) to `None` so a
/// single bad exchange costs one field, not the sweep.
fn degrade<T>(result: Result<Option<T>>) -> Result<Option<T>> {
    match result {
        Err(e) if e.is_degraded_reading() => {
            warn!("reading degraded: {e}");
            Ok(None)
        }
        other => other,
    }
}

// =============================================================================
// Multimeter adapter
// =============================================================================

/// Amplitude-only adapter: Us from the meter in V-AC mode, Ue nominal.
pub struct MeterSource {
    meter: Box<dyn Multimeter>,
}

impl MeterSource {
    pub fn new(meter: Box<dyn Multimeter>) -> Self {
        Self { meter }
    }

    fn prepare_for_sweep(&mut self) -> Result<()> {
        self.meter.configure_ac_volts()
    }

    fn read(&mut self, ue_nominal: f64) -> Result<PointReading> {
        let us_v = match self.meter.read_value() {
            Ok(value) => value,
            Err(e) if e.is_degraded_reading() => {
                warn!("meter reading degraded: {e}");
                0.0
            }
            Err(e) => return Err(e),
        };
        Ok(PointReading {
            ue_v: ue_nominal,
            us_v,
            phase_deg: None,
        })
    }
}

// =============================================================================
// Oscilloscope adapter
// =============================================================================

/// Settle delays of the oscilloscope adapter.
///
/// The defaults follow the instrument's display pipeline: a new horizontal
/// scale needs a full second before measurements are trustworthy, vertical
/// changes about 50 ms (1 s when no signal has been seen yet).
#[derive(Debug, Clone, Copy)]
pub struct ScopeTimings {
    pub after_coupling: Duration,
    pub after_horizontal: Duration,
    pub after_vertical_first: Duration,
    pub after_vertical: Duration,
}

impl Default for ScopeTimings {
    fn default() -> Self {
        Self {
            after_coupling: Duration::from_millis(50),
            after_horizontal: Duration::from_secs(1),
            after_vertical_first: Duration::from_secs(1),
            after_vertical: Duration::from_millis(50),
        }
    }
}

/// Safe vertical calibre before any signal is known, volts/div.
const START_VERTICAL_V: f64 = 0.5;
/// Vertical calibre restored at end of sweep, volts/div.
const RESET_VERTICAL_V: f64 = 5.0;
/// Aim for roughly three periods on a 10-division screen.
const PERIODS_FACTOR: f64 = 0.3;
/// Default Us vertical scale at or below which phase is skipped, volts/div.
pub const DEFAULT_PHASE_SKIP_SCALE_V: f64 = 0.020;

/// Dual-channel adapter: tracks vertical and horizontal scales across the
/// sweep so amplitude readings stay inside the ADC's accurate window while
/// the frequency moves by decades.
pub struct ScopeSource {
    scope: Box<dyn Scope>,
    ch_ue: Channel,
    ch_us: Channel,
    phase_skip_scale_v: f64,
    timings: ScopeTimings,
    horizontal_s: Option<f64>,
    vertical_ue_v: Option<f64>,
    vertical_us_v: Option<f64>,
    first_point_ready: bool,
    any_read_done: bool,
}

impl ScopeSource {
    pub fn new(scope: Box<dyn Scope>, ch_ue: Channel, ch_us: Channel) -> Self {
        Self {
            scope,
            ch_ue,
            ch_us,
            phase_skip_scale_v: DEFAULT_PHASE_SKIP_SCALE_V,
            timings: ScopeTimings::default(),
            horizontal_s: None,
            vertical_ue_v: None,
            vertical_us_v: None,
            first_point_ready: false,
            any_read_done: false,
        }
    }

    /// Us vertical scale at or below which the signal is too small for a
    /// reliable phase reading.
    pub fn with_phase_skip_scale(mut self, volts_per_div: f64) -> Self {
        self.phase_skip_scale_v = volts_per_div;
        self
    }

    /// Override settle delays (tests).
    pub fn with_timings(mut self, timings: ScopeTimings) -> Self {
        self.timings = timings;
        self
    }

    fn prepare_for_sweep(&mut self) -> Result<()> {
        self.scope.set_coupling(self.ch_ue, Coupling::Ac)?;
        self.scope.set_coupling(self.ch_us, Coupling::Ac)?;
        thread::sleep(self.timings.after_coupling);
        self.horizontal_s = None;
        self.vertical_ue_v = None;
        self.vertical_us_v = None;
        self.first_point_ready = false;
        self.any_read_done = false;
        Ok(())
    }

    fn prepare_first_point(&mut self, f_hz: f64) -> Result<()> {
        let horizontal = snap_horizontal(PERIODS_FACTOR / f_hz);
        self.scope.set_horizontal_scale(horizontal)?;
        self.horizontal_s = Some(horizontal);
        self.set_vertical(self.ch_ue, START_VERTICAL_V)?;
        self.set_vertical(self.ch_us, START_VERTICAL_V)?;
        self.first_point_ready = true;
        Ok(())
    }

    fn set_vertical(&mut self, channel: Channel, volts_per_div: f64) -> Result<()> {
        self.scope.set_vertical_scale(channel, volts_per_div)?;
        if channel == self.ch_ue {
            self.vertical_ue_v = Some(volts_per_div);
        }
        if channel == self.ch_us {
            self.vertical_us_v = Some(volts_per_div);
        }
        Ok(())
    }

    /// Re-track both axes for the next point from the previous amplitudes.
    fn adapt(&mut self, prev_ue: Option<f64>, prev_us: Option<f64>, f_hz: Option<f64>) -> Result<()> {
        if let Some(f) = f_hz {
            let horizontal = snap_horizontal(PERIODS_FACTOR / f);
            if self.horizontal_s != Some(horizontal) {
                self.scope.set_horizontal_scale(horizontal)?;
                self.horizontal_s = Some(horizontal);
                thread::sleep(self.timings.after_horizontal);
            }
        }

        let target_ue = prev_ue.map(scale_for_rms).unwrap_or(START_VERTICAL_V);
        let target_us = prev_us.map(scale_for_rms).unwrap_or(START_VERTICAL_V);
        let mut changed = false;
        if self.vertical_ue_v != Some(target_ue) {
            self.set_vertical(self.ch_ue, target_ue)?;
            changed = true;
        }
        if self.vertical_us_v != Some(target_us) {
            self.set_vertical(self.ch_us, target_us)?;
            changed = true;
        }
        if changed {
            let settle = if self.any_read_done {
                self.timings.after_vertical
            } else {
                self.timings.after_vertical_first
            };
            thread::sleep(settle);
        }
        Ok(())
    }

    /// RMS amplitude of one channel: cycle RMS first, then peak-to-peak
    /// over 2√2, then true RMS.
    fn read_channel_rms(&mut self, channel: Channel) -> Result<Option<f64>> {
        if let Some(rms) = degrade(self.scope.read_measurement(channel, ScopeMeasurement::CycleRms))? {
            return Ok(Some(rms));
        }
        if let Some(pkpk) = degrade(self.scope.read_measurement(channel, ScopeMeasurement::PeakToPeak))? {
            return Ok(Some(pkpk / (2.0 * std::f64::consts::SQRT_2)));
        }
        degrade(self.scope.read_measurement(channel, ScopeMeasurement::TrueRms))
    }

    fn read_phase_deg(&mut self, period_s: Option<f64>) -> Result<Option<f64>> {
        let us_scale = self.vertical_us_v.unwrap_or(START_VERTICAL_V);
        if us_scale <= self.phase_skip_scale_v {
            debug!("phase skipped: Us scale {us_scale} V/div at or below threshold");
            return Ok(None);
        }
        let reading = match degrade(self.scope.read_phase(self.ch_us))? {
            Some(reading) => reading,
            None => return Ok(None),
        };
        let phase = match reading {
            PhaseReading { value, in_degrees: true } => Some(value),
            PhaseReading { value, in_degrees: false } => match period_s {
                Some(period) if period > 0.0 => Some(value / period * 360.0),
                _ if value.abs() <= 360.0 => Some(value),
                _ => None,
            },
        };
        Ok(phase)
    }

    fn read(
        &mut self,
        prev_ue: Option<f64>,
        prev_us: Option<f64>,
        f_hz: Option<f64>,
    ) -> Result<PointReading> {
        let direct_first = self.first_point_ready && !self.any_read_done;
        if !direct_first {
            self.adapt(prev_ue, prev_us, f_hz)?;
        }
        self.any_read_done = true;

        let ue_v = self.read_channel_rms(self.ch_ue)?.unwrap_or(0.0);
        let us_v = self.read_channel_rms(self.ch_us)?.unwrap_or(0.0);
        let period_s = degrade(self.scope.read_measurement(self.ch_ue, ScopeMeasurement::Period))?;
        let phase_deg = self.read_phase_deg(period_s)?;

        Ok(PointReading { ue_v, us_v, phase_deg })
    }

    fn end_of_sweep(&mut self) -> Result<()> {
        self.set_vertical(self.ch_ue, RESET_VERTICAL_V)?;
        self.set_vertical(self.ch_us, RESET_VERTICAL_V)?;
        self.first_point_ready = false;
        Ok(())
    }
}

// =============================================================================
// Switchable container
// =============================================================================

/// Lazily builds the oscilloscope source, so connecting the scope after the
/// bench is assembled does not require rebuilding the sweep engine.
pub type ScopeFactory = Box<dyn FnMut() -> Option<ScopeSource> + Send>;

/// Holds both adapters and delegates to the selected one.
pub struct SwitchableSource {
    current: SourceKind,
    meter: MeterSource,
    scope: Option<ScopeSource>,
    scope_factory: Option<ScopeFactory>,
}

impl SwitchableSource {
    pub fn new(meter: MeterSource, scope_factory: Option<ScopeFactory>) -> Self {
        Self {
            current: SourceKind::Multimeter,
            meter,
            scope: None,
            scope_factory,
        }
    }

    pub fn current(&self) -> SourceKind {
        self.current
    }

    /// Switch the active source. Selecting the oscilloscope when none can be
    /// produced is rejected: returns `false` and stays on the multimeter.
    pub fn select(&mut self, kind: SourceKind) -> bool {
        match kind {
            SourceKind::Multimeter => {
                self.current = SourceKind::Multimeter;
                true
            }
            SourceKind::Oscilloscope => {
                if self.scope.is_none() {
                    self.scope = self.scope_factory.as_mut().and_then(|factory| factory());
                }
                if self.scope.is_some() {
                    self.current = SourceKind::Oscilloscope;
                    true
                } else {
                    false
                }
            }
        }
    }
}

// =============================================================================
// Sealed source enum
// =============================================================================

/// The measurement source handed to the sweep engine.
pub enum MeasurementSource {
    Multimeter(MeterSource),
    Oscilloscope(ScopeSource),
    Switchable(SwitchableSource),
}

impl MeasurementSource {
    pub fn multimeter(meter: Box<dyn Multimeter>) -> Self {
        MeasurementSource::Multimeter(MeterSource::new(meter))
    }

    pub fn oscilloscope(scope: ScopeSource) -> Self {
        MeasurementSource::Oscilloscope(scope)
    }

    pub fn switchable(meter: MeterSource, scope_factory: Option<ScopeFactory>) -> Self {
        MeasurementSource::Switchable(SwitchableSource::new(meter, scope_factory))
    }

    /// Called once when a sweep starts.
    pub fn prepare_for_sweep(&mut self) -> Result<()> {
        match self {
            MeasurementSource::Multimeter(meter) => meter.prepare_for_sweep(),
            MeasurementSource::Oscilloscope(scope) => scope.prepare_for_sweep(),
            MeasurementSource::Switchable(switchable) => match switchable.current {
                SourceKind::Multimeter => switchable.meter.prepare_for_sweep(),
                SourceKind::Oscilloscope => switchable
                    .scope
                    .as_mut()
                    .ok_or(BenchError::TransportNotOpen)?
                    .prepare_for_sweep(),
            },
        }
    }

    /// Called once before the first settling delay of a sweep.
    pub fn prepare_first_point(&mut self, f_hz: f64) -> Result<()> {
        match self {
            MeasurementSource::Multimeter(_) => Ok(()),
            MeasurementSource::Oscilloscope(scope) => scope.prepare_first_point(f_hz),
            MeasurementSource::Switchable(switchable) => match switchable.current {
                SourceKind::Multimeter => Ok(()),
                SourceKind::Oscilloscope => switchable
                    .scope
                    .as_mut()
                    .ok_or(BenchError::TransportNotOpen)?
                    .prepare_first_point(f_hz),
            },
        }
    }

    /// Called once per point, after the settling delay.
    pub fn read_ue_us_phase(
        &mut self,
        ue_nominal: f64,
        prev_ue: Option<f64>,
        prev_us: Option<f64>,
        f_hz: Option<f64>,
    ) -> Result<PointReading> {
        match self {
            MeasurementSource::Multimeter(meter) => meter.read(ue_nominal),
            MeasurementSource::Oscilloscope(scope) => scope.read(prev_ue, prev_us, f_hz),
            MeasurementSource::Switchable(switchable) => match switchable.current {
                SourceKind::Multimeter => switchable.meter.read(ue_nominal),
                SourceKind::Oscilloscope => switchable
                    .scope
                    .as_mut()
                    .ok_or(BenchError::TransportNotOpen)?
                    .read(prev_ue, prev_us, f_hz),
            },
        }
    }

    /// Called once on any sweep exit path.
    pub fn end_of_sweep(&mut self) -> Result<()> {
        match self {
            MeasurementSource::Multimeter(_) => Ok(()),
            MeasurementSource::Oscilloscope(scope) => scope.end_of_sweep(),
            MeasurementSource::Switchable(switchable) => match switchable.current {
                SourceKind::Multimeter => Ok(()),
                SourceKind::Oscilloscope => switchable
                    .scope
                    .as_mut()
                    .ok_or(BenchError::TransportNotOpen)?
                    .end_of_sweep(),
            },
        }
    }
}
