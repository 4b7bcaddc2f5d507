//! Instrument capability traits.
//!
//! This module defines small, role-focused traits that concrete protocol
//! drivers implement. Instead of one monolithic `Instrument` trait, each
//! bench role gets the handful of semantic operations the rest of the crate
//! actually needs:
//!
//! - A multimeter implements [`Multimeter`] (AC-volts configuration + read).
//! - A function generator implements [`Generator`].
//! - A programmable supply implements [`PowerSupply`].
//! - An oscilloscope implements [`Scope`].
//!
//! This keeps contracts clear, lets tests mock a single capability, and lets
//! the sweep engine work against trait bounds instead of concrete drivers.
//!
//! All traits are synchronous: every bench operation is one bounded
//! command/response exchange on a dedicated thread, and suspension happens in
//! the transport's timeouts, not in an executor.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// One of the two instrument channels used on this bench.
///
/// Both the generator and the oscilloscope are dual-channel; configuration
/// records identify channels by the numbers 1 and 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    Ch1,
    Ch2,
}

impl Channel {
    /// Channel number as printed in commands and configuration (1 or 2).
    pub fn number(self) -> u8 {
        match self {
            Channel::Ch1 => 1,
            Channel::Ch2 => 2,
        }
    }

    /// Parse a configuration channel number.
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Channel::Ch1),
            2 => Some(Channel::Ch2),
            _ => None,
        }
    }
}

/// Generator waveform selection.
///
/// The wire encoding is a two-digit code; sine is code 0 and is the only
/// waveform the sweep engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Triangle,
    SawtoothUp,
    SawtoothDown,
}

impl Waveform {
    /// Two-digit wire code.
    pub fn code(self) -> u8 {
        match self {
            Waveform::Sine => 0,
            Waveform::Square => 1,
            Waveform::Triangle => 2,
            Waveform::SawtoothUp => 3,
            Waveform::SawtoothDown => 4,
        }
    }
}

/// Oscilloscope input coupling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coupling {
    Dc,
    Ac,
    Gnd,
}

/// Per-channel measurement types the oscilloscope can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeMeasurement {
    CycleRms,
    PeakToPeak,
    TrueRms,
    Period,
    Max,
    Min,
    Amplitude,
    RiseTime,
    FallTime,
}

/// A parsed phase-delay reading.
///
/// Depending on firmware the scope reports the CH2-vs-CH1 delay either
/// directly in degrees or as a time delay in seconds; `in_degrees`
/// distinguishes the two. Callers that need strict degrees must check it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseReading {
    pub value: f64,
    pub in_degrees: bool,
}

/// Capability: RMS voltage measurement (digital multimeter).
pub trait Multimeter: Send {
    /// Put the meter in V-AC mode with auto-range.
    fn configure_ac_volts(&mut self) -> Result<()>;

    /// Read one value from the primary display.
    fn read_value(&mut self) -> Result<f64>;
}

/// Capability: signal generation (function generator).
///
/// # Contract
/// - Amplitude is the peak value in volts, not RMS.
/// - Commands are fire-and-forget; the device sends no acknowledgement.
pub trait Generator: Send {
    fn set_waveform(&mut self, channel: Channel, waveform: Waveform) -> Result<()>;
    fn set_frequency(&mut self, channel: Channel, hz: f64) -> Result<()>;
    fn set_amplitude(&mut self, channel: Channel, volts_peak: f64) -> Result<()>;
    fn set_offset(&mut self, channel: Channel, volts: f64) -> Result<()>;
    fn set_output(&mut self, channel: Channel, on: bool) -> Result<()>;
}

/// Capability: programmable DC supply.
pub trait PowerSupply: Send {
    fn set_voltage(&mut self, volts: f64) -> Result<()>;
    fn voltage(&mut self) -> Result<f64>;
    fn set_current(&mut self, amps: f64) -> Result<()>;
    fn current(&mut self) -> Result<f64>;
    fn set_output(&mut self, on: bool) -> Result<()>;
    fn output(&mut self) -> Result<bool>;
}

/// Capability: dual-channel oscilloscope.
///
/// # Contract
/// - Scale setters take the value in base units (volts/div, seconds/div);
///   the driver renders the device-accepted literal.
/// - `read_measurement` returns `Ok(None)` when the instrument replied but
///   the value could not be parsed; transport faults are `Err`.
pub trait Scope: Send {
    fn set_coupling(&mut self, channel: Channel, coupling: Coupling) -> Result<()>;
    fn set_vertical_scale(&mut self, channel: Channel, volts_per_div: f64) -> Result<()>;
    fn set_horizontal_scale(&mut self, seconds_per_div: f64) -> Result<()>;
    fn read_measurement(
        &mut self,
        channel: Channel,
        kind: ScopeMeasurement,
    ) -> Result<Option<f64>>;
    fn read_phase(&mut self, channel: Channel) -> Result<Option<PhaseReading>>;
}
