//! FeelTech function generator driver.
//!
//! Fixed-width ASCII commands terminated by `\n`; the instrument never
//! replies, so every operation is a single write. The channel is encoded in
//! the opcode prefix: channel 1 commands start with `WM`, channel 2 with
//! `WF`. Frequencies travel as µHz, zero-padded to exactly 14 digits.

use crate::error::Result;
use crate::instrument::{Channel, Generator, Waveform};
use crate::transport::Transport;
use std::sync::Arc;

/// Render a frequency in Hz as the 14-digit µHz field.
///
/// Conversion is `round(hz · 1_000_000)`; negative inputs clamp to 0.
pub fn format_frequency_uhz(hz: f64) -> String {
    let uhz = (hz * 1_000_000.0).round().max(0.0) as u64;
    format!("{uhz:014}")
}

fn opcode(channel: Channel, letter: char) -> String {
    let prefix = match channel {
        Channel::Ch1 => "WM",
        Channel::Ch2 => "WF",
    };
    format!("{prefix}{letter}")
}

/// FeelTech FY-series generator.
pub struct FeelTechGenerator {
    transport: Arc<dyn Transport>,
}

impl FeelTechGenerator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    fn send(&self, command: &str) -> Result<()> {
        self.transport.write(format!("{command}\n").as_bytes())?;
        Ok(())
    }

    /// Duty cycle in percent, clamped to [0, 100].
    pub fn set_duty_cycle(&self, channel: Channel, percent: f64) -> Result<()> {
        let clamped = percent.clamp(0.0, 100.0);
        self.send(&format!("{}{clamped:.2}", opcode(channel, 'D')))
    }

    /// Starting phase in degrees, taken modulo 360.
    pub fn set_phase(&self, channel: Channel, degrees: f64) -> Result<()> {
        let wrapped = degrees.rem_euclid(360.0);
        self.send(&format!("{}{wrapped:.2}", opcode(channel, 'P')))
    }
}

impl Generator for FeelTechGenerator {
    fn set_waveform(&mut self, channel: Channel, waveform: Waveform) -> Result<()> {
        // Two-digit waveform code; sine is 00.
        self.send(&format!("{}{:02}", opcode(channel, 'W'), waveform.code()))
    }

    fn set_frequency(&mut self, channel: Channel, hz: f64) -> Result<()> {
        self.send(&format!(
            "{}{}",
            opcode(channel, 'F'),
            format_frequency_uhz(hz)
        ))
    }

    fn set_amplitude(&mut self, channel: Channel, volts_peak: f64) -> Result<()> {
        self.send(&format!("{}{volts_peak:.3}", opcode(channel, 'A')))
    }

    fn set_offset(&mut self, channel: Channel, volts: f64) -> Result<()> {
        self.send(&format!("{}{volts:.2}", opcode(channel, 'O')))
    }

    fn set_output(&mut self, channel: Channel, on: bool) -> Result<()> {
        self.send(&format!("{}{}", opcode(channel, 'N'), u8::from(on)))
    }
}
