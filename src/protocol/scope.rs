//! Vendor-SCPI driver for the USB oscilloscope.
//!
//! A line-oriented SCPI dialect carried as UTF-8 text over bulk endpoints.
//! The device only accepts scale literals from its own table, so vertical
//! and horizontal scales are snapped to supported values and rendered in the
//! exact spelling the firmware expects (`500mV`, `1.0ms`, `2us`, ...).
//!
//! Measurement replies come back as `LABEL : value[unit]` or bare
//! `value[unit]`. The degree sign in phase replies is sent as Latin-1 0xB0,
//! which the lossy UTF-8 decode turns into U+FFFD; both spellings are
//! recognized.

use crate::error::Result;
use crate::instrument::{Channel, Coupling, PhaseReading, Scope, ScopeMeasurement};
use crate::transport::Transport;
use std::sync::Arc;

/// Vertical scales the device accepts, in volts/division.
pub const VERTICAL_SCALES: [f64; 12] = [
    0.002, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0,
];

/// Horizontal scales the device accepts, in seconds/division (1-2-5 steps).
pub const HORIZONTAL_SCALES: [f64; 36] = [
    2e-9, 5e-9, 1e-8, 2e-8, 5e-8, 1e-7, 2e-7, 5e-7, 1e-6, 2e-6, 5e-6, 1e-5, 2e-5, 5e-5, 1e-4,
    2e-4, 5e-4, 1e-3, 2e-3, 5e-3, 1e-2, 2e-2, 5e-2, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0,
    50.0, 100.0, 200.0, 500.0, 1000.0,
];

/// Smallest supported vertical scale whose 8 displayed divisions hold the
/// peak-to-peak of a sine with the given RMS value without clipping
/// (`scale · 8 ≥ 2√2 · v_rms`).
pub fn scale_for_rms(v_rms: f64) -> f64 {
    let peak_to_peak = 2.0 * std::f64::consts::SQRT_2 * v_rms;
    for &scale in &VERTICAL_SCALES {
        if scale * 8.0 >= peak_to_peak {
            return scale;
        }
    }
    VERTICAL_SCALES[VERTICAL_SCALES.len() - 1]
}

/// Smallest supported horizontal step at or above the ideal seconds/div.
pub fn snap_horizontal(ideal_s_per_div: f64) -> f64 {
    for &scale in &HORIZONTAL_SCALES {
        if scale >= ideal_s_per_div {
            return scale;
        }
    }
    HORIZONTAL_SCALES[HORIZONTAL_SCALES.len() - 1]
}

/// Render a vertical scale as the device literal.
///
/// Below one volt the literal is millivolts with an optional decimal
/// (`2.5mV`, `500mV`); from one volt up it is integer or single-decimal
/// volts (`1V`, `5V`).
pub fn format_vertical(volts_per_div: f64) -> String {
    if volts_per_div < 1.0 {
        let millivolts = volts_per_div * 1000.0;
        if (millivolts - millivolts.round()).abs() < 1e-9 {
            format!("{}mV", millivolts.round() as u32)
        } else {
            format!("{millivolts:.1}mV")
        }
    } else if (volts_per_div - volts_per_div.round()).abs() < 1e-9 {
        format!("{}V", volts_per_div.round() as u32)
    } else {
        format!("{volts_per_div:.1}V")
    }
}

/// Render a horizontal scale as the device literal.
///
/// Single-digit mantissas in the millisecond and second decades carry an
/// explicit `.0` (`1.0ms`, `5.0ms`, `1.0s`); everything else is integer
/// (`10ms`, `500ns`, `2us`, `1000s`).
pub fn format_horizontal(seconds_per_div: f64) -> String {
    let (value, unit) = if seconds_per_div >= 1.0 {
        (seconds_per_div, "s")
    } else if seconds_per_div >= 1e-3 {
        (seconds_per_div * 1e3, "ms")
    } else if seconds_per_div >= 1e-6 {
        (seconds_per_div * 1e6, "us")
    } else {
        (seconds_per_div * 1e9, "ns")
    };
    let mantissa = value.round() as u64;
    if mantissa < 10 && (unit == "ms" || unit == "s") {
        format!("{mantissa}.0{unit}")
    } else {
        format!("{mantissa}{unit}")
    }
}

fn measurement_token(kind: ScopeMeasurement) -> &'static str {
    match kind {
        ScopeMeasurement::CycleRms => "CYCRms",
        ScopeMeasurement::PeakToPeak => "PKPK",
        ScopeMeasurement::TrueRms => "TRUERMS",
        ScopeMeasurement::Period => "PERiod",
        ScopeMeasurement::Max => "MAX",
        ScopeMeasurement::Min => "MIN",
        ScopeMeasurement::Amplitude => "VAMP",
        ScopeMeasurement::RiseTime => "RTime",
        ScopeMeasurement::FallTime => "FTime",
    }
}

/// Strip an optional `LABEL :` prefix from a reply.
fn reply_payload(raw: &str) -> (bool, &str) {
    match raw.trim().rsplit_once(':') {
        Some((_, payload)) => (true, payload.trim()),
        None => (false, raw.trim()),
    }
}

/// Parse a `value[unit]` measurement payload into base units (V or s).
///
/// Returns `None` when the payload is empty or not a number.
pub fn parse_measurement_reply(raw: &str) -> Option<f64> {
    let (_, payload) = reply_payload(raw);
    let unit_table: [(&str, f64); 7] = [
        ("mV", 1e-3),
        ("V", 1.0),
        ("ms", 1e-3),
        ("µs", 1e-6),
        ("us", 1e-6),
        ("\u{FFFD}s", 1e-6),
        ("s", 1.0),
    ];
    for (suffix, factor) in unit_table {
        if let Some(number) = payload.strip_suffix(suffix) {
            return number.trim().parse::<f64>().ok().map(|v| v * factor);
        }
    }
    payload.parse::<f64>().ok()
}

/// Window outside which a bare phase value cannot be degrees.
pub const PHASE_PLAUSIBLE_DEG: f64 = 360.0;

/// Parse a rise-phase-delay reply.
///
/// The degree marker may arrive as `°` or as U+FFFD (Latin-1 0xB0 decoded
/// lossily). Without a marker, a labelled payload is a time delay in
/// seconds; a bare number is accepted as degrees only inside the
/// plausibility window.
pub fn parse_phase_reply(raw: &str) -> Option<PhaseReading> {
    let (labelled, payload) = reply_payload(raw);

    for marker in ["°", "\u{FFFD}"] {
        if let Some(number) = payload.strip_suffix(marker) {
            let value = number.trim().parse::<f64>().ok()?;
            return Some(PhaseReading {
                value,
                in_degrees: true,
            });
        }
    }
    for (suffix, factor) in [("ms", 1e-3), ("µs", 1e-6), ("us", 1e-6), ("s", 1.0)] {
        if let Some(number) = payload.strip_suffix(suffix) {
            let value = number.trim().parse::<f64>().ok()?;
            return Some(PhaseReading {
                value: value * factor,
                in_degrees: false,
            });
        }
    }

    let value = payload.parse::<f64>().ok()?;
    let in_degrees = !labelled && value.abs() <= PHASE_PLAUSIBLE_DEG;
    Some(PhaseReading { value, in_degrees })
}

/// Oscilloscope driver over the USB bulk transport.
pub struct VdsScope {
    transport: Arc<dyn Transport>,
}

impl VdsScope {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    fn send(&self, command: &str) -> Result<()> {
        self.transport.write(format!("{command}\n").as_bytes())?;
        Ok(())
    }

    /// Send a query and read one reply line, lossily decoded.
    pub fn ask(&self, command: &str) -> Result<String> {
        self.send(command)?;
        let raw = self.transport.readline()?;
        Ok(String::from_utf8_lossy(&raw).trim().to_string())
    }

    pub fn idn(&self) -> Result<String> {
        self.ask("*IDN?")
    }
}

impl Scope for VdsScope {
    fn set_coupling(&mut self, channel: Channel, coupling: Coupling) -> Result<()> {
        let mode = match coupling {
            Coupling::Dc => "DC",
            Coupling::Ac => "AC",
            Coupling::Gnd => "GND",
        };
        self.send(&format!(":CH{}:COUP {mode}", channel.number()))
    }

    fn set_vertical_scale(&mut self, channel: Channel, volts_per_div: f64) -> Result<()> {
        self.send(&format!(
            ":CH{}:SCAL {}",
            channel.number(),
            format_vertical(volts_per_div)
        ))
    }

    fn set_horizontal_scale(&mut self, seconds_per_div: f64) -> Result<()> {
        self.send(&format!(":HOR:SCAL {}", format_horizontal(seconds_per_div)))
    }

    fn read_measurement(
        &mut self,
        channel: Channel,
        kind: ScopeMeasurement,
    ) -> Result<Option<f64>> {
        let reply = self.ask(&format!(
            ":MEAS:CH{}:{}?",
            channel.number(),
            measurement_token(kind)
        ))?;
        Ok(parse_measurement_reply(&reply))
    }

    fn read_phase(&mut self, channel: Channel) -> Result<Option<PhaseReading>> {
        let reply = self.ask(&format!(":MEAS:CH{}:RISEPHASEDELAY?", channel.number()))?;
        Ok(parse_phase_reply(&reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertical_literals() {
        assert_eq!(format_vertical(0.002), "2mV");
        assert_eq!(format_vertical(0.0025), "2.5mV");
        assert_eq!(format_vertical(0.1), "100mV");
        assert_eq!(format_vertical(0.5), "500mV");
        assert_eq!(format_vertical(1.0), "1V");
        assert_eq!(format_vertical(5.0), "5V");
    }

    #[test]
    fn horizontal_literals() {
        assert_eq!(format_horizontal(1e-3), "1.0ms");
        assert_eq!(format_horizontal(2e-3), "2.0ms");
        assert_eq!(format_horizontal(5e-3), "5.0ms");
        assert_eq!(format_horizontal(1e-2), "10ms");
        assert_eq!(format_horizontal(5e-7), "500ns");
        assert_eq!(format_horizontal(2e-6), "2us");
        assert_eq!(format_horizontal(1.0), "1.0s");
        assert_eq!(format_horizontal(1000.0), "1000s");
    }

    #[test]
    fn horizontal_snap_picks_next_step_up() {
        // 1 kHz aims at 0.3/1000 = 300 µs/div, snapped up to 500 µs.
        assert_eq!(snap_horizontal(0.3 / 1000.0), 5e-4);
        assert_eq!(snap_horizontal(2e-9), 2e-9);
        assert_eq!(snap_horizontal(1e-12), 2e-9);
        assert_eq!(snap_horizontal(5000.0), 1000.0);
    }

    #[test]
    fn vertical_chooser_fits_peak_to_peak_in_eight_divisions() {
        for v_rms in [0.001, 0.005, 0.02, 0.1, 0.3535, 0.5, 1.0, 2.5, 7.0] {
            let scale = scale_for_rms(v_rms);
            let peak_to_peak = 2.0 * std::f64::consts::SQRT_2 * v_rms;
            assert!(scale * 8.0 >= peak_to_peak, "v_rms={v_rms}");
            // No smaller supported scale may also fit.
            for &smaller in VERTICAL_SCALES.iter().filter(|&&s| s < scale) {
                assert!(smaller * 8.0 < peak_to_peak, "v_rms={v_rms} scale={smaller}");
            }
        }
    }

    #[test]
    fn measurement_reply_forms() {
        assert_eq!(parse_measurement_reply("Vrms : 0.707V"), Some(0.707));
        assert_eq!(parse_measurement_reply("353mV"), Some(0.353));
        assert_eq!(parse_measurement_reply("PER : 1.0ms"), Some(1e-3));
        assert_eq!(parse_measurement_reply("250us"), Some(2.5e-4));
        assert_eq!(parse_measurement_reply("0.9951"), Some(0.9951));
        assert_eq!(parse_measurement_reply("?"), None);
        assert_eq!(parse_measurement_reply(""), None);
    }

    #[test]
    fn phase_reply_forms() {
        let degrees = parse_phase_reply("RP : 26.352\u{00B0}").unwrap();
        assert_eq!(degrees, PhaseReading { value: 26.352, in_degrees: true });

        let lossy = parse_phase_reply("26.352\u{FFFD}").unwrap();
        assert_eq!(lossy, PhaseReading { value: 26.352, in_degrees: true });

        let bare = parse_phase_reply("26.352").unwrap();
        assert_eq!(bare, PhaseReading { value: 26.352, in_degrees: true });

        let delay = parse_phase_reply("RP : 0.000123").unwrap();
        assert_eq!(delay, PhaseReading { value: 0.000123, in_degrees: false });

        let implausible = parse_phase_reply("86400").unwrap();
        assert!(!implausible.in_degrees);

        assert!(parse_phase_reply("RP : ?").is_none());
    }
}
