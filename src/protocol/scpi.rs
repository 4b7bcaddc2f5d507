//! SCPI driver for the bench multimeter (OWON XDM dialect).
//!
//! Line-oriented ASCII: commands are terminated by `\n`, queries end in `?`
//! and answer with one line. Some firmware revisions echo a `->` prompt
//! after the payload; [`XdmMultimeter::ask`] strips it.

use crate::error::{BenchError, Result};
use crate::instrument::Multimeter;
use crate::transport::Transport;
use std::sync::Arc;

/// Measurement function selectable on the primary display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterFunction {
    VoltsDc,
    VoltsAc,
    CurrentDc,
    CurrentAc,
    Resistance,
    Resistance4W,
    Frequency,
    Period,
    Capacitance,
    TemperatureRtd,
    Diode,
    Continuity,
}

impl MeterFunction {
    fn command(self) -> &'static str {
        match self {
            MeterFunction::VoltsDc => "CONF:VOLT:DC",
            MeterFunction::VoltsAc => "CONF:VOLT:AC",
            MeterFunction::CurrentDc => "CONF:CURR:DC",
            MeterFunction::CurrentAc => "CONF:CURR:AC",
            MeterFunction::Resistance => "CONF:RES",
            MeterFunction::Resistance4W => "CONF:FRES",
            MeterFunction::Frequency => "CONF:FREQ",
            MeterFunction::Period => "CONF:PER",
            MeterFunction::Capacitance => "CONF:CAP",
            MeterFunction::TemperatureRtd => "CONF:TEMP:RTD",
            MeterFunction::Diode => "CONF:DIOD",
            MeterFunction::Continuity => "CONF:CONT",
        }
    }
}

/// Reading rate of the ADC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterRate {
    Fast,
    Medium,
    Slow,
}

impl MeterRate {
    fn letter(self) -> char {
        match self {
            MeterRate::Fast => 'F',
            MeterRate::Medium => 'M',
            MeterRate::Slow => 'L',
        }
    }
}

/// RTD sensor type for temperature measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtdType {
    Pt100,
    Pt1000,
}

/// Temperature display unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempUnit {
    Celsius,
    Fahrenheit,
    Kelvin,
}

/// What the display shows in RTD mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtdDisplay {
    Temperature,
    Measurement,
    All,
}

/// Vendor tags accepted when identifying the meter.
pub const METER_ID_TAGS: [&str; 2] = ["OWON", "XDM"];

/// SCPI multimeter driver.
pub struct XdmMultimeter {
    transport: Arc<dyn Transport>,
}

impl XdmMultimeter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Send a command without reading a reply.
    pub fn send(&self, command: &str) -> Result<()> {
        self.transport.write(format!("{command}\n").as_bytes())?;
        Ok(())
    }

    /// Send a query and read one reply line.
    ///
    /// The reply is trimmed of surrounding whitespace and of one trailing
    /// `->` prompt when the firmware echoes it.
    pub fn ask(&self, command: &str) -> Result<String> {
        self.send(command)?;
        let raw = self.transport.readline()?;
        let text = String::from_utf8_lossy(&raw);
        let text = text.trim();
        let text = text.strip_suffix("->").unwrap_or(text);
        Ok(text.trim().to_string())
    }

    fn query_f64(&self, command: &str) -> Result<f64> {
        let reply = self.ask(command)?;
        if reply.is_empty() {
            return Err(BenchError::TransportTimeout);
        }
        reply
            .parse::<f64>()
            .map_err(|_| BenchError::ProtocolMalformed(format!("not a number: '{reply}'")))
    }

    pub fn idn(&self) -> Result<String> {
        self.ask("*IDN?")
    }

    pub fn reset(&self) -> Result<()> {
        self.send("*RST")
    }

    /// Query `*IDN?` and require one of the expected vendor tags.
    pub fn identify(&self) -> Result<String> {
        let reply = self.idn()?;
        let upper = reply.to_uppercase();
        if METER_ID_TAGS.iter().any(|tag| upper.contains(tag)) {
            Ok(reply)
        } else {
            Err(BenchError::IdentificationMismatch {
                expected: METER_ID_TAGS.join("|"),
                got: reply,
            })
        }
    }

    pub fn set_function(&self, function: MeterFunction) -> Result<()> {
        self.send(function.command())
    }

    pub fn auto_range(&self) -> Result<()> {
        self.send("AUTO")
    }

    pub fn set_range(&self, range: f64) -> Result<()> {
        self.send(&format!("RANGE {range}"))
    }

    pub fn set_rate(&self, rate: MeterRate) -> Result<()> {
        self.send(&format!("RATE {}", rate.letter()))
    }

    /// One reading from the primary display.
    pub fn measure(&self) -> Result<f64> {
        self.query_f64("MEAS?")
    }

    /// One reading from the secondary display.
    pub fn measure_secondary(&self) -> Result<f64> {
        self.query_f64("MEAS2?")
    }

    pub fn set_secondary_display(&self, enabled: bool) -> Result<()> {
        self.send(if enabled { "DISP:SEC ON" } else { "DISP:SEC OFF" })
    }

    /// Relative (NULL) math with the given offset.
    pub fn math_null(&self, offset: f64) -> Result<()> {
        self.send("CALC:FUNC NULL")?;
        self.send(&format!("CALC:NULL:OFFS {offset}"))
    }

    /// dB math against an impedance reference in ohms.
    pub fn math_db(&self, reference_ohm: f64) -> Result<()> {
        self.send("CALC:FUNC DB")?;
        self.send(&format!("CALC:DB:REF {reference_ohm}"))
    }

    /// dBm math against an impedance reference in ohms.
    pub fn math_dbm(&self, reference_ohm: f64) -> Result<()> {
        self.send("CALC:FUNC DBM")?;
        self.send(&format!("CALC:DBM:REF {reference_ohm}"))
    }

    /// Enable running statistics (average/min/max).
    pub fn math_statistics(&self) -> Result<()> {
        self.send("CALC:FUNC AVER")
    }

    pub fn math_off(&self) -> Result<()> {
        self.send("CALC:FUNC NONE")
    }

    pub fn statistics_average(&self) -> Result<f64> {
        self.query_f64("CALC:AVER:AVER?")
    }

    pub fn statistics_min(&self) -> Result<f64> {
        self.query_f64("CALC:AVER:MIN?")
    }

    pub fn statistics_max(&self) -> Result<f64> {
        self.query_f64("CALC:AVER:MAX?")
    }

    pub fn statistics_reset(&self) -> Result<()> {
        self.send("CALC:AVER:CLE")
    }

    pub fn set_rtd_type(&self, rtd: RtdType) -> Result<()> {
        let name = match rtd {
            RtdType::Pt100 => "PT100",
            RtdType::Pt1000 => "PT1000",
        };
        self.send(&format!("TEMP:RTD:TYPE {name}"))
    }

    pub fn set_rtd_unit(&self, unit: TempUnit) -> Result<()> {
        let name = match unit {
            TempUnit::Celsius => "C",
            TempUnit::Fahrenheit => "F",
            TempUnit::Kelvin => "K",
        };
        self.send(&format!("TEMP:RTD:UNIT {name}"))
    }

    pub fn set_rtd_display(&self, display: RtdDisplay) -> Result<()> {
        let name = match display {
            RtdDisplay::Temperature => "TEMP",
            RtdDisplay::Measurement => "MEAS",
            RtdDisplay::All => "ALL",
        };
        self.send(&format!("TEMP:RTD:SHOW {name}"))
    }

    /// Resistance threshold below which continuity beeps, in ohms.
    pub fn set_continuity_threshold(&self, ohms: f64) -> Result<()> {
        self.send(&format!("CONT:THRE {ohms}"))
    }

    pub fn set_buzzer(&self, enabled: bool) -> Result<()> {
        self.send(if enabled { "SYST:BEEP ON" } else { "SYST:BEEP OFF" })
    }
}

impl Multimeter for XdmMultimeter {
    fn configure_ac_volts(&mut self) -> Result<()> {
        self.set_function(MeterFunction::VoltsAc)?;
        self.auto_range()
    }

    fn read_value(&mut self) -> Result<f64> {
        self.measure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    fn meter_with(replies: &[&str]) -> (XdmMultimeter, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::open_with_lines(replies));
        (XdmMultimeter::new(transport.clone()), transport)
    }

    #[test]
    fn ask_trims_whitespace_and_prompt() {
        let (meter, _t) = meter_with(&["  XDM2041 ->\n"]);
        assert_eq!(meter.ask("*IDN?").unwrap(), "XDM2041");
    }

    #[test]
    fn identify_accepts_owon_and_xdm_tags() {
        let (meter, _t) = meter_with(&["OWON,XDM2041,sn,V1.0\n"]);
        assert!(meter.identify().is_ok());

        let (meter, _t) = meter_with(&["RIGOL,DM3058,sn,V1.0\n"]);
        assert!(matches!(
            meter.identify(),
            Err(BenchError::IdentificationMismatch { .. })
        ));
    }

    #[test]
    fn measure_parses_scientific_notation() {
        let (meter, _t) = meter_with(&["7.0711E-01\n"]);
        assert!((meter.measure().unwrap() - 0.70711).abs() < 1e-12);
    }

    #[test]
    fn measure_empty_reply_is_timeout() {
        let (meter, _t) = meter_with(&[]);
        assert!(matches!(meter.measure(), Err(BenchError::TransportTimeout)));
    }

    #[test]
    fn configure_ac_volts_sends_conf_then_auto() {
        let (mut meter, transport) = meter_with(&[]);
        meter.configure_ac_volts().unwrap();
        assert_eq!(transport.written_lines(), vec!["CONF:VOLT:AC", "AUTO"]);
    }
}
