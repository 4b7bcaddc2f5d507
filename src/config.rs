//! Configuration management.
//!
//! The typed shape of the bench configuration record. Persistence is plain
//! JSON or TOML read through the `config` crate; every option carries a
//! default, so an empty source yields a fully usable record.

use crate::error::{BenchError, Result};
use crate::instrument::Channel;
use crate::measurement::SourceKind;
use crate::sweep::{FilterTestConfig, SweepScale};
use crate::transport::{SerialTransport, UsbTransport};
use config::Config;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Multimeter serial link parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialMultimeterSettings {
    #[serde(default = "default_multimeter_port")]
    pub port: String,
    #[serde(default = "default_fast_baud")]
    pub baudrate: u32,
    /// Read timeout in seconds.
    #[serde(default = "default_serial_timeout")]
    pub timeout: f64,
    /// Write timeout in seconds.
    #[serde(default = "default_serial_timeout")]
    pub write_timeout: f64,
}

/// Generator serial link parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialGeneratorSettings {
    #[serde(default = "default_generator_port")]
    pub port: String,
    #[serde(default = "default_fast_baud")]
    pub baudrate: u32,
}

/// Power-supply serial link parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialPowerSupplySettings {
    #[serde(default = "default_power_supply_port")]
    pub port: String,
    #[serde(default = "default_power_supply_baud")]
    pub baudrate: u32,
}

/// Oscilloscope USB parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsbOscilloscopeSettings {
    #[serde(default)]
    pub vendor_id: Option<u16>,
    #[serde(default)]
    pub product_id: Option<u16>,
    #[serde(default = "default_usb_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_usb_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

/// Sweep defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterTestSettings {
    #[serde(default = "default_generator_channel")]
    pub generator_channel: u8,
    #[serde(default = "default_f_min_hz")]
    pub f_min_hz: f64,
    #[serde(default = "default_f_max_hz")]
    pub f_max_hz: f64,
    #[serde(default = "default_points_per_decade")]
    pub points_per_decade: u32,
    #[serde(default = "default_scale")]
    pub scale: SweepScale,
    #[serde(default = "default_settling_ms")]
    pub settling_ms: u64,
    #[serde(default = "default_ue_rms")]
    pub ue_rms: f64,
    #[serde(default = "default_measure_source")]
    pub measure_source: SourceKind,
    #[serde(default = "default_oscillo_channel_ue")]
    pub oscillo_channel_ue: u8,
    #[serde(default = "default_oscillo_channel_us")]
    pub oscillo_channel_us: u8,
    #[serde(default = "default_phase_skip_mv")]
    pub phase_skip_below_scale_ch2_mv: f64,
}

fn default_multimeter_port() -> String {
    "COM3".to_string()
}
fn default_generator_port() -> String {
    "COM4".to_string()
}
fn default_power_supply_port() -> String {
    "COM6".to_string()
}
fn default_fast_baud() -> u32 {
    115_200
}
fn default_power_supply_baud() -> u32 {
    9_600
}
fn default_serial_timeout() -> f64 {
    2.0
}
fn default_usb_read_timeout_ms() -> u64 {
    5_000
}
fn default_usb_write_timeout_ms() -> u64 {
    2_000
}
fn default_generator_channel() -> u8 {
    1
}
fn default_f_min_hz() -> f64 {
    10.0
}
fn default_f_max_hz() -> f64 {
    100_000.0
}
fn default_points_per_decade() -> u32 {
    10
}
fn default_scale() -> SweepScale {
    SweepScale::Log
}
fn default_settling_ms() -> u64 {
    200
}
fn default_ue_rms() -> f64 {
    1.0
}
fn default_measure_source() -> SourceKind {
    SourceKind::Multimeter
}
fn default_oscillo_channel_ue() -> u8 {
    1
}
fn default_oscillo_channel_us() -> u8 {
    2
}
fn default_phase_skip_mv() -> f64 {
    20.0
}

impl Default for SerialMultimeterSettings {
    fn default() -> Self {
        Self {
            port: default_multimeter_port(),
            baudrate: default_fast_baud(),
            timeout: default_serial_timeout(),
            write_timeout: default_serial_timeout(),
        }
    }
}

impl Default for SerialGeneratorSettings {
    fn default() -> Self {
        Self {
            port: default_generator_port(),
            baudrate: default_fast_baud(),
        }
    }
}

impl Default for SerialPowerSupplySettings {
    fn default() -> Self {
        Self {
            port: default_power_supply_port(),
            baudrate: default_power_supply_baud(),
        }
    }
}

impl Default for UsbOscilloscopeSettings {
    fn default() -> Self {
        Self {
            vendor_id: None,
            product_id: None,
            read_timeout_ms: default_usb_read_timeout_ms(),
            write_timeout_ms: default_usb_write_timeout_ms(),
        }
    }
}

impl Default for FilterTestSettings {
    fn default() -> Self {
        Self {
            generator_channel: default_generator_channel(),
            f_min_hz: default_f_min_hz(),
            f_max_hz: default_f_max_hz(),
            points_per_decade: default_points_per_decade(),
            scale: default_scale(),
            settling_ms: default_settling_ms(),
            ue_rms: default_ue_rms(),
            measure_source: default_measure_source(),
            oscillo_channel_ue: default_oscillo_channel_ue(),
            oscillo_channel_us: default_oscillo_channel_us(),
            phase_skip_below_scale_ch2_mv: default_phase_skip_mv(),
        }
    }
}

/// The whole configuration record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub serial_multimeter: SerialMultimeterSettings,
    #[serde(default)]
    pub serial_generator: SerialGeneratorSettings,
    #[serde(default)]
    pub serial_power_supply: SerialPowerSupplySettings,
    #[serde(default)]
    pub usb_oscilloscope: UsbOscilloscopeSettings,
    #[serde(default)]
    pub filter_test: FilterTestSettings,
}

impl Settings {
    /// Load from `config/<name>.{json,toml}`, defaulting every missing
    /// option. A missing file yields the built-in defaults.
    pub fn new(config_name: Option<&str>) -> Result<Self> {
        let config_path = format!("config/{}", config_name.unwrap_or("bench"));
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let source = Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .build()
            .map_err(BenchError::Config)?;
        source.try_deserialize().map_err(BenchError::Config)
    }

    /// Derive the sweep configuration. `points_per_decade` is converted to
    /// a total point count: one point per decade boundary plus
    /// `points_per_decade` per decade on a log sweep; on a linear sweep it
    /// is taken as the total directly.
    pub fn filter_test_config(&self) -> Result<FilterTestConfig> {
        let ft = &self.filter_test;
        let channel = Channel::from_number(ft.generator_channel).ok_or_else(|| {
            BenchError::ConfigurationInvalid(format!(
                "generator_channel must be 1 or 2, got {}",
                ft.generator_channel
            ))
        })?;
        if ft.f_min_hz <= 0.0 || ft.f_max_hz <= ft.f_min_hz {
            return Err(BenchError::ConfigurationInvalid(format!(
                "bad sweep band {} .. {} Hz",
                ft.f_min_hz, ft.f_max_hz
            )));
        }
        let n_points = match ft.scale {
            SweepScale::Log => {
                let decades = (ft.f_max_hz / ft.f_min_hz).log10();
                ((decades * f64::from(ft.points_per_decade)).round() as usize + 1).max(2)
            }
            SweepScale::Lin => (ft.points_per_decade as usize).max(2),
        };
        FilterTestConfig::new(
            channel,
            ft.f_min_hz,
            ft.f_max_hz,
            n_points,
            ft.scale,
            Duration::from_millis(ft.settling_ms),
            ft.ue_rms,
        )
    }

    /// Oscilloscope channel assignments as configured.
    pub fn oscillo_channels(&self) -> Result<(Channel, Channel)> {
        let ue = Channel::from_number(self.filter_test.oscillo_channel_ue);
        let us = Channel::from_number(self.filter_test.oscillo_channel_us);
        match (ue, us) {
            (Some(ue), Some(us)) => Ok((ue, us)),
            _ => Err(BenchError::ConfigurationInvalid(
                "oscilloscope channels must be 1 or 2".into(),
            )),
        }
    }

    pub fn multimeter_transport(&self) -> SerialTransport {
        SerialTransport::new(
            &self.serial_multimeter.port,
            self.serial_multimeter.baudrate,
            Duration::from_secs_f64(self.serial_multimeter.timeout),
            Duration::from_secs_f64(self.serial_multimeter.write_timeout),
        )
    }

    pub fn generator_transport(&self) -> SerialTransport {
        SerialTransport::new(
            &self.serial_generator.port,
            self.serial_generator.baudrate,
            Duration::from_secs(2),
            Duration::from_secs(2),
        )
    }

    pub fn power_supply_transport(&self) -> SerialTransport {
        SerialTransport::new(
            &self.serial_power_supply.port,
            self.serial_power_supply.baudrate,
            Duration::from_secs(2),
            Duration::from_secs(2),
        )
    }

    pub fn oscilloscope_transport(&self) -> Result<UsbTransport> {
        let usb = &self.usb_oscilloscope;
        match (usb.vendor_id, usb.product_id) {
            (Some(vid), Some(pid)) => Ok(UsbTransport::new(
                vid,
                pid,
                Duration::from_millis(usb.read_timeout_ms),
                Duration::from_millis(usb.write_timeout_ms),
            )),
            _ => Err(BenchError::ConfigurationInvalid(
                "usb_oscilloscope.vendor_id/product_id not configured".into(),
            )),
        }
    }

    /// Fold a detection result into the record (ports, baud rates, USB
    /// identifiers). Nothing touches the file system.
    pub fn apply_detection(&mut self, result: &crate::bench::DetectionResult) {
        use crate::bench::{DetectedEndpoint, EquipmentKind};
        if let Some(DetectedEndpoint::Serial { port, baud, .. }) =
            result.endpoint(EquipmentKind::Multimeter)
        {
            self.serial_multimeter.port = port.clone();
            self.serial_multimeter.baudrate = *baud;
        }
        if let Some(DetectedEndpoint::Serial { port, baud, .. }) =
            result.endpoint(EquipmentKind::Generator)
        {
            self.serial_generator.port = port.clone();
            self.serial_generator.baudrate = *baud;
        }
        if let Some(DetectedEndpoint::Serial { port, baud, .. }) =
            result.endpoint(EquipmentKind::PowerSupply)
        {
            self.serial_power_supply.port = port.clone();
            self.serial_power_supply.baudrate = *baud;
        }
        if let Some(DetectedEndpoint::Usb { vid, pid, .. }) =
            result.endpoint(EquipmentKind::Oscilloscope)
        {
            self.usb_oscilloscope.vendor_id = Some(*vid);
            self.usb_oscilloscope.product_id = Some(*pid);
        }
    }

    /// Phase-skip threshold in volts/div.
    pub fn phase_skip_scale_v(&self) -> f64 {
        self.filter_test.phase_skip_below_scale_ch2_mv / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_record() {
        let settings = Settings::default();
        assert_eq!(settings.serial_multimeter.port, "COM3");
        assert_eq!(settings.serial_multimeter.baudrate, 115_200);
        assert_eq!(settings.serial_generator.port, "COM4");
        assert_eq!(settings.serial_power_supply.baudrate, 9_600);
        assert_eq!(settings.usb_oscilloscope.read_timeout_ms, 5_000);
        assert_eq!(settings.filter_test.f_min_hz, 10.0);
        assert_eq!(settings.filter_test.f_max_hz, 100_000.0);
        assert_eq!(settings.filter_test.measure_source, SourceKind::Multimeter);
        assert_eq!(settings.filter_test.phase_skip_below_scale_ch2_mv, 20.0);
    }

    #[test]
    fn sweep_config_from_points_per_decade() {
        let settings = Settings::default();
        let sweep = settings.filter_test_config().unwrap();
        // 10 Hz .. 100 kHz = 4 decades at 10 points each, plus the start.
        assert_eq!(sweep.n_points, 41);
        assert_eq!(sweep.scale, SweepScale::Log);
        assert_eq!(sweep.settling, Duration::from_millis(200));
    }

    #[test]
    fn settings_deserialize_from_partial_json() {
        let json = r#"{
            "serial_generator": { "port": "/dev/ttyUSB1" },
            "filter_test": { "f_min_hz": 100.0, "scale": "lin", "points_per_decade": 5 }
        }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.serial_generator.port, "/dev/ttyUSB1");
        assert_eq!(settings.serial_generator.baudrate, 115_200);
        assert_eq!(settings.filter_test.scale, SweepScale::Lin);
        let sweep = settings.filter_test_config().unwrap();
        assert_eq!(sweep.n_points, 5);
        assert_eq!(sweep.f_min_hz, 100.0);
    }

    #[test]
    fn missing_usb_identifiers_are_rejected() {
        let settings = Settings::default();
        assert!(matches!(
            settings.oscilloscope_transport(),
            Err(BenchError::ConfigurationInvalid(_))
        ));
    }
}
