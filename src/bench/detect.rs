//! Probe-driven instrument autodetection.
//!
//! Scans candidate serial ports with safe identification exchanges, one
//! instrument kind at a time. A port that identifies one kind is never
//! offered to later probes in the same run, and a port the operating system
//! refuses to open (busy, access denied) is marked unusable for the rest of
//! the run. Do not run a scan while a sweep is active: probe bytes on a
//! mismatched baud rate look like junk commands to the instrument.

use super::EquipmentKind;
use crate::error::{BenchError, Result};
use crate::protocol::modbus::{self, FN_READ_REGISTER};
use crate::transport::{SerialTransport, Transport, UsbTransport};
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Per-probe open/read timeout.
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

const MULTIMETER_BAUD: u32 = 115_200;
const GENERATOR_BAUD: u32 = 115_200;
const POWER_SUPPLY_BAUD: u32 = 9_600;
const POWER_SUPPLY_SLAVE: u8 = 0x01;

/// Where a detected instrument answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectedEndpoint {
    Serial {
        port: String,
        baud: u32,
        label: Option<String>,
    },
    Usb {
        vid: u16,
        pid: u16,
        label: Option<String>,
    },
}

impl DetectedEndpoint {
    /// Human-readable address (port name or vid:pid).
    pub fn address(&self) -> String {
        match self {
            DetectedEndpoint::Serial { port, .. } => port.clone(),
            DetectedEndpoint::Usb { vid, pid, .. } => format!("{vid:04x}:{pid:04x}"),
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            DetectedEndpoint::Serial { label, .. } | DetectedEndpoint::Usb { label, .. } => {
                label.as_deref()
            }
        }
    }
}

/// Outcome of one detection run: each kind at most once, plus the probe log.
#[derive(Debug, Default)]
pub struct DetectionResult {
    found: HashMap<EquipmentKind, DetectedEndpoint>,
    log: Vec<String>,
}

impl DetectionResult {
    pub fn endpoint(&self, kind: EquipmentKind) -> Option<&DetectedEndpoint> {
        self.found.get(&kind)
    }

    pub fn log_lines(&self) -> &[String] {
        &self.log
    }

    fn record(&mut self, kind: EquipmentKind, endpoint: DetectedEndpoint) {
        self.found.insert(kind, endpoint);
    }

    fn log_line(&mut self, line: String) {
        debug!("{line}");
        self.log.push(line);
    }
}

/// Builds a transport for one probe attempt. Injectable so the probe matrix
/// runs against scripted transports in tests.
pub type SerialOpener = Box<dyn Fn(&str, u32, Duration) -> Arc<dyn Transport> + Send>;

struct ScopeUsbProbe {
    vid: u16,
    pid: u16,
    transport: Arc<dyn Transport>,
}

/// Runs the ordered probe sequence over the candidate ports.
pub struct DetectionRunner {
    ports: Vec<String>,
    serial_opener: SerialOpener,
    scope_usb: Option<ScopeUsbProbe>,
}

impl DetectionRunner {
    pub fn new(ports: Vec<String>, serial_opener: SerialOpener) -> Self {
        Self {
            ports,
            serial_opener,
            scope_usb: None,
        }
    }

    /// Runner over the system's serial ports.
    pub fn from_system() -> Result<Self> {
        let ports = serialport::available_ports()?
            .into_iter()
            .map(|info| info.port_name)
            .collect();
        let opener: SerialOpener = Box::new(|port, baud, timeout| {
            Arc::new(SerialTransport::new(port, baud, timeout, timeout))
        });
        Ok(Self::new(ports, opener))
    }

    /// Also probe for the oscilloscope on the given USB identifiers.
    pub fn with_scope_usb(mut self, vid: u16, pid: u16) -> Self {
        self.scope_usb = Some(ScopeUsbProbe {
            vid,
            pid,
            transport: Arc::new(UsbTransport::new(vid, pid, PROBE_TIMEOUT, PROBE_TIMEOUT)),
        });
        self
    }

    /// Same, with an injected transport (tests).
    pub fn with_scope_usb_transport(
        mut self,
        vid: u16,
        pid: u16,
        transport: Arc<dyn Transport>,
    ) -> Self {
        self.scope_usb = Some(ScopeUsbProbe {
            vid,
            pid,
            transport,
        });
        self
    }

    /// Probe for the requested kinds, in the given order.
    pub fn run(&self, kinds: &[EquipmentKind]) -> DetectionResult {
        let mut result = DetectionResult::default();
        let mut claimed: HashSet<String> = HashSet::new();
        let mut unusable: HashSet<String> = HashSet::new();

        for &kind in kinds {
            if kind == EquipmentKind::Oscilloscope {
                self.probe_scope(&mut result);
                continue;
            }
            self.probe_serial_kind(kind, &mut result, &mut claimed, &mut unusable);
        }
        result
    }

    fn probe_serial_kind(
        &self,
        kind: EquipmentKind,
        result: &mut DetectionResult,
        claimed: &mut HashSet<String>,
        unusable: &mut HashSet<String>,
    ) {
        let baud = match kind {
            EquipmentKind::Multimeter => MULTIMETER_BAUD,
            EquipmentKind::Generator => GENERATOR_BAUD,
            EquipmentKind::PowerSupply => POWER_SUPPLY_BAUD,
            EquipmentKind::Oscilloscope => return,
        };

        for port in &self.ports {
            if claimed.contains(port) || unusable.contains(port) {
                continue;
            }
            result.log_line(format!("{kind}: probing {port} @ {baud}"));

            let transport = (self.serial_opener)(port, baud, PROBE_TIMEOUT);
            match transport.open() {
                Ok(()) => {}
                Err(BenchError::PortBusy(message)) => {
                    unusable.insert(port.clone());
                    result.log_line(format!("{kind}: {port} unusable ({message})"));
                    continue;
                }
                Err(e) => {
                    result.log_line(format!("{kind}: {port} open failed ({e})"));
                    continue;
                }
            }

            let outcome = match kind {
                EquipmentKind::Multimeter => probe_multimeter(transport.as_ref()),
                EquipmentKind::Generator => probe_generator(transport.as_ref()),
                EquipmentKind::PowerSupply => probe_power_supply(transport.as_ref()),
                EquipmentKind::Oscilloscope => Ok(None),
            };
            let _ = transport.close();

            match outcome {
                Ok(Some(label)) => {
                    info!("{kind} found on {port}");
                    result.log_line(format!("{kind}: found on {port} ({label})"));
                    claimed.insert(port.clone());
                    result.record(
                        kind,
                        DetectedEndpoint::Serial {
                            port: port.clone(),
                            baud,
                            label: Some(label),
                        },
                    );
                    break;
                }
                Ok(None) => result.log_line(format!("{kind}: not on {port}")),
                Err(e) => result.log_line(format!("{kind}: probe on {port} failed ({e})")),
            }
        }
    }

    fn probe_scope(&self, result: &mut DetectionResult) {
        let Some(probe) = &self.scope_usb else {
            result.log_line("oscilloscope: no USB identifiers configured, skipped".into());
            return;
        };
        result.log_line(format!(
            "oscilloscope: probing usb {:04x}:{:04x}",
            probe.vid, probe.pid
        ));
        match probe.transport.open() {
            Ok(()) => {
                let label = probe
                    .transport
                    .write(b"*IDN?\n")
                    .and_then(|_| probe.transport.readline())
                    .ok()
                    .map(|raw| String::from_utf8_lossy(&raw).trim().to_string())
                    .filter(|s| !s.is_empty());
                let _ = probe.transport.close();
                info!("oscilloscope found on usb {:04x}:{:04x}", probe.vid, probe.pid);
                result.log_line(format!(
                    "oscilloscope: found ({})",
                    label.as_deref().unwrap_or("no IDN reply")
                ));
                result.record(
                    EquipmentKind::Oscilloscope,
                    DetectedEndpoint::Usb {
                        vid: probe.vid,
                        pid: probe.pid,
                        label,
                    },
                );
            }
            Err(e) => result.log_line(format!("oscilloscope: not present ({e})")),
        }
    }
}

/// SCPI probe: `*IDN?` answered with an OWON/XDM vendor tag.
fn probe_multimeter(transport: &dyn Transport) -> Result<Option<String>> {
    transport.write(b"*IDN?\n")?;
    let raw = transport.readline()?;
    let reply = String::from_utf8_lossy(&raw).trim().to_string();
    let upper = reply.to_uppercase();
    if upper.contains("OWON") || upper.contains("XDM") {
        Ok(Some(reply))
    } else {
        Ok(None)
    }
}

/// True when a reply smells like a SCPI instrument rather than a FeelTech.
fn looks_scpi(upper: &str) -> bool {
    upper.contains("OWON") || upper.contains("XDM") || upper.contains("*IDN")
}

/// FeelTech probe: the generator echoes something non-SCPI to `WMW00`.
fn probe_generator(transport: &dyn Transport) -> Result<Option<String>> {
    transport.write(b"WMW00\n")?;
    let raw = transport.read(10)?;
    if raw.is_empty() {
        return Ok(None);
    }
    let upper = String::from_utf8_lossy(&raw).to_uppercase();
    if looks_scpi(&upper) {
        Ok(None)
    } else {
        Ok(Some("FeelTech".to_string()))
    }
}

/// Modbus probe: a valid FC03 read of the display-voltage register.
fn probe_power_supply(transport: &dyn Transport) -> Result<Option<String>> {
    let request = modbus::build_frame(POWER_SUPPLY_SLAVE, FN_READ_REGISTER, &[0x00, 0x10, 0x00, 0x01]);
    transport.write(&request)?;
    thread::sleep(Duration::from_millis(20));
    let response = transport.read(7)?;
    if response.len() != 7 {
        return Ok(None);
    }
    match modbus::verify_frame(&response, POWER_SUPPLY_SLAVE, FN_READ_REGISTER) {
        Ok(_) => Ok(Some("Modbus PSU".to_string())),
        Err(_) => Ok(None),
    }
}
