//! Detection runner scenarios over scripted transports.

use bodebench::bench::{BenchConnectionState, DetectedEndpoint, DetectionRunner, EquipmentKind};
use bodebench::config::Settings;
use bodebench::mock::MockTransport;
use bodebench::protocol::modbus;
use bodebench::transport::Transport;
use std::sync::Arc;

const MM_BAUD: u32 = 115_200;
const PSU_BAUD: u32 = 9_600;

/// Bench fixture: multimeter on COM2, generator on COM3, no power supply.
fn three_port_runner() -> DetectionRunner {
    let opener = Box::new(|port: &str, baud: u32, _timeout: std::time::Duration| {
        let transport: Arc<dyn Transport> = match (port, baud) {
            // COM2 answers *IDN? like an OWON meter; at the same baud the
            // generator probe would see the same SCPI-looking bytes.
            ("COM2", MM_BAUD) => Arc::new(MockTransport::closed_with_lines(&[
                "OWON,XDM2041,2128xxx,V2.1",
            ])),
            // COM3 echoes a couple of junk bytes to WMW00.
            ("COM3", MM_BAUD) => {
                let t = MockTransport::closed_with_lines(&["ok"]);
                Arc::new(t)
            }
            // COM1 answers nothing at any baud.
            _ => Arc::new(MockTransport::closed_with_lines(&[])),
        };
        transport
    });
    DetectionRunner::new(
        vec!["COM1".into(), "COM2".into(), "COM3".into()],
        opener,
    )
}

#[test]
fn detection_claims_ports_in_probe_order() {
    let runner = three_port_runner();
    let result = runner.run(&[
        EquipmentKind::Multimeter,
        EquipmentKind::Generator,
        EquipmentKind::PowerSupply,
    ]);

    match result.endpoint(EquipmentKind::Multimeter) {
        Some(DetectedEndpoint::Serial { port, baud, .. }) => {
            assert_eq!(port, "COM2");
            assert_eq!(*baud, MM_BAUD);
        }
        other => panic!("multimeter endpoint: {other:?}"),
    }
    match result.endpoint(EquipmentKind::Generator) {
        Some(DetectedEndpoint::Serial { port, .. }) => assert_eq!(port, "COM3"),
        other => panic!("generator endpoint: {other:?}"),
    }
    assert!(result.endpoint(EquipmentKind::PowerSupply).is_none());

    let log = result.log_lines().join("\n");
    // Multimeter tries COM1 then stops at COM2; the generator skips the
    // claimed COM2 and finds COM3; the PSU only has COM1 left to try.
    assert!(log.contains("multimeter: probing COM1"));
    assert!(log.contains("multimeter: found on COM2"));
    assert!(!log.contains("multimeter: probing COM3"));
    assert!(log.contains("generator: probing COM1"));
    assert!(!log.contains("generator: probing COM2"));
    assert!(log.contains("generator: found on COM3"));
    assert!(log.contains("power_supply: probing COM1"));
    assert!(!log.contains("power_supply: probing COM3"));
}

#[test]
fn busy_ports_are_skipped_by_later_probes() {
    let opener = Box::new(|port: &str, baud: u32, _timeout: std::time::Duration| {
        let transport: Arc<dyn Transport> = match (port, baud) {
            ("COM1", _) => Arc::new(MockTransport::busy("COM1 held by another process")),
            ("COM2", PSU_BAUD) => {
                let frame = modbus::build_frame(0x01, modbus::FN_READ_REGISTER, &[0x02, 0x00, 0x64]);
                Arc::new(MockTransport::open_with_frames(&[&frame]))
            }
            _ => Arc::new(MockTransport::closed_with_lines(&[])),
        };
        transport
    });
    let runner = DetectionRunner::new(vec!["COM1".into(), "COM2".into()], opener);

    let result = runner.run(&[EquipmentKind::Multimeter, EquipmentKind::PowerSupply]);

    assert!(result.endpoint(EquipmentKind::Multimeter).is_none());
    match result.endpoint(EquipmentKind::PowerSupply) {
        Some(DetectedEndpoint::Serial { port, baud, .. }) => {
            assert_eq!(port, "COM2");
            assert_eq!(*baud, PSU_BAUD);
        }
        other => panic!("power supply endpoint: {other:?}"),
    }

    let log = result.log_lines().join("\n");
    assert!(log.contains("COM1 unusable"));
    // The PSU probe never reopens the unusable port.
    assert!(!log.contains("power_supply: probing COM1"));
}

#[test]
fn usb_scope_probe_fills_the_usb_endpoint() {
    let scope_transport = Arc::new(MockTransport::closed_with_lines(&["VDS1022,V2.6"]));
    let runner = DetectionRunner::new(
        vec![],
        Box::new(|_port: &str, _baud: u32, _timeout: std::time::Duration| {
            let t: Arc<dyn Transport> = Arc::new(MockTransport::closed_with_lines(&[]));
            t
        }),
    )
    .with_scope_usb_transport(0x5345, 0x1234, scope_transport);

    let result = runner.run(&[EquipmentKind::Oscilloscope]);

    match result.endpoint(EquipmentKind::Oscilloscope) {
        Some(DetectedEndpoint::Usb { vid, pid, label }) => {
            assert_eq!((*vid, *pid), (0x5345, 0x1234));
            assert_eq!(label.as_deref(), Some("VDS1022,V2.6"));
        }
        other => panic!("oscilloscope endpoint: {other:?}"),
    }
}

#[test]
fn detection_updates_settings_and_connection_state() {
    let runner = three_port_runner();
    let result = runner.run(&[EquipmentKind::Multimeter, EquipmentKind::Generator]);

    let mut settings = Settings::default();
    settings.apply_detection(&result);
    assert_eq!(settings.serial_multimeter.port, "COM2");
    assert_eq!(settings.serial_multimeter.baudrate, MM_BAUD);
    assert_eq!(settings.serial_generator.port, "COM3");
    // Untouched section keeps its defaults.
    assert_eq!(settings.serial_power_supply.port, "COM6");

    let mut state = BenchConnectionState::new();
    state.update_from_detection(&result);
    let meter = state.state(EquipmentKind::Multimeter);
    assert!(meter.detected);
    assert!(!meter.connected);
    assert_eq!(meter.port_or_device.as_deref(), Some("COM2"));
    assert!(state
        .state(EquipmentKind::Multimeter)
        .model_or_label
        .as_deref()
        .unwrap()
        .contains("XDM2041"));
    assert!(!state.state(EquipmentKind::PowerSupply).detected);
}
