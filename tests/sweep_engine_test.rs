//! End-to-end sweep scenarios on the multimeter path.
//!
//! The generator is the real FeelTech driver over a scripted transport, so
//! these tests pin the exact command stream an instrument would see.

use bodebench::instrument::Channel;
use bodebench::measurement::MeasurementSource;
use bodebench::mock::{MockGenerator, MockMultimeter, MockTransport};
use bodebench::protocol::{FeelTechGenerator, XdmMultimeter};
use bodebench::sweep::{
    FilterTestConfig, Sweep, SweepOutcome, SweepScale,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

fn single_point_config() -> FilterTestConfig {
    FilterTestConfig {
        generator_channel: Channel::Ch1,
        f_min_hz: 1000.0,
        f_max_hz: 1000.0,
        n_points: 1,
        scale: SweepScale::Lin,
        settling: Duration::ZERO,
        ue_rms: 1.0,
    }
}

fn log_config(f_min: f64, f_max: f64, n: usize) -> FilterTestConfig {
    FilterTestConfig {
        generator_channel: Channel::Ch1,
        f_min_hz: f_min,
        f_max_hz: f_max,
        n_points: n,
        scale: SweepScale::Log,
        settling: Duration::ZERO,
        ue_rms: 1.0,
    }
}

// =============================================================================
// Scenario: single point, multimeter path
// =============================================================================

#[test]
fn single_point_sweep_over_the_wire() {
    let generator_port = Arc::new(MockTransport::open_with_lines(&[]));
    let mut generator = FeelTechGenerator::new(generator_port.clone());

    let meter_port = Arc::new(MockTransport::open_with_lines(&["0.707"]));
    let meter = XdmMultimeter::new(meter_port.clone());
    let mut source = MeasurementSource::multimeter(Box::new(meter));

    let mut sweep = Sweep::new(&mut generator, &mut source, single_point_config())
        .with_first_point_delay(Duration::ZERO);
    let result = sweep.run();

    assert!(result.is_complete());
    assert_eq!(result.points.len(), 1);
    let point = &result.points[0];
    assert_eq!(point.f_hz, 1000.0);
    assert_eq!(point.ue_v, 1.0);
    assert_eq!(point.us_v, 0.707);
    assert!((point.gain_linear - 0.707).abs() < 1e-12);
    assert!((point.gain_db - -3.01).abs() < 0.01);
    assert_eq!(point.phase_deg, None);

    assert_eq!(
        generator_port.written_lines(),
        vec![
            "WMW00",
            "WMA1.414",
            "WMO0.00",
            "WMF00001000000000",
            "WMN1",
            "WMN0",
        ]
    );
    assert_eq!(meter_port.written_lines(), vec!["CONF:VOLT:AC", "AUTO", "MEAS?"]);
}

// =============================================================================
// Scenario: three-point log sweep
// =============================================================================

#[test]
fn three_point_log_sweep_gains() {
    let generator_port = Arc::new(MockTransport::open_with_lines(&[]));
    let mut generator = FeelTechGenerator::new(generator_port.clone());

    let meter_port = Arc::new(MockTransport::open_with_lines(&["1.000", "0.707", "0.100"]));
    let mut source = MeasurementSource::multimeter(Box::new(XdmMultimeter::new(meter_port)));

    let mut sweep = Sweep::new(&mut generator, &mut source, log_config(10.0, 1000.0, 3))
        .with_first_point_delay(Duration::ZERO);
    let result = sweep.run();

    assert!(result.is_complete());
    let frequencies: Vec<f64> = result.points.iter().map(|p| p.f_hz).collect();
    assert_eq!(frequencies[0], 10.0);
    assert!((frequencies[1] - 100.0).abs() < 1e-9);
    assert_eq!(frequencies[2], 1000.0);

    let gains: Vec<f64> = result.points.iter().map(|p| p.gain_db).collect();
    assert!((gains[0] - 0.0).abs() < 1e-9);
    assert!((gains[1] - -3.01).abs() < 0.01);
    assert!((gains[2] - -20.0).abs() < 1e-6);
}

// =============================================================================
// Scenario: abort after the first point
// =============================================================================

#[test]
fn abort_after_first_point_keeps_one_point_and_switches_output_off() {
    let generator_port = Arc::new(MockTransport::open_with_lines(&[]));
    let mut generator = FeelTechGenerator::new(generator_port.clone());

    let meter_port = Arc::new(MockTransport::open_with_lines(&["1.000", "0.707", "0.100"]));
    let mut source = MeasurementSource::multimeter(Box::new(XdmMultimeter::new(meter_port)));

    let sweep = Sweep::new(&mut generator, &mut source, log_config(10.0, 1000.0, 3))
        .with_first_point_delay(Duration::ZERO);
    let cancel = sweep.cancel_handle();
    let mut sweep = sweep.on_point(move |_point, index, _total| {
        if index == 0 {
            cancel.abort();
        }
    });
    let result = sweep.run();

    assert!(matches!(result.outcome, SweepOutcome::Cancelled));
    assert_eq!(result.points.len(), 1);

    let lines = generator_port.written_lines();
    assert_eq!(lines.last().map(String::as_str), Some("WMN0"));
    // Only the first frequency was ever commanded.
    assert_eq!(
        lines.iter().filter(|l| l.starts_with("WMF")).count(),
        1
    );
}

// =============================================================================
// Output-off guarantee under injected faults
// =============================================================================

#[test]
fn generator_fault_at_any_call_still_ends_with_output_off() {
    for failing_call in 0..6 {
        let mut generator = MockGenerator::failing_at_call(failing_call);
        let meter = MockMultimeter::with_readings(&[1.0, 1.0, 1.0]);
        let mut source = MeasurementSource::multimeter(Box::new(meter));

        let mut sweep = Sweep::new(&mut generator, &mut source, log_config(10.0, 1000.0, 3))
            .with_first_point_delay(Duration::ZERO);
        let result = sweep.run();
        drop(sweep);

        assert!(
            matches!(result.outcome, SweepOutcome::Failed(_)),
            "call {failing_call} should have failed the sweep"
        );
        let last = generator.calls().last().cloned();
        assert_eq!(
            last.as_deref(),
            Some("OUTPUT 1 OFF"),
            "call {failing_call}: output was not switched off last"
        );
    }
}

// =============================================================================
// Callback ordering and progress
// =============================================================================

#[test]
fn points_arrive_in_order_and_progress_follows_each_point() {
    let mut generator = MockGenerator::new();
    let meter = MockMultimeter::with_readings(&[1.0, 0.5, 0.25]);
    let mut source = MeasurementSource::multimeter(Box::new(meter));

    let events: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let on_point_events = events.clone();
    let on_progress_events = events.clone();

    let mut sweep = Sweep::new(&mut generator, &mut source, log_config(10.0, 1000.0, 3))
        .with_first_point_delay(Duration::ZERO)
        .on_point(move |_point, index, total| {
            on_point_events.borrow_mut().push(format!("point {index}/{total}"));
        })
        .on_progress(move |done, total| {
            on_progress_events.borrow_mut().push(format!("progress {done}/{total}"));
        });
    let result = sweep.run();

    assert!(result.is_complete());
    assert_eq!(
        *events.borrow(),
        vec![
            "point 0/3",
            "progress 1/3",
            "point 1/3",
            "progress 2/3",
            "point 2/3",
            "progress 3/3",
        ]
    );
}

// =============================================================================
// Degraded readings and invalid configuration
// =============================================================================

#[test]
fn meter_timeout_degrades_the_point_to_zero() {
    let mut generator = MockGenerator::new();
    // Two readings for three points: the last one times out.
    let meter = MockMultimeter::with_readings(&[1.0, 0.5]);
    let mut source = MeasurementSource::multimeter(Box::new(meter));

    let mut sweep = Sweep::new(&mut generator, &mut source, log_config(10.0, 1000.0, 3))
        .with_first_point_delay(Duration::ZERO);
    let result = sweep.run();

    assert!(result.is_complete());
    assert_eq!(result.points.len(), 3);
    assert_eq!(result.points[2].us_v, 0.0);
    assert_eq!(result.points[2].gain_db, bodebench::sweep::GAIN_DB_FLOOR);
}

#[test]
fn invalid_config_produces_empty_result_without_io() {
    let mut generator = MockGenerator::new();
    let meter = MockMultimeter::with_readings(&[1.0]);
    let mut source = MeasurementSource::multimeter(Box::new(meter));

    let mut bad = log_config(10.0, 1000.0, 3);
    bad.f_min_hz = -10.0;
    let mut sweep = Sweep::new(&mut generator, &mut source, bad);
    let result = sweep.run();
    drop(sweep);

    assert!(matches!(result.outcome, SweepOutcome::Failed(_)));
    assert!(result.points.is_empty());
    assert!(generator.calls().is_empty(), "no I/O may be issued");
}
