//! Command-line sweep runner.
//!
//! Loads the bench configuration, opens the configured instruments, runs one
//! Bode sweep and prints the points; optionally writes the CSV export.

use anyhow::{Context, Result};
use bodebench::bench::{DetectionRunner, EquipmentKind};
use bodebench::config::Settings;
use bodebench::measurement::{MeasurementSource, ScopeSource, SourceKind};
use bodebench::protocol::{FeelTechGenerator, VdsScope, XdmMultimeter};
use bodebench::sweep::Sweep;
use bodebench::transport::Transport;
use clap::Parser;
use log::info;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "bodebench", about = "Run a Bode sweep against the bench")]
struct Cli {
    /// Configuration name under config/ (without extension).
    #[arg(long)]
    config: Option<String>,

    /// Autodetect instrument ports before the sweep.
    #[arg(long)]
    detect: bool,

    /// Measurement source override.
    #[arg(long, value_enum)]
    source: Option<CliSource>,

    /// Write the result as CSV to this path.
    #[arg(long)]
    csv: Option<std::path::PathBuf>,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliSource {
    Multimeter,
    Oscilloscope,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut settings =
        Settings::new(cli.config.as_deref()).context("failed to load configuration")?;

    if cli.detect {
        let mut runner =
            DetectionRunner::from_system().context("failed to enumerate serial ports")?;
        if let (Some(vid), Some(pid)) = (
            settings.usb_oscilloscope.vendor_id,
            settings.usb_oscilloscope.product_id,
        ) {
            runner = runner.with_scope_usb(vid, pid);
        }
        let result = runner.run(&[
            EquipmentKind::Multimeter,
            EquipmentKind::Generator,
            EquipmentKind::PowerSupply,
            EquipmentKind::Oscilloscope,
        ]);
        for line in result.log_lines() {
            info!("{line}");
        }
        settings.apply_detection(&result);
    }

    let source_kind = match cli.source {
        Some(CliSource::Multimeter) => SourceKind::Multimeter,
        Some(CliSource::Oscilloscope) => SourceKind::Oscilloscope,
        None => settings.filter_test.measure_source,
    };

    let generator_transport: Arc<dyn Transport> = Arc::new(settings.generator_transport());
    generator_transport
        .open()
        .context("failed to open the generator port")?;
    let mut generator = FeelTechGenerator::new(generator_transport.clone());

    let mut source = build_source(&settings, source_kind)?;

    let sweep_config = settings.filter_test_config()?;
    info!(
        "sweep {:?}: {} points {} .. {} Hz",
        source_kind, sweep_config.n_points, sweep_config.f_min_hz, sweep_config.f_max_hz
    );

    let mut sweep = Sweep::new(&mut generator, &mut source, sweep_config).on_point(
        |point, index, total| {
            let phase = point
                .phase_deg
                .map(|deg| format!("{deg:8.2}°"))
                .unwrap_or_else(|| "       -".to_string());
            println!(
                "[{:3}/{total}] {:>12.3} Hz  Us {:8.4} V  gain {:8.2} dB  phase {phase}",
                index + 1,
                point.f_hz,
                point.us_v,
                point.gain_db
            );
        },
    );
    let result = sweep.run();

    if let Some(path) = &cli.csv {
        bodebench::export::write_csv_file(path, &result.points)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("wrote {} points to {}", result.points.len(), path.display());
    }

    generator_transport.close().ok();
    match result.outcome {
        bodebench::sweep::SweepOutcome::Completed => Ok(()),
        bodebench::sweep::SweepOutcome::Cancelled => {
            println!("sweep cancelled after {} points", result.points.len());
            Ok(())
        }
        bodebench::sweep::SweepOutcome::Failed(e) => Err(e).context("sweep failed"),
    }
}

fn build_source(settings: &Settings, kind: SourceKind) -> Result<MeasurementSource> {
    match kind {
        SourceKind::Multimeter => {
            let transport: Arc<dyn Transport> = Arc::new(settings.multimeter_transport());
            transport
                .open()
                .context("failed to open the multimeter port")?;
            let meter = XdmMultimeter::new(transport);
            meter.identify().context("multimeter identification failed")?;
            Ok(MeasurementSource::multimeter(Box::new(meter)))
        }
        SourceKind::Oscilloscope => {
            let transport: Arc<dyn Transport> = Arc::new(settings.oscilloscope_transport()?);
            transport
                .open()
                .context("failed to open the oscilloscope")?;
            let scope = VdsScope::new(transport);
            let (ch_ue, ch_us) = settings.oscillo_channels()?;
            let source = ScopeSource::new(Box::new(scope), ch_ue, ch_us)
                .with_phase_skip_scale(settings.phase_skip_scale_v());
            Ok(MeasurementSource::oscilloscope(source))
        }
    }
}
