/*
 * Instrument Detection Tool
 *
 * Scans the available serial ports (and the configured USB identifiers)
 * with safe identification exchanges to find the bench instruments.
 *
 * Do not run this scan during an active sweep:
 * 1. Latency: probing blocks the thread and causes jitter.
 * 2. Safety: probe bytes at a mismatched baud rate reach the instruments
 *    as junk commands.
 * Run it once at startup or from a manual configuration step.
 */

use anyhow::{Context, Result};
use bodebench::bench::{DetectionRunner, EquipmentKind};
use bodebench::config::Settings;
use clap::Parser;

#[derive(Parser)]
#[command(name = "detect", about = "Scan serial ports for bench instruments")]
struct Cli {
    /// Configuration name under config/ (without extension).
    #[arg(long)]
    config: Option<String>,

    /// Print the updated configuration record as JSON.
    #[arg(long)]
    show_config: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut settings =
        Settings::new(cli.config.as_deref()).context("failed to load configuration")?;

    let mut runner = DetectionRunner::from_system().context("failed to enumerate serial ports")?;
    if let (Some(vid), Some(pid)) = (
        settings.usb_oscilloscope.vendor_id,
        settings.usb_oscilloscope.product_id,
    ) {
        runner = runner.with_scope_usb(vid, pid);
    }

    println!("Scanning for bench instruments...");
    let result = runner.run(&[
        EquipmentKind::Multimeter,
        EquipmentKind::Generator,
        EquipmentKind::PowerSupply,
        EquipmentKind::Oscilloscope,
    ]);

    for line in result.log_lines() {
        println!("  {line}");
    }

    println!();
    for kind in EquipmentKind::ALL {
        match result.endpoint(kind) {
            Some(endpoint) => println!(
                "{kind}: {} ({})",
                endpoint.address(),
                endpoint.label().unwrap_or("no label")
            ),
            None => println!("{kind}: not found"),
        }
    }

    if cli.show_config {
        settings.apply_detection(&result);
        println!();
        println!("{}", serde_json::to_string_pretty(&settings)?);
    }
    Ok(())
}
