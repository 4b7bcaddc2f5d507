//! # Bode-sweep test bench core
//!
//! This crate is the core of an automated electronic test bench: a
//! frequency-response (Bode) sweep engine that drives a function generator
//! across a range of frequencies while a measurement source (a digital
//! multimeter in AC-RMS mode, or a dual-channel oscilloscope) captures the
//! input and output amplitudes of a device under test, plus the phase shift
//! between channels on the oscilloscope path. One sweep yields a sequence of
//! calibrated [`sweep::BodePoint`]s characterizing the transfer function of
//! the DUT, typically a passive filter.
//!
//! ## Crate Structure
//!
//! The library is layered, leaves first:
//!
//! - **`transport`**: byte-level framed I/O on one serial port
//!   (`serialport`) or one USB bulk interface (`rusb`).
//! - **`protocol`**: instrument-specific command encoding/decoding: a SCPI
//!   multimeter dialect, the FeelTech fixed-command generator dialect with
//!   µHz-scaled integers, Modbus-RTU for the power supply, and a vendor SCPI
//!   dialect spoken by the oscilloscope over bulk endpoints.
//! - **`instrument`**: semantic capability traits grouped per instrument
//!   role (multimeter, generator, power supply, scope).
//! - **`measurement`**: the "give me (Ue, Us, phase) at a frequency"
//!   abstraction with its multimeter and oscilloscope adapters.
//! - **`sweep`**: frequency list generation, per-point sequencing, gain
//!   computation, cooperative cancellation, progress callbacks.
//! - **`bench`**: the aggregate connection state and the probe-driven
//!   instrument autodetection runner.
//! - **`config`**: the typed settings record consumed by the bench.
//! - **`export`**: the stable CSV shape of a sweep result.
//! - **`mock`**: scripted transports and instruments for tests.

pub mod bench;
pub mod config;
pub mod error;
pub mod export;
pub mod instrument;
pub mod measurement;
pub mod mock;
pub mod protocol;
pub mod sweep;
pub mod transport;

pub use error::{BenchError, Result};
