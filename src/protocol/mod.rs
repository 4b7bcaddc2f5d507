//! Instrument wire protocols.
//!
//! One module per dialect: classic line-oriented SCPI for the multimeter,
//! the FeelTech fixed-command dialect for the generator, Modbus-RTU for the
//! power supply, and the vendor SCPI dialect the oscilloscope speaks over
//! USB bulk endpoints. Each driver borrows a shared [`crate::transport`]
//! handle and exposes the matching capability trait from
//! [`crate::instrument`].

pub mod feeltech;
pub mod modbus;
pub mod scope;
pub mod scpi;

pub use feeltech::FeelTechGenerator;
pub use modbus::ModbusPsu;
pub use scope::VdsScope;
pub use scpi::XdmMultimeter;
