//! Custom error types for the bench core.
//!
//! This module defines the primary error type, `BenchError`, for the whole
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of failure that occur on an
//! automated test bench, from configuration problems to wire-protocol
//! violations.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: wraps errors from the `config` crate (file parsing or
//!   format issues in the settings sources).
//! - **`ConfigurationInvalid`**: semantic errors that pass parsing but are
//!   logically wrong (non-positive frequency bound, empty sweep). Caught
//!   before any instrument I/O is issued.
//! - **`Io`**: standard `std::io::Error` from the underlying ports.
//! - **`TransportNotOpen`** / **`TransportTimeout`**: transport-level
//!   conditions. A timeout is not fatal at the sweep level; it degrades the
//!   affected reading to a default value.
//! - **`PortBusy`**: the operating system refused to open a port. During
//!   detection the port is marked unusable for the rest of the run.
//! - **`ProtocolMalformed`**: a response that is too short, has a wrong
//!   header, fails its CRC, or carries an unparseable number.
//! - **`IdentificationMismatch`**: an `*IDN?` reply without the expected
//!   vendor tag; the connection is closed and the kind stays disconnected.
//! - **`Cancelled`**: the operator requested abort. This is a normal
//!   completion path for a sweep, not a fault.
//!
//! With `#[from]`, `BenchError` is created seamlessly from the underlying
//! error types, so the `?` operator works throughout the crate.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, BenchError>;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    ConfigurationInvalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport not open")]
    TransportNotOpen,

    #[error("Transport read/write timed out")]
    TransportTimeout,

    #[error("Port busy or access denied: {0}")]
    PortBusy(String),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("No usable USB backend (libusb unavailable)")]
    UsbNoBackend,

    #[error("USB device {vid:04x}:{pid:04x} not found")]
    UsbDeviceNotFound { vid: u16, pid: u16 },

    #[error("USB interface (0,0) exposes no bulk IN/OUT endpoint pair")]
    UsbNoBulkEndpoints,

    #[error("Malformed response: {0}")]
    ProtocolMalformed(String),

    #[error("CSV export error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Device identification mismatch: expected tag '{expected}', got '{got}'")]
    IdentificationMismatch { expected: String, got: String },

    #[error("Operation cancelled by operator")]
    Cancelled,
}

impl BenchError {
    /// True for conditions that degrade a single reading instead of ending
    /// the sweep: the point's field becomes 0 or `None` and the run goes on.
    pub fn is_degraded_reading(&self) -> bool {
        matches!(
            self,
            BenchError::TransportTimeout | BenchError::ProtocolMalformed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_degrades_instead_of_failing() {
        assert!(BenchError::TransportTimeout.is_degraded_reading());
        assert!(BenchError::ProtocolMalformed("short frame".into()).is_degraded_reading());
        assert!(!BenchError::TransportNotOpen.is_degraded_reading());
        assert!(!BenchError::Cancelled.is_degraded_reading());
    }

    #[test]
    fn usb_open_errors_render_identifiers() {
        let err = BenchError::UsbDeviceNotFound {
            vid: 0x5345,
            pid: 0x1234,
        };
        assert!(err.to_string().contains("5345:1234"));
    }
}
