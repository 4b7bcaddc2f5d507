//! Byte-level transports for instrument links.
//!
//! A transport frames nothing and interprets nothing: it moves bytes over
//! one serial port or one USB bulk interface, with bounded blocking reads.
//! Protocol layers own the command syntax; transports own the wire.
//!
//! Every implementation serializes its I/O behind a single internal lock, so
//! a transport handle can be shared between protocol objects without two
//! exchanges ever interleaving on the port.

use crate::error::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod serial;
pub mod usb;

pub use serial::SerialTransport;
pub use usb::UsbTransport;

/// Direction of a logged exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

/// Optional diagnostic hook invoked once per TX or RX payload.
pub type LogHook = Arc<dyn Fn(Direction, &[u8]) + Send + Sync>;

/// Common contract for the bench transports.
///
/// Methods take `&self`: implementations lock internally, and the lock is
/// held for the duration of one call, never across calls.
pub trait Transport: Send + Sync {
    /// Establish the connection. Idempotent when already open.
    fn open(&self) -> Result<()>;

    /// Tear the connection down. Idempotent when already closed.
    fn close(&self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Write the whole buffer, returning the number of bytes written.
    fn write(&self, bytes: &[u8]) -> Result<usize>;

    /// Read up to and including the next `\n`.
    ///
    /// Returns an empty buffer when the timeout expires before any
    /// terminator arrives; bytes collected so far are returned as-is when
    /// the line is cut short.
    fn readline(&self) -> Result<Vec<u8>>;

    /// Read exactly `n` bytes, or fewer on timeout.
    fn read(&self, n: usize) -> Result<Vec<u8>>;

    /// Number of bytes already buffered by the driver, when the backend
    /// exposes it.
    fn in_waiting(&self) -> Result<usize> {
        Ok(0)
    }

    /// Drain stale bytes left over from a previous exchange.
    ///
    /// Performs at most `max_reads` short reads within `timeout`, returning
    /// the number of bytes discarded.
    fn flush_input(&self, timeout: Duration, max_reads: usize) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut discarded = 0;
        for _ in 0..max_reads {
            if Instant::now() >= deadline {
                break;
            }
            let chunk = self.read(64)?;
            if chunk.is_empty() {
                break;
            }
            discarded += chunk.len();
        }
        Ok(discarded)
    }
}

pub(crate) fn log_exchange(hook: &Option<LogHook>, direction: Direction, payload: &[u8]) {
    if let Some(hook) = hook {
        hook(direction, payload);
    }
}
