//! Serial transport over `serialport`.

use super::{log_exchange, Direction, LogHook, Transport};
use crate::error::{BenchError, Result};
use log::trace;
use serialport::{DataBits, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// One serial link, 8N1 fixed, with a single lock serializing all I/O.
///
/// The `serialport` crate applies one timeout to both directions; the
/// configured read timeout is the one installed on the port, and the write
/// timeout is kept for the configuration record's shape.
pub struct SerialTransport {
    port_name: String,
    baud: u32,
    read_timeout: Duration,
    #[allow(dead_code)]
    write_timeout: Duration,
    io: Mutex<Option<Box<dyn SerialPort>>>,
    hook: Option<LogHook>,
}

impl SerialTransport {
    pub fn new(port_name: &str, baud: u32, read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud,
            read_timeout,
            write_timeout,
            io: Mutex::new(None),
            hook: None,
        }
    }

    /// Install a diagnostic TX/RX hook. Builder-style, before first open.
    pub fn with_log_hook(mut self, hook: LogHook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn guard(&self) -> MutexGuard<'_, Option<Box<dyn SerialPort>>> {
        // A poisoned lock only means another thread panicked mid-exchange;
        // the port handle itself is still valid.
        self.io.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Classify an open failure: ports the OS refuses (busy, access denied)
    /// are reported as `PortBusy` so detection can blacklist them.
    fn classify_open_error(port_name: &str, err: serialport::Error) -> BenchError {
        let description = err.description.to_lowercase();
        let denied = matches!(
            err.kind,
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied)
        );
        if denied
            || description.contains("busy")
            || description.contains("denied")
            || description.contains("semaphore")
        {
            BenchError::PortBusy(format!("{port_name}: {err}"))
        } else {
            BenchError::Serial(err)
        }
    }
}

impl Transport for SerialTransport {
    fn open(&self) -> Result<()> {
        let mut io = self.guard();
        if io.is_some() {
            return Ok(());
        }
        let port = serialport::new(&self.port_name, self.baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(self.read_timeout)
            .open()
            .map_err(|e| Self::classify_open_error(&self.port_name, e))?;
        trace!("opened {} @ {} 8N1", self.port_name, self.baud);
        *io = Some(port);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut io = self.guard();
        if io.take().is_some() {
            trace!("closed {}", self.port_name);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.guard().is_some()
    }

    fn write(&self, bytes: &[u8]) -> Result<usize> {
        let mut io = self.guard();
        let port = io.as_mut().ok_or(BenchError::TransportNotOpen)?;
        port.write_all(bytes)?;
        port.flush()?;
        log_exchange(&self.hook, Direction::Tx, bytes);
        trace!("{} TX {}", self.port_name, String::from_utf8_lossy(bytes).escape_default());
        Ok(bytes.len())
    }

    fn readline(&self) -> Result<Vec<u8>> {
        let mut io = self.guard();
        let port = io.as_mut().ok_or(BenchError::TransportNotOpen)?;
        let deadline = Instant::now() + self.read_timeout;
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        while Instant::now() < deadline {
            match port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    line.push(byte[0]);
                    if byte[0] == b'\n' {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }
        log_exchange(&self.hook, Direction::Rx, &line);
        trace!("{} RX {}", self.port_name, String::from_utf8_lossy(&line).escape_default());
        Ok(line)
    }

    fn read(&self, n: usize) -> Result<Vec<u8>> {
        let mut io = self.guard();
        let port = io.as_mut().ok_or(BenchError::TransportNotOpen)?;
        let deadline = Instant::now() + self.read_timeout;
        let mut collected = Vec::with_capacity(n);
        let mut buf = [0u8; 64];
        while collected.len() < n && Instant::now() < deadline {
            let want = (n - collected.len()).min(buf.len());
            match port.read(&mut buf[..want]) {
                Ok(0) => break,
                Ok(got) => collected.extend_from_slice(&buf[..got]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }
        log_exchange(&self.hook, Direction::Rx, &collected);
        Ok(collected)
    }

    fn in_waiting(&self) -> Result<usize> {
        let io = self.guard();
        let port = io.as_ref().ok_or(BenchError::TransportNotOpen)?;
        Ok(port.bytes_to_read()? as usize)
    }
}
