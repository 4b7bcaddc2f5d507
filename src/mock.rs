//! Mock implementations for tests.
//!
//! Simulated transports and instruments so the protocol layers, the
//! measurement adapters, and the sweep engine can be exercised without
//! physical hardware.
//!
//! # Available Mocks
//!
//! - [`MockTransport`]: scripted byte transport with queued replies, recorded
//!   writes, optional open failure.
//! - [`MockGenerator`]: records the capability-level command stream and can
//!   fail a chosen call.
//! - [`MockMultimeter`]: queue of readings; an empty queue reads as a
//!   transport timeout.

use crate::error::{BenchError, Result};
use crate::instrument::{Channel, Generator, Multimeter, Waveform};
use crate::transport::Transport;
use std::collections::VecDeque;
use std::sync::Mutex;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Scripted transport.
///
/// Each queued reply answers exactly one `readline`/`read` call; an empty
/// queue behaves like a read timeout (empty buffer). All writes are
/// recorded verbatim.
pub struct MockTransport {
    open: Mutex<bool>,
    busy_message: Option<String>,
    replies: Mutex<VecDeque<Vec<u8>>>,
    writes: Mutex<Vec<Vec<u8>>>,
}

impl MockTransport {
    fn with_replies(open: bool, replies: VecDeque<Vec<u8>>) -> Self {
        Self {
            open: Mutex::new(open),
            busy_message: None,
            replies: Mutex::new(replies),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// An already-open transport answering with the given text lines.
    pub fn open_with_lines(lines: &[&str]) -> Self {
        let replies = lines
            .iter()
            .map(|line| {
                let mut bytes = line.as_bytes().to_vec();
                if !bytes.ends_with(b"\n") {
                    bytes.push(b'\n');
                }
                bytes
            })
            .collect();
        Self::with_replies(true, replies)
    }

    /// An already-open transport answering with the given binary frames.
    pub fn open_with_frames(frames: &[&[u8]]) -> Self {
        Self::with_replies(true, frames.iter().map(|f| f.to_vec()).collect())
    }

    /// A closed transport whose `open` succeeds, then answers with `lines`.
    pub fn closed_with_lines(lines: &[&str]) -> Self {
        let mut mock = Self::open_with_lines(lines);
        mock.open = Mutex::new(false);
        mock
    }

    /// A transport whose `open` always fails as busy/denied.
    pub fn busy(message: &str) -> Self {
        let mut mock = Self::with_replies(false, VecDeque::new());
        mock.busy_message = Some(message.to_string());
        mock
    }

    /// Every write so far, raw.
    pub fn written_frames(&self) -> Vec<Vec<u8>> {
        lock(&self.writes).clone()
    }

    /// Every write so far as text, trailing newline stripped.
    pub fn written_lines(&self) -> Vec<String> {
        lock(&self.writes)
            .iter()
            .map(|w| {
                String::from_utf8_lossy(w)
                    .trim_end_matches('\n')
                    .to_string()
            })
            .collect()
    }

    /// Number of replies still queued.
    pub fn replies_left(&self) -> usize {
        lock(&self.replies).len()
    }
}

impl Transport for MockTransport {
    fn open(&self) -> Result<()> {
        if let Some(message) = &self.busy_message {
            return Err(BenchError::PortBusy(message.clone()));
        }
        *lock(&self.open) = true;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        *lock(&self.open) = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        *lock(&self.open)
    }

    fn write(&self, bytes: &[u8]) -> Result<usize> {
        if !self.is_open() {
            return Err(BenchError::TransportNotOpen);
        }
        lock(&self.writes).push(bytes.to_vec());
        Ok(bytes.len())
    }

    fn readline(&self) -> Result<Vec<u8>> {
        if !self.is_open() {
            return Err(BenchError::TransportNotOpen);
        }
        Ok(lock(&self.replies).pop_front().unwrap_or_default())
    }

    fn read(&self, n: usize) -> Result<Vec<u8>> {
        if !self.is_open() {
            return Err(BenchError::TransportNotOpen);
        }
        let mut replies = lock(&self.replies);
        match replies.pop_front() {
            Some(mut reply) => {
                if reply.len() > n {
                    let rest = reply.split_off(n);
                    replies.push_front(rest);
                }
                Ok(reply)
            }
            None => Ok(Vec::new()),
        }
    }
}

/// Generator mock recording every capability call.
///
/// Calls are recorded as compact strings (`"WAVEFORM 1 00"`, `"FREQ 1
/// 1000"`, `"OUTPUT 1 OFF"`). One call index can be armed to fail, to
/// exercise the sweep engine's cleanup guarantees.
#[derive(Default)]
pub struct MockGenerator {
    calls: Vec<String>,
    fail_at_call: Option<usize>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the n-th capability call (0-based) with an instrument error.
    pub fn failing_at_call(n: usize) -> Self {
        Self {
            calls: Vec::new(),
            fail_at_call: Some(n),
        }
    }

    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    fn record(&mut self, call: String) -> Result<()> {
        let index = self.calls.len();
        self.calls.push(call);
        if self.fail_at_call == Some(index) {
            return Err(BenchError::Io(std::io::Error::other("injected fault")));
        }
        Ok(())
    }
}

impl Generator for MockGenerator {
    fn set_waveform(&mut self, channel: Channel, waveform: Waveform) -> Result<()> {
        self.record(format!("WAVEFORM {} {:02}", channel.number(), waveform.code()))
    }

    fn set_frequency(&mut self, channel: Channel, hz: f64) -> Result<()> {
        self.record(format!("FREQ {} {hz}", channel.number()))
    }

    fn set_amplitude(&mut self, channel: Channel, volts_peak: f64) -> Result<()> {
        self.record(format!("AMP {} {volts_peak:.3}", channel.number()))
    }

    fn set_offset(&mut self, channel: Channel, volts: f64) -> Result<()> {
        self.record(format!("OFFSET {} {volts:.2}", channel.number()))
    }

    fn set_output(&mut self, channel: Channel, on: bool) -> Result<()> {
        let state = if on { "ON" } else { "OFF" };
        self.record(format!("OUTPUT {} {state}", channel.number()))
    }
}

/// Multimeter mock with a queue of readings.
pub struct MockMultimeter {
    readings: VecDeque<f64>,
    pub configured_ac: bool,
}

impl MockMultimeter {
    pub fn with_readings(readings: &[f64]) -> Self {
        Self {
            readings: readings.iter().copied().collect(),
            configured_ac: false,
        }
    }
}

impl Multimeter for MockMultimeter {
    fn configure_ac_volts(&mut self) -> Result<()> {
        self.configured_ac = true;
        Ok(())
    }

    fn read_value(&mut self) -> Result<f64> {
        self.readings
            .pop_front()
            .ok_or(BenchError::TransportTimeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_transport_scripts_lines_and_frames() {
        let transport = MockTransport::open_with_lines(&["first", "second"]);
        transport.write(b"Q?\n").unwrap();
        assert_eq!(transport.readline().unwrap(), b"first\n");
        assert_eq!(transport.readline().unwrap(), b"second\n");
        assert!(transport.readline().unwrap().is_empty());
        assert_eq!(transport.written_lines(), vec!["Q?"]);
    }

    #[test]
    fn mock_transport_read_splits_long_replies() {
        let transport = MockTransport::open_with_frames(&[&[1, 2, 3, 4, 5]]);
        assert_eq!(transport.read(3).unwrap(), vec![1, 2, 3]);
        assert_eq!(transport.read(3).unwrap(), vec![4, 5]);
    }

    #[test]
    fn busy_transport_refuses_to_open() {
        let transport = MockTransport::busy("COM7 in use");
        assert!(matches!(transport.open(), Err(BenchError::PortBusy(_))));
        assert!(!transport.is_open());
    }

    #[test]
    fn failing_generator_still_records_the_call() {
        let mut generator = MockGenerator::failing_at_call(1);
        generator.set_waveform(Channel::Ch1, Waveform::Sine).unwrap();
        assert!(generator.set_frequency(Channel::Ch1, 100.0).is_err());
        assert!(generator.set_output(Channel::Ch1, false).is_ok());
        assert_eq!(generator.calls().len(), 3);
    }
}
