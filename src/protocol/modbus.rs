//! Modbus-RTU driver for the programmable power supply.
//!
//! Binary framing `[slave | function | data... | crc_lo | crc_hi]` with
//! CRC-16 (polynomial 0xA001). Only two function codes are used: 0x03 reads
//! one 16-bit register, 0x06 writes one. The device needs a short gap after
//! TX before it starts answering, and replies have a fixed length per
//! function code, so responses are read as exact byte counts.

use crate::error::{BenchError, Result};
use crate::instrument::PowerSupply;
use crate::transport::Transport;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// FC 0x03: read one holding register.
pub const FN_READ_REGISTER: u8 = 0x03;
/// FC 0x06: write one holding register.
pub const FN_WRITE_REGISTER: u8 = 0x06;

/// Gap between the request and the first response byte.
const INTER_FRAME_GAP: Duration = Duration::from_millis(20);

/// CRC-16 with polynomial 0xA001 over the whole frame body.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Assemble `[slave | function | data | crc_lo | crc_hi]`.
pub fn build_frame(slave: u8, function: u8, data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(data.len() + 4);
    frame.push(slave);
    frame.push(function);
    frame.extend_from_slice(data);
    let crc = crc16(&frame);
    frame.push((crc & 0x00FF) as u8);
    frame.push((crc >> 8) as u8);
    frame
}

/// Validate a response frame and return its data field.
///
/// Rejects short frames, a wrong slave address, the exception bit, a wrong
/// function code, and CRC mismatches.
pub fn verify_frame(frame: &[u8], slave: u8, function: u8) -> Result<&[u8]> {
    if frame.len() < 5 {
        return Err(BenchError::ProtocolMalformed(format!(
            "modbus frame too short: {} bytes",
            frame.len()
        )));
    }
    if frame[0] != slave {
        return Err(BenchError::ProtocolMalformed(format!(
            "modbus slave mismatch: expected {slave:#04x}, got {:#04x}",
            frame[0]
        )));
    }
    if frame[1] & 0x80 != 0 {
        return Err(BenchError::ProtocolMalformed(format!(
            "modbus exception {:#04x}",
            frame.get(2).copied().unwrap_or(0)
        )));
    }
    if frame[1] != function {
        return Err(BenchError::ProtocolMalformed(format!(
            "modbus function mismatch: expected {function:#04x}, got {:#04x}",
            frame[1]
        )));
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    let crc = crc16(body);
    if tail != [(crc & 0x00FF) as u8, (crc >> 8) as u8] {
        return Err(BenchError::ProtocolMalformed("modbus CRC mismatch".into()));
    }
    Ok(&body[2..])
}

/// Low-level single-register Modbus-RTU master.
pub struct ModbusClient {
    transport: Arc<dyn Transport>,
    slave: u8,
}

impl ModbusClient {
    pub fn new(transport: Arc<dyn Transport>, slave: u8) -> Self {
        Self { transport, slave }
    }

    fn exchange(&self, function: u8, data: &[u8], response_len: usize) -> Result<Vec<u8>> {
        let request = build_frame(self.slave, function, data);
        self.transport.write(&request)?;
        thread::sleep(INTER_FRAME_GAP);
        let response = self.transport.read(response_len)?;
        if response.is_empty() {
            return Err(BenchError::TransportTimeout);
        }
        verify_frame(&response, self.slave, function)?;
        Ok(response)
    }

    /// Read one 16-bit holding register.
    pub fn read_register(&self, register: u16) -> Result<u16> {
        let data = [
            (register >> 8) as u8,
            (register & 0x00FF) as u8,
            0x00,
            0x01,
        ];
        let response = self.exchange(FN_READ_REGISTER, &data, 7)?;
        // [slave, fn, byte_count, hi, lo, crc_lo, crc_hi]
        if response[2] != 2 {
            return Err(BenchError::ProtocolMalformed(format!(
                "unexpected byte count {}",
                response[2]
            )));
        }
        Ok(u16::from(response[3]) << 8 | u16::from(response[4]))
    }

    /// Write one 16-bit holding register; the device echoes the request.
    pub fn write_register(&self, register: u16, value: u16) -> Result<()> {
        let data = [
            (register >> 8) as u8,
            (register & 0x00FF) as u8,
            (value >> 8) as u8,
            (value & 0x00FF) as u8,
        ];
        let response = self.exchange(FN_WRITE_REGISTER, &data, 8)?;
        if response[2..6] != data {
            return Err(BenchError::ProtocolMalformed(
                "write echo does not match request".into(),
            ));
        }
        Ok(())
    }
}

/// Register map of the bench supply.
mod registers {
    pub const ON_OFF: u16 = 0x0001;
    pub const U_DISPLAY: u16 = 0x0010;
    pub const I_DISPLAY: u16 = 0x0011;
    pub const SET_U: u16 = 0x0030;
    pub const SET_I: u16 = 0x0031;
}

const VOLTAGE_SCALE: f64 = 100.0;
const CURRENT_SCALE: f64 = 1000.0;

fn scaled_register_value(value: f64, scale: f64) -> u16 {
    (value * scale).round().clamp(0.0, f64::from(u16::MAX)) as u16
}

/// Bench power supply on the Modbus-RTU link.
pub struct ModbusPsu {
    client: ModbusClient,
}

impl ModbusPsu {
    pub fn new(transport: Arc<dyn Transport>, slave: u8) -> Self {
        Self {
            client: ModbusClient::new(transport, slave),
        }
    }

    pub fn client(&self) -> &ModbusClient {
        &self.client
    }
}

impl PowerSupply for ModbusPsu {
    fn set_voltage(&mut self, volts: f64) -> Result<()> {
        self.client
            .write_register(registers::SET_U, scaled_register_value(volts, VOLTAGE_SCALE))
    }

    fn voltage(&mut self) -> Result<f64> {
        Ok(f64::from(self.client.read_register(registers::U_DISPLAY)?) / VOLTAGE_SCALE)
    }

    fn set_current(&mut self, amps: f64) -> Result<()> {
        self.client
            .write_register(registers::SET_I, scaled_register_value(amps, CURRENT_SCALE))
    }

    fn current(&mut self) -> Result<f64> {
        Ok(f64::from(self.client.read_register(registers::I_DISPLAY)?) / CURRENT_SCALE)
    }

    fn set_output(&mut self, on: bool) -> Result<()> {
        self.client
            .write_register(registers::ON_OFF, u16::from(on))
    }

    fn output(&mut self) -> Result<bool> {
        Ok(self.client.read_register(registers::ON_OFF)? != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    #[test]
    fn crc_round_trips_and_rejects_bit_flips() {
        let frame = build_frame(0x01, FN_READ_REGISTER, &[0x00, 0x10, 0x00, 0x01]);
        let data = verify_frame(&frame, 0x01, FN_READ_REGISTER).unwrap();
        assert_eq!(data, &[0x00, 0x10, 0x00, 0x01]);

        for bit in 0..frame.len() * 8 {
            let mut corrupted = frame.clone();
            corrupted[bit / 8] ^= 1 << (bit % 8);
            assert!(
                verify_frame(&corrupted, 0x01, FN_READ_REGISTER).is_err(),
                "bit flip {bit} went undetected"
            );
        }
    }

    #[test]
    fn exception_bit_is_rejected() {
        let frame = build_frame(0x01, FN_READ_REGISTER | 0x80, &[0x02]);
        assert!(matches!(
            verify_frame(&frame, 0x01, FN_READ_REGISTER),
            Err(BenchError::ProtocolMalformed(_))
        ));
    }

    #[test]
    fn wrong_slave_is_rejected() {
        let frame = build_frame(0x02, FN_READ_REGISTER, &[0x02, 0x04, 0xD2]);
        assert!(verify_frame(&frame, 0x01, FN_READ_REGISTER).is_err());
    }

    #[test]
    fn read_register_parses_display_voltage() {
        // 0x04D2 = 1234 -> 12.34 V at the x100 display scale.
        let response = build_frame(0x01, FN_READ_REGISTER, &[0x02, 0x04, 0xD2]);
        let transport = Arc::new(MockTransport::open_with_frames(&[&response]));
        let mut psu = ModbusPsu::new(transport.clone(), 0x01);
        assert!((psu.voltage().unwrap() - 12.34).abs() < 1e-9);

        // Request on the wire: FC03, register 0x0010, count 1.
        let written = transport.written_frames();
        assert_eq!(
            written[0],
            build_frame(0x01, FN_READ_REGISTER, &[0x00, 0x10, 0x00, 0x01])
        );
    }

    #[test]
    fn setters_round_and_clamp() {
        assert_eq!(scaled_register_value(12.345, 100.0), 1235);
        assert_eq!(scaled_register_value(-1.0, 100.0), 0);
        assert_eq!(scaled_register_value(1e9, 1000.0), u16::MAX);
    }

    #[test]
    fn write_register_checks_echo() {
        let echo = build_frame(0x01, FN_WRITE_REGISTER, &[0x00, 0x30, 0x01, 0xF4]);
        let transport = Arc::new(MockTransport::open_with_frames(&[&echo]));
        let mut psu = ModbusPsu::new(transport, 0x01);
        psu.set_voltage(5.0).unwrap();
    }
}
