//! Request frame encoding
//!
//! Pure byte building, no I/O. Every encoder appends a valid CRC; range checks
//! on counts and addresses belong to the session.

use meterbus_core::profile::{ByteOrder, RegisterSpace, ResetStyle};

use super::crc::append_crc;

pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const READ_INPUT_REGISTERS: u8 = 0x04;
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
/// Vendor specific energy counter reset
pub const RESET_ENERGY: u8 = 0x42;

/// Set on the function byte of an exception reply
pub const EXCEPTION_BIT: u8 = 0x80;
/// `[addr][func|0x80][code][crc][crc]`
pub const EXCEPTION_LEN: usize = 5;
/// Largest RTU frame
pub const MAX_FRAME_LEN: usize = 256;

/// Space separated hex dump for frame logging
pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Register value bytes in the requested order
pub fn value_bytes(value: u16, order: ByteOrder) -> [u8; 2] {
    match order {
        ByteOrder::HighFirst => value.to_be_bytes(),
        ByteOrder::LowFirst => value.to_le_bytes(),
    }
}

/// `[addr][0x03|0x04][startHi][startLo][countHi][countLo][crc]`
pub fn encode_read(space: RegisterSpace, slave: u8, start: u16, count: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.push(slave);
    frame.push(space.read_function());
    frame.extend_from_slice(&start.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    append_crc(&mut frame);
    frame
}

/// `[addr][0x06][regHi][regLo][value][crc]`
pub fn encode_write_single(slave: u8, register: u16, value: u16, order: ByteOrder) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.push(slave);
    frame.push(WRITE_SINGLE_REGISTER);
    frame.extend_from_slice(&register.to_be_bytes());
    frame.extend_from_slice(&value_bytes(value, order));
    append_crc(&mut frame);
    frame
}

/// `[addr][0x10][startHi][startLo][countHi][countLo][byteCount][values..][crc]`
pub fn encode_write_multiple(slave: u8, start: u16, values: &[u16], order: ByteOrder) -> Vec<u8> {
    let count = values.len() as u16;
    let mut frame = Vec::with_capacity(9 + 2 * values.len());
    frame.push(slave);
    frame.push(WRITE_MULTIPLE_REGISTERS);
    frame.extend_from_slice(&start.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    frame.push((values.len() * 2) as u8);
    for &value in values {
        frame.extend_from_slice(&value_bytes(value, order));
    }
    append_crc(&mut frame);
    frame
}

/// `[addr][func][extra..][crc]`
pub fn encode_custom(slave: u8, function: u8, extra: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + extra.len());
    frame.push(slave);
    frame.push(function);
    frame.extend_from_slice(extra);
    append_crc(&mut frame);
    frame
}

/// Energy reset frame in the shape the device family expects
pub fn encode_reset(slave: u8, style: ResetStyle) -> Vec<u8> {
    match style {
        ResetStyle::Bare => encode_custom(slave, RESET_ENERGY, &[]),
        ResetStyle::WithPhase { selector } => encode_custom(slave, RESET_ENERGY, &[0x00, selector]),
    }
}

/// Shortest valid normal reply to a request
pub fn min_response_len(function: u8, count: u16, reset: ResetStyle) -> usize {
    match function {
        READ_HOLDING_REGISTERS | READ_INPUT_REGISTERS => 5 + 2 * count as usize,
        WRITE_SINGLE_REGISTER | WRITE_MULTIPLE_REGISTERS => 8,
        RESET_ENERGY => match reset {
            ResetStyle::Bare => 4,
            ResetStyle::WithPhase { .. } => 6,
        },
        _ => EXCEPTION_LEN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::modbus::crc::verify;

    #[test]
    fn test_read_input_general_address() {
        let frame = encode_read(RegisterSpace::Input, 0xF8, 0x0000, 1);
        assert_eq!(&frame[..6], &[0xF8, 0x04, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(frame.len(), 8);
        assert!(verify(&frame));
    }

    #[test]
    fn test_read_holding_large_start() {
        let frame = encode_read(RegisterSpace::Holding, 0x01, 0x1234, 0x0040);
        assert_eq!(&frame[..6], &[0x01, 0x03, 0x12, 0x34, 0x00, 0x40]);
        assert_eq!(frame.len(), 8);
    }

    #[test]
    fn test_write_single_byte_order() {
        let high = encode_write_single(0x01, 0x0002, 0x1234, ByteOrder::HighFirst);
        assert_eq!(&high[..6], &[0x01, 0x06, 0x00, 0x02, 0x12, 0x34]);

        let low = encode_write_single(0x01, 0x0002, 0x1234, ByteOrder::LowFirst);
        assert_eq!(&low[..6], &[0x01, 0x06, 0x00, 0x02, 0x34, 0x12]);
        assert!(verify(&low));
    }

    #[test]
    fn test_write_multiple_length() {
        for n in 1..=10usize {
            let values: Vec<u16> = (0..n as u16).collect();
            let frame = encode_write_multiple(0x05, 0x0010, &values, ByteOrder::HighFirst);
            assert_eq!(frame.len(), 9 + 2 * n);
            assert_eq!(frame[6] as usize, 2 * n);
            assert!(verify(&frame));
        }
    }

    #[test]
    fn test_reset_frames() {
        let bare = encode_reset(0xF8, ResetStyle::Bare);
        assert_eq!(bare.len(), 4);
        assert_eq!(&bare[..2], &[0xF8, 0x42]);

        let phase = encode_reset(0xF8, ResetStyle::WithPhase { selector: 0x0F });
        assert_eq!(&phase[..4], &[0xF8, 0x42, 0x00, 0x0F]);
        assert!(verify(&phase));
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0xF8, 0x04, 0x0A]), "F8 04 0A");
        assert_eq!(to_hex(&[]), "");
    }

    #[test]
    fn test_min_response_len() {
        assert_eq!(min_response_len(READ_INPUT_REGISTERS, 10, ResetStyle::Bare), 25);
        assert_eq!(min_response_len(WRITE_SINGLE_REGISTER, 1, ResetStyle::Bare), 8);
        assert_eq!(min_response_len(RESET_ENERGY, 0, ResetStyle::Bare), 4);
        assert_eq!(
            min_response_len(RESET_ENERGY, 0, ResetStyle::WithPhase { selector: 0 }),
            6
        );
    }
}
