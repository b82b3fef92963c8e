//! Response validation and register extraction

use tracing::warn;

use meterbus_core::error::{MeterbusError, MeterbusResult};
use meterbus_core::profile::ByteOrder;

use super::crc::{crc16, trailing_crc};
use super::frame::EXCEPTION_BIT;

/// Check a collected response before anything in it is trusted
///
/// The exception bit is looked at first. An exception frame still has to pass
/// its own CRC, otherwise it is reported as a CRC failure like any other.
pub fn validate(response: &[u8]) -> MeterbusResult<()> {
    if response.len() < 2 {
        return Err(MeterbusError::TooShort {
            len: response.len(),
        });
    }

    if response[1] & EXCEPTION_BIT != 0 {
        if response.len() < 5 {
            return Err(MeterbusError::TooShort {
                len: response.len(),
            });
        }
        let frame = &response[..5];
        check_crc(frame)?;
        warn!(
            function = response[1] & !EXCEPTION_BIT,
            code = response[2],
            "modbus exception"
        );
        return Err(MeterbusError::exception(response[1], response[2]));
    }

    if response.len() < 4 {
        return Err(MeterbusError::TooShort {
            len: response.len(),
        });
    }
    check_crc(response)
}

fn check_crc(frame: &[u8]) -> MeterbusResult<()> {
    let computed = crc16(&frame[..frame.len() - 2]);
    let received = trailing_crc(frame).unwrap_or(0);
    if computed != received {
        warn!(computed, received, "crc mismatch");
        return Err(MeterbusError::CrcMismatch { computed, received });
    }
    Ok(())
}

/// Register payload of a validated read reply
///
/// Walks at most `min(num_regs, byte_count / 2)` registers and never past
/// the bytes actually present before the CRC.
pub fn extract_registers(response: &[u8], num_regs: usize, order: ByteOrder) -> Vec<u16> {
    if response.len() < 3 {
        return Vec::new();
    }
    let byte_count = response[2] as usize;
    let payload_end = response.len().saturating_sub(2).min(3 + byte_count);
    let payload = response.get(3..payload_end).unwrap_or(&[]);

    payload
        .chunks_exact(2)
        .take(num_regs.min(byte_count / 2))
        .map(|pair| match order {
            ByteOrder::HighFirst => u16::from_be_bytes([pair[0], pair[1]]),
            ByteOrder::LowFirst => u16::from_le_bytes([pair[0], pair[1]]),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::modbus::crc::append_crc;
    use meterbus_core::error::ExceptionCode;

    fn framed(bytes: &[u8]) -> Vec<u8> {
        let mut frame = bytes.to_vec();
        append_crc(&mut frame);
        frame
    }

    #[test]
    fn test_valid_read_reply() {
        let reply = framed(&[0xF8, 0x04, 0x02, 0x08, 0x98]);
        validate(&reply).unwrap();
        assert_eq!(extract_registers(&reply, 1, ByteOrder::HighFirst), vec![2200]);
    }

    #[test]
    fn test_exception_with_good_crc() {
        let reply = framed(&[0xF8, 0x84, 0x02]);
        let err = validate(&reply).unwrap_err();
        assert_eq!(err.exception_code(), Some(ExceptionCode::IllegalDataAddress));
        assert!(!err.is_crc_mismatch());
    }

    #[test]
    fn test_exception_with_bad_crc() {
        let mut reply = framed(&[0xF8, 0x84, 0x02]);
        reply[4] ^= 0xFF;
        assert!(validate(&reply).unwrap_err().is_crc_mismatch());
    }

    #[test]
    fn test_corrupted_payload() {
        let mut reply = framed(&[0x01, 0x03, 0x02, 0x00, 0x05]);
        reply[4] = 0x06;
        assert!(validate(&reply).unwrap_err().is_crc_mismatch());
    }

    #[test]
    fn test_too_short() {
        assert!(matches!(
            validate(&[0x01]),
            Err(MeterbusError::TooShort { len: 1 })
        ));
        assert!(matches!(
            validate(&[0x01, 0x83, 0x02]),
            Err(MeterbusError::TooShort { len: 3 })
        ));
    }

    #[test]
    fn test_extract_never_passes_byte_count() {
        // Declares one register, carries two
        let reply = framed(&[0x01, 0x03, 0x02, 0x00, 0x0A, 0x00, 0x0B]);
        assert_eq!(extract_registers(&reply, 2, ByteOrder::HighFirst), vec![10]);
    }

    #[test]
    fn test_extract_never_passes_buffer() {
        // Declares four registers, carries one
        let reply = framed(&[0x01, 0x03, 0x08, 0x00, 0x0A]);
        assert_eq!(extract_registers(&reply, 4, ByteOrder::HighFirst), vec![10]);
    }

    #[test]
    fn test_extract_low_first() {
        let reply = framed(&[0x01, 0x03, 0x02, 0x98, 0x08]);
        assert_eq!(extract_registers(&reply, 1, ByteOrder::LowFirst), vec![2200]);
    }

    #[test]
    fn test_extract_is_deterministic() {
        let reply = framed(&[0x01, 0x04, 0x04, 0x12, 0x34, 0xAB, 0xCD]);
        let first = extract_registers(&reply, 2, ByteOrder::HighFirst);
        let second = extract_registers(&reply, 2, ByteOrder::HighFirst);
        assert_eq!(first, vec![0x1234, 0xABCD]);
        assert_eq!(first, second);
    }
}
