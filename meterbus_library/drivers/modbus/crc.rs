//! Modbus CRC16 (polynomial 0xA001, initial value 0xFFFF)

/// CRC of `data`, computed bit by bit
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Append the CRC of `frame`, low byte first
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Trailing CRC of a frame, as sent on the wire
pub fn trailing_crc(frame: &[u8]) -> Option<u16> {
    match frame {
        [.., lo, hi] => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}

/// Check the trailing CRC of a frame
///
/// A frame shorter than its two CRC bytes never verifies.
pub fn verify(frame: &[u8]) -> bool {
    if frame.len() < 2 {
        return false;
    }
    let body = &frame[..frame.len() - 2];
    trailing_crc(frame) == Some(crc16(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODBUS: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

    #[test]
    fn test_known_vector() {
        // Read input register 0 of the general address
        let frame = [0xF8, 0x04, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(crc16(&frame), MODBUS.checksum(&frame));
        assert_eq!(crc16(b"123456789"), 0x4B37);
    }

    #[test]
    fn test_matches_reference_implementation() {
        let samples: [&[u8]; 4] = [
            &[],
            &[0x01],
            &[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A],
            &[0xF8, 0x42],
        ];
        for sample in samples {
            assert_eq!(crc16(sample), MODBUS.checksum(sample), "{:02X?}", sample);
        }
    }

    #[test]
    fn test_append_then_verify() {
        let mut frame = vec![0x01, 0x06, 0x00, 0x02, 0x00, 0x05];
        append_crc(&mut frame);
        assert_eq!(frame.len(), 8);
        assert!(verify(&frame));
    }

    #[test]
    fn test_any_bit_flip_fails() {
        let mut frame = vec![0xF8, 0x04, 0x02, 0x08, 0x98];
        append_crc(&mut frame);
        for byte in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(!verify(&corrupted), "flip byte {} bit {}", byte, bit);
            }
        }
    }

    #[test]
    fn test_short_frames_never_verify() {
        assert!(!verify(&[]));
        assert!(!verify(&[0xFF]));
        assert_eq!(trailing_crc(&[0x34, 0x12]), Some(0x1234));
        assert_eq!(trailing_crc(&[0x34]), None);
    }

    #[test]
    fn test_empty_payload_round_trip() {
        let mut frame = Vec::new();
        append_crc(&mut frame);
        assert_eq!(frame, vec![0xFF, 0xFF]);
        assert!(verify(&frame));
    }
}
