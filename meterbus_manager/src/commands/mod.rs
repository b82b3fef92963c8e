//! `meterbus` subcommands

pub mod meter;
pub mod profiles;

use meterbus_core::error::{MeterbusError, MeterbusResult};

/// Parse a register number or value given as decimal or `0x` hex
pub fn parse_u16(text: &str) -> MeterbusResult<u16> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => text.parse::<u16>(),
    };
    parsed.map_err(|_| MeterbusError::invalid_argument(format!("'{}' is not a 16-bit number", text)))
}

/// Same as [`parse_u16`], limited to one byte
pub fn parse_u8(text: &str) -> MeterbusResult<u8> {
    let value = parse_u16(text)?;
    u8::try_from(value)
        .map_err(|_| MeterbusError::invalid_argument(format!("'{}' does not fit in a byte", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_u16("42").unwrap(), 42);
        assert_eq!(parse_u16("0x0002").unwrap(), 2);
        assert_eq!(parse_u16(" 0XFFFF ").unwrap(), 0xFFFF);
        assert!(parse_u16("65536").is_err());
        assert!(parse_u16("volts").is_err());

        assert_eq!(parse_u8("0xF8").unwrap(), 0xF8);
        assert!(parse_u8("300").unwrap_err().is_invalid_argument());
    }
}
