//! Composition of register pairs into 32-bit values

use meterbus_core::profile::ByteOrder;

/// Merge two registers into one value
///
/// `order` says whether `first` is the low or the high half. With `signed`
/// the 32-bit result is read as two's complement.
pub fn compose(first: u16, second: u16, order: ByteOrder, signed: bool) -> i64 {
    let (high, low) = match order {
        ByteOrder::LowFirst => (second, first),
        ByteOrder::HighFirst => (first, second),
    };
    let raw = ((high as u32) << 16) | low as u32;
    if signed {
        raw as i32 as i64
    } else {
        raw as i64
    }
}

/// Split a value into two registers in wire order, the inverse of [`compose`]
pub fn split(value: u32, order: ByteOrder) -> [u16; 2] {
    let high = (value >> 16) as u16;
    let low = value as u16;
    match order {
        ByteOrder::LowFirst => [low, high],
        ByteOrder::HighFirst => [high, low],
    }
}
