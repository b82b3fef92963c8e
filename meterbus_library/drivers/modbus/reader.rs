//! Response reader
//!
//! RTU has no length header that works across every function code, so the end
//! of a frame is detected from two conditions together: the buffer holds at
//! least the shortest valid reply, and the line has been quiet for the idle
//! gap since the last byte. The overall timeout bounds the whole wait.

use std::thread;
use std::time::{Duration, Instant};

use tracing::trace;

use meterbus_core::error::{MeterbusError, MeterbusResult, TimeoutKind};

use super::frame::{EXCEPTION_BIT, EXCEPTION_LEN, MAX_FRAME_LEN};
use crate::drivers::serial::ByteStream;

/// Sleep between polls while the line is silent
const POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Timing limits for one response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadTiming {
    /// Upper bound on the whole wait
    pub overall: Duration,
    /// Quiet gap that ends a frame
    pub idle: Duration,
}

impl ReadTiming {
    pub fn new(overall: Duration, idle: Duration) -> Self {
        Self { overall, idle }
    }
}

/// Collect one response addressed from `expected_addr`
///
/// Bytes ahead of the first `expected_addr` byte are dropped, never buffered.
/// Once the function byte shows the exception bit, five bytes are enough.
/// Bytes past the largest RTU frame are read and dropped.
pub fn read_response<S: ByteStream + ?Sized>(
    stream: &mut S,
    expected_addr: u8,
    min_len: usize,
    timing: ReadTiming,
) -> MeterbusResult<Vec<u8>> {
    let start = Instant::now();
    let mut buffer: Vec<u8> = Vec::with_capacity(min_len.max(EXCEPTION_LEN));
    let mut required = min_len;
    let mut discarded = 0usize;
    let mut last_byte: Option<Instant> = None;

    loop {
        let mut received_any = false;
        let available = stream.bytes_available()?;
        for _ in 0..available {
            let Some(byte) = stream.read_byte()? else {
                break;
            };
            received_any = true;

            if buffer.is_empty() && byte != expected_addr {
                discarded += 1;
                continue;
            }
            if buffer.len() < MAX_FRAME_LEN {
                buffer.push(byte);
            }
            last_byte = Some(Instant::now());

            if buffer.len() == 2 && buffer[1] & EXCEPTION_BIT != 0 {
                required = EXCEPTION_LEN;
            }
        }

        let now = Instant::now();
        if buffer.len() >= required {
            if let Some(last) = last_byte {
                if now.duration_since(last) >= timing.idle {
                    if discarded > 0 {
                        trace!(discarded, "resynchronized on slave address");
                    }
                    return Ok(buffer);
                }
            }
        }

        let elapsed = now.duration_since(start);
        if elapsed >= timing.overall {
            return Err(classify(&buffer, required, discarded));
        }

        if !received_any {
            thread::sleep(POLL_INTERVAL.min(timing.overall - elapsed));
        }
    }
}

fn classify(buffer: &[u8], required: usize, discarded: usize) -> MeterbusError {
    if buffer.is_empty() {
        if discarded > 0 {
            return MeterbusError::AddressNeverSeen { discarded };
        }
        return MeterbusError::TransportTimeout(TimeoutKind::NoResponse);
    }
    if buffer.len() < required {
        return MeterbusError::TransportTimeout(TimeoutKind::Truncated {
            received: buffer.len(),
            expected: required,
        });
    }
    MeterbusError::TransportTimeout(TimeoutKind::BusNeverIdle {
        received: buffer.len(),
    })
}
