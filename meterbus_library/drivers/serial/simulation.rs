//! Simulation Serial driver

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use meterbus_core::driver::DriverStatus;
use meterbus_core::error::{MeterbusError, MeterbusResult};

use super::{ByteStream, SerialConfig};

/// Something on the far end of the simulated wire that answers requests
pub trait FrameResponder: Send {
    /// Reply bytes for a complete request frame, `None` to stay silent
    fn respond(&mut self, request: &[u8]) -> Option<Vec<u8>>;
}

/// One scripted answer to the next flushed request
struct ScriptedReply {
    bytes: Option<Vec<u8>>,
    latency: Duration,
    byte_gap: Duration,
}

/// Simulation serial driver
///
/// Every flushed write is treated as one request frame. The answer comes from
/// the scripted reply queue first, then from the attached responder. Reply
/// bytes are released in real time after a latency and with an optional gap
/// between bytes, so idle and timeout handling behave as on a real line.
pub struct SimulationSerialDriver {
    config: SerialConfig,
    status: DriverStatus,
    /// Received bytes and the instant each becomes readable
    rx_buffer: VecDeque<(Instant, u8)>,
    /// Bytes written since the last flush
    tx_pending: Vec<u8>,
    /// Every flushed frame, oldest first
    tx_frames: Vec<Vec<u8>>,
    replies: VecDeque<ScriptedReply>,
    responder: Option<Box<dyn FrameResponder>>,
    reply_latency: Duration,
    byte_gap: Duration,
    /// Bytes transmitted (for statistics)
    bytes_tx: u64,
    /// Bytes received (for statistics)
    bytes_rx: u64,
}

impl SimulationSerialDriver {
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            status: DriverStatus::Uninitialized,
            rx_buffer: VecDeque::new(),
            tx_pending: Vec::new(),
            tx_frames: Vec::new(),
            replies: VecDeque::new(),
            responder: None,
            reply_latency: Duration::from_millis(1),
            byte_gap: Duration::ZERO,
            bytes_tx: 0,
            bytes_rx: 0,
        }
    }

    /// Simulation port wired to a responder
    pub fn with_responder<R: FrameResponder + 'static>(config: SerialConfig, responder: R) -> Self {
        let mut driver = Self::new(config);
        driver.responder = Some(Box::new(responder));
        driver
    }

    pub fn set_responder<R: FrameResponder + 'static>(&mut self, responder: R) {
        self.responder = Some(Box::new(responder));
    }

    /// Default timing for replies that do not specify their own
    pub fn set_reply_timing(&mut self, latency: Duration, byte_gap: Duration) {
        self.reply_latency = latency;
        self.byte_gap = byte_gap;
    }

    // ========================================================================
    // Lifecycle methods
    // ========================================================================

    pub fn init(&mut self) -> MeterbusResult<()> {
        self.rx_buffer.clear();
        self.tx_pending.clear();
        self.bytes_tx = 0;
        self.bytes_rx = 0;
        self.status = DriverStatus::Ready;
        Ok(())
    }

    pub fn shutdown(&mut self) -> MeterbusResult<()> {
        self.rx_buffer.clear();
        self.tx_pending.clear();
        self.status = DriverStatus::Shutdown;
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        true // Simulation is always available
    }

    pub fn status(&self) -> DriverStatus {
        self.status.clone()
    }

    fn ensure_operational(&mut self) -> MeterbusResult<()> {
        if !self.status.is_operational() {
            return Err(MeterbusError::driver("Driver not initialized"));
        }
        self.status = DriverStatus::Running;
        Ok(())
    }

    // ========================================================================
    // Scripting
    // ========================================================================

    /// Answer the next request with these bytes, using the default timing
    pub fn queue_reply(&mut self, bytes: &[u8]) {
        self.replies.push_back(ScriptedReply {
            bytes: Some(bytes.to_vec()),
            latency: self.reply_latency,
            byte_gap: self.byte_gap,
        });
    }

    /// Answer the next request with these bytes and explicit timing
    pub fn queue_reply_timed(&mut self, bytes: &[u8], latency: Duration, byte_gap: Duration) {
        self.replies.push_back(ScriptedReply {
            bytes: Some(bytes.to_vec()),
            latency,
            byte_gap,
        });
    }

    /// Leave the next request unanswered
    pub fn queue_silence(&mut self) {
        self.replies.push_back(ScriptedReply {
            bytes: None,
            latency: Duration::ZERO,
            byte_gap: Duration::ZERO,
        });
    }

    /// Inject data into the receive buffer right now (stale bus traffic)
    pub fn inject_rx_data(&mut self, data: &[u8]) {
        self.schedule(data, Duration::ZERO, Duration::ZERO);
    }

    /// Inject data that becomes readable after `delay`, `byte_gap` apart
    pub fn inject_rx_data_after(&mut self, data: &[u8], delay: Duration, byte_gap: Duration) {
        self.schedule(data, delay, byte_gap);
    }

    fn schedule(&mut self, data: &[u8], latency: Duration, byte_gap: Duration) {
        let now = Instant::now();
        let mut at = now + latency;
        if let Some((last, _)) = self.rx_buffer.back() {
            at = at.max(*last);
        }
        for &byte in data {
            self.rx_buffer.push_back((at, byte));
            at += byte_gap;
        }
    }

    fn answer(&mut self, frame: &[u8]) {
        let (reply, latency, byte_gap) = match self.replies.pop_front() {
            Some(scripted) => (scripted.bytes, scripted.latency, scripted.byte_gap),
            None => {
                let reply = self.responder.as_mut().and_then(|r| r.respond(frame));
                (reply, self.reply_latency, self.byte_gap)
            }
        };
        if let Some(bytes) = reply {
            self.schedule(&bytes, latency, byte_gap);
        }
    }

    // ========================================================================
    // Query methods
    // ========================================================================

    /// Get the configured port path
    pub fn port(&self) -> &str {
        &self.config.port
    }

    /// Get the configured baud rate
    pub fn baud_rate(&self) -> u32 {
        self.config.baud_rate
    }

    /// Get bytes transmitted
    pub fn bytes_transmitted(&self) -> u64 {
        self.bytes_tx
    }

    /// Get bytes received
    pub fn bytes_received(&self) -> u64 {
        self.bytes_rx
    }

    /// Check if anything is buffered, ready or not
    pub fn has_data(&self) -> bool {
        !self.rx_buffer.is_empty()
    }

    /// Every request frame flushed so far
    pub fn written_frames(&self) -> &[Vec<u8>] {
        &self.tx_frames
    }

    pub fn last_written(&self) -> Option<&[u8]> {
        self.tx_frames.last().map(|f| f.as_slice())
    }

    /// Scripted replies not consumed yet
    pub fn pending_replies(&self) -> usize {
        self.replies.len()
    }
}

impl ByteStream for SimulationSerialDriver {
    fn write_bytes(&mut self, data: &[u8]) -> MeterbusResult<()> {
        self.ensure_operational()?;
        self.tx_pending.extend_from_slice(data);
        self.bytes_tx += data.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> MeterbusResult<()> {
        self.ensure_operational()?;
        if self.tx_pending.is_empty() {
            return Ok(());
        }
        let frame = std::mem::take(&mut self.tx_pending);
        self.answer(&frame);
        self.tx_frames.push(frame);
        Ok(())
    }

    fn bytes_available(&mut self) -> MeterbusResult<usize> {
        self.ensure_operational()?;
        let now = Instant::now();
        Ok(self.rx_buffer.iter().take_while(|(at, _)| *at <= now).count())
    }

    fn read_byte(&mut self) -> MeterbusResult<Option<u8>> {
        self.ensure_operational()?;
        let now = Instant::now();
        match self.rx_buffer.front() {
            Some((at, _)) if *at <= now => {
                let byte = self.rx_buffer.pop_front().map(|(_, b)| b);
                self.bytes_rx += 1;
                Ok(byte)
            }
            _ => Ok(None),
        }
    }
}

impl Default for SimulationSerialDriver {
    fn default() -> Self {
        Self::new(SerialConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl FrameResponder for Echo {
        fn respond(&mut self, request: &[u8]) -> Option<Vec<u8>> {
            Some(request.to_vec())
        }
    }

    fn drain(driver: &mut SimulationSerialDriver) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(b) = driver.read_byte().unwrap() {
            out.push(b);
        }
        out
    }

    #[test]
    fn test_requires_init() {
        let mut driver = SimulationSerialDriver::default();
        assert_eq!(driver.status(), DriverStatus::Uninitialized);
        assert!(driver.write_bytes(&[1]).is_err());

        driver.init().unwrap();
        assert_eq!(driver.status(), DriverStatus::Ready);
        driver.write_bytes(&[1]).unwrap();
        assert_eq!(driver.status(), DriverStatus::Running);

        driver.shutdown().unwrap();
        assert!(driver.read_byte().is_err());
    }

    #[test]
    fn test_scripted_reply_released_after_flush() {
        let mut driver = SimulationSerialDriver::default();
        driver.init().unwrap();
        driver.set_reply_timing(Duration::ZERO, Duration::ZERO);
        driver.queue_reply(&[0xAA, 0xBB]);

        driver.write_bytes(&[0x01, 0x02]).unwrap();
        assert_eq!(driver.bytes_available().unwrap(), 0);
        driver.flush().unwrap();

        assert_eq!(drain(&mut driver), vec![0xAA, 0xBB]);
        assert_eq!(driver.written_frames(), &[vec![0x01, 0x02]]);
        assert_eq!(driver.pending_replies(), 0);
    }

    #[test]
    fn test_responder_used_when_script_empty() {
        let mut driver = SimulationSerialDriver::default();
        driver.set_responder(Echo);
        driver.init().unwrap();
        driver.set_reply_timing(Duration::ZERO, Duration::ZERO);

        driver.queue_silence();
        driver.write_bytes(&[0x10]).unwrap();
        driver.flush().unwrap();
        assert!(drain(&mut driver).is_empty());

        driver.write_bytes(&[0x20, 0x21]).unwrap();
        driver.flush().unwrap();
        assert_eq!(drain(&mut driver), vec![0x20, 0x21]);
        assert_eq!(driver.bytes_transmitted(), 3);
    }

    #[test]
    fn test_delayed_bytes_not_visible_early() {
        let mut driver = SimulationSerialDriver::default();
        driver.init().unwrap();
        driver.inject_rx_data_after(&[1, 2, 3], Duration::from_millis(30), Duration::ZERO);

        assert!(driver.has_data());
        assert_eq!(driver.bytes_available().unwrap(), 0);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(driver.bytes_available().unwrap(), 3);
    }

    #[test]
    fn test_discard_input() {
        let mut driver = SimulationSerialDriver::default();
        driver.init().unwrap();
        driver.inject_rx_data(&[9, 9, 9, 9]);

        assert_eq!(driver.discard_input().unwrap(), 4);
        assert_eq!(driver.bytes_available().unwrap(), 0);
        assert_eq!(driver.bytes_received(), 4);
    }
}
