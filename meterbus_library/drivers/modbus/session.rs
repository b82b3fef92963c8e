//! Modbus RTU transaction orchestrator

use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use meterbus_core::config::{MeterConfig, GENERAL_ADDRESS};
use meterbus_core::error::{MeterbusError, MeterbusResult};
use meterbus_core::profile::{ByteOrder, RegisterSpace, ResetStyle};

use super::frame::{
    self, min_response_len, to_hex, RESET_ENERGY, WRITE_MULTIPLE_REGISTERS, WRITE_SINGLE_REGISTER,
};
use super::reader::{read_response, ReadTiming};
use super::response::{extract_registers, validate};
use super::transceiver::TransceiverDirector;
use crate::drivers::serial::ByteStream;

/// Most registers one read may return
pub const MAX_READ_COUNT: u16 = 125;
/// Most registers one write-multiple may carry
pub const MAX_WRITE_COUNT: u16 = 123;

/// Settings that persist across transactions
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub slave_address: u8,
    /// Overall timeout for reads
    pub response_timeout: Duration,
    /// Overall timeout for writes and resets
    pub write_timeout: Duration,
    /// Quiet gap that ends a response
    pub idle_timeout: Duration,
    /// Pause after flushing a request
    pub inter_frame_delay: Duration,
    /// Byte order of each register on the wire
    pub register_order: ByteOrder,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            slave_address: GENERAL_ADDRESS,
            response_timeout: Duration::from_millis(100),
            write_timeout: Duration::from_millis(300),
            idle_timeout: Duration::from_millis(10),
            inter_frame_delay: Duration::from_millis(10),
            register_order: ByteOrder::HighFirst,
        }
    }
}

impl From<&MeterConfig> for SessionConfig {
    fn from(config: &MeterConfig) -> Self {
        Self {
            slave_address: config.slave_address,
            response_timeout: Duration::from_millis(config.response_timeout_ms),
            write_timeout: Duration::from_millis(config.write_timeout_ms),
            idle_timeout: Duration::from_millis(config.idle_timeout_ms),
            inter_frame_delay: Duration::from_millis(config.inter_frame_delay_ms),
            register_order: ByteOrder::HighFirst,
        }
    }
}

/// Where a transaction is, or how the last one ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Idle,
    Sending,
    AwaitingResponse,
    Complete,
    TimedOut,
    Invalid,
}

/// Counters kept per session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Transactions that put a frame on the bus
    pub transactions: u64,
    pub completed: u64,
    pub timeouts: u64,
    pub crc_errors: u64,
    pub exceptions: u64,
    /// Replies that were well formed but did not answer the request
    pub unexpected: u64,
    /// Calls refused before any I/O
    pub rejected: u64,
}

/// Accepts unicast addresses and the general address
pub fn check_slave_address(address: u8) -> MeterbusResult<()> {
    if (1..=247).contains(&address) || address == GENERAL_ADDRESS {
        Ok(())
    } else {
        Err(MeterbusError::invalid_argument(format!(
            "slave address {} outside 1..=247 and not 0x{:02X}",
            address, GENERAL_ADDRESS
        )))
    }
}

fn check_range(start: u16, count: u16, max: u16) -> MeterbusResult<()> {
    if count == 0 || count > max {
        return Err(MeterbusError::invalid_argument(format!(
            "register count {} outside 1..={}",
            count, max
        )));
    }
    if start as u32 + count as u32 > 0x1_0000 {
        return Err(MeterbusError::invalid_argument(format!(
            "registers 0x{:04X}+{} run past 0xFFFF",
            start, count
        )));
    }
    Ok(())
}

/// One master talking to one slave over a byte stream
///
/// Every operation runs to completion on the calling thread: stale input is
/// dropped, the request goes out with the transceiver in transmit, and the
/// reply is collected, checked and decoded with the transceiver in receive.
/// Whatever the outcome, the transceiver is left in receive. Nothing is
/// retried here.
pub struct RtuSession<S: ByteStream> {
    stream: S,
    director: TransceiverDirector,
    config: SessionConfig,
    state: TransactionState,
    last_outcome: Option<TransactionState>,
    stats: SessionStats,
}

impl<S: ByteStream> RtuSession<S> {
    /// Session over an auto-direction transport
    pub fn new(stream: S, config: SessionConfig) -> Self {
        Self::with_director(stream, TransceiverDirector::automatic(), config)
    }

    pub fn with_director(stream: S, director: TransceiverDirector, config: SessionConfig) -> Self {
        Self {
            stream,
            director,
            config,
            state: TransactionState::Idle,
            last_outcome: None,
            stats: SessionStats::default(),
        }
    }

    // ========================================================================
    // Lifecycle methods
    // ========================================================================

    /// Bring up the direction line, leaving it in receive
    pub fn init(&mut self) -> MeterbusResult<()> {
        self.director.init()
    }

    pub fn shutdown(&mut self) -> MeterbusResult<()> {
        self.director.shutdown()
    }

    // ========================================================================
    // Query methods
    // ========================================================================

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn slave_address(&self) -> u8 {
        self.config.slave_address
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Terminal state of the most recent transaction
    pub fn last_outcome(&self) -> Option<TransactionState> {
        self.last_outcome
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn director(&self) -> &TransceiverDirector {
        &self.director
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn set_slave_address(&mut self, address: u8) -> MeterbusResult<()> {
        check_slave_address(address)?;
        self.config.slave_address = address;
        Ok(())
    }

    pub fn set_timeouts(&mut self, response: Duration, write: Duration, idle: Duration) {
        self.config.response_timeout = response;
        self.config.write_timeout = write;
        self.config.idle_timeout = idle;
    }

    pub fn set_register_order(&mut self, order: ByteOrder) {
        self.config.register_order = order;
    }

    // ========================================================================
    // Modbus operations
    // ========================================================================

    /// Read holding registers (function code 0x03)
    pub fn read_holding_registers(&mut self, start: u16, count: u16) -> MeterbusResult<Vec<u16>> {
        self.read_registers(RegisterSpace::Holding, start, count)
    }

    /// Read input registers (function code 0x04)
    pub fn read_input_registers(&mut self, start: u16, count: u16) -> MeterbusResult<Vec<u16>> {
        self.read_registers(RegisterSpace::Input, start, count)
    }

    /// Read `count` registers from either space
    ///
    /// Either every requested register comes back or the call fails.
    pub fn read_registers(
        &mut self,
        space: RegisterSpace,
        start: u16,
        count: u16,
    ) -> MeterbusResult<Vec<u16>> {
        self.precheck(|| check_range(start, count, MAX_READ_COUNT))?;

        let function = space.read_function();
        let request = frame::encode_read(space, self.config.slave_address, start, count);
        let min_len = min_response_len(function, count, ResetStyle::Bare);
        let order = self.config.register_order;
        let timeout = self.config.response_timeout;

        self.transact(&request, min_len, timeout, |response| {
            let registers = extract_registers(response, count as usize, order);
            if registers.len() < count as usize {
                return Err(MeterbusError::unexpected(format!(
                    "asked for {} registers, got {}",
                    count,
                    registers.len()
                )));
            }
            Ok(registers)
        })
    }

    /// Write single register (function code 0x06)
    pub fn write_single_register(&mut self, register: u16, value: u16) -> MeterbusResult<()> {
        self.precheck(|| Ok(()))?;

        let request = frame::encode_write_single(
            self.config.slave_address,
            register,
            value,
            self.config.register_order,
        );
        let min_len = min_response_len(WRITE_SINGLE_REGISTER, 1, ResetStyle::Bare);
        let timeout = self.config.write_timeout;

        self.transact(&request, min_len, timeout, |response| {
            if response.get(2..6) != request.get(2..6) {
                return Err(MeterbusError::unexpected(
                    "write echo does not match the request",
                ));
            }
            Ok(())
        })
    }

    /// Write multiple registers (function code 0x10)
    pub fn write_multiple_registers(&mut self, start: u16, values: &[u16]) -> MeterbusResult<()> {
        let count = u16::try_from(values.len()).unwrap_or(u16::MAX);
        self.precheck(|| check_range(start, count, MAX_WRITE_COUNT))?;

        let request = frame::encode_write_multiple(
            self.config.slave_address,
            start,
            values,
            self.config.register_order,
        );
        let min_len = min_response_len(WRITE_MULTIPLE_REGISTERS, count, ResetStyle::Bare);
        let timeout = self.config.write_timeout;

        self.transact(&request, min_len, timeout, |response| {
            if response.get(2..6) != request.get(2..6) {
                return Err(MeterbusError::unexpected(
                    "write echo does not match the request",
                ));
            }
            Ok(())
        })
    }

    /// Vendor energy counter reset (function code 0x42)
    pub fn reset_energy(&mut self, style: ResetStyle) -> MeterbusResult<()> {
        self.precheck(|| Ok(()))?;

        let request = frame::encode_reset(self.config.slave_address, style);
        let min_len = min_response_len(RESET_ENERGY, 0, style);
        let timeout = self.config.write_timeout;

        self.transact(&request, min_len, timeout, |_| Ok(()))
    }

    // ========================================================================
    // Transaction plumbing
    // ========================================================================

    fn precheck(&mut self, check: impl FnOnce() -> MeterbusResult<()>) -> MeterbusResult<()> {
        let result = check_slave_address(self.config.slave_address).and_then(|_| check());
        if result.is_err() {
            self.stats.rejected += 1;
        }
        result
    }

    fn transact<T>(
        &mut self,
        request: &[u8],
        min_len: usize,
        timeout: Duration,
        decode: impl FnOnce(&[u8]) -> MeterbusResult<T>,
    ) -> MeterbusResult<T> {
        self.stats.transactions += 1;

        let result = self
            .exchange(request, min_len, timeout)
            .and_then(|response| decode(&response));

        let outcome = match &result {
            Ok(_) => {
                self.stats.completed += 1;
                TransactionState::Complete
            }
            Err(e) if e.is_timeout() || matches!(e, MeterbusError::AddressNeverSeen { .. }) => {
                self.stats.timeouts += 1;
                TransactionState::TimedOut
            }
            Err(e) => {
                if e.is_crc_mismatch() {
                    self.stats.crc_errors += 1;
                } else if e.is_exception() {
                    self.stats.exceptions += 1;
                } else if matches!(e, MeterbusError::UnexpectedResponse(_)) {
                    self.stats.unexpected += 1;
                }
                TransactionState::Invalid
            }
        };
        if let Err(e) = &result {
            debug!(slave = request[0], function = request[1], error = %e, "transaction failed");
        }

        let parked = self.director.set_receive();
        self.last_outcome = Some(outcome);
        self.state = TransactionState::Idle;

        let value = result?;
        parked?;
        Ok(value)
    }

    fn exchange(&mut self, request: &[u8], min_len: usize, timeout: Duration) -> MeterbusResult<Vec<u8>> {
        let stale = self.stream.discard_input()?;
        if stale > 0 {
            warn!(stale, "discarded stale bytes before request");
        }

        self.state = TransactionState::Sending;
        self.director.set_transmit()?;
        debug!(tx = %to_hex(request), "modbus request");
        self.stream.write_bytes(request)?;
        self.stream.flush()?;
        if !self.config.inter_frame_delay.is_zero() {
            thread::sleep(self.config.inter_frame_delay);
        }
        self.director.set_receive()?;

        self.state = TransactionState::AwaitingResponse;
        let timing = ReadTiming::new(timeout, self.config.idle_timeout);
        let response = read_response(&mut self.stream, request[0], min_len, timing)?;
        debug!(rx = %to_hex(&response), "modbus response");

        validate(&response)?;
        if response[1] != request[1] {
            return Err(MeterbusError::unexpected(format!(
                "function 0x{:02X} answered with 0x{:02X}",
                request[1], response[1]
            )));
        }
        Ok(response)
    }
}
