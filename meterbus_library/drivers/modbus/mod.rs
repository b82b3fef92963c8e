//! Modbus RTU protocol layer
//!
//! Leaf-first: the CRC engine, the frame encoder, the transceiver director,
//! the response reader and validator, the register composer, and the
//! `RtuSession` orchestrator that ties them together over any `ByteStream`.
//!
//! `SimulatedSlave` answers RTU frames from in-memory registers and plugs
//! into `SimulationSerialDriver` as its responder.

pub mod crc;
pub mod frame;
pub mod reader;
pub mod registers;
pub mod response;
mod session;
mod simulation;
pub mod transceiver;

pub use reader::{read_response, ReadTiming};
pub use registers::compose;
pub use session::{
    check_slave_address, RtuSession, SessionConfig, SessionStats, TransactionState,
    MAX_READ_COUNT, MAX_WRITE_COUNT,
};
pub use simulation::SimulatedSlave;
pub use transceiver::{Direction, DirectionLine, TransceiverDirector};
