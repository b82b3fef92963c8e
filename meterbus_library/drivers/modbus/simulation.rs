//! Simulated Modbus slave

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::trace;

use meterbus_core::config::GENERAL_ADDRESS;
use meterbus_core::profile::{ByteOrder, FieldLayout, QuantitySpec, RegisterProfile, RegisterSpace};

use super::crc::{append_crc, verify};
use super::frame::{
    value_bytes, EXCEPTION_BIT, READ_HOLDING_REGISTERS, READ_INPUT_REGISTERS, RESET_ENERGY,
    WRITE_MULTIPLE_REGISTERS, WRITE_SINGLE_REGISTER,
};
use super::registers::split;
use crate::drivers::serial::FrameResponder;

const ILLEGAL_FUNCTION: u8 = 0x01;
const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
const ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Simulated Modbus slave
///
/// In-memory holding and input registers behind a real RTU frame parser.
/// Frames with a bad CRC or for another address are ignored, as a device on
/// the bus would. Unmapped registers answer with exception 0x02.
#[derive(Debug, Clone)]
pub struct SimulatedSlave {
    address: u8,
    /// Byte order of each register on the wire
    order: ByteOrder,
    holding_registers: HashMap<u16, u16>,
    input_registers: HashMap<u16, u16>,
    /// Holding register that moves the slave when written
    address_register: Option<u16>,
    /// Registers zeroed by an energy reset
    energy_registers: Vec<(RegisterSpace, u16)>,
    energy_resets: u32,
    requests_seen: u64,
}

impl SimulatedSlave {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            order: ByteOrder::HighFirst,
            holding_registers: HashMap::new(),
            input_registers: HashMap::new(),
            address_register: None,
            energy_registers: Vec::new(),
            energy_resets: 0,
            requests_seen: 0,
        }
    }

    /// Slave with every register of `profile` mapped and zeroed
    ///
    /// Quantities whose name mentions energy are cleared by the reset command.
    pub fn with_profile(address: u8, profile: &RegisterProfile) -> Self {
        let mut slave = Self::new(address);
        slave.order = profile.register_order;
        for quantity in &profile.quantities {
            for offset in 0..quantity.layout.width() {
                let register = quantity.address + offset;
                slave.map_mut(profile.space).insert(register, 0);
                if quantity.name.contains("energy") {
                    slave.energy_registers.push((profile.space, register));
                }
            }
        }
        for setting in &profile.settings {
            slave.holding_registers.insert(setting.address, 0);
        }
        if let Some(register) = profile.address_register {
            slave.holding_registers.insert(register, address as u16);
            slave.address_register = Some(register);
        }
        slave
    }

    /// Wrap for sharing with a simulated port while keeping a handle
    pub fn shared(self) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(self))
    }

    fn map_mut(&mut self, space: RegisterSpace) -> &mut HashMap<u16, u16> {
        match space {
            RegisterSpace::Holding => &mut self.holding_registers,
            RegisterSpace::Input => &mut self.input_registers,
        }
    }

    fn map(&self, space: RegisterSpace) -> &HashMap<u16, u16> {
        match space {
            RegisterSpace::Holding => &self.holding_registers,
            RegisterSpace::Input => &self.input_registers,
        }
    }

    // ========================================================================
    // Test/simulation helpers
    // ========================================================================

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn set_holding_register(&mut self, register: u16, value: u16) {
        self.holding_registers.insert(register, value);
    }

    pub fn set_input_register(&mut self, register: u16, value: u16) {
        self.input_registers.insert(register, value);
    }

    pub fn holding_register(&self, register: u16) -> Option<u16> {
        self.holding_registers.get(&register).copied()
    }

    pub fn input_register(&self, register: u16) -> Option<u16> {
        self.input_registers.get(&register).copied()
    }

    /// Store a physical value the way the device would lay it out
    pub fn set_quantity(&mut self, space: RegisterSpace, spec: &QuantitySpec, value: f64) {
        let raw = if spec.scale == 0.0 {
            0
        } else {
            (value / spec.scale).round() as i64
        };
        let map = self.map_mut(space);
        let current = map.get(&spec.address).copied().unwrap_or(0);
        match spec.layout {
            FieldLayout::Single | FieldLayout::SingleSigned => {
                map.insert(spec.address, raw as u16);
            }
            FieldLayout::Pair { order, .. } => {
                let [first, second] = split(raw as u32, order);
                map.insert(spec.address, first);
                map.insert(spec.address + 1, second);
            }
            FieldLayout::HighByte => {
                map.insert(spec.address, ((raw as u16 & 0xFF) << 8) | (current & 0x00FF));
            }
            FieldLayout::LowByte => {
                map.insert(spec.address, (current & 0xFF00) | (raw as u16 & 0xFF));
            }
            FieldLayout::Flag => {
                map.insert(spec.address, if value != 0.0 { 0xFFFF } else { 0x0000 });
            }
        }
    }

    pub fn energy_resets(&self) -> u32 {
        self.energy_resets
    }

    /// Valid frames addressed to this slave
    pub fn requests_seen(&self) -> u64 {
        self.requests_seen
    }

    // ========================================================================
    // Frame handling
    // ========================================================================

    fn exception(&self, reply_addr: u8, function: u8, code: u8) -> Vec<u8> {
        let mut reply = vec![reply_addr, function | EXCEPTION_BIT, code];
        append_crc(&mut reply);
        reply
    }

    fn read(&self, space: RegisterSpace, request: &[u8]) -> Vec<u8> {
        let (addr, function) = (request[0], request[1]);
        if request.len() != 8 {
            return self.exception(addr, function, ILLEGAL_DATA_VALUE);
        }
        let start = u16::from_be_bytes([request[2], request[3]]);
        let count = u16::from_be_bytes([request[4], request[5]]);
        if count == 0 || count > 125 {
            return self.exception(addr, function, ILLEGAL_DATA_VALUE);
        }

        let mut reply = vec![addr, function, (count * 2) as u8];
        for offset in 0..count {
            let Some(value) = start
                .checked_add(offset)
                .and_then(|register| self.map(space).get(&register))
            else {
                return self.exception(addr, function, ILLEGAL_DATA_ADDRESS);
            };
            reply.extend_from_slice(&value_bytes(*value, self.order));
        }
        append_crc(&mut reply);
        reply
    }

    fn decode_value(&self, bytes: [u8; 2]) -> u16 {
        match self.order {
            ByteOrder::HighFirst => u16::from_be_bytes(bytes),
            ByteOrder::LowFirst => u16::from_le_bytes(bytes),
        }
    }

    fn write_single(&mut self, request: &[u8]) -> Vec<u8> {
        let (addr, function) = (request[0], request[1]);
        if request.len() != 8 {
            return self.exception(addr, function, ILLEGAL_DATA_VALUE);
        }
        let register = u16::from_be_bytes([request[2], request[3]]);
        if !self.holding_registers.contains_key(&register) {
            return self.exception(addr, function, ILLEGAL_DATA_ADDRESS);
        }
        let value = self.decode_value([request[4], request[5]]);
        self.store(register, value);
        request.to_vec()
    }

    fn write_multiple(&mut self, request: &[u8]) -> Vec<u8> {
        let (addr, function) = (request[0], request[1]);
        if request.len() < 9 {
            return self.exception(addr, function, ILLEGAL_DATA_VALUE);
        }
        let start = u16::from_be_bytes([request[2], request[3]]);
        let count = u16::from_be_bytes([request[4], request[5]]);
        let byte_count = request[6] as usize;
        if count == 0 || byte_count != count as usize * 2 || request.len() != 9 + byte_count {
            return self.exception(addr, function, ILLEGAL_DATA_VALUE);
        }
        let all_mapped = (0..count).all(|offset| {
            start
                .checked_add(offset)
                .is_some_and(|register| self.holding_registers.contains_key(&register))
        });
        if !all_mapped {
            return self.exception(addr, function, ILLEGAL_DATA_ADDRESS);
        }

        for (offset, pair) in request[7..7 + byte_count].chunks_exact(2).enumerate() {
            let value = self.decode_value([pair[0], pair[1]]);
            self.store(start + offset as u16, value);
        }

        let mut reply = request[..6].to_vec();
        append_crc(&mut reply);
        reply
    }

    fn reset_energy(&mut self, request: &[u8]) -> Vec<u8> {
        for (space, register) in self.energy_registers.clone() {
            self.map_mut(space).insert(register, 0);
        }
        self.energy_resets += 1;
        request.to_vec()
    }

    fn store(&mut self, register: u16, value: u16) {
        self.holding_registers.insert(register, value);
        if self.address_register == Some(register) {
            self.address = value as u8;
        }
    }

    /// Answer one request frame
    pub fn handle(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        if request.len() < 4 || !verify(request) {
            trace!(len = request.len(), "simulated slave ignored corrupt frame");
            return None;
        }
        let addr = request[0];
        if addr != self.address && addr != GENERAL_ADDRESS {
            return None;
        }
        self.requests_seen += 1;

        let reply = match request[1] {
            READ_HOLDING_REGISTERS => self.read(RegisterSpace::Holding, request),
            READ_INPUT_REGISTERS => self.read(RegisterSpace::Input, request),
            WRITE_SINGLE_REGISTER => self.write_single(request),
            WRITE_MULTIPLE_REGISTERS => self.write_multiple(request),
            RESET_ENERGY => self.reset_energy(request),
            other => self.exception(addr, other, ILLEGAL_FUNCTION),
        };
        Some(reply)
    }
}

impl Default for SimulatedSlave {
    fn default() -> Self {
        Self::new(GENERAL_ADDRESS)
    }
}

impl FrameResponder for SimulatedSlave {
    fn respond(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        self.handle(request)
    }
}

impl FrameResponder for Arc<Mutex<SimulatedSlave>> {
    fn respond(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        self.lock().ok()?.handle(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::modbus::frame::{encode_custom, encode_read, encode_write_single};

    #[test]
    fn test_read_mapped_registers() {
        let mut slave = SimulatedSlave::new(0x01);
        slave.set_input_register(0x0000, 2200);
        slave.set_input_register(0x0001, 0x1234);

        let reply = slave
            .handle(&encode_read(RegisterSpace::Input, 0x01, 0x0000, 2))
            .unwrap();
        assert_eq!(&reply[..7], &[0x01, 0x04, 0x04, 0x08, 0x98, 0x12, 0x34]);
        assert!(verify(&reply));
    }

    #[test]
    fn test_unmapped_register_is_exception() {
        let mut slave = SimulatedSlave::new(0x01);
        let reply = slave
            .handle(&encode_read(RegisterSpace::Holding, 0x01, 0x0100, 1))
            .unwrap();
        assert_eq!(&reply[..3], &[0x01, 0x83, 0x02]);
    }

    #[test]
    fn test_ignores_other_slaves_and_bad_crc() {
        let mut slave = SimulatedSlave::new(0x01);
        assert!(slave
            .handle(&encode_read(RegisterSpace::Input, 0x02, 0, 1))
            .is_none());

        let mut frame = encode_read(RegisterSpace::Input, 0x01, 0, 1);
        frame[7] ^= 0x01;
        assert!(slave.handle(&frame).is_none());
        assert_eq!(slave.requests_seen(), 0);
    }

    #[test]
    fn test_answers_general_address() {
        let mut slave = SimulatedSlave::new(0x07);
        slave.set_holding_register(0x0002, 7);
        let reply = slave
            .handle(&encode_read(RegisterSpace::Holding, GENERAL_ADDRESS, 0x0002, 1))
            .unwrap();
        assert_eq!(reply[0], GENERAL_ADDRESS);
    }

    #[test]
    fn test_address_register_moves_slave() {
        let mut slave = SimulatedSlave::new(0x01);
        slave.set_holding_register(0x0002, 1);
        slave.address_register = Some(0x0002);

        let request = encode_write_single(0x01, 0x0002, 0x0010, ByteOrder::HighFirst);
        assert_eq!(slave.handle(&request), Some(request.clone()));
        assert_eq!(slave.address(), 0x10);
    }

    #[test]
    fn test_unknown_function() {
        let mut slave = SimulatedSlave::new(0x01);
        let reply = slave.handle(&encode_custom(0x01, 0x2B, &[0x0E])).unwrap();
        assert_eq!(&reply[..3], &[0x01, 0xAB, 0x01]);
    }
}
