use log::{debug, info};
use std::collections::HashMap;

use crate::modbus::protocol::{ExceptionCode, FunctionCode, Response};
use crate::modbus::slave::SlaveListener;

/// Largest read the map serves in one request.
pub const MAX_READ_COILS: u16 = 2000;
pub const MAX_READ_REGISTERS: u16 = 125;

/// In-memory data model of a simulated slave: coils, holding registers,
/// input registers and numbered files of record words.
#[derive(Debug, Clone, Default)]
pub struct RegisterMap {
    coils: Vec<bool>,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
    files: HashMap<u16, Vec<u16>>,
    writes: u64,
}

impl RegisterMap {
    /// A map with `size` zeroed entries of every table.
    pub fn new(size: usize) -> Self {
        info!("🗂️  Register map with {} coils and registers per table", size);
        Self {
            coils: vec![false; size],
            holding_registers: vec![0; size],
            input_registers: vec![0; size],
            files: HashMap::new(),
            writes: 0,
        }
    }

    pub fn with_file(mut self, file_number: u16, records: Vec<u16>) -> Self {
        self.files.insert(file_number, records);
        self
    }

    pub fn coils(&self) -> &[bool] {
        &self.coils
    }

    pub fn holding_registers(&self) -> &[u16] {
        &self.holding_registers
    }

    pub fn input_registers(&self) -> &[u16] {
        &self.input_registers
    }

    /// Input registers are read-only over the wire.
    pub fn input_registers_mut(&mut self) -> &mut [u16] {
        &mut self.input_registers
    }

    pub fn file(&self, file_number: u16) -> Option<&[u16]> {
        self.files.get(&file_number).map(|records| records.as_slice())
    }

    /// Number of write requests applied so far.
    pub fn write_count(&self) -> u64 {
        self.writes
    }
}

fn range(len: usize, address: u16, quantity: u16) -> Option<std::ops::Range<usize>> {
    let start = address as usize;
    let end = start + quantity as usize;
    if end <= len {
        Some(start..end)
    } else {
        None
    }
}

fn exception(slave: u8, function: FunctionCode, code: ExceptionCode) -> Option<Response> {
    debug!("🚫 Slave {} answers {} with {}", slave, function, code);
    Some(Response::exception(slave, function.value(), code))
}

impl SlaveListener for RegisterMap {
    fn on_read_coils(&mut self, slave: u8, function: FunctionCode, address: u16, quantity: u16) -> Option<Response> {
        if quantity == 0 || quantity > MAX_READ_COILS {
            return exception(slave, function, ExceptionCode::IllegalDataValue);
        }
        match range(self.coils.len(), address, quantity) {
            Some(r) => Some(Response::read_coils(slave, address, &self.coils[r])),
            None => exception(slave, function, ExceptionCode::IllegalDataAddress),
        }
    }

    fn on_read_holding_registers(&mut self, slave: u8, function: FunctionCode, address: u16, quantity: u16) -> Option<Response> {
        if quantity == 0 || quantity > MAX_READ_REGISTERS {
            return exception(slave, function, ExceptionCode::IllegalDataValue);
        }
        match range(self.holding_registers.len(), address, quantity) {
            Some(r) => Some(Response::read_holding_registers(slave, address, &self.holding_registers[r])),
            None => exception(slave, function, ExceptionCode::IllegalDataAddress),
        }
    }

    fn on_read_input_registers(&mut self, slave: u8, function: FunctionCode, address: u16, quantity: u16) -> Option<Response> {
        if quantity == 0 || quantity > MAX_READ_REGISTERS {
            return exception(slave, function, ExceptionCode::IllegalDataValue);
        }
        match range(self.input_registers.len(), address, quantity) {
            Some(r) => Some(Response::read_input_registers(slave, address, &self.input_registers[r])),
            None => exception(slave, function, ExceptionCode::IllegalDataAddress),
        }
    }

    fn on_write_single_coil(&mut self, slave: u8, function: FunctionCode, address: u16, value: bool) -> Option<Response> {
        match self.coils.get_mut(address as usize) {
            Some(coil) => {
                *coil = value;
                self.writes += 1;
                Some(Response::write_single_coil(slave, address, value))
            }
            None => exception(slave, function, ExceptionCode::IllegalDataAddress),
        }
    }

    fn on_write_single_register(&mut self, slave: u8, function: FunctionCode, address: u16, value: u16) -> Option<Response> {
        match self.holding_registers.get_mut(address as usize) {
            Some(register) => {
                *register = value;
                self.writes += 1;
                Some(Response::write_single_register(slave, address, value))
            }
            None => exception(slave, function, ExceptionCode::IllegalDataAddress),
        }
    }

    fn on_write_multiple_coils(
        &mut self,
        slave: u8,
        function: FunctionCode,
        address: u16,
        quantity: u16,
        values: &[bool],
    ) -> Option<Response> {
        if quantity == 0 || values.len() != quantity as usize {
            return exception(slave, function, ExceptionCode::IllegalDataValue);
        }
        match range(self.coils.len(), address, quantity) {
            Some(r) => {
                self.coils[r].copy_from_slice(values);
                self.writes += 1;
                Some(Response::write_multiple_coils(slave, address, quantity))
            }
            None => exception(slave, function, ExceptionCode::IllegalDataAddress),
        }
    }

    fn on_write_multiple_registers(
        &mut self,
        slave: u8,
        function: FunctionCode,
        address: u16,
        quantity: u16,
        values: &[u16],
    ) -> Option<Response> {
        if quantity == 0 || values.len() != quantity as usize {
            return exception(slave, function, ExceptionCode::IllegalDataValue);
        }
        match range(self.holding_registers.len(), address, quantity) {
            Some(r) => {
                self.holding_registers[r].copy_from_slice(values);
                self.writes += 1;
                Some(Response::write_multiple_registers(slave, address, quantity))
            }
            None => exception(slave, function, ExceptionCode::IllegalDataAddress),
        }
    }

    fn on_read_file_record(
        &mut self,
        slave: u8,
        function: FunctionCode,
        file_number: u16,
        record_number: u16,
        record_length: u16,
    ) -> Option<Response> {
        let records = match self.files.get(&file_number) {
            Some(records) => records,
            None => return exception(slave, function, ExceptionCode::IllegalDataAddress),
        };
        match range(records.len(), record_number, record_length) {
            Some(r) => Some(Response::read_file_record(slave, &records[r])),
            None => exception(slave, function, ExceptionCode::IllegalDataAddress),
        }
    }
}
