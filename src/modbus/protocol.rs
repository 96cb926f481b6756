use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

pub const BROADCAST_ADDRESS: u8 = 0;

/// Slave-side frames are only accepted for addresses strictly below this.
pub const MAX_SLAVE_ADDRESS: u8 = 247;

pub const COIL_ON: u16 = 0xFF00;
pub const COIL_OFF: u16 = 0x0000;

/// High bit set on the function byte of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

pub fn coil_to_word(value: bool) -> u16 {
    if value {
        COIL_ON
    } else {
        COIL_OFF
    }
}

pub fn word_to_coil(value: u16) -> bool {
    value != 0
}

pub fn coils_to_words(values: &[bool]) -> Vec<u16> {
    values.iter().map(|&v| coil_to_word(v)).collect()
}

pub fn words_to_coils(values: &[u16]) -> Vec<bool> {
    values.iter().map(|&v| word_to_coil(v)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionCode {
    ReadCoils,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleCoils,
    WriteMultipleRegisters,
    ReadFileRecord,
    /// Any code outside the supported table.
    Custom(u8),
}

impl FunctionCode {
    pub const fn new(value: u8) -> Self {
        match value {
            0x01 => Self::ReadCoils,
            0x03 => Self::ReadHoldingRegisters,
            0x04 => Self::ReadInputRegisters,
            0x05 => Self::WriteSingleCoil,
            0x06 => Self::WriteSingleRegister,
            0x0F => Self::WriteMultipleCoils,
            0x10 => Self::WriteMultipleRegisters,
            0x14 => Self::ReadFileRecord,
            code => Self::Custom(code),
        }
    }

    pub const fn value(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::WriteMultipleCoils => 0x0F,
            Self::WriteMultipleRegisters => 0x10,
            Self::ReadFileRecord => 0x14,
            Self::Custom(code) => code,
        }
    }

    pub const fn is_supported(self) -> bool {
        !matches!(self, Self::Custom(_))
    }

    const fn name(self) -> &'static str {
        match self {
            Self::ReadCoils => "Read Coils",
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::ReadInputRegisters => "Read Input Registers",
            Self::WriteSingleCoil => "Write Single Coil",
            Self::WriteSingleRegister => "Write Single Register",
            Self::WriteMultipleCoils => "Write Multiple Coils",
            Self::WriteMultipleRegisters => "Write Multiple Registers",
            Self::ReadFileRecord => "Read File Record",
            Self::Custom(_) => "Custom",
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.value())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl ExceptionCode {
    const fn name(self) -> &'static str {
        match self {
            Self::IllegalFunction => "Illegal function",
            Self::IllegalDataAddress => "Illegal data address",
            Self::IllegalDataValue => "Illegal data value",
            Self::ServerDeviceFailure => "Server device failure",
            Self::Acknowledge => "Acknowledge",
            Self::ServerDeviceBusy => "Server device busy",
            Self::MemoryParityError => "Memory parity error",
            Self::GatewayPathUnavailable => "Gateway path unavailable",
            Self::GatewayTargetDeviceFailedToRespond => "Gateway target device failed to respond",
        }
    }
}

impl TryFrom<u8> for ExceptionCode {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x01 => Ok(Self::IllegalFunction),
            0x02 => Ok(Self::IllegalDataAddress),
            0x03 => Ok(Self::IllegalDataValue),
            0x04 => Ok(Self::ServerDeviceFailure),
            0x05 => Ok(Self::Acknowledge),
            0x06 => Ok(Self::ServerDeviceBusy),
            0x08 => Ok(Self::MemoryParityError),
            0x0A => Ok(Self::GatewayPathUnavailable),
            0x0B => Ok(Self::GatewayTargetDeviceFailedToRespond),
            other => Err(other),
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A request as queued by the master or decoded by the slave.
///
/// Coil values are carried as words (`COIL_ON` / `COIL_OFF`), matching
/// what travels on the wire for Write Single Coil.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub slave_address: u8,
    pub function: FunctionCode,
    pub address: u16,
    pub quantity: u16,
    pub values: Vec<u16>,
    pub file_number: u16,
    pub record_number: u16,
    pub record_length: u16,
    /// Remaining retries; only meaningful inside the master queue.
    pub retries: u32,
}

impl Request {
    pub fn new(slave_address: u8, function: FunctionCode) -> Self {
        Self {
            slave_address,
            function,
            address: 0,
            quantity: 0,
            values: Vec::new(),
            file_number: 0,
            record_number: 0,
            record_length: 0,
            retries: 0,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.slave_address == BROADCAST_ADDRESS
    }

    /// First value, or zero when the list is empty.
    pub fn first_value(&self) -> u16 {
        self.values.first().copied().unwrap_or(0)
    }

    pub fn coil_values(&self) -> Vec<bool> {
        words_to_coils(&self.values)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalResponse {
    pub slave_address: u8,
    pub function: FunctionCode,
    pub address: u16,
    pub quantity: u16,
    pub values: Vec<u16>,
}

impl NormalResponse {
    pub fn first_value(&self) -> u16 {
        self.values.first().copied().unwrap_or(0)
    }

    pub fn coil_values(&self) -> Vec<bool> {
        words_to_coils(&self.values)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionResponse {
    pub slave_address: u8,
    /// Function byte as it travels, high bit set.
    pub function: u8,
    pub code: u8,
}

impl ExceptionResponse {
    /// The function the exception answers, high bit cleared.
    pub fn function_code(&self) -> FunctionCode {
        FunctionCode::new(self.function & !EXCEPTION_FLAG)
    }

    pub fn exception_code(&self) -> Option<ExceptionCode> {
        ExceptionCode::try_from(self.code).ok()
    }
}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exception_code() {
            Some(code) => write!(
                f,
                "slave {} rejected {}: {} (0x{:02X})",
                self.slave_address,
                self.function_code(),
                code,
                self.code
            ),
            None => write!(
                f,
                "slave {} rejected {}: unknown exception 0x{:02X}",
                self.slave_address,
                self.function_code(),
                self.code
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Normal(NormalResponse),
    Exception(ExceptionResponse),
}

impl Response {
    pub fn slave_address(&self) -> u8 {
        match self {
            Response::Normal(r) => r.slave_address,
            Response::Exception(r) => r.slave_address,
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, Response::Exception(_))
    }

    fn normal(slave_address: u8, function: FunctionCode, address: u16, quantity: u16, values: Vec<u16>) -> Self {
        Response::Normal(NormalResponse {
            slave_address,
            function,
            address,
            quantity,
            values,
        })
    }

    pub fn read_coils(slave_address: u8, address: u16, values: &[bool]) -> Self {
        Self::normal(
            slave_address,
            FunctionCode::ReadCoils,
            address,
            values.len() as u16,
            coils_to_words(values),
        )
    }

    pub fn read_holding_registers(slave_address: u8, address: u16, values: &[u16]) -> Self {
        Self::normal(
            slave_address,
            FunctionCode::ReadHoldingRegisters,
            address,
            values.len() as u16,
            values.to_vec(),
        )
    }

    pub fn read_input_registers(slave_address: u8, address: u16, values: &[u16]) -> Self {
        Self::normal(
            slave_address,
            FunctionCode::ReadInputRegisters,
            address,
            values.len() as u16,
            values.to_vec(),
        )
    }

    pub fn write_single_coil(slave_address: u8, address: u16, value: bool) -> Self {
        Self::normal(
            slave_address,
            FunctionCode::WriteSingleCoil,
            address,
            1,
            vec![coil_to_word(value)],
        )
    }

    pub fn write_single_register(slave_address: u8, address: u16, value: u16) -> Self {
        Self::normal(slave_address, FunctionCode::WriteSingleRegister, address, 1, vec![value])
    }

    pub fn write_multiple_coils(slave_address: u8, address: u16, quantity: u16) -> Self {
        Self::normal(slave_address, FunctionCode::WriteMultipleCoils, address, quantity, Vec::new())
    }

    pub fn write_multiple_registers(slave_address: u8, address: u16, quantity: u16) -> Self {
        Self::normal(
            slave_address,
            FunctionCode::WriteMultipleRegisters,
            address,
            quantity,
            Vec::new(),
        )
    }

    pub fn read_file_record(slave_address: u8, values: &[u16]) -> Self {
        Self::normal(
            slave_address,
            FunctionCode::ReadFileRecord,
            0,
            values.len() as u16,
            values.to_vec(),
        )
    }

    /// `function` may be given with or without the exception bit.
    pub fn exception(slave_address: u8, function: u8, code: ExceptionCode) -> Self {
        Response::Exception(ExceptionResponse {
            slave_address,
            function: function | EXCEPTION_FLAG,
            code: code as u8,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_code_round_trip() {
        for code in 0..=u8::MAX {
            assert_eq!(FunctionCode::new(code).value(), code);
        }
        assert!(FunctionCode::new(0x10).is_supported());
        assert!(!FunctionCode::new(0x99).is_supported());
        assert_eq!(FunctionCode::new(0x14), FunctionCode::ReadFileRecord);
    }

    #[test]
    fn test_exception_code_conversion() {
        assert_eq!(ExceptionCode::try_from(0x0B), Ok(ExceptionCode::GatewayTargetDeviceFailedToRespond));
        assert_eq!(ExceptionCode::try_from(0x07), Err(0x07));
        assert_eq!(ExceptionCode::MemoryParityError as u8, 0x08);
    }

    #[test]
    fn test_exception_response_sets_high_bit_once() {
        let with_bit = Response::exception(3, 0x83, ExceptionCode::IllegalDataAddress);
        let without_bit = Response::exception(3, 0x03, ExceptionCode::IllegalDataAddress);
        assert_eq!(with_bit, without_bit);

        match with_bit {
            Response::Exception(e) => {
                assert_eq!(e.function, 0x83);
                assert_eq!(e.function_code(), FunctionCode::ReadHoldingRegisters);
                assert_eq!(e.exception_code(), Some(ExceptionCode::IllegalDataAddress));
            }
            Response::Normal(_) => panic!("expected exception"),
        }
    }

    #[test]
    fn test_coil_response_uses_coil_words() {
        match Response::read_coils(1, 10, &[true, false, true]) {
            Response::Normal(r) => {
                assert_eq!(r.quantity, 3);
                assert_eq!(r.values, vec![COIL_ON, COIL_OFF, COIL_ON]);
                assert_eq!(r.coil_values(), vec![true, false, true]);
            }
            Response::Exception(_) => panic!("expected normal response"),
        }
    }
}
