//! Master side of the codec: requests out, responses in.

use super::{coil_byte_count, crc_matches, pack_bits, seal, unpack_bits, Scratch, CRC_SIZE, MAX_ADU_SIZE};
use crate::modbus::protocol::{
    ExceptionResponse, FunctionCode, NormalResponse, Request, Response, EXCEPTION_FLAG,
};
use crate::modbus::word::{get_word, put_word};

/// Shortest response the scan considers: an exception frame.
pub const MIN_RESPONSE_SIZE: usize = 5;

pub const MAX_WRITE_COILS: u16 = 1968;
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Sub-request header of Read File Record: byte count 7, reference type 6.
const FILE_RECORD_BYTE_COUNT: u8 = 7;
const FILE_RECORD_REFERENCE_TYPE: u8 = 6;

fn address_and_word(slave_address: u8, function: FunctionCode, address: u16, word: u16) -> Option<Vec<u8>> {
    let mut buf: Scratch = [0u8; MAX_ADU_SIZE];
    let mut size = 0;
    buf[size] = slave_address;
    size += 1;
    buf[size] = function.value();
    size += 1;
    put_word(&mut buf, size, address);
    size += 2;
    put_word(&mut buf, size, word);
    size += 2;
    seal(&mut buf, size)
}

pub fn read_coils(slave_address: u8, address: u16, quantity: u16) -> Option<Vec<u8>> {
    address_and_word(slave_address, FunctionCode::ReadCoils, address, quantity)
}

pub fn read_holding_registers(slave_address: u8, address: u16, quantity: u16) -> Option<Vec<u8>> {
    address_and_word(slave_address, FunctionCode::ReadHoldingRegisters, address, quantity)
}

pub fn read_input_registers(slave_address: u8, address: u16, quantity: u16) -> Option<Vec<u8>> {
    address_and_word(slave_address, FunctionCode::ReadInputRegisters, address, quantity)
}

/// `value` is the coil word, `COIL_ON` or `COIL_OFF`.
pub fn write_single_coil(slave_address: u8, address: u16, value: u16) -> Option<Vec<u8>> {
    address_and_word(slave_address, FunctionCode::WriteSingleCoil, address, value)
}

pub fn write_single_register(slave_address: u8, address: u16, value: u16) -> Option<Vec<u8>> {
    address_and_word(slave_address, FunctionCode::WriteSingleRegister, address, value)
}

pub fn write_multiple_coils(slave_address: u8, address: u16, quantity: u16, values: &[u16]) -> Option<Vec<u8>> {
    let byte_count = coil_byte_count(quantity as usize);
    if byte_count > u8::MAX as usize || 7 + byte_count + CRC_SIZE > MAX_ADU_SIZE {
        return None;
    }

    let mut buf: Scratch = [0u8; MAX_ADU_SIZE];
    let mut size = 0;
    buf[size] = slave_address;
    size += 1;
    buf[size] = FunctionCode::WriteMultipleCoils.value();
    size += 1;
    put_word(&mut buf, size, address);
    size += 2;
    put_word(&mut buf, size, quantity);
    size += 2;
    buf[size] = byte_count as u8;
    size += 1;
    pack_bits(values, quantity as usize, &mut buf[size..]);
    size += byte_count;
    seal(&mut buf, size)
}

/// Values beyond `values.len()` are sent as zero.
pub fn write_multiple_registers(slave_address: u8, address: u16, quantity: u16, values: &[u16]) -> Option<Vec<u8>> {
    let byte_count = 2 * quantity as usize;
    if byte_count > u8::MAX as usize || 7 + byte_count + CRC_SIZE > MAX_ADU_SIZE {
        return None;
    }

    let mut buf: Scratch = [0u8; MAX_ADU_SIZE];
    let mut size = 0;
    buf[size] = slave_address;
    size += 1;
    buf[size] = FunctionCode::WriteMultipleRegisters.value();
    size += 1;
    put_word(&mut buf, size, address);
    size += 2;
    put_word(&mut buf, size, quantity);
    size += 2;
    buf[size] = byte_count as u8;
    size += 1;
    for i in 0..quantity as usize {
        put_word(&mut buf, size, values.get(i).copied().unwrap_or(0));
        size += 2;
    }
    seal(&mut buf, size)
}

pub fn read_file_record(slave_address: u8, file_number: u16, record_number: u16, record_length: u16) -> Option<Vec<u8>> {
    let mut buf: Scratch = [0u8; MAX_ADU_SIZE];
    let mut size = 0;
    buf[size] = slave_address;
    size += 1;
    buf[size] = FunctionCode::ReadFileRecord.value();
    size += 1;
    buf[size] = FILE_RECORD_BYTE_COUNT;
    size += 1;
    buf[size] = FILE_RECORD_REFERENCE_TYPE;
    size += 1;
    put_word(&mut buf, size, file_number);
    size += 2;
    put_word(&mut buf, size, record_number);
    size += 2;
    put_word(&mut buf, size, record_length);
    size += 2;
    seal(&mut buf, size)
}

/// Serializes a queued request; `None` for unsupported functions or
/// payloads that do not fit in one ADU.
pub fn encode_request(request: &Request) -> Option<Vec<u8>> {
    let slave = request.slave_address;
    match request.function {
        FunctionCode::ReadCoils => read_coils(slave, request.address, request.quantity),
        FunctionCode::ReadHoldingRegisters => read_holding_registers(slave, request.address, request.quantity),
        FunctionCode::ReadInputRegisters => read_input_registers(slave, request.address, request.quantity),
        FunctionCode::WriteSingleCoil => write_single_coil(slave, request.address, request.first_value()),
        FunctionCode::WriteSingleRegister => write_single_register(slave, request.address, request.first_value()),
        FunctionCode::WriteMultipleCoils => {
            write_multiple_coils(slave, request.address, request.quantity, &request.values)
        }
        FunctionCode::WriteMultipleRegisters => {
            write_multiple_registers(slave, request.address, request.quantity, &request.values)
        }
        FunctionCode::ReadFileRecord => read_file_record(
            slave,
            request.file_number,
            request.record_number,
            request.record_length,
        ),
        FunctionCode::Custom(_) => None,
    }
}

/// End of the payload (start of the CRC) of a response candidate at
/// `begin`, if the buffer holds the whole candidate.
fn response_end(frame: &[u8], begin: usize, function: u8) -> Option<usize> {
    let end = if function & EXCEPTION_FLAG != 0 {
        begin + 3
    } else {
        match FunctionCode::new(function) {
            FunctionCode::ReadCoils
            | FunctionCode::ReadHoldingRegisters
            | FunctionCode::ReadInputRegisters
            | FunctionCode::ReadFileRecord => {
                let byte_count = *frame.get(begin + 2)? as usize;
                begin + 3 + byte_count
            }
            FunctionCode::WriteSingleCoil
            | FunctionCode::WriteSingleRegister
            | FunctionCode::WriteMultipleCoils
            | FunctionCode::WriteMultipleRegisters => begin + 6,
            FunctionCode::Custom(_) => return None,
        }
    };

    if end + CRC_SIZE <= frame.len() {
        Some(end)
    } else {
        None
    }
}

/// Offset of the first CRC-valid response from `expected_slave` to
/// `expected_function` (exception responses included).
pub fn find_valid_adu(frame: &[u8], expected_slave: u8, expected_function: FunctionCode) -> Option<usize> {
    if frame.len() < MIN_RESPONSE_SIZE {
        return None;
    }

    for begin in 0..=frame.len() - MIN_RESPONSE_SIZE {
        if frame[begin] != expected_slave {
            continue;
        }
        let function = frame[begin + 1];
        if function & !EXCEPTION_FLAG != expected_function.value() {
            continue;
        }
        if let Some(end) = response_end(frame, begin, function) {
            if crc_matches(frame, begin, end) {
                return Some(begin);
            }
        }
    }
    None
}

/// Decodes the response located at `offset` and cross-checks it against
/// the request it answers. `None` on any mismatch.
///
/// Read File Record responses report the requested record number as their
/// address. Write Multiple echoes carry the request's values.
pub fn take_response(frame: &[u8], offset: usize, request: &Request) -> Option<Response> {
    let slave_address = *frame.get(offset)?;
    let function = *frame.get(offset + 1)?;
    if slave_address != request.slave_address || function & !EXCEPTION_FLAG != request.function.value() {
        return None;
    }

    if function & EXCEPTION_FLAG != 0 {
        return Some(Response::Exception(ExceptionResponse {
            slave_address,
            function,
            code: *frame.get(offset + 2)?,
        }));
    }

    let body = frame.get(offset + 2..)?;
    let mut response = NormalResponse {
        slave_address,
        function: request.function,
        address: request.address,
        quantity: request.quantity,
        values: Vec::new(),
    };

    match request.function {
        FunctionCode::ReadCoils => {
            let byte_count = *body.first()? as usize;
            if byte_count * 8 < request.quantity as usize {
                return None;
            }
            let packed = body.get(1..1 + byte_count)?;
            response.values = unpack_bits(packed, request.quantity as usize);
        }
        FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
            let byte_count = *body.first()? as usize;
            if byte_count / 2 != request.quantity as usize {
                return None;
            }
            let data = body.get(1..1 + byte_count)?;
            response.values = (0..request.quantity as usize)
                .map(|i| get_word(data, 2 * i))
                .collect();
        }
        FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => {
            let fields = body.get(..4)?;
            let address = get_word(fields, 0);
            let value = get_word(fields, 2);
            if address != request.address || value != request.first_value() {
                return None;
            }
            response.quantity = 1;
            response.values = vec![value];
        }
        FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters => {
            let fields = body.get(..4)?;
            let address = get_word(fields, 0);
            let quantity = get_word(fields, 2);
            if address != request.address || quantity != request.quantity {
                return None;
            }
            response.values = request.values.iter().take(quantity as usize).copied().collect();
        }
        FunctionCode::ReadFileRecord => {
            let data_length = *body.first()? as usize;
            let mut data = body.get(1..1 + data_length)?;
            let mut values = Vec::new();
            while !data.is_empty() {
                // sub-response: length, reference type, words
                let sub_length = data[0] as usize;
                let words = data.get(2..1 + sub_length)?;
                values.extend((0..words.len() / 2).map(|i| get_word(words, 2 * i)));
                data = &data[1 + sub_length..];
            }
            response.address = request.record_number;
            response.quantity = values.len() as u16;
            response.values = values;
        }
        FunctionCode::Custom(_) => return None,
    }

    Some(Response::Normal(response))
}
