//! Slave side of the codec: requests in, responses out.

use super::{coil_byte_count, crc_matches, pack_bits, seal, unpack_bits, Scratch, CRC_SIZE, MAX_ADU_SIZE};
use crate::modbus::crc::{crc16, CRC16_SEED};
use crate::modbus::protocol::{FunctionCode, Request, Response, EXCEPTION_FLAG, MAX_SLAVE_ADDRESS};
use crate::modbus::word::{get_word, get_word_flip, put_word};

/// Address, function and CRC: the shortest frame the scan considers.
pub const MIN_REQUEST_SIZE: usize = 4;

const FILE_RECORD_REFERENCE_TYPE: u8 = 6;

fn byte_counted_words(slave_address: u8, function: FunctionCode, values: &[u16]) -> Option<Vec<u8>> {
    let byte_count = 2 * values.len();
    if byte_count > u8::MAX as usize || 3 + byte_count + CRC_SIZE > MAX_ADU_SIZE {
        return None;
    }

    let mut buf: Scratch = [0u8; MAX_ADU_SIZE];
    let mut size = 0;
    buf[size] = slave_address;
    size += 1;
    buf[size] = function.value();
    size += 1;
    buf[size] = byte_count as u8;
    size += 1;
    for &value in values {
        put_word(&mut buf, size, value);
        size += 2;
    }
    seal(&mut buf, size)
}

fn echo(slave_address: u8, function: FunctionCode, address: u16, word: u16) -> Option<Vec<u8>> {
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

/// One coil per value, packed eight to a byte.
pub fn read_coils(slave_address: u8, values: &[u16]) -> Option<Vec<u8>> {
    let byte_count = coil_byte_count(values.len());
    if byte_count > u8::MAX as usize || 3 + byte_count + CRC_SIZE > MAX_ADU_SIZE {
        return None;
    }

    let mut buf: Scratch = [0u8; MAX_ADU_SIZE];
    let mut size = 0;
    buf[size] = slave_address;
    size += 1;
    buf[size] = FunctionCode::ReadCoils.value();
    size += 1;
    buf[size] = byte_count as u8;
    size += 1;
    pack_bits(values, values.len(), &mut buf[size..]);
    size += byte_count;
    seal(&mut buf, size)
}

pub fn read_holding_registers(slave_address: u8, values: &[u16]) -> Option<Vec<u8>> {
    byte_counted_words(slave_address, FunctionCode::ReadHoldingRegisters, values)
}

pub fn read_input_registers(slave_address: u8, values: &[u16]) -> Option<Vec<u8>> {
    byte_counted_words(slave_address, FunctionCode::ReadInputRegisters, values)
}

pub fn write_single_coil(slave_address: u8, address: u16, value: u16) -> Option<Vec<u8>> {
    echo(slave_address, FunctionCode::WriteSingleCoil, address, value)
}

pub fn write_single_register(slave_address: u8, address: u16, value: u16) -> Option<Vec<u8>> {
    echo(slave_address, FunctionCode::WriteSingleRegister, address, value)
}

pub fn write_multiple_coils(slave_address: u8, address: u16, quantity: u16) -> Option<Vec<u8>> {
    echo(slave_address, FunctionCode::WriteMultipleCoils, address, quantity)
}

pub fn write_multiple_registers(slave_address: u8, address: u16, quantity: u16) -> Option<Vec<u8>> {
    echo(slave_address, FunctionCode::WriteMultipleRegisters, address, quantity)
}

/// A single sub-response carrying `values`.
pub fn read_file_record(slave_address: u8, values: &[u16]) -> Option<Vec<u8>> {
    let sub_length = 1 + 2 * values.len();
    let data_length = 1 + sub_length;
    if data_length > u8::MAX as usize || 3 + data_length + CRC_SIZE > MAX_ADU_SIZE {
        return None;
    }

    let mut buf: Scratch = [0u8; MAX_ADU_SIZE];
    let mut size = 0;
    buf[size] = slave_address;
    size += 1;
    buf[size] = FunctionCode::ReadFileRecord.value();
    size += 1;
    buf[size] = data_length as u8;
    size += 1;
    buf[size] = sub_length as u8;
    size += 1;
    buf[size] = FILE_RECORD_REFERENCE_TYPE;
    size += 1;
    for &value in values {
        put_word(&mut buf, size, value);
        size += 2;
    }
    seal(&mut buf, size)
}

pub fn exception(slave_address: u8, function: u8, code: u8) -> Option<Vec<u8>> {
    let mut buf: Scratch = [0u8; MAX_ADU_SIZE];
    buf[0] = slave_address;
    buf[1] = function | EXCEPTION_FLAG;
    buf[2] = code;
    seal(&mut buf, 3)
}

/// Serializes a response; `None` for unsupported functions or payloads
/// that do not fit in one ADU.
pub fn encode_response(response: &Response) -> Option<Vec<u8>> {
    let r = match response {
        Response::Exception(e) => return exception(e.slave_address, e.function, e.code),
        Response::Normal(r) => r,
    };

    let slave = r.slave_address;
    match r.function {
        FunctionCode::ReadCoils => read_coils(slave, &r.values),
        FunctionCode::ReadHoldingRegisters => read_holding_registers(slave, &r.values),
        FunctionCode::ReadInputRegisters => read_input_registers(slave, &r.values),
        FunctionCode::WriteSingleCoil => write_single_coil(slave, r.address, r.first_value()),
        FunctionCode::WriteSingleRegister => write_single_register(slave, r.address, r.first_value()),
        FunctionCode::WriteMultipleCoils => write_multiple_coils(slave, r.address, r.quantity),
        FunctionCode::WriteMultipleRegisters => write_multiple_registers(slave, r.address, r.quantity),
        FunctionCode::ReadFileRecord => read_file_record(slave, &r.values),
        FunctionCode::Custom(_) => None,
    }
}

/// End of the payload of a request for an unknown function: the first span
/// of at least address and function whose trailing CRC matches.
/// Offset of the CRC in an exception ADU, relative to its start.
const EXCEPTION_PDU_END: usize = 3;

fn custom_request_end(frame: &[u8], begin: usize) -> Option<usize> {
    let last = (begin + MAX_ADU_SIZE - CRC_SIZE).min(frame.len() - CRC_SIZE);
    let mut crc = crc16(CRC16_SEED, &frame[begin..begin + 2]);
    for end in begin + 2..=last {
        if get_word_flip(frame, end) == crc {
            return Some(end);
        }
        crc = crc16(crc, &frame[end..end + 1]);
    }
    None
}

fn request_end(frame: &[u8], begin: usize) -> Option<usize> {
    let end = match FunctionCode::new(frame[begin + 1]) {
        FunctionCode::ReadCoils
        | FunctionCode::ReadHoldingRegisters
        | FunctionCode::ReadInputRegisters
        | FunctionCode::WriteSingleCoil
        | FunctionCode::WriteSingleRegister => begin + 6,
        FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters => {
            let byte_count = *frame.get(begin + 6)? as usize;
            begin + 7 + byte_count
        }
        FunctionCode::ReadFileRecord => {
            let byte_count = *frame.get(begin + 2)? as usize;
            begin + 3 + byte_count
        }
        FunctionCode::Custom(code) => {
            let end = custom_request_end(frame, begin)?;
            // [addr, fn|0x80, code, crc] is another device's exception reply
            if code & EXCEPTION_FLAG != 0 && end == begin + EXCEPTION_PDU_END {
                return None;
            }
            return Some(end);
        }
    };

    if end + CRC_SIZE <= frame.len() && crc_matches(frame, begin, end) {
        Some(end)
    } else {
        None
    }
}

/// Offset of the first CRC-valid request in `frame`, whatever slave it is
/// addressed to. Unknown function codes are located by CRC alone so that
/// they can be answered with an exception.
pub fn find_valid_adu(frame: &[u8]) -> Option<usize> {
    if frame.len() < MIN_REQUEST_SIZE {
        return None;
    }

    (0..=frame.len() - MIN_REQUEST_SIZE)
        .filter(|&begin| frame[begin] < MAX_SLAVE_ADDRESS)
        .find(|&begin| request_end(frame, begin).is_some())
}

/// Decodes the request located at `offset`.
///
/// Unknown functions decode to a `Custom` request with no fields. Multiple
/// writes whose byte count disagrees with their quantity are rejected.
pub fn take_request(frame: &[u8], offset: usize) -> Option<Request> {
    let slave_address = *frame.get(offset)?;
    let function = FunctionCode::new(*frame.get(offset + 1)?);
    let body = frame.get(offset + 2..)?;
    let mut request = Request::new(slave_address, function);

    match function {
        FunctionCode::ReadCoils | FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
            let fields = body.get(..4)?;
            request.address = get_word(fields, 0);
            request.quantity = get_word(fields, 2);
        }
        FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => {
            let fields = body.get(..4)?;
            request.address = get_word(fields, 0);
            request.quantity = 1;
            request.values = vec![get_word(fields, 2)];
        }
        FunctionCode::WriteMultipleCoils => {
            let fields = body.get(..5)?;
            request.address = get_word(fields, 0);
            request.quantity = get_word(fields, 2);
            let byte_count = fields[4] as usize;
            if byte_count != coil_byte_count(request.quantity as usize) {
                return None;
            }
            let packed = body.get(5..5 + byte_count)?;
            request.values = unpack_bits(packed, request.quantity as usize);
        }
        FunctionCode::WriteMultipleRegisters => {
            let fields = body.get(..5)?;
            request.address = get_word(fields, 0);
            request.quantity = get_word(fields, 2);
            let byte_count = fields[4] as usize;
            if byte_count != 2 * request.quantity as usize {
                return None;
            }
            let data = body.get(5..5 + byte_count)?;
            request.values = (0..request.quantity as usize)
                .map(|i| get_word(data, 2 * i))
                .collect();
        }
        FunctionCode::ReadFileRecord => {
            // byte count, reference type, file, record, length
            let fields = body.get(..8)?;
            request.file_number = get_word(fields, 2);
            request.record_number = get_word(fields, 4);
            request.record_length = get_word(fields, 6);
            request.quantity = request.record_length;
        }
        FunctionCode::Custom(_) => {}
    }

    Some(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::codec::master;
    use crate::modbus::crc::crc16_modbus;
    use crate::modbus::protocol::{ExceptionCode, COIL_OFF, COIL_ON};

    fn with_crc(payload: &[u8]) -> Vec<u8> {
        let mut frame = payload.to_vec();
        frame.extend_from_slice(&crc16_modbus(payload).to_le_bytes());
        frame
    }

    #[test]
    fn test_read_coils_response_packing() {
        let values: Vec<u16> = (0..10).map(|i| if i % 2 == 0 { COIL_ON } else { COIL_OFF }).collect();
        let frame = read_coils(1, &values).unwrap();
        assert_eq!(&frame[..5], &[0x01, 0x01, 0x02, 0x55, 0x01]);
        assert_eq!(frame.len(), 7);
    }

    #[test]
    fn test_read_registers_response_layout() {
        let frame = read_holding_registers(0x11, &[0x022B, 0x0000, 0x0064]).unwrap();
        assert_eq!(
            &frame[..9],
            &[0x11, 0x03, 0x06, 0x02, 0x2B, 0x00, 0x00, 0x00, 0x64]
        );
        assert_eq!(crc16_modbus(&frame), 0);

        assert!(read_input_registers(1, &[0u16; 125]).is_some());
        assert!(read_input_registers(1, &[0u16; 126]).is_none());
    }

    #[test]
    fn test_read_file_record_response_layout() {
        let frame = read_file_record(4, &[0x0DFE, 0x0020]).unwrap();
        assert_eq!(&frame[..9], &[0x04, 0x14, 0x06, 0x05, 0x06, 0x0D, 0xFE, 0x00, 0x20]);
        assert_eq!(frame.len(), 11);
    }

    #[test]
    fn test_exception_frame() {
        let frame = exception(1, 0x99, ExceptionCode::IllegalFunction as u8).unwrap();
        assert_eq!(frame, with_crc(&[0x01, 0x99, 0x01]));

        let encoded = encode_response(&Response::exception(2, 0x03, ExceptionCode::IllegalDataAddress)).unwrap();
        assert_eq!(&encoded[..3], &[0x02, 0x83, 0x02]);
    }

    #[test]
    fn test_encode_response_echoes() {
        let single = encode_response(&Response::write_single_coil(1, 0x00AC, true)).unwrap();
        assert_eq!(&single[..6], &[0x01, 0x05, 0x00, 0xAC, 0xFF, 0x00]);

        let multiple = encode_response(&Response::write_multiple_registers(1, 0x0001, 2)).unwrap();
        assert_eq!(&multiple[..6], &[0x01, 0x10, 0x00, 0x01, 0x00, 0x02]);
    }

    #[test]
    fn test_find_and_take_read_holding() {
        let frame = master::read_holding_registers(0x11, 0x006B, 3).unwrap();
        let mut buffer = vec![0xFF, 0x00, 0x13];
        buffer.extend_from_slice(&frame);

        let offset = find_valid_adu(&buffer).unwrap();
        assert_eq!(offset, 3);
        let request = take_request(&buffer, offset).unwrap();
        assert_eq!(request.slave_address, 0x11);
        assert_eq!(request.function, FunctionCode::ReadHoldingRegisters);
        assert_eq!(request.address, 0x006B);
        assert_eq!(request.quantity, 3);
    }

    #[test]
    fn test_find_rejects_reserved_addresses() {
        let frame = master::read_coils(247, 0, 8).unwrap();
        assert_eq!(find_valid_adu(&frame), None);

        let frame = master::read_coils(246, 0, 8).unwrap();
        assert_eq!(find_valid_adu(&frame), Some(0));
    }

    #[test]
    fn test_find_waits_for_complete_frame() {
        let frame = master::write_multiple_registers(1, 0, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(find_valid_adu(&frame[..frame.len() - 1]), None);
        assert_eq!(find_valid_adu(&frame), Some(0));
    }

    #[test]
    fn test_unknown_function_located_by_crc() {
        let frame = with_crc(&[0x01, 0x99, 0x00, 0x00, 0x00, 0x01]);
        let offset = find_valid_adu(&frame).unwrap();
        assert_eq!(offset, 0);

        let request = take_request(&frame, offset).unwrap();
        assert_eq!(request.function, FunctionCode::Custom(0x99));
        assert!(!request.function.is_supported());
    }

    #[test]
    fn test_peer_exception_is_not_a_request() {
        let reply = exception(2, 0x03, ExceptionCode::IllegalDataAddress as u8).unwrap();
        assert_eq!(find_valid_adu(&reply), None);

        let mut buffer = reply.clone();
        buffer.extend_from_slice(&master::read_coils(1, 0, 8).unwrap());
        assert_eq!(find_valid_adu(&buffer), Some(reply.len()));
    }

    #[test]
    fn test_corrupted_frame_not_found() {
        let mut frame = master::write_single_register(1, 2, 3).unwrap();
        frame[5] ^= 0x10;
        assert_eq!(find_valid_adu(&frame), None);
    }

    #[test]
    fn test_take_read_file_record() {
        let frame = master::read_file_record(3, 4, 1, 2).unwrap();
        let offset = find_valid_adu(&frame).unwrap();
        let request = take_request(&frame, offset).unwrap();
        assert_eq!(request.function, FunctionCode::ReadFileRecord);
        assert_eq!(request.file_number, 4);
        assert_eq!(request.record_number, 1);
        assert_eq!(request.record_length, 2);
    }

    #[test]
    fn test_take_rejects_inconsistent_byte_count() {
        // quantity 2 but byte count 2
        let frame = with_crc(&[0x01, 0x10, 0x00, 0x00, 0x00, 0x02, 0x02, 0x00, 0x01]);
        let offset = find_valid_adu(&frame).unwrap();
        assert!(take_request(&frame, offset).is_none());
    }
}
