/// Seed every new CRC computation starts from.
pub const CRC16_SEED: u16 = 0xFFFF;

const CRC16_POLY: u16 = 0xA001;

/// Table-free CRC16 (Modbus variant, reflected 0x8005) over `data`.
pub fn crc16(seed: u16, data: &[u8]) -> u16 {
    let mut crc = seed;

    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ CRC16_POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

pub fn crc16_modbus(data: &[u8]) -> u16 {
    crc16(CRC16_SEED, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_modbus_known_frames() {
        // 01 03 00 00 00 01 84 0A
        assert_eq!(crc16_modbus(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), 0x0A84);
        // 01 03 00 00 00 02 C4 0B
        assert_eq!(crc16_modbus(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]), 0x0BC4);
    }

    #[test]
    fn test_crc16_empty_is_seed() {
        assert_eq!(crc16(CRC16_SEED, &[]), CRC16_SEED);
    }

    #[test]
    fn test_crc16_deterministic() {
        let data = [0x11, 0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02];
        assert_eq!(crc16_modbus(&data), crc16_modbus(&data));
    }

    #[test]
    fn test_crc16_single_bit_sensitivity() {
        let data = vec![0x01, 0x03, 0x00, 0xF4, 0x00, 0x16];
        let reference = crc16_modbus(&data);

        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut flipped = data.clone();
                flipped[byte] ^= 1 << bit;
                assert_ne!(crc16_modbus(&flipped), reference, "byte {} bit {}", byte, bit);
            }
        }
    }

    #[test]
    fn test_crc16_residue_is_zero() {
        let mut frame = vec![0x05, 0x06, 0x00, 0x10, 0xAB, 0xCD];
        let crc = crc16_modbus(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        assert_eq!(crc16_modbus(&frame), 0);
    }
}
