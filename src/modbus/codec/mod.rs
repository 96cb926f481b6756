//! RTU frame encoding, synchronization and decoding.
//!
//! RTU frames carry no delimiter or length prefix, so locating a frame in a
//! receive buffer is a brute-force scan: every start offset is tried, the
//! expected length is derived from the function table (reading an embedded
//! byte count where the layout has one) and the candidate is accepted only
//! when its trailing CRC matches.

pub mod master;
pub mod slave;

use super::crc::crc16_modbus;
use super::protocol::{coil_to_word, word_to_coil};
use super::word::{get_word_flip, put_word_flip};

/// Largest ADU that can be encoded.
pub const MAX_ADU_SIZE: usize = 256;

pub const CRC_SIZE: usize = 2;

/// Scratch space every encoder writes into before truncation.
pub(crate) type Scratch = [u8; MAX_ADU_SIZE];

/// Appends the CRC of `buf[..size]` and returns the truncated frame, or
/// `None` when the CRC would not fit.
pub(crate) fn seal(buf: &mut Scratch, size: usize) -> Option<Vec<u8>> {
    if size + CRC_SIZE > MAX_ADU_SIZE {
        return None;
    }
    let crc = crc16_modbus(&buf[..size]);
    put_word_flip(buf, size, crc);
    Some(buf[..size + CRC_SIZE].to_vec())
}

/// Whether `frame[start..end]` is followed by its own CRC.
///
/// The caller guarantees `end + CRC_SIZE <= frame.len()`.
pub(crate) fn crc_matches(frame: &[u8], start: usize, end: usize) -> bool {
    get_word_flip(frame, end) == crc16_modbus(&frame[start..end])
}

pub fn coil_byte_count(quantity: usize) -> usize {
    (quantity + 7) / 8
}

/// Packs values into `out`, bit i of byte i/8, least significant bit first.
/// Missing values count as off; unused trailing bits stay zero.
pub(crate) fn pack_bits(values: &[u16], quantity: usize, out: &mut [u8]) {
    for byte in out.iter_mut().take(coil_byte_count(quantity)) {
        *byte = 0;
    }
    for i in 0..quantity {
        if values.get(i).copied().map(word_to_coil).unwrap_or(false) {
            out[i / 8] |= 1 << (i % 8);
        }
    }
}

pub(crate) fn unpack_bits(packed: &[u8], quantity: usize) -> Vec<u16> {
    (0..quantity)
        .map(|i| coil_to_word(packed[i / 8] & (1 << (i % 8)) != 0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::protocol::{COIL_OFF, COIL_ON};

    #[test]
    fn test_coil_byte_count() {
        assert_eq!(coil_byte_count(1), 1);
        assert_eq!(coil_byte_count(8), 1);
        assert_eq!(coil_byte_count(9), 2);
        assert_eq!(coil_byte_count(16), 2);
        assert_eq!(coil_byte_count(17), 3);
    }

    #[test]
    fn test_pack_bits_lsb_first() {
        let values = vec![COIL_ON, COIL_OFF, COIL_ON, COIL_ON, COIL_OFF, COIL_OFF, COIL_OFF, COIL_OFF, COIL_ON];
        let mut out = [0xFFu8; 2];
        pack_bits(&values, values.len(), &mut out);
        assert_eq!(out, [0b0000_1101, 0b0000_0001]);
        assert_eq!(unpack_bits(&out, values.len()), values);
    }

    #[test]
    fn test_seal_appends_crc_low_first() {
        let mut buf: Scratch = [0u8; MAX_ADU_SIZE];
        buf[..6].copy_from_slice(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(seal(&mut buf, 6).unwrap(), vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
    }

    #[test]
    fn test_seal_rejects_full_scratch() {
        let mut buf: Scratch = [0u8; MAX_ADU_SIZE];
        assert!(seal(&mut buf, MAX_ADU_SIZE - 1).is_none());
        assert_eq!(seal(&mut buf, MAX_ADU_SIZE - 2).map(|f| f.len()), Some(MAX_ADU_SIZE));
    }
}
