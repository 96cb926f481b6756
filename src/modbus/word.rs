//! 16-bit field accessors.
//!
//! Every protocol field (addresses, quantities, register values) travels
//! big-endian. The trailing CRC is the one exception and travels low byte
//! first, hence the separate `*_flip` pair.

/// Writes `value` big-endian at `offset`.
pub fn put_word(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

/// Reads a big-endian word at `offset`.
pub fn get_word(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

/// Writes `value` little-endian at `offset` (CRC field only).
pub fn put_word_flip(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Reads a little-endian word at `offset` (CRC field only).
pub fn get_word_flip(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}
