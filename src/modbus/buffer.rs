use log::warn;

/// Receive buffer capacity per engine.
pub const RX_BUFFER_CAPACITY: usize = 8192;

/// Fixed-capacity byte accumulator.
///
/// There is no sliding window: a chunk that does not fit purges the whole
/// buffer and is itself discarded.
pub struct RxBuffer {
    data: Box<[u8; RX_BUFFER_CAPACITY]>,
    len: usize,
}

impl RxBuffer {
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; RX_BUFFER_CAPACITY]),
            len: 0,
        }
    }

    /// Appends `bytes`; returns `false` when the buffer overflowed and was purged.
    pub fn append(&mut self, bytes: &[u8]) -> bool {
        if self.len + bytes.len() <= RX_BUFFER_CAPACITY {
            self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
            self.len += bytes.len();
            true
        } else {
            warn!(
                "⚠️ RX buffer overflow ({} + {} bytes), purging",
                self.len,
                bytes.len()
            );
            self.purge();
            false
        }
    }

    pub fn purge(&mut self) {
        self.len = 0;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for RxBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_accumulates() {
        let mut buf = RxBuffer::new();
        assert!(buf.append(&[1, 2]));
        assert!(buf.append(&[3]));
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
        buf.purge();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_exact_fill_is_kept() {
        let mut buf = RxBuffer::new();
        assert!(buf.append(&vec![0xAA; RX_BUFFER_CAPACITY]));
        assert_eq!(buf.len(), RX_BUFFER_CAPACITY);
    }

    #[test]
    fn test_overflow_purges_everything() {
        let mut buf = RxBuffer::new();
        assert!(buf.append(&vec![0x55; RX_BUFFER_CAPACITY - 4]));
        assert!(!buf.append(&[1, 2, 3, 4, 5]));
        assert!(buf.is_empty());

        // the next chunk starts from scratch
        assert!(buf.append(&[9]));
        assert_eq!(buf.as_slice(), &[9]);
    }
}
