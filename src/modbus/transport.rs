use log::{error, info};
use serialport::SerialPort;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::settings::{Config, ParityConfig};
use crate::utils::error::ModbusError;

/// Inbound side of a byte stream: non-blocking, read whatever is there.
pub trait ByteSource: Send {
    fn bytes_available(&mut self) -> Result<usize, ModbusError>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ModbusError>;
}

/// Outbound side of a byte stream.
pub trait ByteSink: Send {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ModbusError>;
}

/// Drains whatever `source` has ready right now.
pub fn read_available(source: &mut dyn ByteSource) -> Result<Vec<u8>, ModbusError> {
    let available = source.bytes_available()?;
    if available == 0 {
        return Ok(Vec::new());
    }
    let mut chunk = vec![0u8; available];
    let n = source.read(&mut chunk)?;
    chunk.truncate(n);
    Ok(chunk)
}

pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(config: &Config) -> Result<Self, ModbusError> {
        info!("🔌 Opening Modbus RTU port: {}", config.serial_port);
        info!(
            "⚙️  Configuration: {} baud, {} data bits, {:?} parity, {} stop bit(s)",
            config.baud_rate, config.data_bits, config.parity, config.stop_bits
        );

        let parity = match config.parity {
            ParityConfig::None => serialport::Parity::None,
            ParityConfig::Even => serialport::Parity::Even,
            ParityConfig::Odd => serialport::Parity::Odd,
        };
        let data_bits = match config.data_bits {
            7 => serialport::DataBits::Seven,
            _ => serialport::DataBits::Eight,
        };
        let stop_bits = match config.stop_bits {
            2 => serialport::StopBits::Two,
            _ => serialport::StopBits::One,
        };

        let port = serialport::new(config.serial_port.as_str(), config.baud_rate)
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .open()
            .map_err(|e| {
                error!("❌ Failed to open serial port {}: {}", config.serial_port, e);
                ModbusError::ConnectionError(format!("Failed to open port: {}", e))
            })?;

        info!("✅ Serial port {} ready", config.serial_port);
        Ok(Self { port })
    }

    /// Two handles on the same port, one to read from and one to write to.
    pub fn split(self) -> Result<(SerialTransport, SerialTransport), ModbusError> {
        let writer = self.port.try_clone()?;
        Ok((self, SerialTransport { port: writer }))
    }
}

impl ByteSource for SerialTransport {
    fn bytes_available(&mut self) -> Result<usize, ModbusError> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ModbusError> {
        self.port
            .read(buf)
            .map_err(|e| ModbusError::CommunicationError(format!("Read failed: {}", e)))
    }
}

impl ByteSink for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ModbusError> {
        self.port
            .write_all(bytes)
            .map_err(|e| ModbusError::CommunicationError(format!("Write failed: {}", e)))?;
        self.port
            .flush()
            .map_err(|e| ModbusError::CommunicationError(format!("Flush failed: {}", e)))
    }
}

type Pipe = Arc<Mutex<VecDeque<u8>>>;

/// One end of an in-memory, cross-connected link.
///
/// Bytes written to one end become readable at the other. Clones of an end
/// share its pipes, so the same end can serve as source and sink.
#[derive(Clone)]
pub struct MemoryPort {
    inbound: Pipe,
    outbound: Pipe,
}

impl MemoryPort {
    pub fn pair() -> (MemoryPort, MemoryPort) {
        let a_to_b: Pipe = Arc::new(Mutex::new(VecDeque::new()));
        let b_to_a: Pipe = Arc::new(Mutex::new(VecDeque::new()));
        (
            MemoryPort {
                inbound: b_to_a.clone(),
                outbound: a_to_b.clone(),
            },
            MemoryPort {
                inbound: a_to_b,
                outbound: b_to_a,
            },
        )
    }

    /// Queues bytes as if the peer had sent them.
    pub fn inject(&self, bytes: &[u8]) -> Result<(), ModbusError> {
        let mut pipe = self.inbound.lock().map_err(|_| ModbusError::LockError)?;
        pipe.extend(bytes.iter().copied());
        Ok(())
    }

    /// Takes everything written to this end that the peer has not read yet.
    pub fn drain_outbound(&self) -> Result<Vec<u8>, ModbusError> {
        let mut pipe = self.outbound.lock().map_err(|_| ModbusError::LockError)?;
        Ok(pipe.drain(..).collect())
    }
}

impl ByteSource for MemoryPort {
    fn bytes_available(&mut self) -> Result<usize, ModbusError> {
        let pipe = self.inbound.lock().map_err(|_| ModbusError::LockError)?;
        Ok(pipe.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ModbusError> {
        let mut pipe = self.inbound.lock().map_err(|_| ModbusError::LockError)?;
        let n = buf.len().min(pipe.len());
        for (slot, byte) in buf.iter_mut().zip(pipe.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl ByteSink for MemoryPort {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ModbusError> {
        let mut pipe = self.outbound.lock().map_err(|_| ModbusError::LockError)?;
        pipe.extend(bytes.iter().copied());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_pair_is_cross_connected() {
        let (mut a, mut b) = MemoryPort::pair();
        a.write(&[1, 2, 3]).unwrap();
        assert_eq!(a.bytes_available().unwrap(), 0);
        assert_eq!(b.bytes_available().unwrap(), 3);

        let mut buf = [0u8; 2];
        assert_eq!(b.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(b.bytes_available().unwrap(), 1);

        b.write(&[9]).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(a.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 9);
    }

    #[test]
    fn test_inject_and_drain() {
        let (mut a, _b) = MemoryPort::pair();
        a.inject(&[0xAA, 0xBB]).unwrap();
        assert_eq!(a.bytes_available().unwrap(), 2);

        a.write(&[0x01]).unwrap();
        assert_eq!(a.drain_outbound().unwrap(), vec![0x01]);
        assert!(a.drain_outbound().unwrap().is_empty());
    }

    #[test]
    fn test_read_available() {
        let (mut a, mut b) = MemoryPort::pair();
        assert!(read_available(&mut b).unwrap().is_empty());

        a.write(&[4, 5, 6]).unwrap();
        assert_eq!(read_available(&mut b).unwrap(), vec![4, 5, 6]);
        assert_eq!(b.bytes_available().unwrap(), 0);
    }
}
