pub mod buffer;
pub mod clock;
pub mod codec;
pub mod crc;
pub mod master;
pub mod protocol;
pub mod slave;
pub mod transport;
pub mod word;

pub use clock::{Clock, ManualClock, SystemClock};
pub use crc::crc16_modbus;
pub use master::{MasterListener, MasterState, ModbusMaster};
pub use protocol::{ExceptionCode, ExceptionResponse, FunctionCode, NormalResponse, Request, Response};
pub use slave::{ModbusSlave, SlaveListener, SlaveState};
pub use transport::{ByteSink, ByteSource, MemoryPort, SerialTransport};
