//! Poll-driven Modbus RTU master and slave engines.
//!
//! Both engines are non-blocking: feed them bytes (or hand them a
//! [`modbus::ByteSource`]) and call `poll()` regularly. Framing, CRC checks,
//! timeouts, retries and turnaround delays all happen inside `poll()`.

pub mod cli;
pub mod config;
pub mod devices;
pub mod modbus;
pub mod output;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::{Config, MasterConfig, SlaveConfig};
pub use devices::RegisterMap;
pub use modbus::{
    ExceptionCode, ExceptionResponse, FunctionCode, MasterListener, ModbusMaster, ModbusSlave,
    NormalResponse, Request, Response, SlaveListener,
};
pub use output::{ConsoleFormatter, CsvFormatter, EventFormatter, HexFormatter, JsonFormatter};
pub use services::{MasterService, SlaveService};
pub use utils::error::ModbusError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
