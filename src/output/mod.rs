pub mod formatters;

pub use formatters::{formatter_for, ConsoleFormatter, CsvFormatter, EventFormatter, HexFormatter, JsonFormatter};
