use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModbusError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Communication error: {0}")]
    CommunicationError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Lock acquisition failed")]
    LockError,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        ModbusError::CommunicationError(format!("IO error: {}", err))
    }
}

impl From<serialport::Error> for ModbusError {
    fn from(err: serialport::Error) -> Self {
        ModbusError::ConnectionError(format!("Serial port error: {}", err))
    }
}

impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        ModbusError::SerializationError(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for ModbusError {
    fn from(err: toml::de::Error) -> Self {
        ModbusError::ConfigError(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for ModbusError {
    fn from(err: toml::ser::Error) -> Self {
        ModbusError::SerializationError(format!("TOML error: {}", err))
    }
}
