use clap::ArgMatches;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::utils::error::ModbusError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    // Connection settings
    pub serial_port: String,
    pub baud_rate: u32,
    pub parity: ParityConfig,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub read_timeout_ms: u64,

    // Cadence of the poll loop driving the engines
    pub poll_interval_ms: u64,

    pub master: MasterConfig,
    pub slave: SlaveConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ParityConfig {
    None,
    Even,
    Odd,
}

/// Master engine timing, all in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MasterConfig {
    /// Silence after a transmission before the request counts as timed out.
    pub response_timeout_ms: u64,
    /// Inter-byte silence that ends a received frame.
    pub frame_timeout_ms: u64,
    /// Minimum idle time between two transactions.
    pub turnaround_delay_ms: u64,
    /// Retries granted to each request on top of the first attempt.
    pub retries: u32,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 1000,
            frame_timeout_ms: 10,
            turnaround_delay_ms: 300,
            retries: 0,
        }
    }
}

/// Slave engine timing, all in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SlaveConfig {
    /// Minimum silence after the last request byte before replying.
    pub response_delay_ms: u64,
    pub frame_timeout_ms: u64,
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            response_delay_ms: 0,
            frame_timeout_ms: 10,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let serial_port = if cfg!(target_os = "windows") {
            "COM1"
        } else if cfg!(target_os = "macos") {
            "/dev/tty.usbserial-0001"
        } else {
            "/dev/ttyUSB0"
        };

        Self {
            serial_port: serial_port.to_string(),
            baud_rate: 9600,
            parity: ParityConfig::None,
            data_bits: 8,
            stop_bits: 1,
            read_timeout_ms: 100,
            poll_interval_ms: 10,
            master: MasterConfig::default(),
            slave: SlaveConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModbusError> {
        let path = path.as_ref();
        info!("📄 Loading configuration from {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|e| {
            ModbusError::ConfigError(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ModbusError> {
        // Create directory if it doesn't exist
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overrides settings with whatever was given on the command line.
    pub fn apply_matches(&mut self, matches: &ArgMatches) -> Result<(), ModbusError> {
        if let Some(port) = matches.get_one::<String>("port") {
            self.serial_port = port.clone();
        }
        if let Some(baud) = matches.get_one::<String>("baud") {
            self.baud_rate = baud
                .parse()
                .map_err(|_| ModbusError::ConfigError(format!("Invalid baud rate: {}", baud)))?;
        }
        if let Some(parity) = matches.get_one::<String>("parity") {
            self.parity = match parity.to_lowercase().as_str() {
                "none" | "n" => ParityConfig::None,
                "even" | "e" => ParityConfig::Even,
                "odd" | "o" => ParityConfig::Odd,
                other => {
                    return Err(ModbusError::ConfigError(format!("Invalid parity: {}", other)))
                }
            };
        }
        if let Some(retries) = matches.get_one::<String>("retries") {
            self.master.retries = retries
                .parse()
                .map_err(|_| ModbusError::ConfigError(format!("Invalid retry count: {}", retries)))?;
        }
        if let Some(timeout) = matches.get_one::<String>("response-timeout") {
            self.master.response_timeout_ms = timeout
                .parse()
                .map_err(|_| ModbusError::ConfigError(format!("Invalid response timeout: {}", timeout)))?;
        }

        debug!("Effective configuration: {:?}", self);
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ModbusError> {
        if self.serial_port.trim().is_empty() {
            return Err(ModbusError::ConfigError("serial_port must not be empty".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(ModbusError::ConfigError("baud_rate must be positive".to_string()));
        }
        if !matches!(self.data_bits, 7 | 8) {
            return Err(ModbusError::ConfigError(format!(
                "data_bits must be 7 or 8, got {}",
                self.data_bits
            )));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(ModbusError::ConfigError(format!(
                "stop_bits must be 1 or 2, got {}",
                self.stop_bits
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ModbusError::ConfigError("poll_interval_ms must be positive".to_string()));
        }
        Ok(())
    }
}
