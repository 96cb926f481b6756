pub mod settings;

pub use settings::{Config, MasterConfig, ParityConfig, SlaveConfig};
