//! Bridge configuration
//!
//! Serial link parameters and protocol defaults, loadable from a JSON file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::protocol::{DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS};

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid value for '{key}': {message}")]
    Invalid { key: String, message: String },
}

/// Serial link parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Device name, e.g. "/dev/ttyUSB0" or "COM3"
    pub port: String,
    pub baud: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    /// "none", "odd" or "even"
    pub parity: String,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud: DEFAULT_BAUD_RATE,
            data_bits: 8,
            stop_bits: 1,
            parity: "none".to_string(),
        }
    }
}

/// Protocol-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TefSettings {
    /// Per-transaction timeout in milliseconds
    pub timeout_ms: u64,
    /// Use the in-memory mock transport instead of a real device
    pub mock_mode: bool,
}

impl Default for TefSettings {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            mock_mode: false,
        }
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub serial: SerialSettings,
    pub tef: TefSettings,
}

impl BridgeConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: BridgeConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the required keys; link parameter values are validated when the
    /// port is opened
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.port.is_empty() && !self.tef.mock_mode {
            return Err(ConfigError::Invalid {
                key: "serial.port".to_string(),
                message: "a device name is required unless tef.mock_mode is set".to_string(),
            });
        }
        if self.tef.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "tef.timeout_ms".to_string(),
                message: "timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
