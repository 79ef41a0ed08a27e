//! Configuration for the demo CLI (not used by the library's `Payloader`
//! or `Depayloader` types themselves, which are constructed directly).

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Demo-binary configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, rename = "j2k-rtp")]
    pub j2k_rtp: J2kRtpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct J2kRtpConfig {
    /// Maximum transmission unit (bytes) used when payloading.
    #[serde(default = "default_mtu")]
    pub mtu: usize,
}

impl Default for J2kRtpConfig {
    fn default() -> Self {
        Self { mtu: default_mtu() }
    }
}

fn default_mtu() -> usize {
    1500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            j2k_rtp: J2kRtpConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML string.
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mtu = self.j2k_rtp.mtu;
        if mtu <= crate::rtp::RTP_J2K_HEADER_SIZE || mtu > 9000 {
            return Err(ConfigError::Invalid(format!(
                "mtu must be between {} and 9000, got {}",
                crate::rtp::RTP_J2K_HEADER_SIZE + 1,
                mtu
            )));
        }
        Ok(())
    }
}
