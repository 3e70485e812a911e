//! TOML configuration for the control server and the robot

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{EngineError, Result};

/// Control-plane listen address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen host
    #[serde(rename = "HOST")]
    pub host: String,
    /// Listen port
    #[serde(rename = "PORT")]
    pub port: u16,
}

impl ServerConfig {
    /// Load the server configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| EngineError::Config(format!("read server config: {e}")))?;
        toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("parse server config: {e}")).into())
    }

    /// `host:port` form used for binding and for the companion commands
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Robot startup parameters shipped to the control plane by the `start`
/// companion command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotConfig {
    /// Venue name (`BINANCE` or `BYBIT`)
    #[serde(rename = "MARKET")]
    pub market: String,
    /// Venue API key
    #[serde(rename = "API_KEY")]
    pub api_key: String,
    /// Venue API secret
    #[serde(rename = "SECRET")]
    pub secret: String,
    /// Profitability threshold in percent
    #[serde(rename = "DELTA")]
    pub delta: f64,
    /// Quote size of the first triangle leg
    #[serde(rename = "LOT")]
    pub lot: f64,
    /// Per-leg fee in percent
    #[serde(rename = "FEE")]
    pub fee: f64,
}

impl RobotConfig {
    /// Load the robot configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| EngineError::Config(format!("read robot config: {e}")))?;
        toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("parse robot config: {e}")).into())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.market.is_empty() {
            return Err(EngineError::Config("market cannot be empty".to_string()).into());
        }
        if self.lot <= 0.0 {
            return Err(EngineError::Config("lot must be positive".to_string()).into());
        }
        if self.delta <= 0.0 {
            return Err(EngineError::Config("delta must be positive".to_string()).into());
        }
        if self.fee < 0.0 {
            return Err(EngineError::Config("fee cannot be negative".to_string()).into());
        }
        Ok(())
    }
}
