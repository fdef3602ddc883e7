//! Flow-control and harness configuration

use crate::constants::{MAX_IN_FLIGHT, MAX_INV_SIZE};
use crate::error::{RelayError, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How the driver waits for the node to react to announcements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettleMode {
    /// Sleep for `settle_delay_ms`
    Delay,
    /// Round-trip a ping; the pong arrives after every earlier response
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowControlConfig {
    pub max_in_flight: usize,
    pub max_inv_size: usize,
    pub rounds: Vec<usize>,
    pub settle: SettleMode,
    pub settle_delay_ms: u64,
    pub ping_timeout_ms: u64,
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            max_in_flight: MAX_IN_FLIGHT,
            max_inv_size: MAX_INV_SIZE,
            rounds: vec![8, 16, 128, 1024],
            settle: SettleMode::Delay,
            settle_delay_ms: 2000,
            ping_timeout_ms: 60_000,
        }
    }
}

impl FlowControlConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RelayError::Config(format!("failed to parse configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = Self::from_json(&json)
            .with_context(|| format!("loading config file {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 {
            return Err(RelayError::Config("max_in_flight must be positive".to_string()));
        }
        if self.max_inv_size == 0 {
            return Err(RelayError::Config("max_inv_size must be positive".to_string()));
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}
