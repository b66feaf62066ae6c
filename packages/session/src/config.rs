//! Client configuration
//!
//! One mutable [`ClientOptions`] value holds everything the builder needs.
//! It deserializes from JSON with camelCase keys and durations in
//! milliseconds; absent keys keep their defaults.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ualink_trust::ApplicationOptions;
use ualink_trust::options::duration_ms;

use crate::error::{Result, SessionError};
use crate::pool::PoolConfig;
use crate::reverse_connect::ReverseConnectConfig;

/// Everything configurable about a client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientOptions {
    /// Application identity and certificate settings
    pub application: ApplicationOptions,
    /// Session pool settings
    pub pool: PoolConfig,
    /// Reverse connect listener, disabled when `None`
    pub reverse_connect: Option<ReverseConnectConfig>,
    /// Interval between reconnects of a broken session
    #[serde(with = "duration_ms")]
    pub reconnect_period: Duration,
    /// Verbosity passed to the stack: trace, debug, info, warn or error
    pub stack_log_level: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            application: ApplicationOptions::default(),
            pool: PoolConfig::default(),
            reverse_connect: None,
            reconnect_period: Duration::from_secs(10),
            stack_log_level: "info".to_string(),
        }
    }
}

impl ClientOptions {
    /// Parse options from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| SessionError::Configuration(format!("invalid client options: {e}")))
    }

    /// Read options from a JSON file
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            SessionError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// The stack log level as a tracing level
    pub fn stack_log_level(&self) -> Result<tracing::Level> {
        tracing::Level::from_str(self.stack_log_level.trim()).map_err(|_| {
            SessionError::Configuration(format!(
                "unknown stack log level '{}'",
                self.stack_log_level
            ))
        })
    }
}
