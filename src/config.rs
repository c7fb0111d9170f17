//! Process configuration read from the environment

use crate::channel::{
    ChannelConfig, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_RECONNECTS,
    DEFAULT_RECONNECT_BASE,
};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8000/ws/chat";

/// Everything the binary needs, resolved once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub channel: ChannelConfig,
    /// `None` keeps records in memory only
    pub db_path: Option<PathBuf>,
    pub port: u16,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let channel = ChannelConfig {
            endpoint: Some(
                lookup("THINKFLOW_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            ),
            model: lookup("THINKFLOW_MODEL").filter(|m| !m.is_empty()),
            msid: lookup("THINKFLOW_MSID").filter(|m| !m.is_empty()),
            heartbeat_interval: parsed("THINKFLOW_HEARTBEAT_SECS")
                .filter(|&s| s > 0)
                .map_or(DEFAULT_HEARTBEAT_INTERVAL, Duration::from_secs),
            reconnect_base: parsed("THINKFLOW_RECONNECT_BASE_MS")
                .filter(|&ms| ms > 0)
                .map_or(DEFAULT_RECONNECT_BASE, Duration::from_millis),
            max_reconnects: parsed("THINKFLOW_MAX_RECONNECTS")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(DEFAULT_MAX_RECONNECTS),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        };

        // An empty path disables persistence
        let db_path = match lookup("THINKFLOW_DB_PATH") {
            Some(path) if path.trim().is_empty() => None,
            Some(path) => Some(PathBuf::from(path)),
            None => {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                Some(PathBuf::from(format!("{home}/.thinkflow/thinkflow.db")))
            }
        };

        let port = lookup("THINKFLOW_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Self {
            channel,
            db_path,
            port,
        }
    }
}
