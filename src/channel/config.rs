//! Connection settings for one protocol channel

use std::fmt::Write;
use std::time::Duration;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_RECONNECTS: u32 = 5;
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Explicit channel configuration, passed in at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Base WebSocket URL of the peer, e.g. `ws://127.0.0.1:8000/ws/chat`
    pub endpoint: Option<String>,
    /// Model profile requested for this session
    pub model: Option<String>,
    /// Thread owner id
    pub msid: Option<String>,
    pub heartbeat_interval: Duration,
    pub reconnect_base: Duration,
    pub max_reconnects: u32,
    /// How long `connect` waits for the peer's `session_info`
    pub handshake_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: None,
            msid: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_base: DEFAULT_RECONNECT_BASE,
            max_reconnects: DEFAULT_MAX_RECONNECTS,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl ChannelConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..Self::default()
        }
    }

    /// Full connect URL with `model` and `msid` query parameters.
    /// `None` when no usable endpoint is configured.
    pub fn resolve_url(&self) -> Option<String> {
        let endpoint = self.endpoint.as_deref().map(str::trim)?;
        if endpoint.is_empty() {
            return None;
        }

        let params: Vec<(&str, &str)> = [("model", &self.model), ("msid", &self.msid)]
            .into_iter()
            .filter_map(|(key, value)| {
                value
                    .as_deref()
                    .filter(|v| !v.is_empty())
                    .map(|v| (key, v))
            })
            .collect();

        let mut url = endpoint.to_string();
        for (i, (key, value)) in params.iter().enumerate() {
            let sep = if i == 0 && !endpoint.contains('?') { '?' } else { '&' };
            let _ = write!(url, "{sep}{key}={}", encode_query_value(value));
        }
        Some(url)
    }
}

fn encode_query_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(char::from(byte));
            }
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url_with_query() {
        let mut config = ChannelConfig::new("ws://localhost:8000/ws/chat");
        config.model = Some("deep think".to_string());
        config.msid = Some("u-1".to_string());
        assert_eq!(
            config.resolve_url().as_deref(),
            Some("ws://localhost:8000/ws/chat?model=deep%20think&msid=u-1")
        );
    }

    #[test]
    fn test_resolve_url_appends_to_existing_query() {
        let mut config = ChannelConfig::new("ws://h/ws?x=1");
        config.model = Some("fast".to_string());
        assert_eq!(config.resolve_url().as_deref(), Some("ws://h/ws?x=1&model=fast"));
    }

    #[test]
    fn test_missing_endpoint_is_unresolved() {
        assert_eq!(ChannelConfig::default().resolve_url(), None);
        assert_eq!(ChannelConfig::new("  ").resolve_url(), None);
    }
}
