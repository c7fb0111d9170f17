//! Tagged frames exchanged with the peer

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Frames sent by the peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Peer-assigned identifier, first frame after connect
    SessionInfo { session_id: String },

    /// Echo of an accepted `user_msg`
    UserMsgReceived {
        #[serde(default)]
        content: String,
    },

    /// Free-form progress text
    Status {
        #[serde(default)]
        content: String,
    },

    AiThinkingStart { iteration: u32 },
    AiThinkingChunk {
        iteration: u32,
        #[serde(default)]
        content: String,
    },
    AiThinkingEnd { iteration: u32 },

    ToolPlan {
        tool_count: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    ToolStart {
        tool_id: String,
        tool_name: String,
        #[serde(default)]
        tool_args: Value,
        /// "i/n" position within the plan
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<String>,
    },
    ToolEnd {
        tool_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(default)]
        result: Value,
    },
    ToolError {
        tool_id: String,
        #[serde(default)]
        error: String,
    },

    AiResponseStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    AiResponseChunk {
        #[serde(default)]
        content: String,
    },
    AiResponseEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },

    /// Unrecoverable failure of the current turn
    Error {
        #[serde(default)]
        content: String,
    },

    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },

    /// Any tag this client does not know yet
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Wire tag, for logging
    pub fn tag(&self) -> &'static str {
        match self {
            ServerEvent::SessionInfo { .. } => "session_info",
            ServerEvent::UserMsgReceived { .. } => "user_msg_received",
            ServerEvent::Status { .. } => "status",
            ServerEvent::AiThinkingStart { .. } => "ai_thinking_start",
            ServerEvent::AiThinkingChunk { .. } => "ai_thinking_chunk",
            ServerEvent::AiThinkingEnd { .. } => "ai_thinking_end",
            ServerEvent::ToolPlan { .. } => "tool_plan",
            ServerEvent::ToolStart { .. } => "tool_start",
            ServerEvent::ToolEnd { .. } => "tool_end",
            ServerEvent::ToolError { .. } => "tool_error",
            ServerEvent::AiResponseStart { .. } => "ai_response_start",
            ServerEvent::AiResponseChunk { .. } => "ai_response_chunk",
            ServerEvent::AiResponseEnd { .. } => "ai_response_end",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Ping { .. } => "ping",
            ServerEvent::Pong { .. } => "pong",
            ServerEvent::Unknown => "unknown",
        }
    }

    /// Encode as a text frame
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Frames sent by this client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    UserMsg { content: String },
    Ping { timestamp: String },
    Pong { timestamp: String },
}

impl ClientEvent {
    pub fn user_msg(content: impl Into<String>) -> Self {
        ClientEvent::UserMsg {
            content: content.into(),
        }
    }

    pub fn ping_now() -> Self {
        ClientEvent::Ping {
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn pong_now() -> Self {
        ClientEvent::Pong {
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            ClientEvent::UserMsg { .. } => "user_msg",
            ClientEvent::Ping { .. } => "ping",
            ClientEvent::Pong { .. } => "pong",
        }
    }

    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::InvalidJson)
    }
}

/// A frame that could not be turned into an event
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("frame has no string `type` tag")]
    MissingTag,
    #[error("invalid `{tag}` payload: {source}")]
    InvalidPayload {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Parse one inbound text frame.
///
/// Unknown tags parse to [`ServerEvent::Unknown`]; the caller decides whether
/// to log them. Anything else that does not fit the taxonomy is an error.
pub fn parse_frame(frame: &str) -> Result<ServerEvent, ProtocolError> {
    let value: Value = serde_json::from_str(frame).map_err(ProtocolError::InvalidJson)?;
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingTag)?
        .to_string();

    let event: ServerEvent =
        serde_json::from_value(value).map_err(|source| ProtocolError::InvalidPayload {
            tag: tag.clone(),
            source,
        })?;

    if event == ServerEvent::Unknown {
        tracing::debug!(tag = %tag, "Ignoring frame with unknown tag");
    }
    Ok(event)
}
