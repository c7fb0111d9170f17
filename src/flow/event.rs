//! Events that drive a thinking flow

use crate::protocol::ServerEvent;
use serde_json::Value;

/// Flow-level events, one per turn-relevant protocol frame
#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    // Reasoning
    IterationStart {
        iteration: u32,
    },
    IterationChunk {
        iteration: u32,
        text: String,
    },
    IterationEnd {
        iteration: u32,
    },

    // Tools
    ToolPlan {
        count: usize,
    },
    ToolStart {
        tool_id: String,
        name: String,
        arguments: Value,
        progress: Option<String>,
    },
    ToolEnd {
        tool_id: String,
        result: String,
    },
    ToolError {
        tool_id: String,
        error: String,
    },

    // Final answer
    ResponseStart,
    ResponseChunk {
        text: String,
    },
    ResponseEnd,

    /// Peer gave up on the turn
    FatalError {
        message: String,
    },
}

impl FlowEvent {
    /// Map a protocol frame to a flow event.
    ///
    /// Channel-level frames (session info, heartbeats, status text, echoes,
    /// unknown tags) return `None`.
    pub fn from_server(event: ServerEvent) -> Option<Self> {
        let flow_event = match event {
            ServerEvent::AiThinkingStart { iteration } => FlowEvent::IterationStart { iteration },
            ServerEvent::AiThinkingChunk { iteration, content } => FlowEvent::IterationChunk {
                iteration,
                text: content,
            },
            ServerEvent::AiThinkingEnd { iteration } => FlowEvent::IterationEnd { iteration },
            ServerEvent::ToolPlan { tool_count, .. } => FlowEvent::ToolPlan { count: tool_count },
            ServerEvent::ToolStart {
                tool_id,
                tool_name,
                tool_args,
                progress,
            } => FlowEvent::ToolStart {
                tool_id,
                name: tool_name,
                arguments: tool_args,
                progress,
            },
            ServerEvent::ToolEnd {
                tool_id, result, ..
            } => FlowEvent::ToolEnd {
                tool_id,
                result: result_text(result),
            },
            ServerEvent::ToolError { tool_id, error } => FlowEvent::ToolError { tool_id, error },
            ServerEvent::AiResponseStart { .. } => FlowEvent::ResponseStart,
            ServerEvent::AiResponseChunk { content } => FlowEvent::ResponseChunk { text: content },
            ServerEvent::AiResponseEnd { .. } => FlowEvent::ResponseEnd,
            ServerEvent::Error { content } => FlowEvent::FatalError { message: content },
            ServerEvent::SessionInfo { .. }
            | ServerEvent::UserMsgReceived { .. }
            | ServerEvent::Status { .. }
            | ServerEvent::Ping { .. }
            | ServerEvent::Pong { .. }
            | ServerEvent::Unknown => return None,
        };
        Some(flow_event)
    }

    pub fn name(&self) -> &'static str {
        match self {
            FlowEvent::IterationStart { .. } => "iteration_start",
            FlowEvent::IterationChunk { .. } => "iteration_chunk",
            FlowEvent::IterationEnd { .. } => "iteration_end",
            FlowEvent::ToolPlan { .. } => "tool_plan",
            FlowEvent::ToolStart { .. } => "tool_start",
            FlowEvent::ToolEnd { .. } => "tool_end",
            FlowEvent::ToolError { .. } => "tool_error",
            FlowEvent::ResponseStart => "response_start",
            FlowEvent::ResponseChunk { .. } => "response_chunk",
            FlowEvent::ResponseEnd => "response_end",
            FlowEvent::FatalError { .. } => "fatal_error",
        }
    }

    /// Tool id named by this event, for log context
    pub fn tool_id(&self) -> Option<&str> {
        match self {
            FlowEvent::ToolStart { tool_id, .. }
            | FlowEvent::ToolEnd { tool_id, .. }
            | FlowEvent::ToolError { tool_id, .. } => Some(tool_id),
            _ => None,
        }
    }
}

/// Tool results arrive as arbitrary JSON; the flow keeps them as text
fn result_text(result: Value) -> String {
    match result {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
