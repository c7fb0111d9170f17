//! Durable form of a completed turn

use crate::flow::{ToolStatus, Turn, TurnStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool call as it was dispatched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedToolCall {
    pub tool_id: String,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub tool_args: Value,
    /// Tool round within the turn; 0 for records written without rounds
    #[serde(default)]
    pub round: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
}

/// Terminal outcome of a recorded tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedToolResult {
    pub tool_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default = "default_success")]
    pub success: bool,
}

fn default_success() -> bool {
    true
}

impl RecordedToolResult {
    pub fn is_error(&self) -> bool {
        !self.success || (self.error.is_some() && self.result.is_none())
    }
}

/// One stored user-input-to-answer cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedTurnRecord {
    /// Row id, 0 until stored
    #[serde(default)]
    pub id: i64,
    pub session_id: String,
    pub conversation_id: i64,
    pub user_input: String,
    #[serde(default)]
    pub tools_called: Vec<RecordedToolCall>,
    #[serde(default)]
    pub tool_results: Vec<RecordedToolResult>,
    /// Text of each reasoning iteration, in order
    #[serde(default)]
    pub reasoning: Vec<String>,
    #[serde(default)]
    pub ai_response: String,
    pub user_timestamp: DateTime<Utc>,
    pub ai_timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PersistedTurnRecord {
    /// Capture a live turn for storage.
    ///
    /// When the answer is empty, the stored answer explains what went wrong:
    /// the tool errors if there were any, otherwise the fatal error.
    pub fn from_turn(session_id: &str, conversation_id: i64, turn: &Turn) -> Self {
        let flow = turn.flow();

        let tools_called = flow
            .tools()
            .map(|tool| RecordedToolCall {
                tool_id: tool.tool_id.clone(),
                tool_name: tool.name.clone(),
                tool_args: tool.arguments.clone(),
                round: tool.round,
                progress: tool.progress.clone(),
            })
            .collect();

        let tool_results: Vec<RecordedToolResult> = flow
            .tools()
            .filter(|tool| tool.status.is_terminal())
            .map(|tool| RecordedToolResult {
                tool_id: tool.tool_id.clone(),
                tool_name: Some(tool.name.clone()),
                result: tool.result.clone(),
                error: tool.error.clone(),
                success: tool.status == ToolStatus::Completed,
            })
            .collect();

        let reasoning = flow
            .iterations()
            .iter()
            .map(|it| it.text.text().to_string())
            .filter(|text| !text.is_empty())
            .collect();

        let mut ai_response = flow.answer_text().to_string();
        if ai_response.is_empty() {
            let errors: Vec<&str> = tool_results
                .iter()
                .filter(|r| r.is_error())
                .filter_map(|r| r.error.as_deref())
                .collect();
            if !errors.is_empty() {
                ai_response = format!("Errors while processing:\n{}", errors.join("\n"));
            } else if turn.status() == TurnStatus::Error {
                ai_response = format!(
                    "Error while processing request: {}",
                    flow.error().unwrap_or("unknown error")
                );
            }
        }

        Self {
            id: 0,
            session_id: session_id.to_string(),
            conversation_id,
            user_input: turn.user_input.clone(),
            tools_called,
            tool_results,
            reasoning,
            ai_response,
            user_timestamp: turn.created_at,
            ai_timestamp: turn.completed_at,
            created_at: turn.completed_at.unwrap_or(turn.created_at),
        }
    }

    /// Stored result for `tool_id`, if any
    pub fn result_for(&self, tool_id: &str) -> Option<&RecordedToolResult> {
        self.tool_results.iter().find(|r| r.tool_id == tool_id)
    }
}
