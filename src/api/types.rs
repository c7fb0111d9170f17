//! API response types

use crate::flow::{Stage, ToolInvocation, ToolStatus, Turn, TurnStatus};
use crate::markdown::MarkdownRenderer;
use crate::store::ThreadSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Query for the share endpoint
#[derive(Debug, Default, Deserialize)]
pub struct ShareQuery {
    pub limit: Option<usize>,
    pub conversation_id: Option<i64>,
}

/// A replayed thread, read-only
#[derive(Debug, Serialize)]
pub struct ShareResponse {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<i64>,
    pub readonly: bool,
    pub shared_at: DateTime<Utc>,
    pub turns: Vec<SharedTurn>,
}

#[derive(Debug, Serialize)]
pub struct SharedTurn {
    pub turn_id: u64,
    pub user_input: String,
    pub status: TurnStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub collapsed: bool,
    pub stages: Vec<Stage>,
    pub reasoning: Vec<SharedIteration>,
    pub tools: Vec<SharedTool>,
    pub answer_html: String,
}

#[derive(Debug, Serialize)]
pub struct SharedIteration {
    pub iteration: u32,
    pub html: String,
}

#[derive(Debug, Serialize)]
pub struct SharedTool {
    pub tool_id: String,
    pub name: String,
    pub arguments: Value,
    pub status: ToolStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ToolInvocation> for SharedTool {
    fn from(tool: &ToolInvocation) -> Self {
        Self {
            tool_id: tool.tool_id.clone(),
            name: tool.name.clone(),
            arguments: tool.arguments.clone(),
            status: tool.status,
            result: tool.result.clone(),
            error: tool.error.clone(),
        }
    }
}

impl SharedTurn {
    pub fn from_turn(turn: &Turn, renderer: &dyn MarkdownRenderer) -> Self {
        let flow = turn.flow();
        Self {
            turn_id: turn.turn_id,
            user_input: turn.user_input.clone(),
            status: turn.status(),
            created_at: turn.created_at,
            completed_at: turn.completed_at,
            collapsed: flow.is_collapsed(),
            stages: flow.stages().to_vec(),
            reasoning: flow
                .iterations()
                .iter()
                .map(|it| SharedIteration {
                    iteration: it.iteration,
                    html: it.text.render(renderer).to_string(),
                })
                .collect(),
            tools: flow.tools().map(SharedTool::from).collect(),
            answer_html: flow
                .answer()
                .map(|answer| answer.render(renderer).to_string())
                .unwrap_or_default(),
        }
    }
}

/// Threads stored for a session
#[derive(Debug, Serialize)]
pub struct ThreadListResponse {
    pub session_id: String,
    pub threads: Vec<ThreadSummary>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
