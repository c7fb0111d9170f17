//! Thinking-flow state types

use crate::markdown::StreamingText;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// Tool Invocations
// ============================================================================

/// Lifecycle of one tool call. Transitions only move forward:
/// planned -> executing -> {completed, error}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Planned,
    Executing,
    Completed,
    Error,
}

impl ToolStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ToolStatus::Completed | ToolStatus::Error)
    }
}

/// One planned or executed tool call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub tool_id: String,
    pub name: String,
    pub arguments: Value,
    pub status: ToolStatus,
    /// Tool round this call was planned in, counted from 1
    pub round: u32,
    /// "i/n" position within its round, as reported by the peer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Size of `result` in bytes
    pub result_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolInvocation {
    pub(super) fn executing(
        tool_id: String,
        name: String,
        arguments: Value,
        round: u32,
        progress: Option<String>,
    ) -> Self {
        Self {
            tool_id,
            name,
            arguments,
            status: ToolStatus::Executing,
            round,
            progress,
            result: None,
            result_bytes: 0,
            error: None,
        }
    }

    pub(super) fn complete(&mut self, result: String) {
        self.status = ToolStatus::Completed;
        self.result_bytes = result.len();
        self.result = Some(result);
    }

    pub(super) fn fail(&mut self, error: String) {
        self.status = ToolStatus::Error;
        self.error = Some(error);
    }
}

// ============================================================================
// Reasoning Iterations
// ============================================================================

/// One labelled block of intermediate reasoning text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasoningIteration {
    pub iteration: u32,
    pub text: StreamingText,
}

impl ReasoningIteration {
    pub fn is_open(&self) -> bool {
        self.text.is_open()
    }
}

// ============================================================================
// Phases and Stages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Error,
}

/// Where the turn currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Analyzing,
    ToolsPlanned,
    ToolsExecuting,
    ToolsCompleted,
    Responding,
    Completed { outcome: Outcome },
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed { .. })
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Analyzing => "analyzing",
            Phase::ToolsPlanned => "tools_planned",
            Phase::ToolsExecuting => "tools_executing",
            Phase::ToolsCompleted => "tools_completed",
            Phase::Responding => "responding",
            Phase::Completed {
                outcome: Outcome::Success,
            } => "completed_success",
            Phase::Completed {
                outcome: Outcome::Error,
            } => "completed_error",
        }
    }
}

/// One entry of the ordered stage list, in arrival order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    Analyzing { iteration: u32 },
    ToolsPlanned { count: usize },
    /// Status lives in the tool map, keyed by `tool_id`
    Tool { tool_id: String },
    ToolsCompleted,
    Responding,
    Completed { outcome: Outcome },
}

/// Overall status of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Active,
    Success,
    Error,
}

// ============================================================================
// Thinking Flow
// ============================================================================

/// Structured view of one turn's reasoning, tool and response stages.
///
/// Only [`super::transition`] mutates the stage data. Once the phase is
/// terminal the flow is frozen; the `collapsed` flag is a view toggle and
/// stays writable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThinkingFlow {
    pub(super) phase: Phase,
    pub(super) stages: Vec<Stage>,
    pub(super) iterations: Vec<ReasoningIteration>,
    pub(super) tools: HashMap<String, ToolInvocation>,
    /// Running total over all tool rounds
    pub(super) planned_tools: Option<usize>,
    pub(super) tool_rounds: u32,
    pub(super) tools_completed: bool,
    pub(super) answer: Option<StreamingText>,
    pub(super) error: Option<String>,
    pub(super) collapsed: bool,
}

impl Default for ThinkingFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl ThinkingFlow {
    /// A live flow, expanded while active
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            stages: Vec::new(),
            iterations: Vec::new(),
            tools: HashMap::new(),
            planned_tools: None,
            tool_rounds: 0,
            tools_completed: false,
            answer: None,
            error: None,
            collapsed: false,
        }
    }

    /// A flow rebuilt from storage, collapsed by default
    pub fn collapsed() -> Self {
        Self {
            collapsed: true,
            ..Self::new()
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn status(&self) -> FlowStatus {
        match self.phase {
            Phase::Completed {
                outcome: Outcome::Success,
            } => FlowStatus::Success,
            Phase::Completed {
                outcome: Outcome::Error,
            } => FlowStatus::Error,
            _ => FlowStatus::Active,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn iterations(&self) -> &[ReasoningIteration] {
        &self.iterations
    }

    /// The iteration currently receiving chunks, if any
    pub fn active_iteration(&self) -> Option<&ReasoningIteration> {
        self.iterations.last().filter(|it| it.is_open())
    }

    pub(super) fn active_iteration_mut(&mut self) -> Option<&mut ReasoningIteration> {
        self.iterations.last_mut().filter(|it| it.is_open())
    }

    pub fn tool(&self, tool_id: &str) -> Option<&ToolInvocation> {
        self.tools.get(tool_id)
    }

    /// Tool invocations in the order they started
    pub fn tools(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.stages.iter().filter_map(|stage| match stage {
            Stage::Tool { tool_id } => self.tools.get(tool_id),
            _ => None,
        })
    }

    pub fn planned_tool_count(&self) -> Option<usize> {
        self.planned_tools
    }

    /// Number of `tool_plan` rounds declared so far
    pub fn tool_rounds(&self) -> u32 {
        self.tool_rounds
    }

    pub fn finished_tool_count(&self) -> usize {
        self.tools
            .values()
            .filter(|tool| tool.status.is_terminal())
            .count()
    }

    pub fn answer(&self) -> Option<&StreamingText> {
        self.answer.as_ref()
    }

    pub fn answer_text(&self) -> &str {
        self.answer.as_ref().map_or("", StreamingText::text)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_collapsed(&self) -> bool {
        self.collapsed
    }

    pub fn set_collapsed(&mut self, collapsed: bool) {
        self.collapsed = collapsed;
    }
}
