//! Flow transition function
//!
//! Deterministic: given the same flow, context and event it always yields
//! the same flow and effects, with no I/O. Validation happens before any
//! mutation, so a rejected event leaves the flow untouched.

use super::effect::{Effect, TextTarget};
use super::event::FlowEvent;
use super::state::{Outcome, Phase, ReasoningIteration, Stage, ThinkingFlow, ToolInvocation};
use crate::markdown::StreamingText;
use std::time::Duration;
use thiserror::Error;

/// Delay before a flow collapses once all planned tools finished
pub const DEFAULT_COLLAPSE_DELAY: Duration = Duration::from_millis(1500);

/// Per-turn immutable configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowContext {
    pub turn_id: u64,
    pub collapse_delay: Duration,
}

impl FlowContext {
    pub fn new(turn_id: u64) -> Self {
        Self {
            turn_id,
            collapse_delay: DEFAULT_COLLAPSE_DELAY,
        }
    }
}

/// Events the flow refuses
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("flow is completed and can no longer change")]
    FlowFrozen,
    #[error("no tool started with id {tool_id}")]
    DanglingToolReference { tool_id: String },
    #[error("tool {tool_id} already started")]
    DuplicateToolId { tool_id: String },
    #[error("tool {tool_id} already finished")]
    ToolAlreadyFinished { tool_id: String },
    #[error("all {planned} planned tools already started")]
    ToolCountExceeded { planned: usize },
    #[error("reasoning iteration {iteration} is not open")]
    IterationNotOpen { iteration: u32 },
    #[error("response already started")]
    ResponseAlreadyStarted,
    #[error("response not started")]
    ResponseNotStarted,
    #[error("no turn is waiting for events")]
    NoActiveTurn,
    #[error("invalid transition: {event} in {phase}")]
    InvalidTransition {
        phase: &'static str,
        event: &'static str,
    },
}

fn invalid(flow: &ThinkingFlow, event: &FlowEvent) -> TransitionError {
    TransitionError::InvalidTransition {
        phase: flow.phase.name(),
        event: event.name(),
    }
}

/// Apply one event to a flow.
pub fn transition(
    flow: &mut ThinkingFlow,
    context: &FlowContext,
    event: FlowEvent,
) -> Result<Vec<Effect>, TransitionError> {
    if flow.is_frozen() {
        return Err(TransitionError::FlowFrozen);
    }

    match event {
        // ============================================================
        // Reasoning iterations
        // ============================================================
        FlowEvent::IterationStart { iteration } => {
            if !matches!(
                flow.phase,
                Phase::Idle | Phase::Analyzing | Phase::ToolsCompleted
            ) {
                return Err(invalid(flow, &event));
            }
            let mut effects = close_active_iteration(flow);
            flow.iterations.push(ReasoningIteration {
                iteration,
                text: StreamingText::open(),
            });
            flow.phase = Phase::Analyzing;
            flow.stages.push(Stage::Analyzing { iteration });
            effects.push(Effect::StageChanged);
            Ok(effects)
        }

        FlowEvent::IterationChunk { iteration, text } => {
            let active = flow
                .active_iteration_mut()
                .filter(|it| it.iteration == iteration)
                .ok_or(TransitionError::IterationNotOpen { iteration })?;
            active.text.push(&text);
            Ok(vec![Effect::TextUpdated(TextTarget::Iteration(iteration))])
        }

        FlowEvent::IterationEnd { iteration } => {
            let active = flow
                .active_iteration_mut()
                .filter(|it| it.iteration == iteration)
                .ok_or(TransitionError::IterationNotOpen { iteration })?;
            active.text.finish();
            Ok(vec![Effect::TextUpdated(TextTarget::Iteration(iteration))])
        }

        // ============================================================
        // Tools
        // ============================================================
        FlowEvent::ToolPlan { count } => match flow.planned_tools {
            None => {
                // The peer may stream part of the answer before deciding on tools
                if !matches!(
                    flow.phase,
                    Phase::Idle | Phase::Analyzing | Phase::Responding
                ) {
                    return Err(invalid(flow, &event));
                }
                let mut effects = close_active_iteration(flow);
                flow.planned_tools = Some(count);
                flow.tool_rounds = 1;
                flow.phase = Phase::ToolsPlanned;
                flow.stages.push(Stage::ToolsPlanned { count });
                effects.push(Effect::StageChanged);
                effects.extend(check_tools_completed(flow, context));
                Ok(effects)
            }
            Some(_) if count == 0 => Ok(vec![]),
            // A later tool round extends the plan and re-arms the completion check
            Some(planned) => {
                let total = planned + count;
                let mut effects = close_active_iteration(flow);
                flow.planned_tools = Some(total);
                flow.tool_rounds += 1;
                flow.tools_completed = false;
                flow.phase = Phase::ToolsPlanned;
                for stage in &mut flow.stages {
                    if let Stage::ToolsPlanned { count } = stage {
                        *count = total;
                    }
                }
                effects.push(Effect::StageChanged);
                Ok(effects)
            }
        },

        FlowEvent::ToolStart {
            tool_id,
            name,
            arguments,
            progress,
        } => {
            let Some(planned) = flow.planned_tools else {
                return Err(TransitionError::InvalidTransition {
                    phase: flow.phase.name(),
                    event: "tool_start",
                });
            };
            if !matches!(flow.phase, Phase::ToolsPlanned | Phase::ToolsExecuting) {
                return Err(TransitionError::InvalidTransition {
                    phase: flow.phase.name(),
                    event: "tool_start",
                });
            }
            if flow.tools.contains_key(&tool_id) {
                return Err(TransitionError::DuplicateToolId { tool_id });
            }
            if flow.tools.len() >= planned {
                return Err(TransitionError::ToolCountExceeded { planned });
            }

            flow.tools.insert(
                tool_id.clone(),
                ToolInvocation::executing(
                    tool_id.clone(),
                    name,
                    arguments,
                    flow.tool_rounds,
                    progress,
                ),
            );
            flow.phase = Phase::ToolsExecuting;
            flow.stages.push(Stage::Tool {
                tool_id: tool_id.clone(),
            });
            Ok(vec![Effect::StageChanged, Effect::ToolUpdated { tool_id }])
        }

        FlowEvent::ToolEnd { tool_id, result } => {
            finish_tool(flow, context, tool_id, ToolOutcome::Completed(result))
        }

        FlowEvent::ToolError { tool_id, error } => {
            finish_tool(flow, context, tool_id, ToolOutcome::Failed(error))
        }

        // ============================================================
        // Final answer
        // ============================================================
        FlowEvent::ResponseStart => {
            if flow.answer.is_some() {
                return Err(TransitionError::ResponseAlreadyStarted);
            }
            let mut effects = close_active_iteration(flow);
            flow.answer = Some(StreamingText::open());
            flow.phase = Phase::Responding;
            flow.stages.push(Stage::Responding);
            effects.push(Effect::StageChanged);
            Ok(effects)
        }

        FlowEvent::ResponseChunk { text } => {
            let answer = flow
                .answer
                .as_mut()
                .ok_or(TransitionError::ResponseNotStarted)?;
            answer.push(&text);

            let mut effects = vec![Effect::TextUpdated(TextTarget::Answer)];
            // Answer resumes after a finished tool round
            if matches!(
                flow.phase,
                Phase::Idle | Phase::Analyzing | Phase::ToolsCompleted
            ) {
                effects.extend(close_active_iteration(flow));
                flow.phase = Phase::Responding;
                flow.stages.push(Stage::Responding);
                effects.push(Effect::StageChanged);
            }
            Ok(effects)
        }

        FlowEvent::ResponseEnd => {
            let mut effects = close_active_iteration(flow);
            flow.answer
                .get_or_insert_with(StreamingText::open)
                .finish();
            effects.push(Effect::TextUpdated(TextTarget::Answer));
            effects.extend(complete(flow, Outcome::Success));
            Ok(effects)
        }

        FlowEvent::FatalError { message } => {
            let mut effects = close_active_iteration(flow);
            if let Some(answer) = flow.answer.as_mut().filter(|a| a.is_open()) {
                answer.finish();
                effects.push(Effect::TextUpdated(TextTarget::Answer));
            }
            flow.error = Some(message);
            effects.extend(complete(flow, Outcome::Error));
            Ok(effects)
        }
    }
}

enum ToolOutcome {
    Completed(String),
    Failed(String),
}

fn finish_tool(
    flow: &mut ThinkingFlow,
    context: &FlowContext,
    tool_id: String,
    outcome: ToolOutcome,
) -> Result<Vec<Effect>, TransitionError> {
    let Some(tool) = flow.tools.get_mut(&tool_id) else {
        return Err(TransitionError::DanglingToolReference { tool_id });
    };
    if tool.status.is_terminal() {
        return Err(TransitionError::ToolAlreadyFinished { tool_id });
    }

    match outcome {
        ToolOutcome::Completed(result) => tool.complete(result),
        ToolOutcome::Failed(error) => tool.fail(error),
    }

    let mut effects = vec![Effect::ToolUpdated { tool_id }];
    effects.extend(check_tools_completed(flow, context));
    Ok(effects)
}

/// Fire `tools_completed` once every tool planned so far is terminal
fn check_tools_completed(flow: &mut ThinkingFlow, context: &FlowContext) -> Vec<Effect> {
    let Some(planned) = flow.planned_tools else {
        return vec![];
    };
    if flow.tools_completed || flow.finished_tool_count() != planned {
        return vec![];
    }

    flow.tools_completed = true;
    flow.stages.push(Stage::ToolsCompleted);
    if matches!(flow.phase, Phase::ToolsPlanned | Phase::ToolsExecuting) {
        flow.phase = Phase::ToolsCompleted;
    }
    vec![
        Effect::StageChanged,
        Effect::ScheduleCollapse {
            delay: context.collapse_delay,
        },
    ]
}

fn close_active_iteration(flow: &mut ThinkingFlow) -> Vec<Effect> {
    match flow.active_iteration_mut() {
        Some(active) => {
            active.text.finish();
            vec![Effect::TextUpdated(TextTarget::Iteration(active.iteration))]
        }
        None => vec![],
    }
}

fn complete(flow: &mut ThinkingFlow, outcome: Outcome) -> Vec<Effect> {
    flow.phase = Phase::Completed { outcome };
    flow.stages.push(Stage::Completed { outcome });
    vec![Effect::StageChanged]
}
