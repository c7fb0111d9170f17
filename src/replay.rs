//! Rebuild thinking flows from stored turn records
//!
//! Replay drives the same transition function as a live session, with all
//! timing collapsed: each text field arrives as one chunk and every tool's
//! outcome directly follows its start.

use crate::flow::{FlowEvent, TransitionError, Turn};
use crate::store::{PersistedTurnRecord, RecordedToolCall};
use std::collections::HashSet;
use thiserror::Error;

/// Result text for a tool whose outcome was never stored
pub const NO_RECORDED_RESULT: &str = "no recorded result";

#[derive(Debug, Error)]
#[error("Failed to replay record {record_id} (turn {turn_id}): {source}")]
pub struct ReplayError {
    pub record_id: i64,
    pub turn_id: u64,
    #[source]
    pub source: TransitionError,
}

/// Event sequence that reproduces `record`
pub fn replay_events(record: &PersistedTurnRecord) -> Vec<FlowEvent> {
    let mut events = Vec::new();

    for (index, text) in record.reasoning.iter().enumerate() {
        let iteration = u32::try_from(index + 1).unwrap_or(u32::MAX);
        events.push(FlowEvent::IterationStart { iteration });
        events.push(FlowEvent::IterationChunk {
            iteration,
            text: text.clone(),
        });
        events.push(FlowEvent::IterationEnd { iteration });
    }

    let mut seen = HashSet::new();
    let tools: Vec<&RecordedToolCall> = record
        .tools_called
        .iter()
        .filter(|call| {
            let fresh = seen.insert(call.tool_id.as_str());
            if !fresh {
                tracing::warn!(
                    record_id = record.id,
                    tool_id = %call.tool_id,
                    "Skipping duplicate tool call in stored record"
                );
            }
            fresh
        })
        .collect();

    // One plan per recorded tool round; a turn without tools never plans
    for round in tools.chunk_by(|a, b| a.round == b.round) {
        events.push(FlowEvent::ToolPlan { count: round.len() });
        for call in round {
            events.push(FlowEvent::ToolStart {
                tool_id: call.tool_id.clone(),
                name: call.tool_name.clone(),
                arguments: call.tool_args.clone(),
                progress: call.progress.clone(),
            });
            events.push(tool_outcome(record, &call.tool_id));
        }
    }

    events.push(FlowEvent::ResponseStart);
    events.push(FlowEvent::ResponseChunk {
        text: record.ai_response.clone(),
    });
    events.push(FlowEvent::ResponseEnd);
    events
}

fn tool_outcome(record: &PersistedTurnRecord, tool_id: &str) -> FlowEvent {
    match record.result_for(tool_id) {
        Some(result) if result.is_error() => FlowEvent::ToolError {
            tool_id: tool_id.to_string(),
            error: result
                .error
                .clone()
                .unwrap_or_else(|| "tool failed".to_string()),
        },
        Some(result) => FlowEvent::ToolEnd {
            tool_id: tool_id.to_string(),
            result: result.result.clone().unwrap_or_default(),
        },
        None => FlowEvent::ToolEnd {
            tool_id: tool_id.to_string(),
            result: NO_RECORDED_RESULT.to_string(),
        },
    }
}

/// Rebuild one turn. The resulting flow is collapsed and terminal.
pub fn replay_turn(turn_id: u64, record: &PersistedTurnRecord) -> Result<Turn, ReplayError> {
    let mut turn = Turn::replayed(turn_id, record.user_input.clone(), record.user_timestamp);
    for event in replay_events(record) {
        turn.apply(event).map_err(|source| ReplayError {
            record_id: record.id,
            turn_id,
            source,
        })?;
    }
    turn.completed_at = Some(record.ai_timestamp.unwrap_or(record.created_at));
    Ok(turn)
}

/// Rebuild a thread in record order, numbering turns from 1
pub fn replay_thread(records: &[PersistedTurnRecord]) -> Result<Vec<Turn>, ReplayError> {
    let turns = records
        .iter()
        .zip(1u64..)
        .map(|(record, turn_id)| replay_turn(turn_id, record))
        .collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(turns = turns.len(), "Replayed thread");
    Ok(turns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{Conversation, Outcome, Phase, Stage, ToolStatus, TurnStatus};
    use crate::store::RecordedToolResult;
    use chrono::Utc;
    use serde_json::json;

    fn call(id: &str) -> RecordedToolCall {
        RecordedToolCall {
            tool_id: id.to_string(),
            tool_name: "quote".to_string(),
            tool_args: json!({"symbol": id}),
            round: 1,
            progress: None,
        }
    }

    fn ok(id: &str, result: &str) -> RecordedToolResult {
        RecordedToolResult {
            tool_id: id.to_string(),
            tool_name: Some("quote".to_string()),
            result: Some(result.to_string()),
            error: None,
            success: true,
        }
    }

    fn failed(id: &str, error: &str) -> RecordedToolResult {
        RecordedToolResult {
            tool_id: id.to_string(),
            tool_name: None,
            result: None,
            error: Some(error.to_string()),
            success: false,
        }
    }

    fn record(calls: Vec<RecordedToolCall>, results: Vec<RecordedToolResult>) -> PersistedTurnRecord {
        let now = Utc::now();
        PersistedTurnRecord {
            id: 7,
            session_id: "s1".to_string(),
            conversation_id: 1,
            user_input: "compare".to_string(),
            tools_called: calls,
            tool_results: results,
            reasoning: Vec::new(),
            ai_response: "**done**".to_string(),
            user_timestamp: now,
            ai_timestamp: Some(now),
            created_at: now,
        }
    }

    #[test]
    fn test_replay_builds_collapsed_terminal_flow() {
        let rec = record(
            vec![call("c1"), call("c2")],
            vec![ok("c1", "150"), failed("c2", "timeout")],
        );
        let turn = replay_turn(1, &rec).unwrap();
        let flow = turn.flow();

        assert!(flow.is_collapsed());
        assert_eq!(turn.status(), TurnStatus::Success);
        assert_eq!(
            flow.phase(),
            Phase::Completed {
                outcome: Outcome::Success
            }
        );
        assert_eq!(flow.tool("c1").unwrap().status, ToolStatus::Completed);
        assert_eq!(flow.tool("c2").unwrap().status, ToolStatus::Error);
        assert_eq!(flow.tool("c2").unwrap().error.as_deref(), Some("timeout"));
        assert_eq!(flow.answer_text(), "**done**");
        assert!(!flow.answer().unwrap().is_open());
        assert_eq!(turn.completed_at, rec.ai_timestamp);
    }

    #[test]
    fn test_missing_result_gets_placeholder() {
        let rec = record(vec![call("c1")], Vec::new());
        let turn = replay_turn(1, &rec).unwrap();
        let tool = turn.flow().tool("c1").unwrap();
        assert_eq!(tool.status, ToolStatus::Completed);
        assert_eq!(tool.result.as_deref(), Some(NO_RECORDED_RESULT));
    }

    #[test]
    fn test_duplicate_tool_ids_are_skipped() {
        let rec = record(vec![call("c1"), call("c1")], vec![ok("c1", "x")]);
        let turn = replay_turn(1, &rec).unwrap();
        assert_eq!(turn.flow().tools().count(), 1);
        assert_eq!(turn.flow().planned_tool_count(), Some(1));
    }

    #[test]
    fn test_reasoning_replays_as_closed_iterations() {
        let mut rec = record(vec![call("c1")], vec![ok("c1", "1")]);
        rec.reasoning = vec!["first look".to_string(), "second look".to_string()];
        let turn = replay_turn(1, &rec).unwrap();
        let iterations = turn.flow().iterations();
        assert_eq!(iterations.len(), 2);
        assert_eq!(iterations[1].text.text(), "second look");
        assert!(iterations.iter().all(|it| !it.is_open()));
        assert_eq!(
            turn.flow().stages()[..2],
            [
                Stage::Analyzing { iteration: 1 },
                Stage::Analyzing { iteration: 2 }
            ]
        );
    }

    fn start(id: &str, symbol: &str) -> FlowEvent {
        FlowEvent::ToolStart {
            tool_id: id.to_string(),
            name: "quote".to_string(),
            arguments: json!({"symbol": symbol}),
            progress: None,
        }
    }

    fn chunk(text: &str) -> FlowEvent {
        FlowEvent::ResponseChunk {
            text: text.to_string(),
        }
    }

    /// Drive `live_events` through a live turn, store it, replay it, and
    /// compare the two flows.
    fn assert_replay_matches(live_events: Vec<FlowEvent>) {
        let mut conv = Conversation::new(None);
        conv.begin_turn("compare");
        for event in live_events {
            conv.apply(event).unwrap();
        }
        let live = &conv.turns()[0];

        let rec = PersistedTurnRecord::from_turn("s1", 1, live);
        let replayed = replay_thread(&[rec]).unwrap();
        let replayed = &replayed[0];

        assert_eq!(replayed.flow().stages(), live.flow().stages());
        let statuses = |turn: &Turn| {
            turn.flow()
                .tools()
                .map(|t| (t.tool_id.clone(), t.status, t.round))
                .collect::<Vec<_>>()
        };
        assert_eq!(statuses(replayed), statuses(live));
        assert_eq!(replayed.flow().answer_text(), live.flow().answer_text());
        assert_eq!(replayed.status(), live.status());
        assert!(!live.flow().is_collapsed());
        assert!(replayed.flow().is_collapsed());
    }

    #[test]
    fn test_replay_matches_live_flow() {
        assert_replay_matches(vec![
            FlowEvent::IterationStart { iteration: 1 },
            FlowEvent::IterationChunk {
                iteration: 1,
                text: "Need two ".to_string(),
            },
            FlowEvent::IterationChunk {
                iteration: 1,
                text: "quotes".to_string(),
            },
            FlowEvent::IterationEnd { iteration: 1 },
            FlowEvent::ToolPlan { count: 2 },
            start("c1", "A"),
            start("c2", "B"),
            FlowEvent::ToolError {
                tool_id: "c2".to_string(),
                error: "timeout".to_string(),
            },
            FlowEvent::ToolEnd {
                tool_id: "c1".to_string(),
                result: "150".to_string(),
            },
            FlowEvent::ResponseStart,
            chunk("A is "),
            chunk("150"),
            FlowEvent::ResponseEnd,
        ]);
    }

    #[test]
    fn test_replay_of_turn_without_tools_skips_plan() {
        assert_replay_matches(vec![
            FlowEvent::ResponseStart,
            chunk("Hello"),
            chunk(" there"),
            FlowEvent::ResponseEnd,
        ]);

        let rec = record(Vec::new(), Vec::new());
        let turn = replay_turn(1, &rec).unwrap();
        assert_eq!(turn.flow().planned_tool_count(), None);
        assert_eq!(
            turn.flow().stages(),
            &[
                Stage::Responding,
                Stage::Completed {
                    outcome: Outcome::Success
                }
            ]
        );
    }

    #[test]
    fn test_replay_rebuilds_tool_rounds() {
        assert_replay_matches(vec![
            FlowEvent::ToolPlan { count: 1 },
            start("r1", "A"),
            FlowEvent::ToolEnd {
                tool_id: "r1".to_string(),
                result: "150".to_string(),
            },
            FlowEvent::ToolPlan { count: 2 },
            start("r2a", "B"),
            start("r2b", "C"),
            FlowEvent::ToolEnd {
                tool_id: "r2b".to_string(),
                result: "90".to_string(),
            },
            FlowEvent::ToolError {
                tool_id: "r2a".to_string(),
                error: "timeout".to_string(),
            },
            FlowEvent::ResponseStart,
            chunk("done"),
            FlowEvent::ResponseEnd,
        ]);
    }

    #[test]
    fn test_records_without_rounds_replay_as_one_round() {
        let mut calls = vec![call("c1"), call("c2")];
        for c in &mut calls {
            c.round = 0;
        }
        let turn = replay_turn(1, &record(calls, Vec::new())).unwrap();
        assert_eq!(turn.flow().tool_rounds(), 1);
        assert_eq!(turn.flow().planned_tool_count(), Some(2));
    }
}
