//! Property-based tests for the flow state machine

use super::*;
use proptest::prelude::*;
use serde_json::json;

fn ctx() -> FlowContext {
    FlowContext::new(7)
}

fn tool_start(id: &str) -> FlowEvent {
    FlowEvent::ToolStart {
        tool_id: id.to_string(),
        name: "lookup".to_string(),
        arguments: json!({}),
        progress: None,
    }
}

fn tool_finish(id: &str, ok: bool) -> FlowEvent {
    if ok {
        FlowEvent::ToolEnd {
            tool_id: id.to_string(),
            result: format!("result of {id}"),
        }
    } else {
        FlowEvent::ToolError {
            tool_id: id.to_string(),
            error: format!("{id} failed"),
        }
    }
}

/// Plan of `n` tools plus a shuffled order of their completions
fn arb_completion_order() -> impl Strategy<Value = Vec<(String, bool)>> {
    proptest::collection::vec(any::<bool>(), 1..8).prop_flat_map(|outcomes| {
        let tools: Vec<(String, bool)> = outcomes
            .into_iter()
            .enumerate()
            .map(|(i, ok)| (format!("call_{i}"), ok))
            .collect();
        Just(tools).prop_shuffle()
    })
}

fn arb_event() -> impl Strategy<Value = FlowEvent> {
    let id = "call_[0-2]";
    prop_oneof![
        (1u32..4).prop_map(|iteration| FlowEvent::IterationStart { iteration }),
        (1u32..4, "[a-z ]{0,8}")
            .prop_map(|(iteration, text)| FlowEvent::IterationChunk { iteration, text }),
        (1u32..4).prop_map(|iteration| FlowEvent::IterationEnd { iteration }),
        (0usize..4).prop_map(|count| FlowEvent::ToolPlan { count }),
        id.prop_map(|tool_id| tool_start(&tool_id)),
        (id, any::<bool>()).prop_map(|(tool_id, ok)| tool_finish(&tool_id, ok)),
        Just(FlowEvent::ResponseStart),
        "[a-z*` ]{0,8}".prop_map(|text| FlowEvent::ResponseChunk { text }),
        Just(FlowEvent::ResponseEnd),
        "[a-z ]{1,8}".prop_map(|message| FlowEvent::FatalError { message }),
    ]
}

fn count_tools_completed(flow: &ThinkingFlow) -> usize {
    flow.stages()
        .iter()
        .filter(|s| **s == Stage::ToolsCompleted)
        .count()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // tools_completed fires exactly once, whatever order tools finish in
    #[test]
    fn prop_tool_count_closure(order in arb_completion_order()) {
        let mut flow = ThinkingFlow::new();
        transition(&mut flow, &ctx(), FlowEvent::ToolPlan { count: order.len() }).unwrap();

        let mut started: Vec<&(String, bool)> = order.iter().collect();
        started.sort_by(|a, b| a.0.cmp(&b.0));
        for (id, _) in started {
            transition(&mut flow, &ctx(), tool_start(id)).unwrap();
        }

        for (idx, (id, ok)) in order.iter().enumerate() {
            prop_assert_eq!(count_tools_completed(&flow), 0);
            let effects = transition(&mut flow, &ctx(), tool_finish(id, *ok)).unwrap();
            let is_last = idx + 1 == order.len();
            let scheduled = effects.iter().any(|e| matches!(e, Effect::ScheduleCollapse { .. }));
            prop_assert_eq!(scheduled, is_last);
        }

        prop_assert_eq!(count_tools_completed(&flow), 1);
        prop_assert_eq!(flow.phase(), Phase::ToolsCompleted);
        for (id, ok) in &order {
            let expected = if *ok { ToolStatus::Completed } else { ToolStatus::Error };
            prop_assert_eq!(flow.tool(id).unwrap().status, expected);
        }
    }

    // Random event soup never breaks the structural invariants
    #[test]
    fn prop_invariants_hold(events in proptest::collection::vec(arb_event(), 0..40)) {
        let mut flow = ThinkingFlow::new();
        let mut statuses: std::collections::HashMap<String, ToolStatus> = Default::default();

        for event in events {
            let before = flow.clone();
            match transition(&mut flow, &ctx(), event) {
                Ok(_) => {}
                Err(_) => prop_assert_eq!(&flow, &before, "rejected event mutated the flow"),
            }

            if before.is_frozen() {
                prop_assert_eq!(&flow, &before, "frozen flow changed");
            }

            // at most one open iteration
            prop_assert!(flow.iterations().iter().filter(|it| it.is_open()).count() <= 1);

            // tools_completed fires at most once per tool round
            prop_assert!(count_tools_completed(&flow) <= usize::try_from(flow.tool_rounds()).unwrap());

            // one tools_planned entry, however many rounds
            let tools_planned = flow.stages()
                .iter()
                .filter(|s| matches!(s, Stage::ToolsPlanned { .. }))
                .count();
            prop_assert!(tools_planned <= 1);

            // statuses only move forward
            for tool in flow.tools() {
                if let Some(previous) = statuses.get(&tool.tool_id) {
                    if previous.is_terminal() {
                        prop_assert_eq!(*previous, tool.status);
                    }
                }
                statuses.insert(tool.tool_id.clone(), tool.status);
            }

            // never more tools than planned
            if let Some(planned) = flow.planned_tool_count() {
                prop_assert!(flow.tools().count() <= planned);
            } else {
                prop_assert_eq!(flow.tools().count(), 0);
            }
        }
    }
}

// ============================================================================
// Observer dispatch
// ============================================================================

#[derive(Default)]
struct RecordingObserver {
    phases: Vec<Phase>,
    tool_updates: Vec<String>,
}

impl FlowObserver for RecordingObserver {
    fn on_stage_change(&mut self, turn: &Turn) {
        self.phases.push(turn.flow().phase());
    }

    fn on_tool_update(&mut self, _turn: &Turn, tool_id: &str) {
        self.tool_updates.push(tool_id.to_string());
    }
}

#[test]
fn test_observer_sees_each_stage_change() {
    let mut conv = Conversation::new(None);
    conv.begin_turn("AAPL price?");
    let mut observer = RecordingObserver::default();
    let mut collapses = Vec::new();

    let events = vec![
        FlowEvent::ToolPlan { count: 1 },
        tool_start("c1"),
        tool_finish("c1", true),
        FlowEvent::ResponseStart,
        FlowEvent::ResponseChunk {
            text: "Price is 150.00".to_string(),
        },
        FlowEvent::ResponseEnd,
    ];
    for event in events {
        let (turn_id, effects) = conv.apply(event).unwrap();
        let turn = conv.turn(turn_id).unwrap();
        collapses.extend(dispatch_effects(&mut observer, turn, effects));
    }

    assert_eq!(
        observer.phases,
        vec![
            Phase::ToolsPlanned,
            Phase::ToolsExecuting,
            Phase::ToolsCompleted,
            Phase::Responding,
            Phase::Completed {
                outcome: Outcome::Success
            },
        ]
    );
    assert_eq!(observer.tool_updates, vec!["c1", "c1"]);
    assert_eq!(collapses, vec![DEFAULT_COLLAPSE_DELAY]);
}
