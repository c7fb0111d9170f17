//! Presentation port for thinking flows
//!
//! The state machine never renders anything itself. Whoever drives it hands
//! each effect to a [`FlowObserver`] together with the turn it belongs to.

use super::effect::{Effect, TextTarget};
use super::turn::Turn;
use std::time::Duration;

/// Receives flow snapshots after each transition
pub trait FlowObserver: Send {
    /// Stage list or phase changed
    fn on_stage_change(&mut self, turn: &Turn);

    /// A streaming field got text or was closed
    fn on_text_update(&mut self, turn: &Turn, target: TextTarget) {
        let _ = (turn, target);
    }

    /// A tool invocation was created or finished
    fn on_tool_update(&mut self, turn: &Turn, tool_id: &str) {
        let _ = (turn, tool_id);
    }

    /// Expanded/collapsed toggle changed
    fn on_collapse_change(&mut self, turn: &Turn) {
        let _ = turn;
    }
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl FlowObserver for NullObserver {
    fn on_stage_change(&mut self, _turn: &Turn) {}
}

/// Hand presentation effects to `observer`; returns the collapse delays the
/// caller has to schedule.
pub fn dispatch_effects(
    observer: &mut dyn FlowObserver,
    turn: &Turn,
    effects: Vec<Effect>,
) -> Vec<Duration> {
    let mut collapses = Vec::new();
    for effect in effects {
        match effect {
            Effect::StageChanged => observer.on_stage_change(turn),
            Effect::TextUpdated(target) => observer.on_text_update(turn, target),
            Effect::ToolUpdated { tool_id } => observer.on_tool_update(turn, &tool_id),
            Effect::ScheduleCollapse { delay } => collapses.push(delay),
        }
    }
    collapses
}
