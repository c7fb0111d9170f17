//! Effects produced by flow transitions

use std::time::Duration;

/// Which streaming field changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextTarget {
    Iteration(u32),
    Answer,
}

/// Effects for the presentation side to carry out after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// The stage list or phase changed; re-render the flow
    StageChanged,

    /// A streaming field received text or was closed
    TextUpdated(TextTarget),

    /// A tool invocation was created or reached a terminal status
    ToolUpdated { tool_id: String },

    /// Collapse the flow after a delay (cosmetic)
    ScheduleCollapse { delay: Duration },
}
