//! Thinking-flow state machine
//!
//! Converts one turn's ordered event stream into a [`ThinkingFlow`]. Follows
//! the Elm Architecture: a transition function applies an event and returns
//! effects, and the caller carries the effects out.

mod effect;
mod event;
mod observer;
mod state;
mod transition;
mod turn;

#[cfg(test)]
mod proptests;

pub use effect::{Effect, TextTarget};
pub use event::FlowEvent;
pub use observer::{dispatch_effects, FlowObserver, NullObserver};
pub use state::{
    FlowStatus, Outcome, Phase, ReasoningIteration, Stage, ThinkingFlow, ToolInvocation,
    ToolStatus,
};
pub use transition::{transition, FlowContext, TransitionError, DEFAULT_COLLAPSE_DELAY};
pub use turn::{Conversation, Turn, TurnStatus};
