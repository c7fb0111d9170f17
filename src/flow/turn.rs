//! Turns and the session-level conversation that owns them

use super::effect::Effect;
use super::event::FlowEvent;
use super::state::{FlowStatus, ThinkingFlow};
use super::transition::{transition, FlowContext, TransitionError, DEFAULT_COLLAPSE_DELAY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Terminal status of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Pending,
    Success,
    Error,
}

/// One user input through to its terminal outcome
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub turn_id: u64,
    pub user_input: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    flow: ThinkingFlow,
    #[serde(skip)]
    context: FlowContext,
}

impl Turn {
    /// A live turn whose flow starts expanded
    pub fn new(turn_id: u64, user_input: impl Into<String>, collapse_delay: Duration) -> Self {
        Self {
            turn_id,
            user_input: user_input.into(),
            created_at: Utc::now(),
            completed_at: None,
            flow: ThinkingFlow::new(),
            context: FlowContext {
                turn_id,
                collapse_delay,
            },
        }
    }

    /// A turn rebuilt from storage; its flow starts collapsed
    pub fn replayed(turn_id: u64, user_input: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            turn_id,
            user_input: user_input.into(),
            created_at,
            completed_at: None,
            flow: ThinkingFlow::collapsed(),
            context: FlowContext::new(turn_id),
        }
    }

    pub fn flow(&self) -> &ThinkingFlow {
        &self.flow
    }

    pub fn status(&self) -> TurnStatus {
        match self.flow.status() {
            FlowStatus::Active => TurnStatus::Pending,
            FlowStatus::Success => TurnStatus::Success,
            FlowStatus::Error => TurnStatus::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.flow.is_frozen()
    }

    /// Feed one event through the flow's transition function.
    ///
    /// Rejected events are logged with turn and tool context and leave the
    /// flow unchanged.
    pub fn apply(&mut self, event: FlowEvent) -> Result<Vec<Effect>, TransitionError> {
        let event_name = event.name();
        let tool_id = event.tool_id().map(str::to_string);

        match transition(&mut self.flow, &self.context, event) {
            Ok(effects) => {
                if self.flow.is_frozen() && self.completed_at.is_none() {
                    self.completed_at = Some(Utc::now());
                    tracing::info!(
                        turn_id = self.turn_id,
                        status = ?self.status(),
                        tools = self.flow.finished_tool_count(),
                        "Turn completed"
                    );
                }
                Ok(effects)
            }
            Err(e) => {
                tracing::warn!(
                    turn_id = self.turn_id,
                    tool_id = tool_id.as_deref().unwrap_or(""),
                    event = event_name,
                    phase = self.flow.phase().name(),
                    error = %e,
                    "Dropping flow event"
                );
                Err(e)
            }
        }
    }

    pub fn set_collapsed(&mut self, collapsed: bool) {
        self.flow.set_collapsed(collapsed);
    }
}

/// All turns of one session, in dispatch order
#[derive(Debug, Clone, Default, Serialize)]
pub struct Conversation {
    session_id: Option<String>,
    model_profile: Option<String>,
    turns: Vec<Turn>,
    next_turn_id: u64,
    #[serde(skip)]
    collapse_delay: Option<Duration>,
}

impl Conversation {
    pub fn new(model_profile: Option<String>) -> Self {
        Self {
            session_id: None,
            model_profile,
            turns: Vec::new(),
            next_turn_id: 1,
            collapse_delay: None,
        }
    }

    pub fn with_collapse_delay(mut self, delay: Duration) -> Self {
        self.collapse_delay = Some(delay);
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn set_session_id(&mut self, session_id: impl Into<String>) {
        self.session_id = Some(session_id.into());
    }

    pub fn model_profile(&self) -> Option<&str> {
        self.model_profile.as_deref()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn turn(&self, turn_id: u64) -> Option<&Turn> {
        self.turns.iter().find(|t| t.turn_id == turn_id)
    }

    pub fn turn_mut(&mut self, turn_id: u64) -> Option<&mut Turn> {
        self.turns.iter_mut().find(|t| t.turn_id == turn_id)
    }

    /// Start a turn for a dispatched user input; returns its id
    pub fn begin_turn(&mut self, user_input: impl Into<String>) -> u64 {
        let turn_id = self.next_turn_id.max(1);
        self.next_turn_id = turn_id + 1;
        let delay = self.collapse_delay.unwrap_or(DEFAULT_COLLAPSE_DELAY);
        self.turns.push(Turn::new(turn_id, user_input, delay));
        tracing::debug!(turn_id, session_id = ?self.session_id, "Turn started");
        turn_id
    }

    /// The newest turn, while it still accepts events
    pub fn current_turn(&self) -> Option<&Turn> {
        self.turns.last().filter(|t| !t.is_terminal())
    }

    /// Route a flow event to the newest non-terminal turn
    pub fn apply(&mut self, event: FlowEvent) -> Result<(u64, Vec<Effect>), TransitionError> {
        let Some(turn) = self.turns.last_mut().filter(|t| !t.is_terminal()) else {
            tracing::warn!(event = event.name(), "Flow event with no open turn");
            return Err(TransitionError::NoActiveTurn);
        };
        let effects = turn.apply(event)?;
        Ok((turn.turn_id, effects))
    }

    /// Manual "new chat": forget the session and its turns
    pub fn reset(&mut self) {
        self.session_id = None;
        self.turns.clear();
        self.next_turn_id = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_ids_are_monotonic() {
        let mut conv = Conversation::new(None);
        let first = conv.begin_turn("one");
        conv.apply(FlowEvent::ResponseEnd).unwrap();
        let second = conv.begin_turn("two");
        assert_eq!((first, second), (1, 2));
    }

    #[test]
    fn test_events_route_to_open_turn() {
        let mut conv = Conversation::new(Some("fast".to_string()));
        let turn_id = conv.begin_turn("AAPL price?");
        let (routed, _) = conv.apply(FlowEvent::ResponseStart).unwrap();
        assert_eq!(routed, turn_id);
        assert_eq!(conv.current_turn().map(|t| t.turn_id), Some(turn_id));
    }

    #[test]
    fn test_event_after_terminal_turn_has_no_target() {
        let mut conv = Conversation::new(None);
        conv.begin_turn("hi");
        conv.apply(FlowEvent::FatalError {
            message: "down".to_string(),
        })
        .unwrap();

        assert_eq!(conv.turns()[0].status(), TurnStatus::Error);
        assert!(conv.turns()[0].completed_at.is_some());
        assert_eq!(
            conv.apply(FlowEvent::ResponseStart).unwrap_err(),
            TransitionError::NoActiveTurn
        );
    }

    #[test]
    fn test_reset_forgets_session() {
        let mut conv = Conversation::new(None);
        conv.set_session_id("abc");
        conv.begin_turn("hi");
        conv.reset();
        assert_eq!(conv.session_id(), None);
        assert!(conv.turns().is_empty());
        assert_eq!(conv.begin_turn("again"), 1);
    }

    #[test]
    fn test_replayed_turn_is_collapsed() {
        let turn = Turn::replayed(1, "hi", Utc::now());
        assert!(turn.flow().is_collapsed());
        assert_eq!(turn.status(), TurnStatus::Pending);
    }
}
