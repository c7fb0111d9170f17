//! Live session runtime
//!
//! Wires a protocol channel to the thinking-flow state machine, hands every
//! effect to a presentation observer and records finished turns.

mod session;
mod terminal;

pub use session::SessionRuntime;
pub use terminal::TerminalPresenter;

use crate::channel::{spawn_channel, ChannelConfig, Connector};
use crate::flow::{Conversation, FlowObserver};
use crate::store::TurnStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const COMMAND_BUFFER: usize = 32;

/// Session-level notices that are not part of any turn's flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Connected { session_id: String },
    Status(String),
    Reconnecting { attempt: u32, max: u32 },
    /// Reconnects exhausted
    Offline,
    Error(String),
}

/// Presentation port for a live session
pub trait SessionObserver: FlowObserver {
    fn on_notice(&mut self, notice: &Notice) {
        let _ = notice;
    }
}

/// User-side commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Send(String),
    ToggleCollapse(u64),
    /// Drop the conversation and open a fresh session
    NewChat,
    Shutdown,
}

/// Handle for feeding a running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub async fn send_message(&self, text: impl Into<String>) -> bool {
        self.command(SessionCommand::Send(text.into())).await
    }

    pub async fn toggle_collapse(&self, turn_id: u64) -> bool {
        self.command(SessionCommand::ToggleCollapse(turn_id)).await
    }

    pub async fn new_chat(&self) -> bool {
        self.command(SessionCommand::NewChat).await
    }

    pub async fn shutdown(&self) -> bool {
        self.command(SessionCommand::Shutdown).await
    }

    async fn command(&self, command: SessionCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }
}

/// Start a channel and a session runtime on top of it
pub fn start_session<C, O>(
    config: ChannelConfig,
    connector: C,
    observer: O,
    store: Arc<dyn TurnStore>,
) -> (SessionHandle, JoinHandle<Conversation>)
where
    C: Connector,
    O: SessionObserver + 'static,
{
    let conversation = Conversation::new(config.model.clone());
    let (channel, events) = spawn_channel(config, connector);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let runtime = SessionRuntime::new(conversation, channel, events, command_rx, observer, store);
    let task = tokio::spawn(runtime.run());
    (
        SessionHandle {
            commands: command_tx,
        },
        task,
    )
}
