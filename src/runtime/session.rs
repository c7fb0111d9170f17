//! Live session driver
//!
//! One task owns the conversation. Channel events, user commands and
//! collapse timers are handled one at a time, so flow transitions never race.

use super::{Notice, SessionCommand, SessionObserver};
use crate::channel::{ChannelEvent, ChannelHandle};
use crate::flow::{dispatch_effects, Conversation, FlowEvent};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::store::{PersistedTurnRecord, TurnStore};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const FALLBACK_SESSION_ID: &str = "default";

/// Error recorded on a turn the peer lost with its session
const SESSION_LOST_MESSAGE: &str = "connection lost before the answer completed";

pub struct SessionRuntime<O: SessionObserver> {
    conversation: Conversation,
    channel: ChannelHandle,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    commands: mpsc::Receiver<SessionCommand>,
    observer: O,
    store: Arc<dyn TurnStore>,
    thread_id: Option<i64>,
    recorded: HashSet<u64>,
    collapse_tx: mpsc::UnboundedSender<u64>,
    collapse_rx: mpsc::UnboundedReceiver<u64>,
}

impl<O: SessionObserver> SessionRuntime<O> {
    pub fn new(
        conversation: Conversation,
        channel: ChannelHandle,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
        commands: mpsc::Receiver<SessionCommand>,
        observer: O,
        store: Arc<dyn TurnStore>,
    ) -> Self {
        let (collapse_tx, collapse_rx) = mpsc::unbounded_channel();
        Self {
            conversation,
            channel,
            events,
            commands,
            observer,
            store,
            thread_id: None,
            recorded: HashSet::new(),
            collapse_tx,
            collapse_rx,
        }
    }

    /// Connect, then process events until shutdown. Returns the conversation
    /// as it stood at the end.
    pub async fn run(mut self) -> Conversation {
        if let Err(e) = self.channel.connect().await {
            tracing::error!(error = %e, "Could not open session");
            self.observer.on_notice(&Notice::Error(e.to_string()));
            return self.conversation;
        }

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.handle_channel_event(event).await,
                    None => break,
                },
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(turn_id) = self.collapse_rx.recv() => self.collapse(turn_id),
            }
        }

        self.channel.close().await;
        tracing::info!(
            session_id = ?self.conversation.session_id(),
            turns = self.conversation.turns().len(),
            "Session runtime stopped"
        );
        self.conversation
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Send(text) => self.send_user_message(text).await,
            SessionCommand::ToggleCollapse(turn_id) => {
                if let Some(turn) = self.conversation.turn_mut(turn_id) {
                    let collapsed = turn.flow().is_collapsed();
                    turn.set_collapsed(!collapsed);
                    self.observer.on_collapse_change(turn);
                }
            }
            SessionCommand::NewChat => self.new_chat().await,
            SessionCommand::Shutdown => {}
        }
    }

    async fn send_user_message(&mut self, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }
        if self.conversation.current_turn().is_some() {
            self.observer.on_notice(&Notice::Error(
                "previous answer is still streaming".to_string(),
            ));
            return;
        }
        if let Err(e) = self.channel.send(ClientEvent::user_msg(text.clone())).await {
            self.observer.on_notice(&Notice::Error(e.to_string()));
            return;
        }
        let turn_id = self.conversation.begin_turn(text);
        if let Some(turn) = self.conversation.turn(turn_id) {
            self.observer.on_stage_change(turn);
        }
    }

    async fn new_chat(&mut self) {
        tracing::info!(session_id = ?self.conversation.session_id(), "Starting new chat");
        self.channel.close().await;
        self.conversation.reset();
        self.thread_id = None;
        self.recorded.clear();
        if let Err(e) = self.channel.connect().await {
            self.observer.on_notice(&Notice::Error(e.to_string()));
        }
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => tracing::debug!("Link open, waiting for session"),
            ChannelEvent::Message(message) => self.handle_message(message).await,
            ChannelEvent::Close { expected, reason } => {
                tracing::debug!(expected, reason = ?reason, "Link closed");
            }
            ChannelEvent::Error(message) => self.observer.on_notice(&Notice::Error(message)),
            ChannelEvent::Reconnecting { attempt, max } => {
                self.observer.on_notice(&Notice::Reconnecting { attempt, max });
            }
            ChannelEvent::Disconnected => self.observer.on_notice(&Notice::Offline),
        }
    }

    async fn handle_message(&mut self, message: ServerEvent) {
        match message {
            ServerEvent::SessionInfo { session_id } => {
                let replaced = self
                    .conversation
                    .session_id()
                    .is_some_and(|current| current != session_id);
                if replaced {
                    self.abandon_open_turn().await;
                    self.thread_id = None;
                }
                self.conversation.set_session_id(session_id.clone());
                if self.thread_id.is_none() {
                    match self.store.start_thread(&session_id).await {
                        Ok(id) => self.thread_id = Some(id),
                        Err(e) => tracing::warn!(error = %e, "Could not allocate thread id"),
                    }
                }
                self.observer.on_notice(&Notice::Connected { session_id });
            }
            ServerEvent::Status { content } => self.observer.on_notice(&Notice::Status(content)),
            ServerEvent::UserMsgReceived { .. } => tracing::debug!("Peer acknowledged message"),
            ServerEvent::Error { content } if self.conversation.current_turn().is_none() => {
                self.observer.on_notice(&Notice::Error(content));
            }
            other => {
                if let Some(event) = FlowEvent::from_server(other) {
                    self.apply(event).await;
                }
            }
        }
    }

    /// A new peer session never finishes the old session's turn; end it
    /// with an error so the next message can go out.
    async fn abandon_open_turn(&mut self) {
        let Some(turn_id) = self.conversation.current_turn().map(|t| t.turn_id) else {
            return;
        };
        tracing::warn!(
            turn_id,
            session_id = ?self.conversation.session_id(),
            "Peer session replaced with a turn still open"
        );
        self.apply(FlowEvent::FatalError {
            message: SESSION_LOST_MESSAGE.to_string(),
        })
        .await;
    }

    async fn apply(&mut self, event: FlowEvent) {
        let (turn_id, effects) = match self.conversation.apply(event) {
            Ok(applied) => applied,
            // Already logged with turn and tool context
            Err(_) => return,
        };
        let Some(turn) = self.conversation.turn(turn_id) else {
            return;
        };

        for delay in dispatch_effects(&mut self.observer, turn, effects) {
            self.schedule_collapse(turn_id, delay);
        }
        if turn.is_terminal() && !self.recorded.contains(&turn_id) {
            self.record(turn_id).await;
        }
    }

    fn schedule_collapse(&self, turn_id: u64, delay: Duration) {
        let tx = self.collapse_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(turn_id);
        });
    }

    fn collapse(&mut self, turn_id: u64) {
        let Some(turn) = self.conversation.turn_mut(turn_id) else {
            return;
        };
        if !turn.flow().is_collapsed() {
            turn.set_collapsed(true);
            self.observer.on_collapse_change(turn);
        }
    }

    async fn record(&mut self, turn_id: u64) {
        let Some(turn) = self.conversation.turn(turn_id) else {
            return;
        };
        let session_id = self
            .conversation
            .session_id()
            .unwrap_or(FALLBACK_SESSION_ID)
            .to_string();
        let thread_id = self.thread_id.unwrap_or(1);
        let record = PersistedTurnRecord::from_turn(&session_id, thread_id, turn);

        match self.store.save_turn(&record).await {
            Ok(id) => {
                tracing::debug!(turn_id, record_id = id, session_id = %session_id, "Turn recorded");
                self.recorded.insert(turn_id);
            }
            Err(e) => tracing::error!(turn_id, error = %e, "Failed to record turn"),
        }
    }
}
