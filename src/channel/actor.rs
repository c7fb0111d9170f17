//! Channel actor: owns the link, heartbeat and reconnect schedule

use super::backoff::reconnect_delay;
use super::config::ChannelConfig;
use super::transport::{Connector, FrameSink, FrameStream, TransportError};
use crate::protocol::{parse_frame, ClientEvent, ProtocolError, ServerEvent};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("No endpoint configured")]
    EndpointUnresolved,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Channel is not connected")]
    NotConnected,
    #[error("Channel closed by caller")]
    Closed,
    #[error("Gave up after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },
    #[error("Channel task has stopped")]
    Shutdown,
}

/// Link status as seen by callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Never connected, or reconnects exhausted
    Disconnected,
    /// Transport opening or waiting for `session_info`
    Connecting,
    Open { session_id: String },
    Reconnecting { attempt: u32 },
    /// Closed by the caller
    Closed,
}

/// Notifications delivered to the channel's consumer, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Transport link established
    Open,
    Message(ServerEvent),
    /// Link went away; `expected` is true for caller-initiated closes
    Close { expected: bool, reason: Option<String> },
    Error(String),
    Reconnecting { attempt: u32, max: u32 },
    /// Reconnect attempts exhausted; only an explicit `connect` revives the channel
    Disconnected,
}

enum Command {
    Connect {
        reply: oneshot::Sender<Result<String, ChannelError>>,
    },
    Send {
        event: ClientEvent,
        reply: oneshot::Sender<Result<(), ChannelError>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Work scheduled by the actor for itself. Each carries the generation it
/// was started under and is ignored once that generation is stale.
enum Internal {
    Inbound {
        generation: u64,
        frame: Option<Result<String, TransportError>>,
    },
    RetryDue {
        generation: u64,
    },
    HandshakeExpired {
        generation: u64,
    },
}

/// Cloneable handle to a running channel
#[derive(Clone)]
pub struct ChannelHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ChannelStatus>,
}

impl ChannelHandle {
    /// Establish the link and wait for the peer-assigned session id
    pub async fn connect(&self) -> Result<String, ChannelError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect { reply })
            .map_err(|_| ChannelError::Shutdown)?;
        rx.await.map_err(|_| ChannelError::Shutdown)?
    }

    /// Transmit one client event. Failures are logged and returned.
    pub async fn send(&self, event: ClientEvent) -> Result<(), ChannelError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Send { event, reply })
            .map_err(|_| ChannelError::Shutdown)?;
        rx.await.map_err(|_| ChannelError::Shutdown)?
    }

    /// Close the link and suppress any further reconnects or heartbeats
    pub async fn close(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Close { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn status(&self) -> ChannelStatus {
        self.status.borrow().clone()
    }
}

/// Spawn a channel actor. The actor stops when every handle is dropped.
pub fn spawn_channel<C: Connector>(
    config: ChannelConfig,
    connector: C,
) -> (ChannelHandle, mpsc::UnboundedReceiver<ChannelEvent>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(ChannelStatus::Disconnected);

    let actor = ChannelActor {
        config,
        connector: Arc::new(connector),
        events: event_tx,
        internal_tx,
        status: status_tx,
        link: None,
        generation: 0,
        attempt: 0,
        manual_close: false,
        pending_connect: None,
        retry_cancel: CancellationToken::new(),
        last_pong: Instant::now(),
        pong_warned: false,
        heartbeat_reset: false,
    };
    tokio::spawn(actor.run(command_rx, internal_rx));

    (
        ChannelHandle {
            commands: command_tx,
            status: status_rx,
        },
        event_rx,
    )
}

struct Link {
    sink: Box<dyn FrameSink>,
    reader: JoinHandle<()>,
    session_id: Option<String>,
}

struct ChannelActor<C: Connector> {
    config: ChannelConfig,
    connector: Arc<C>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    status: watch::Sender<ChannelStatus>,
    link: Option<Link>,
    generation: u64,
    attempt: u32,
    manual_close: bool,
    pending_connect: Option<oneshot::Sender<Result<String, ChannelError>>>,
    retry_cancel: CancellationToken,
    last_pong: Instant,
    pong_warned: bool,
    /// Restart the heartbeat period at the next loop turn
    heartbeat_reset: bool,
}

impl<C: Connector> ChannelActor<C> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        let period = self.config.heartbeat_interval.max(Duration::from_millis(1));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(message) = internal.recv() => self.handle_internal(message).await,
                _ = heartbeat.tick(), if self.is_open() => self.send_heartbeat().await,
            }
            if std::mem::take(&mut self.heartbeat_reset) {
                heartbeat.reset();
            }
        }

        self.retry_cancel.cancel();
        self.drop_link().await;
        tracing::debug!("Channel task stopped");
    }

    fn is_open(&self) -> bool {
        matches!(*self.status.borrow(), ChannelStatus::Open { .. })
    }

    fn set_status(&self, status: ChannelStatus) {
        self.status.send_replace(status);
    }

    fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    /// Invalidate every retry, reader and handshake timer started so far
    fn bump_generation(&mut self) {
        self.generation += 1;
        self.retry_cancel.cancel();
        self.retry_cancel = CancellationToken::new();
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => self.connect(reply).await,
            Command::Send { event, reply } => {
                let _ = reply.send(self.send(&event).await);
            }
            Command::Close { reply } => {
                self.close().await;
                let _ = reply.send(());
            }
        }
    }

    async fn connect(&mut self, reply: oneshot::Sender<Result<String, ChannelError>>) {
        let Some(url) = self.config.resolve_url() else {
            tracing::error!("Cannot connect: no endpoint configured");
            let _ = reply.send(Err(ChannelError::EndpointUnresolved));
            return;
        };

        if let Some(previous) = self.pending_connect.take() {
            let _ = previous.send(Err(ChannelError::Closed));
        }
        self.manual_close = false;
        self.attempt = 0;
        self.drop_link().await;
        self.bump_generation();
        self.set_status(ChannelStatus::Connecting);

        match self.open_link(&url).await {
            Ok(()) => self.pending_connect = Some(reply),
            Err(e) => {
                tracing::error!(url = %url, error = %e, "Connect failed");
                self.emit(ChannelEvent::Error(e.to_string()));
                self.set_status(ChannelStatus::Disconnected);
                let _ = reply.send(Err(e.into()));
            }
        }
    }

    /// Open a transport link under a fresh generation and start its reader
    /// and handshake timer
    async fn open_link(&mut self, url: &str) -> Result<(), TransportError> {
        let timeout = self.config.handshake_timeout;
        let (sink, stream) =
            match tokio::time::timeout(timeout, self.connector.connect(url)).await {
                Ok(result) => result?,
                Err(_) => return Err(TransportError::HandshakeTimeout(timeout)),
            };

        self.bump_generation();
        let generation = self.generation;
        let reader = spawn_reader(generation, stream, self.internal_tx.clone());

        let internal_tx = self.internal_tx.clone();
        let cancel = self.retry_cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    let _ = internal_tx.send(Internal::HandshakeExpired { generation });
                }
            }
        });

        self.link = Some(Link {
            sink,
            reader,
            session_id: None,
        });
        self.last_pong = Instant::now();
        self.pong_warned = false;
        tracing::info!(url, generation, "Channel link opened");
        self.emit(ChannelEvent::Open);
        Ok(())
    }

    async fn send(&mut self, event: &ClientEvent) -> Result<(), ChannelError> {
        let Some(link) = self.link.as_mut() else {
            tracing::warn!(event = event.tag(), "Send on a disconnected channel");
            return Err(ChannelError::NotConnected);
        };
        let frame = event.to_frame()?;
        if let Err(e) = link.sink.send(frame).await {
            tracing::warn!(event = event.tag(), error = %e, "Send failed");
            self.emit(ChannelEvent::Error(e.to_string()));
            return Err(e.into());
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.manual_close = true;
        self.bump_generation();
        if let Some(pending) = self.pending_connect.take() {
            let _ = pending.send(Err(ChannelError::Closed));
        }
        let had_link = self.link.is_some();
        self.drop_link().await;
        self.set_status(ChannelStatus::Closed);
        if had_link {
            self.emit(ChannelEvent::Close {
                expected: true,
                reason: None,
            });
        }
        tracing::info!("Channel closed by caller");
    }

    async fn drop_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.reader.abort();
            if let Err(e) = link.sink.close().await {
                tracing::debug!(error = %e, "Error closing link");
            }
        }
    }

    async fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Inbound { generation, frame } if generation == self.generation => {
                match frame {
                    Some(Ok(text)) => self.handle_frame(&text).await,
                    Some(Err(e)) => self.link_lost(Some(e.to_string())).await,
                    None => self.link_lost(None).await,
                }
            }
            Internal::RetryDue { generation } if generation == self.generation => {
                self.retry().await;
            }
            Internal::HandshakeExpired { generation } if generation == self.generation => {
                let waiting = self.link.as_ref().is_some_and(|l| l.session_id.is_none());
                if waiting {
                    let timeout = self.config.handshake_timeout;
                    tracing::warn!(?timeout, "No session_info from peer");
                    if let Some(pending) = self.pending_connect.take() {
                        self.bump_generation();
                        self.drop_link().await;
                        self.set_status(ChannelStatus::Disconnected);
                        let _ = pending.send(Err(TransportError::HandshakeTimeout(timeout).into()));
                    } else {
                        self.link_lost(Some("handshake timed out".to_string())).await;
                    }
                }
            }
            Internal::Inbound { .. } | Internal::RetryDue { .. } | Internal::HandshakeExpired { .. } => {
                tracing::trace!("Ignoring stale channel work");
            }
        }
    }

    async fn handle_frame(&mut self, text: &str) {
        let event = match parse_frame(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed frame");
                return;
            }
        };

        match &event {
            ServerEvent::Unknown => return,
            ServerEvent::SessionInfo { session_id } => self.session_established(session_id),
            ServerEvent::Ping { .. } => {
                if let Err(e) = self.send(&ClientEvent::pong_now()).await {
                    tracing::debug!(error = %e, "Failed to answer ping");
                }
            }
            ServerEvent::Pong { .. } => {
                self.last_pong = Instant::now();
                self.pong_warned = false;
            }
            _ => {}
        }
        self.emit(ChannelEvent::Message(event));
    }

    fn session_established(&mut self, session_id: &str) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        link.session_id = Some(session_id.to_string());
        if self.attempt > 0 {
            tracing::info!(session_id, attempt = self.attempt, "Reconnected");
        } else {
            tracing::info!(session_id, "Session established");
        }
        self.attempt = 0;
        // First ping one full interval after the session opens
        self.heartbeat_reset = true;
        self.set_status(ChannelStatus::Open {
            session_id: session_id.to_string(),
        });
        if let Some(pending) = self.pending_connect.take() {
            let _ = pending.send(Ok(session_id.to_string()));
        }
    }

    async fn link_lost(&mut self, reason: Option<String>) {
        self.bump_generation();
        self.drop_link().await;
        tracing::warn!(reason = reason.as_deref().unwrap_or("closed by peer"), "Channel link lost");
        if let Some(reason) = &reason {
            self.emit(ChannelEvent::Error(reason.clone()));
        }
        self.emit(ChannelEvent::Close {
            expected: false,
            reason: reason.clone(),
        });

        if self.manual_close {
            self.set_status(ChannelStatus::Closed);
            return;
        }
        if let Some(pending) = self.pending_connect.take() {
            // The first link never became usable: report, do not retry
            self.set_status(ChannelStatus::Disconnected);
            let _ = pending.send(Err(TransportError::Closed.into()));
            return;
        }
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        self.attempt += 1;
        let max = self.config.max_reconnects;
        let Some(delay) = reconnect_delay(self.config.reconnect_base, self.attempt, max) else {
            let error = ChannelError::ReconnectExhausted { attempts: max };
            tracing::error!(error = %error, "Channel offline");
            self.set_status(ChannelStatus::Disconnected);
            self.emit(ChannelEvent::Disconnected);
            return;
        };

        tracing::info!(attempt = self.attempt, max, ?delay, "Scheduling reconnect");
        self.set_status(ChannelStatus::Reconnecting {
            attempt: self.attempt,
        });
        self.emit(ChannelEvent::Reconnecting {
            attempt: self.attempt,
            max,
        });

        let generation = self.generation;
        let internal_tx = self.internal_tx.clone();
        let cancel = self.retry_cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = internal_tx.send(Internal::RetryDue { generation });
                }
            }
        });
    }

    async fn retry(&mut self) {
        if self.manual_close {
            return;
        }
        let Some(url) = self.config.resolve_url() else {
            self.set_status(ChannelStatus::Disconnected);
            self.emit(ChannelEvent::Disconnected);
            return;
        };
        self.set_status(ChannelStatus::Connecting);
        if let Err(e) = self.open_link(&url).await {
            tracing::warn!(attempt = self.attempt, error = %e, "Reconnect attempt failed");
            self.emit(ChannelEvent::Error(e.to_string()));
            self.schedule_retry();
        }
    }

    async fn send_heartbeat(&mut self) {
        let period = self.config.heartbeat_interval;
        if !self.pong_warned && self.last_pong.elapsed() > period * 2 {
            tracing::warn!(
                since_last_pong = ?self.last_pong.elapsed(),
                "No pong from peer for two heartbeat intervals"
            );
            self.pong_warned = true;
        }
        if let Err(e) = self.send(&ClientEvent::ping_now()).await {
            tracing::debug!(error = %e, "Heartbeat ping failed");
        }
    }
}

fn spawn_reader(
    generation: u64,
    mut stream: Box<dyn FrameStream>,
    internal_tx: mpsc::UnboundedSender<Internal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let frame = stream.next_frame().await;
            let finished = !matches!(frame, Some(Ok(_)));
            if internal_tx
                .send(Internal::Inbound { generation, frame })
                .is_err()
                || finished
            {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::{MockConnector, MockPeer};
    use crate::channel::{DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL};

    fn config() -> ChannelConfig {
        let mut config = ChannelConfig::new("ws://peer/ws/chat");
        config.model = Some("fast".to_string());
        config
    }

    async fn connected(
        connector: &MockConnector,
    ) -> (ChannelHandle, mpsc::UnboundedReceiver<ChannelEvent>, MockPeer) {
        let peer = connector.push_link();
        let (handle, mut events) = spawn_channel(config(), connector.clone());
        let connecting = tokio::spawn({
            let handle = handle.clone();
            async move { handle.connect().await }
        });
        assert_eq!(events.recv().await, Some(ChannelEvent::Open));
        peer.session("s-1");
        assert_eq!(connecting.await.unwrap().unwrap(), "s-1");
        assert!(matches!(
            events.recv().await,
            Some(ChannelEvent::Message(ServerEvent::SessionInfo { .. }))
        ));
        (handle, events, peer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_waits_for_session_info() {
        let connector = MockConnector::new();
        let (handle, _events, _peer) = connected(&connector).await;

        assert_eq!(
            handle.status(),
            ChannelStatus::Open {
                session_id: "s-1".to_string()
            }
        );
        assert_eq!(connector.urls(), vec!["ws://peer/ws/chat?model=fast".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_without_endpoint_fails_before_dialing() {
        let connector = MockConnector::new();
        let (handle, _events) = spawn_channel(ChannelConfig::default(), connector.clone());

        let result = handle.connect().await;
        assert!(matches!(result, Err(ChannelError::EndpointUnresolved)));
        assert!(connector.urls().is_empty());
        assert_eq!(handle.status(), ChannelStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_is_a_transport_error() {
        let connector = MockConnector::new();
        connector.push_failure(TransportError::Connect("refused".to_string()));
        let (handle, mut events) = spawn_channel(config(), connector.clone());

        let result = handle.connect().await;
        assert!(matches!(
            result,
            Err(ChannelError::Transport(TransportError::Connect(_)))
        ));
        assert!(matches!(events.recv().await, Some(ChannelEvent::Error(_))));
        assert_eq!(handle.status(), ChannelStatus::Disconnected);
        // Initial connect failures are not retried
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.urls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_times_out_without_session_info() {
        let connector = MockConnector::new();
        let _peer = connector.push_link();
        let (handle, _events) = spawn_channel(config(), connector.clone());

        let started = Instant::now();
        let result = handle.connect().await;
        assert!(matches!(
            result,
            Err(ChannelError::Transport(TransportError::HandshakeTimeout(_)))
        ));
        assert_eq!(started.elapsed(), DEFAULT_HANDSHAKE_TIMEOUT);
        assert_eq!(handle.status(), ChannelStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_backoff_doubles_and_stops_at_ceiling() {
        let connector = MockConnector::new();
        let (handle, mut events, mut peer) = connected(&connector).await;

        peer.hang_up();
        let mut scheduled = Vec::new();
        loop {
            match events.recv().await {
                Some(ChannelEvent::Reconnecting { attempt, max }) => {
                    assert_eq!(max, 5);
                    scheduled.push((attempt, Instant::now()));
                }
                Some(ChannelEvent::Disconnected) => break,
                Some(_) => {}
                None => panic!("channel stopped"),
            }
        }

        let attempts: Vec<u32> = scheduled.iter().map(|(a, _)| *a).collect();
        assert_eq!(attempts, vec![1, 2, 3, 4, 5]);
        for (k, pair) in scheduled.windows(2).enumerate() {
            // Attempt k+1 ran after delay(k+1), then scheduled attempt k+2
            let expected = Duration::from_secs(1 << k);
            assert_eq!(pair[1].1 - pair[0].1, expected);
        }
        assert_eq!(handle.status(), ChannelStatus::Disconnected);

        // Initial link plus five retries, and no sixth
        assert_eq!(connector.urls().len(), 6);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.urls().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_reconnect_resets_attempts() {
        let connector = MockConnector::new();
        let (handle, mut events, mut first) = connected(&connector).await;
        let mut second = connector.push_link();

        first.hang_up();
        assert_eq!(
            events.recv().await,
            Some(ChannelEvent::Close {
                expected: false,
                reason: None
            })
        );
        assert_eq!(
            events.recv().await,
            Some(ChannelEvent::Reconnecting { attempt: 1, max: 5 })
        );
        assert_eq!(events.recv().await, Some(ChannelEvent::Open));
        second.session("s-2");
        assert!(matches!(
            events.recv().await,
            Some(ChannelEvent::Message(ServerEvent::SessionInfo { .. }))
        ));
        assert_eq!(
            handle.status(),
            ChannelStatus::Open {
                session_id: "s-2".to_string()
            }
        );

        let _third = connector.push_link();
        second.hang_up();
        assert!(matches!(events.recv().await, Some(ChannelEvent::Close { .. })));
        assert_eq!(
            events.recv().await,
            Some(ChannelEvent::Reconnecting { attempt: 1, max: 5 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_close_suppresses_reconnect() {
        let connector = MockConnector::new();
        let (handle, mut events, _peer) = connected(&connector).await;

        handle.close().await;
        assert_eq!(handle.status(), ChannelStatus::Closed);
        assert_eq!(
            events.recv().await,
            Some(ChannelEvent::Close {
                expected: true,
                reason: None
            })
        );

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.urls().len(), 1);
        assert!(events.try_recv().is_err());
        assert!(matches!(
            handle.send(ClientEvent::user_msg("late")).await,
            Err(ChannelError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_retry() {
        let connector = MockConnector::new();
        let (handle, mut events, mut peer) = connected(&connector).await;
        let _spare = connector.push_link();

        peer.hang_up();
        assert!(matches!(events.recv().await, Some(ChannelEvent::Close { .. })));
        assert!(matches!(
            events.recv().await,
            Some(ChannelEvent::Reconnecting { attempt: 1, .. })
        ));
        handle.close().await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.urls().len(), 1);
        assert_eq!(handle.status(), ChannelStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_writes_frame() {
        let connector = MockConnector::new();
        let (handle, _events, mut peer) = connected(&connector).await;

        handle.send(ClientEvent::user_msg("AAPL price?")).await.unwrap();
        let frame = peer.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "user_msg");
        assert_eq!(value["content"], "AAPL price?");
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_and_ping_reply() {
        let connector = MockConnector::new();
        let (_handle, _events, mut peer) = connected(&connector).await;

        peer.send(&ServerEvent::Ping { timestamp: None });
        let reply = peer.recv().await.unwrap();
        assert!(reply.contains(r#""type":"pong""#));

        let started = Instant::now();
        let ping = peer.recv().await.unwrap();
        assert!(ping.contains(r#""type":"ping""#));
        assert!(started.elapsed() <= DEFAULT_HEARTBEAT_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_ping_comes_one_interval_after_session() {
        let connector = MockConnector::new();
        let mut peer = connector.push_link();
        let (handle, _events) = spawn_channel(config(), connector.clone());

        // Idle well into the first heartbeat period before dialing
        tokio::time::sleep(DEFAULT_HEARTBEAT_INTERVAL - Duration::from_secs(5)).await;
        let connecting = tokio::spawn({
            let handle = handle.clone();
            async move { handle.connect().await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        peer.session("s-1");
        connecting.await.unwrap().unwrap();

        let opened = Instant::now();
        let ping = peer.recv().await.unwrap();
        assert!(ping.contains(r#""type":"ping""#));
        assert!(opened.elapsed() >= DEFAULT_HEARTBEAT_INTERVAL - Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_pongs_keep_link_open() {
        let connector = MockConnector::new();
        let (handle, _events, mut peer) = connected(&connector).await;

        tokio::time::sleep(DEFAULT_HEARTBEAT_INTERVAL * 5).await;
        assert!(peer.drain().len() >= 4);
        assert!(matches!(handle.status(), ChannelStatus::Open { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_frames_do_not_tear_down() {
        let connector = MockConnector::new();
        let (handle, mut events, peer) = connected(&connector).await;

        peer.send_raw("not json");
        peer.send_raw(r#"{"type":"brand_new_tag","x":1}"#);
        peer.send_raw(r#"{"type":"tool_plan","tool_count":"two"}"#);
        peer.send(&ServerEvent::Status {
            content: "working".to_string(),
        });

        assert_eq!(
            events.recv().await,
            Some(ChannelEvent::Message(ServerEvent::Status {
                content: "working".to_string()
            }))
        );
        assert!(matches!(handle.status(), ChannelStatus::Open { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_triggers_reconnect() {
        let connector = MockConnector::new();
        let (_handle, mut events, peer) = connected(&connector).await;

        peer.fail(TransportError::Receive("reset".to_string()));
        assert!(matches!(events.recv().await, Some(ChannelEvent::Error(_))));
        assert!(matches!(
            events.recv().await,
            Some(ChannelEvent::Close { expected: false, reason: Some(_) })
        ));
        assert_eq!(
            events.recv().await,
            Some(ChannelEvent::Reconnecting { attempt: 1, max: 5 })
        );
    }
}
