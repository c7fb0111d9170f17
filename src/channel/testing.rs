//! In-memory transport for exercising the channel without a network

use super::transport::{Connector, FrameSink, FrameStream, TransportError};
use crate::protocol::ServerEvent;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

enum Scripted {
    Link(mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<Result<String, TransportError>>),
    Fail(TransportError),
}

/// Connector that hands out pre-scripted links in order.
/// Connect attempts past the script fail.
#[derive(Clone, Default)]
pub struct MockConnector {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    urls: Arc<Mutex<Vec<String>>>,
}

/// Peer side of a scripted link
pub struct MockPeer {
    to_client: Option<mpsc::UnboundedSender<Result<String, TransportError>>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a link that will connect successfully
    pub fn push_link(&self) -> MockPeer {
        let (to_client, client_rx) = mpsc::unbounded_channel();
        let (client_tx, from_client) = mpsc::unbounded_channel();
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Link(client_tx, client_rx));
        MockPeer {
            to_client: Some(to_client),
            from_client,
        }
    }

    /// Queue a connect attempt that fails
    pub fn push_failure(&self, error: TransportError) {
        self.script.lock().unwrap().push_back(Scripted::Fail(error));
    }

    /// URLs of every connect attempt so far
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), TransportError> {
        self.urls.lock().unwrap().push(url.to_string());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Link(tx, rx)) => {
                Ok((Box::new(MockSink { tx: Some(tx) }), Box::new(MockStream { rx })))
            }
            Some(Scripted::Fail(error)) => Err(error),
            None => Err(TransportError::Connect("connection refused".to_string())),
        }
    }
}

struct MockSink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

struct MockStream {
    rx: mpsc::UnboundedReceiver<Result<String, TransportError>>,
}

#[async_trait]
impl FrameStream for MockStream {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await
    }
}

impl MockPeer {
    pub fn send(&self, event: &ServerEvent) {
        self.send_raw(&event.to_frame());
    }

    pub fn send_raw(&self, frame: &str) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Ok(frame.to_string()));
        }
    }

    pub fn session(&self, session_id: &str) {
        self.send(&ServerEvent::SessionInfo {
            session_id: session_id.to_string(),
        });
    }

    pub fn fail(&self, error: TransportError) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Err(error));
        }
    }

    /// Drop the peer's end, which the client sees as a close
    pub fn hang_up(&mut self) {
        self.to_client = None;
    }

    /// Next frame written by the client
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Frames written by the client that are already buffered
    pub fn drain(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }
}
