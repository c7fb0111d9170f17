//! Protocol channel: one session's ordered event link with recovery
//!
//! A channel runs as its own task. Callers talk to it through a cloneable
//! [`ChannelHandle`] and consume [`ChannelEvent`]s from the receiver
//! returned by [`spawn_channel`].

mod actor;
mod backoff;
mod config;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use actor::{spawn_channel, ChannelError, ChannelEvent, ChannelHandle, ChannelStatus};
pub use backoff::reconnect_delay;
pub use config::{
    ChannelConfig, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_RECONNECTS,
    DEFAULT_RECONNECT_BASE,
};
pub use transport::{Connector, FrameSink, FrameStream, TransportError, WebSocketConnector};
