//! Wire protocol spoken over the chat channel
//!
//! Every frame is one JSON object tagged by its `type` field.

mod message;

pub use message::{parse_frame, ClientEvent, ProtocolError, ServerEvent};
