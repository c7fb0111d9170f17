//! Thinkflow: client core for a streaming, tool-augmented chat protocol
//!
//! Events arrive over a [`channel`], drive the [`flow`] state machine one
//! turn at a time, and stream their text through the [`markdown`]
//! assembler. Finished turns go to the [`store`] and can be rebuilt later
//! by [`replay`].

pub mod api;
pub mod channel;
pub mod config;
pub mod flow;
pub mod markdown;
pub mod protocol;
pub mod replay;
pub mod runtime;
pub mod store;
