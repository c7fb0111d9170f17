//! Read-only HTTP API over stored threads
//!
//! Shared threads are rebuilt through the replay driver, so a reader sees
//! the same stages a live observer saw.

mod handlers;
mod types;

pub use handlers::create_router;
pub use types::*;

use crate::markdown::{CmarkRenderer, MarkdownRenderer};
use crate::store::TurnStore;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TurnStore>,
    pub renderer: Arc<dyn MarkdownRenderer>,
}

impl AppState {
    pub fn new(store: Arc<dyn TurnStore>) -> Self {
        Self {
            store,
            renderer: Arc::new(CmarkRenderer),
        }
    }
}
