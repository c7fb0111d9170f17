//! Persistence of completed turns
//!
//! Records are written once a turn reaches a terminal state and read back
//! for replay and the share endpoint.

mod db;
mod record;
mod schema;

pub use db::{Database, DbError, DbResult, ThreadSummary};
pub use record::{PersistedTurnRecord, RecordedToolCall, RecordedToolResult};

use async_trait::async_trait;
use std::sync::Mutex;

/// Storage for turn records
#[async_trait]
pub trait TurnStore: Send + Sync {
    /// Allocate a conversation id for a new thread in `session_id`
    async fn start_thread(&self, session_id: &str) -> Result<i64, String>;

    /// Persist a completed turn
    async fn save_turn(&self, record: &PersistedTurnRecord) -> Result<i64, String>;

    /// Load turns oldest first, optionally restricted to one thread
    async fn load_thread(
        &self,
        session_id: &str,
        conversation_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PersistedTurnRecord>, String>;

    async fn list_threads(&self, session_id: &str) -> Result<Vec<ThreadSummary>, String>;
}

/// [`TurnStore`] backed by the `SQLite` database
#[derive(Clone)]
pub struct DatabaseStore {
    db: Database,
}

impl DatabaseStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TurnStore for DatabaseStore {
    async fn start_thread(&self, session_id: &str) -> Result<i64, String> {
        self.db
            .start_conversation(session_id)
            .map_err(|e| e.to_string())
    }

    async fn save_turn(&self, record: &PersistedTurnRecord) -> Result<i64, String> {
        self.db.save_turn(record).map_err(|e| e.to_string())
    }

    async fn load_thread(
        &self,
        session_id: &str,
        conversation_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PersistedTurnRecord>, String> {
        self.db
            .load_thread(session_id, conversation_id, limit)
            .map_err(|e| e.to_string())
    }

    async fn list_threads(&self, session_id: &str) -> Result<Vec<ThreadSummary>, String> {
        self.db.list_threads(session_id).map_err(|e| e.to_string())
    }
}

/// Volatile [`TurnStore`], used when no database path is configured
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<Vec<PersistedTurnRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything stored so far
    pub fn records(&self) -> Vec<PersistedTurnRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TurnStore for InMemoryStore {
    async fn start_thread(&self, session_id: &str) -> Result<i64, String> {
        let records = self.records.lock().map_err(|_| "store lock poisoned")?;
        let max = records
            .iter()
            .filter(|r| r.session_id == session_id)
            .map(|r| r.conversation_id)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn save_turn(&self, record: &PersistedTurnRecord) -> Result<i64, String> {
        let mut records = self.records.lock().map_err(|_| "store lock poisoned")?;
        let id = i64::try_from(records.len()).map_err(|e| e.to_string())? + 1;
        let mut stored = record.clone();
        stored.id = id;
        records.push(stored);
        Ok(id)
    }

    async fn load_thread(
        &self,
        session_id: &str,
        conversation_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PersistedTurnRecord>, String> {
        let records = self.records.lock().map_err(|_| "store lock poisoned")?;
        let matching: Vec<_> = records
            .iter()
            .filter(|r| r.session_id == session_id)
            .filter(|r| conversation_id.map_or(true, |id| r.conversation_id == id))
            .cloned()
            .collect();
        let result = if conversation_id.is_some() {
            matching.into_iter().take(limit).collect()
        } else {
            let skip = matching.len().saturating_sub(limit);
            matching.into_iter().skip(skip).collect()
        };
        Ok(result)
    }

    async fn list_threads(&self, session_id: &str) -> Result<Vec<ThreadSummary>, String> {
        let records = self.records.lock().map_err(|_| "store lock poisoned")?;
        let mut threads: Vec<ThreadSummary> = Vec::new();
        for record in records.iter().filter(|r| r.session_id == session_id) {
            match threads
                .iter_mut()
                .find(|t| t.conversation_id == record.conversation_id)
            {
                Some(thread) => {
                    thread.turn_count += 1;
                    thread.last_activity = thread.last_activity.max(record.created_at);
                }
                None => threads.push(ThreadSummary {
                    conversation_id: record.conversation_id,
                    turn_count: 1,
                    first_input: record.user_input.clone(),
                    last_activity: record.created_at,
                }),
            }
        }
        threads.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(threads)
    }
}
