//! `SQLite` persistence for turn records

use super::record::PersistedTurnRecord;
use super::schema::{MIGRATION_ADD_REASONING, SCHEMA};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to encode column: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Database lock poisoned")]
    Poisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Summary row for one conversation thread within a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadSummary {
    pub conversation_id: i64,
    pub turn_count: usize,
    pub first_input: String,
    pub last_activity: DateTime<Utc>,
}

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

const RECORD_COLUMNS: &str = "id, session_id, conversation_id, user_input, user_timestamp,
     mcp_tools_called, mcp_results, reasoning, ai_response, ai_timestamp, created_at";

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> DbResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> DbResult<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)?;
        // Ignore error if the column already exists
        let _ = conn.execute(MIGRATION_ADD_REASONING, []);
        Ok(())
    }

    /// Allocate the next conversation id for a session
    pub fn start_conversation(&self, session_id: &str) -> DbResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO chat_sessions (session_id) VALUES (?1)",
            params![session_id],
        )?;
        let next: i64 = conn.query_row(
            "SELECT COALESCE(MAX(conversation_id), 0) + 1 FROM chat_records WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(next)
    }

    /// Store a completed turn, returning its row id
    pub fn save_turn(&self, record: &PersistedTurnRecord) -> DbResult<i64> {
        let tools_called = serde_json::to_string(&record.tools_called)?;
        let tool_results = serde_json::to_string(&record.tool_results)?;
        let reasoning = serde_json::to_string(&record.reasoning)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO chat_sessions (session_id) VALUES (?1)",
            params![record.session_id],
        )?;
        conn.execute(
            "INSERT INTO chat_records (session_id, conversation_id, user_input, user_timestamp,
                 mcp_tools_called, mcp_results, reasoning, ai_response, ai_timestamp, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.session_id,
                record.conversation_id,
                record.user_input,
                record.user_timestamp.to_rfc3339(),
                tools_called,
                tool_results,
                reasoning,
                record.ai_response,
                record.ai_timestamp.map(|t| t.to_rfc3339()),
                record.created_at.to_rfc3339(),
            ],
        )?;
        conn.execute(
            "UPDATE chat_sessions SET updated_at = ?2 WHERE session_id = ?1",
            params![record.session_id, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Load turns oldest first.
    ///
    /// With a conversation id, returns the first `limit` turns of that
    /// thread. Without one, returns the most recent `limit` turns of the
    /// session.
    pub fn load_thread(
        &self,
        session_id: &str,
        conversation_id: Option<i64>,
        limit: usize,
    ) -> DbResult<Vec<PersistedTurnRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.conn()?;

        if let Some(conversation_id) = conversation_id {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM chat_records
                 WHERE session_id = ?1 AND conversation_id = ?2
                 ORDER BY created_at ASC, id ASC LIMIT ?3"
            ))?;
            let rows = stmt.query_map(params![session_id, conversation_id, limit], read_record)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        } else {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM chat_records
                 WHERE session_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![session_id, limit], read_record)?;
            let mut records = rows.collect::<Result<Vec<_>, _>>()?;
            records.reverse();
            Ok(records)
        }
    }

    /// Threads of a session, most recent first
    pub fn list_threads(&self, session_id: &str) -> DbResult<Vec<ThreadSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT conversation_id, COUNT(*),
                    (SELECT r2.user_input FROM chat_records r2
                     WHERE r2.session_id = r.session_id AND r2.conversation_id = r.conversation_id
                     ORDER BY r2.created_at ASC, r2.id ASC LIMIT 1),
                    MAX(created_at)
             FROM chat_records r
             WHERE session_id = ?1
             GROUP BY conversation_id
             ORDER BY MAX(created_at) DESC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            let turn_count: i64 = row.get(1)?;
            Ok(ThreadSummary {
                conversation_id: row.get::<_, Option<i64>>(0)?.unwrap_or_default(),
                turn_count: usize::try_from(turn_count).unwrap_or_default(),
                first_input: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                last_activity: parse_datetime(&row.get::<_, String>(3)?),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Delete every record of a session, returning the number removed
    pub fn clear_session(&self, session_id: &str) -> DbResult<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM chat_records WHERE session_id = ?1",
            params![session_id],
        )?;
        conn.execute(
            "DELETE FROM chat_sessions WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(removed)
    }
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<PersistedTurnRecord> {
    let created_at = parse_datetime(&row.get::<_, String>(10)?);
    Ok(PersistedTurnRecord {
        id: row.get(0)?,
        session_id: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        conversation_id: row.get::<_, Option<i64>>(2)?.unwrap_or_default(),
        user_input: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        user_timestamp: row
            .get::<_, Option<String>>(4)?
            .map_or(created_at, |s| parse_datetime(&s)),
        tools_called: parse_json_column(row.get(5)?),
        tool_results: parse_json_column(row.get(6)?),
        reasoning: parse_json_column(row.get(7)?),
        ai_response: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        ai_timestamp: row.get::<_, Option<String>>(9)?.map(|s| parse_datetime(&s)),
        created_at,
    })
}

/// Malformed JSON columns read back as empty rather than failing the load
fn parse_json_column<T: DeserializeOwned + Default>(raw: Option<String>) -> T {
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return T::default();
    };
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Malformed JSON column, treating as empty");
        T::default()
    })
}

/// Accepts RFC 3339 as well as the naive `SQLite` and ISO forms
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map_or_else(Utc::now, |naive| naive.and_utc())
}
