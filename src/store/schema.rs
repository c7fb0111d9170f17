//! Database schema for persisted turns

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS chat_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL UNIQUE,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS chat_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT DEFAULT 'default',
    conversation_id INTEGER,

    user_input TEXT,
    user_timestamp TIMESTAMP,

    mcp_tools_called TEXT,
    mcp_results TEXT,

    ai_response TEXT,
    ai_timestamp TIMESTAMP,

    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_chat_records_session ON chat_records(session_id);
CREATE INDEX IF NOT EXISTS idx_chat_records_conversation ON chat_records(conversation_id);
CREATE INDEX IF NOT EXISTS idx_chat_records_created ON chat_records(created_at);
";

/// Reasoning text column, added on top of the base schema.
/// Fails harmlessly when the column already exists.
pub const MIGRATION_ADD_REASONING: &str =
    "ALTER TABLE chat_records ADD COLUMN reasoning TEXT DEFAULT '[]'";
