//! Database schema

/// SQL schema for initialization.
///
/// The node tree is stored as one JSON document per conversation; it is
/// always read and written whole.
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    assistant_id TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    nodes TEXT NOT NULL DEFAULT '[]',
    truncate_index INTEGER NOT NULL DEFAULT -1,
    chat_suggestions TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversations_updated ON conversations(updated_at DESC);
";
