//! Conversation persistence
//!
//! Whole conversations are stored and loaded; callers decide when to save.

mod schema;

pub use schema::SCHEMA;

use crate::conversation::{Conversation, MessageNode};
use crate::files::ChatFiles;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Conversation not found: {0}")]
    ConversationNotFound(Uuid),
}

pub type DbResult<T> = Result<T, DbError>;

/// Storage for whole conversations
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<Conversation>>;

    async fn insert(&self, conversation: &Conversation) -> DbResult<()>;

    /// Fails with `ConversationNotFound` when no row exists
    async fn update(&self, conversation: &Conversation) -> DbResult<()>;

    async fn delete(&self, id: Uuid) -> DbResult<()>;

    /// All conversations, most recently updated first
    async fn list(&self) -> DbResult<Vec<Conversation>>;
}

#[async_trait]
impl<T: ConversationStore + ?Sized> ConversationStore for Arc<T> {
    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<Conversation>> {
        (**self).get_by_id(id).await
    }

    async fn insert(&self, conversation: &Conversation) -> DbResult<()> {
        (**self).insert(conversation).await
    }

    async fn update(&self, conversation: &Conversation) -> DbResult<()> {
        (**self).update(conversation).await
    }

    async fn delete(&self, id: Uuid) -> DbResult<()> {
        (**self).delete(id).await
    }

    async fn list(&self) -> DbResult<Vec<Conversation>> {
        (**self).list().await
    }
}

/// Insert the conversation if absent, otherwise update it
pub async fn save_conversation(
    store: &dyn ConversationStore,
    conversation: &Conversation,
) -> DbResult<()> {
    if store.get_by_id(conversation.id).await?.is_some() {
        store.update(conversation).await
    } else {
        store.insert(conversation).await
    }
}

/// Delete a conversation and every file it references
pub async fn delete_conversation(
    store: &dyn ConversationStore,
    files: &ChatFiles,
    id: Uuid,
) -> DbResult<()> {
    if let Some(conversation) = store.get_by_id(id).await? {
        files.delete(&conversation.files()).await;
    }
    files.remove_owner_dir(id).await;
    store.delete(id).await
}

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn get_conversation(&self, id: Uuid) -> DbResult<Option<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, assistant_id, title, nodes, truncate_index, chat_suggestions,
                    created_at, updated_at
             FROM conversations WHERE id = ?1",
        )?;
        let row = stmt
            .query_row(params![id.to_string()], StoredConversation::from_row)
            .optional()?;
        row.map(StoredConversation::into_conversation).transpose()
    }

    pub fn insert_conversation(&self, conversation: &Conversation) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO conversations
                (id, assistant_id, title, nodes, truncate_index, chat_suggestions, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                conversation.id.to_string(),
                conversation.assistant_id.to_string(),
                conversation.title,
                serde_json::to_string(&conversation.message_nodes)?,
                conversation.truncate_index,
                serde_json::to_string(&conversation.chat_suggestions)?,
                conversation.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                conversation.updated_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        Ok(())
    }

    pub fn update_conversation(&self, conversation: &Conversation) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE conversations
             SET assistant_id = ?2, title = ?3, nodes = ?4, truncate_index = ?5,
                 chat_suggestions = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                conversation.id.to_string(),
                conversation.assistant_id.to_string(),
                conversation.title,
                serde_json::to_string(&conversation.message_nodes)?,
                conversation.truncate_index,
                serde_json::to_string(&conversation.chat_suggestions)?,
                conversation.updated_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        if changed == 0 {
            return Err(DbError::ConversationNotFound(conversation.id));
        }
        Ok(())
    }

    pub fn delete_conversation(&self, id: Uuid) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM conversations WHERE id = ?1", params![id.to_string()])?;
        Ok(())
    }

    pub fn list_conversations(&self) -> DbResult<Vec<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, assistant_id, title, nodes, truncate_index, chat_suggestions,
                    created_at, updated_at
             FROM conversations ORDER BY updated_at DESC",
        )?;
        let rows = stmt
            .query_map([], StoredConversation::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(StoredConversation::into_conversation)
            .collect()
    }
}

#[async_trait]
impl ConversationStore for Database {
    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<Conversation>> {
        self.get_conversation(id)
    }

    async fn insert(&self, conversation: &Conversation) -> DbResult<()> {
        self.insert_conversation(conversation)
    }

    async fn update(&self, conversation: &Conversation) -> DbResult<()> {
        self.update_conversation(conversation)
    }

    async fn delete(&self, id: Uuid) -> DbResult<()> {
        self.delete_conversation(id)
    }

    async fn list(&self) -> DbResult<Vec<Conversation>> {
        self.list_conversations()
    }
}

/// Raw column values of one conversation row
struct StoredConversation {
    id: String,
    assistant_id: String,
    title: String,
    nodes: String,
    truncate_index: i64,
    chat_suggestions: String,
    created_at: String,
    updated_at: String,
}

impl StoredConversation {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            assistant_id: row.get(1)?,
            title: row.get(2)?,
            nodes: row.get(3)?,
            truncate_index: row.get(4)?,
            chat_suggestions: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    /// Nodes that lost all their variants are dropped on load
    fn into_conversation(self) -> DbResult<Conversation> {
        let message_nodes: Vec<MessageNode> = serde_json::from_str(&self.nodes)?;
        let conversation = Conversation {
            id: parse_uuid(&self.id),
            assistant_id: parse_uuid(&self.assistant_id),
            title: self.title,
            message_nodes,
            truncate_index: self.truncate_index,
            chat_suggestions: serde_json::from_str(&self.chat_suggestions)?,
            created_at: parse_datetime(&self.created_at),
            updated_at: parse_datetime(&self.updated_at),
        };
        Ok(conversation.normalized())
    }
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_default()
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
