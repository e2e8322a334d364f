//! Chat sessions
//!
//! `ChatService` hands out one `SessionController` per conversation so every
//! caller touching a conversation shares its single-flight lock.

mod controller;

pub use controller::{SessionController, TRANSLATION_PENDING};

use crate::config::SettingsProvider;
use crate::conversation::Conversation;
use crate::db::{self, ConversationStore};
use crate::files::ChatFiles;
use crate::generation::ChatError;
use crate::llm::ModelRegistry;
use crate::tools::{SearchService, Tool, ToolServer};
use crate::transformers::Transformers;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Collaborators shared by every session
pub struct ChatServices {
    pub models: Arc<ModelRegistry>,
    pub store: Arc<dyn ConversationStore>,
    pub files: ChatFiles,
    pub settings: SettingsProvider,
    /// Tools an assistant may enable by name
    pub local_tools: Vec<Arc<dyn Tool>>,
    pub search: Option<Arc<dyn SearchService>>,
    pub tool_servers: Vec<Arc<dyn ToolServer>>,
    pub transformers: Transformers,
}

impl ChatServices {
    /// Services with the built-in transformers and no tools
    pub fn new(
        models: Arc<ModelRegistry>,
        store: Arc<dyn ConversationStore>,
        files: ChatFiles,
        settings: SettingsProvider,
    ) -> Self {
        Self {
            models,
            store,
            files,
            settings,
            local_tools: Vec::new(),
            search: None,
            tool_servers: Vec::new(),
            transformers: Transformers::builtin(),
        }
    }

    #[must_use]
    pub fn with_local_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.local_tools = tools;
        self
    }

    #[must_use]
    pub fn with_search(mut self, search: Arc<dyn SearchService>) -> Self {
        self.search = Some(search);
        self
    }

    #[must_use]
    pub fn with_tool_servers(mut self, servers: Vec<Arc<dyn ToolServer>>) -> Self {
        self.tool_servers = servers;
        self
    }

    #[must_use]
    pub fn with_transformers(mut self, transformers: Transformers) -> Self {
        self.transformers = transformers;
        self
    }
}

/// Registry of open sessions
pub struct ChatService {
    services: Arc<ChatServices>,
    sessions: RwLock<HashMap<Uuid, Arc<SessionController>>>,
}

impl ChatService {
    pub fn new(services: ChatServices) -> Self {
        Self {
            services: Arc::new(services),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn services(&self) -> &Arc<ChatServices> {
        &self.services
    }

    /// The session for `id`, opening it on first use
    pub async fn session(&self, id: Uuid) -> Result<Arc<SessionController>, ChatError> {
        if let Some(session) = self.sessions.read().await.get(&id) {
            return Ok(Arc::clone(session));
        }

        let mut sessions = self.sessions.write().await;
        // Another caller may have opened it while we waited for the lock
        if let Some(session) = sessions.get(&id) {
            return Ok(Arc::clone(session));
        }
        let session = SessionController::open(Arc::clone(&self.services), id).await?;
        sessions.insert(id, Arc::clone(&session));
        tracing::debug!(conv_id = %id, open = sessions.len(), "Session opened");
        Ok(session)
    }

    /// Stop and forget a session; the conversation stays stored
    pub async fn close(&self, id: Uuid) {
        let session = self.sessions.write().await.remove(&id);
        if let Some(session) = session {
            session.close().await;
        }
    }

    /// Stored conversations, most recently updated first
    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        Ok(self.services.store.list().await?)
    }

    /// Delete a conversation and release its files
    pub async fn delete_conversation(&self, id: Uuid) -> Result<(), ChatError> {
        self.close(id).await;
        db::delete_conversation(&*self.services.store, &self.services.files, id).await?;
        tracing::info!(conv_id = %id, "Conversation deleted");
        Ok(())
    }
}
