//! Per-conversation session controller
//!
//! Owns the conversation value behind a `watch` channel and at most one
//! generation task. Every operation that starts a generation first cancels
//! the running one and waits for it to tear down.

use super::ChatServices;
use crate::config::{apply_placeholders, Settings};
use crate::conversation::Conversation;
use crate::db::{save_conversation, DbError};
use crate::generation::{ChatError, Generation, GenerationOutcome};
use crate::llm::{GenerationParams, GenerationRequest};
use crate::message::{is_empty_input, truncate, Message, Part, Role};
use crate::title_generator;
use crate::tools::{SearchTool, Tool, ToolRegistry};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Shown in `Message::translation` while a translation is running
pub const TRANSLATION_PENDING: &str = "Translating...";

const CHANNEL_CAPACITY: usize = 32;

struct Job {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct SessionController {
    services: Arc<ChatServices>,
    conversation: watch::Sender<Conversation>,
    errors: broadcast::Sender<ChatError>,
    done: broadcast::Sender<GenerationOutcome>,
    job: Mutex<Option<Job>>,
    /// Cancelled when the session closes; stops pending follow-ups
    closed: CancellationToken,
}

impl SessionController {
    /// Load the conversation, or start a new one seeded with the current
    /// assistant's preset messages
    pub async fn open(services: Arc<ChatServices>, id: Uuid) -> Result<Arc<Self>, ChatError> {
        let conversation = match services.store.get_by_id(id).await? {
            Some(stored) => stored,
            None => {
                let assistant = services.settings.snapshot().current_assistant();
                let presets: Vec<Message> = assistant
                    .preset_messages
                    .iter()
                    .map(|m| Message::new(m.role, m.parts.clone()))
                    .collect();
                tracing::debug!(conv_id = %id, presets = presets.len(), "New conversation");
                Conversation::of_id(id, assistant.id).update_current_messages(&presets)
            }
        };
        Ok(Arc::new(Self {
            services,
            conversation: watch::channel(conversation).0,
            errors: broadcast::channel(CHANNEL_CAPACITY).0,
            done: broadcast::channel(CHANNEL_CAPACITY).0,
            job: Mutex::new(None),
            closed: CancellationToken::new(),
        }))
    }

    pub fn id(&self) -> Uuid {
        self.conversation.borrow().id
    }

    pub fn snapshot(&self) -> Conversation {
        self.conversation.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Conversation> {
        self.conversation.subscribe()
    }

    /// Conversation values as a stream, starting with the current one
    pub fn updates(&self) -> WatchStream<Conversation> {
        WatchStream::new(self.conversation.subscribe())
    }

    /// One event per failed session, plus non-fatal warnings
    pub fn errors(&self) -> broadcast::Receiver<ChatError> {
        self.errors.subscribe()
    }

    /// Outcome of every session as it ends
    pub fn outcomes(&self) -> broadcast::Receiver<GenerationOutcome> {
        self.done.subscribe()
    }

    /// Whether a session is running (or an operation is starting one)
    pub fn is_loading(&self) -> bool {
        match self.job.try_lock() {
            Ok(job) => job.as_ref().is_some_and(|j| !j.handle.is_finished()),
            Err(_) => true,
        }
    }

    /// Wait for the running session, if any, to end
    pub async fn wait(&self) {
        let mut job = self.job.lock().await;
        if let Some(job) = job.take() {
            if let Err(e) = job.handle.await {
                tracing::error!(error = %e, "Generation task failed");
            }
        }
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Append a user message and generate a reply. Empty input is ignored.
    pub async fn send(self: &Arc<Self>, parts: Vec<Part>) -> Result<(), ChatError> {
        if is_empty_input(&parts) {
            return Ok(());
        }
        let mut job = self.job.lock().await;
        stop(&mut job).await;
        let next = self
            .snapshot()
            .append_message(Message::new(Role::User, parts));
        self.save(next).await?;
        *job = Some(self.spawn_generation(None));
        Ok(())
    }

    /// Add an edited variant of a message. Does not generate.
    pub async fn edit(&self, message_id: Uuid, parts: Vec<Part>) -> Result<(), ChatError> {
        if is_empty_input(&parts) {
            return Ok(());
        }
        match self.snapshot().edit_message(message_id, parts) {
            Some(next) => self.save(next).await,
            None => Ok(()),
        }
    }

    /// Remove one variant; the node goes with its last variant
    pub async fn delete(&self, message_id: Uuid) -> Result<(), ChatError> {
        match self.snapshot().delete_message(message_id) {
            Some(next) => self.save(next).await,
            None => Ok(()),
        }
    }

    /// Regenerate from a message.
    ///
    /// From a user message, everything after it is discarded and a fresh
    /// reply generated. From any other message, the model sees the history
    /// before that node and its reply becomes a new variant of the node. A
    /// tool result regenerates the assistant node whose call it answered.
    pub async fn regenerate_from(
        self: &Arc<Self>,
        message_id: Uuid,
        include_assistant_reply: bool,
    ) -> Result<(), ChatError> {
        let Some(role) = self.role_of(message_id) else {
            return Ok(());
        };
        if role != Role::User && !include_assistant_reply {
            return self.persist().await;
        }

        let mut job = self.job.lock().await;
        stop(&mut job).await;
        // The stopped session may have moved or dropped the node
        let snapshot = self.snapshot();
        let Some(index) = snapshot.node_index_of(message_id) else {
            return Ok(());
        };
        let history_len = if snapshot.message_nodes[index].role() == Role::User {
            if let Some(next) = snapshot.prefix_through(message_id) {
                self.save(next).await?;
            }
            None
        } else {
            Some(index)
        };
        *job = Some(self.spawn_generation(history_len));
        Ok(())
    }

    /// Toggle the context cut point at `index`
    pub async fn truncate_at(&self, index: i64) -> Result<(), ChatError> {
        let mut job = self.job.lock().await;
        stop(&mut job).await;
        let next = self.snapshot().truncate_at(index);
        self.save(next).await
    }

    /// Toggle the cut point at the end of the timeline
    pub async fn clear_context(&self) -> Result<(), ChatError> {
        let mut job = self.job.lock().await;
        stop(&mut job).await;
        let next = self.snapshot().clear_context();
        self.save(next).await
    }

    /// Copy the timeline through `message_id` into a new, saved conversation.
    ///
    /// Referenced files are duplicated so either conversation can release
    /// its own.
    pub async fn fork(&self, message_id: Uuid) -> Result<Option<Conversation>, ChatError> {
        let snapshot = self.snapshot();
        let Some(forked) = snapshot.fork_at(message_id, snapshot.assistant_id) else {
            return Ok(None);
        };

        let files = &self.services.files;
        let mut moves = HashMap::new();
        for reference in forked.files() {
            if !files.owns(&reference) {
                continue;
            }
            match files.duplicate(&reference, forked.id).await {
                Ok(copy) => {
                    moves.insert(reference, copy);
                }
                Err(e) => {
                    tracing::warn!(file = %reference, error = %e, "Failed to copy file for fork");
                }
            }
        }
        let forked = forked.relocate_files(&moves);

        save_conversation(&*self.services.store, &forked).await?;
        tracing::info!(
            conv_id = %snapshot.id,
            fork_id = %forked.id,
            nodes = forked.message_nodes.len(),
            "Conversation forked"
        );
        Ok(Some(forked))
    }

    /// Stop the running session, keeping what it produced
    pub async fn cancel(&self) {
        let mut job = self.job.lock().await;
        stop(&mut job).await;
    }

    /// Stop the running session and drop pending title and suggestion work
    pub async fn close(&self) {
        self.closed.cancel();
        self.cancel().await;
    }

    /// Move the variant cursor of a node
    pub async fn select_variant(&self, node_id: Uuid, index: usize) -> Result<(), ChatError> {
        let next = self.snapshot().select_variant(node_id, index);
        self.save(next).await
    }

    pub async fn update_title(&self, title: impl Into<String>) -> Result<(), ChatError> {
        let next = Conversation {
            title: title.into(),
            ..self.snapshot()
        };
        self.save(next).await
    }

    /// Generate a title in the background.
    ///
    /// Without `force`, a conversation that already has a title keeps it.
    pub fn generate_title(self: &Arc<Self>, force: bool) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = this.closed.cancelled() => {}
                () = this.title_task(force) => {}
            }
        })
    }

    /// Generate reply suggestions in the background
    pub fn generate_suggestions(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = this.closed.cancelled() => {}
                () = this.suggestion_task() => {}
            }
        })
    }

    /// Translate one message into `language`.
    ///
    /// The message shows a pending marker until the translation arrives.
    /// A failure clears it and is reported on the error channel.
    pub async fn translate_message(&self, message_id: Uuid, language: &str) {
        let Some(source_text) = self.snapshot().find_message(message_id).map(Message::to_text)
        else {
            return;
        };
        let settings = self.services.settings.snapshot();
        let Some((model, backend)) = self
            .services
            .models
            .resolve(settings.translate_model_id, settings.current_chat_model_id())
        else {
            let _ = self.errors.send(ChatError::NoModel);
            return;
        };

        self.conversation.send_modify(|c| {
            *c = c.set_translation(message_id, Some(TRANSLATION_PENDING.to_string()));
        });

        let prompt = apply_placeholders(
            &settings.translate_prompt,
            &[("target_lang", language), ("source_text", source_text.as_str())],
        );
        let request = GenerationRequest::prompt(prompt, GenerationParams::new(model));
        let translation = match backend.generate_once(&request).await {
            Ok(reply) => Some(reply.to_text()),
            Err(e) => {
                tracing::warn!(message_id = %message_id, error = %e, "Translation failed");
                let _ = self.errors.send(e.into());
                None
            }
        };

        self.conversation
            .send_modify(|c| *c = c.set_translation(message_id, translation.clone()));
        if translation.is_some() {
            if let Err(e) = self.persist().await {
                let _ = self.errors.send(e);
            }
        }
    }

    /// Drop a message's translation
    pub async fn clear_translation(&self, message_id: Uuid) -> Result<(), ChatError> {
        let next = self.snapshot().set_translation(message_id, None);
        self.save(next).await
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Replace the conversation and release files it no longer references
    async fn update(&self, next: Conversation) {
        let previous = self.conversation.send_replace(next);
        let current = self.conversation.borrow().files();
        self.services
            .files
            .release_unreferenced(&previous.files(), &current)
            .await;
    }

    async fn save(&self, next: Conversation) -> Result<(), ChatError> {
        self.update(Conversation {
            updated_at: Utc::now(),
            ..next
        })
        .await;
        self.persist().await
    }

    async fn persist(&self) -> Result<(), ChatError> {
        let conversation = self.snapshot();
        save_conversation(&*self.services.store, &conversation).await?;
        Ok(())
    }

    /// Save a follow-up result without recreating a deleted conversation
    async fn persist_existing(&self) -> Result<(), ChatError> {
        match self.services.store.update(&self.snapshot()).await {
            Ok(()) => Ok(()),
            Err(DbError::ConversationNotFound(id)) => {
                tracing::debug!(conv_id = %id, "Conversation gone, dropping follow-up");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn role_of(&self, message_id: Uuid) -> Option<Role> {
        let conversation = self.conversation.borrow();
        let index = conversation.node_index_of(message_id)?;
        Some(conversation.message_nodes[index].role())
    }

    fn spawn_generation(self: &Arc<Self>, history_len: Option<usize>) -> Job {
        let cancel = CancellationToken::new();
        let this = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { this.run_session(history_len, token).await });
        Job { cancel, handle }
    }

    async fn run_session(self: Arc<Self>, history_len: Option<usize>, cancel: CancellationToken) {
        let settings = self.services.settings.snapshot();
        let Some((model, backend)) = self
            .services
            .models
            .resolve(settings.current_chat_model_id(), None)
        else {
            tracing::warn!(conv_id = %self.id(), "No chat model configured");
            let _ = self.errors.send(ChatError::NoModel);
            let _ = self.done.send(GenerationOutcome::Failed(ChatError::NoModel));
            return;
        };

        self.conversation.send_modify(|c| c.chat_suggestions.clear());
        let files_before = self.conversation.borrow().files();

        let mut generation = Generation::new(
            model,
            backend,
            settings.clone(),
            self.services.files.clone(),
        )
        .with_tools(self.assemble_tools(&settings).await)
        .with_transformers(self.services.transformers.clone());
        if let Some(len) = history_len {
            generation = generation.with_history_len(len);
        }

        let outcome = generation.run(&self.conversation, &self.errors, &cancel).await;

        let files_after = self.conversation.borrow().files();
        self.services
            .files
            .release_unreferenced(&files_before, &files_after)
            .await;
        if let Err(e) = self.persist().await {
            tracing::error!(conv_id = %self.id(), error = %e, "Failed to save conversation");
            let _ = self.errors.send(e);
        }

        match &outcome {
            GenerationOutcome::Completed => {
                self.generate_title(false);
                self.generate_suggestions();
            }
            GenerationOutcome::Failed(e) => {
                let _ = self.errors.send(e.clone());
            }
            GenerationOutcome::Cancelled => {}
        }
        let _ = self.done.send(outcome);
    }

    /// Local tools enabled on the assistant, web search if enabled, then
    /// every tool server's tools
    async fn assemble_tools(&self, settings: &Settings) -> ToolRegistry {
        let assistant = settings.current_assistant();
        let local: Vec<Arc<dyn Tool>> = self
            .services
            .local_tools
            .iter()
            .filter(|t| assistant.local_tools.iter().any(|name| name == t.name()))
            .cloned()
            .collect();
        let search = self
            .services
            .search
            .clone()
            .filter(|_| settings.enable_web_search)
            .map(|service| Arc::new(SearchTool::new(service)) as Arc<dyn Tool>);
        ToolRegistry::assemble(local, search, &self.services.tool_servers).await
    }

    /// Messages a follow-up task should look at
    fn visible_messages(&self) -> Vec<Message> {
        let conversation = self.conversation.borrow();
        truncate(&conversation.current_messages(), conversation.truncate_index).to_vec()
    }

    async fn title_task(&self, force: bool) {
        if !force && !self.conversation.borrow().title.trim().is_empty() {
            return;
        }
        let settings = self.services.settings.snapshot();
        let Some((model, backend)) = self
            .services
            .models
            .resolve(settings.title_model_id, settings.current_chat_model_id())
        else {
            return;
        };
        let messages = self.visible_messages();
        if messages.is_empty() {
            return;
        }

        let Some(title) =
            title_generator::generate_title(&*backend, &model, &settings, &messages).await
        else {
            return;
        };
        tracing::debug!(conv_id = %self.id(), title = %title, "Title generated");
        // Applied to the live value so messages merged meanwhile are kept
        self.conversation.send_modify(|c| c.title = title);
        if let Err(e) = self.persist_existing().await {
            tracing::warn!(conv_id = %self.id(), error = %e, "Failed to save title");
        }
    }

    async fn suggestion_task(&self) {
        let settings = self.services.settings.snapshot();
        let Some((model, backend)) = self
            .services
            .models
            .resolve(settings.suggestion_model_id, None)
        else {
            return;
        };
        let messages = self.visible_messages();
        if messages.is_empty() {
            return;
        }

        let Some(suggestions) =
            title_generator::generate_suggestions(&*backend, &model, &settings, &messages).await
        else {
            return;
        };
        self.conversation
            .send_modify(|c| c.chat_suggestions = suggestions);
        if let Err(e) = self.persist_existing().await {
            tracing::warn!(conv_id = %self.id(), error = %e, "Failed to save suggestions");
        }
    }
}

/// Cancel the running session and wait for it to finish
async fn stop(job: &mut Option<Job>) {
    if let Some(job) = job.take() {
        job.cancel.cancel();
        if let Err(e) = job.handle.await {
            tracing::error!(error = %e, "Generation task failed");
        }
    }
}
