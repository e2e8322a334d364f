//! Threadline demo shell
//!
//! Chats on stdin against an offline echo model, persisting to the
//! configured SQLite database.

use async_trait::async_trait;
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use threadline::config::{AppConfig, SettingsProvider};
use threadline::db::Database;
use threadline::files::ChatFiles;
use threadline::generation::GenerationOutcome;
use threadline::llm::{
    GenerationRequest, LlmError, ModelBackend, ModelInfo, ModelRegistry, SnapshotStream,
};
use threadline::message::{Message, Part, Role};
use threadline::session::{ChatService, ChatServices};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Replies with the last user message, one word per snapshot
struct EchoBackend;

fn echo_of(request: &GenerationRequest) -> String {
    let said = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(Message::to_text)
        .unwrap_or_default();
    format!("You said: {said}")
}

#[async_trait]
impl ModelBackend for EchoBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<SnapshotStream, LlmError> {
        let reply = Message::assistant("");
        let words: Vec<String> = echo_of(request)
            .split_inclusive(' ')
            .map(str::to_string)
            .collect();
        let snapshots: Vec<Result<Vec<Message>, LlmError>> = (1..=words.len())
            .map(|n| Ok(vec![reply.with_parts(vec![Part::text(words[..n].concat())])]))
            .collect();
        Ok(futures::stream::iter(snapshots).boxed())
    }

    async fn generate_once(&self, request: &GenerationRequest) -> Result<Message, LlmError> {
        Ok(Message::assistant(echo_of(request)))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "threadline=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = AppConfig::from_env();
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir_all(&config.files_dir)?;

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    let echo = ModelInfo::new("echo");
    let mut settings = config.load_settings()?;
    if settings.current_chat_model_id().is_none() {
        settings.chat_model_id = Some(echo.id);
    }
    let models = ModelRegistry::new().with_model(echo, Arc::new(EchoBackend));
    tracing::info!(models = ?models.available_models(), "Model registry initialized");

    let service = ChatService::new(ChatServices::new(
        Arc::new(models),
        Arc::new(db),
        ChatFiles::new(&config.files_dir),
        SettingsProvider::fixed(settings),
    ));
    let session = service.session(Uuid::new_v4()).await?;
    let mut outcomes = session.outcomes();
    let mut errors = session.errors();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()?;
    while let Some(line) = lines.next_line().await? {
        if !line.trim().is_empty() {
            session.send(vec![Part::text(line)]).await?;
            match outcomes.recv().await {
                Ok(GenerationOutcome::Failed(e)) => writeln!(stdout, "error: {e}")?,
                Ok(_) => {
                    if let Some(reply) = session.snapshot().current_messages().last() {
                        if reply.role == Role::Assistant {
                            writeln!(stdout, "{}", reply.to_text())?;
                        }
                    }
                }
                Err(_) => break,
            }
            // Failures were printed above; warnings only go to the log
            while let Ok(reported) = errors.try_recv() {
                tracing::debug!(error = %reported, "Session reported");
            }
        }
        write!(stdout, "> ")?;
        stdout.flush()?;
    }

    session.wait().await;
    Ok(())
}
