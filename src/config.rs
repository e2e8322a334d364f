//! Settings snapshot and environment configuration

use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

pub const DEFAULT_MESSAGE_TEMPLATE: &str = "{{ message }}";

pub const DEFAULT_TITLE_PROMPT: &str = r"I will give you some dialogue content in the `<content>` block.
You need to summarize the conversation between user and assistant into a short title.
1. The title language should be consistent with the user's primary language
2. Do not use punctuation or other special symbols
3. Reply directly with the title
4. Summarize using {locale} language
5. The title should not exceed 10 characters

<content>
{content}
</content>";

pub const DEFAULT_SUGGESTION_PROMPT: &str = r"I will provide you with some chat content in the `<content>` block, including conversations between the User and the AI assistant.
You need to act as the **User** to reply to the assistant, generating 3~5 appropriate and contextually relevant responses to the assistant.

Rules:
1. Reply directly with suggestions, do not add any formatting, and separate suggestions with newlines, no need to add markdown list formats.
2. Use {locale} language.
3. Ensure each suggestion is valid.
4. Each suggestion should not exceed 10 characters.
5. Imitate the user's previous conversational style.
6. Act as a User, not an Assistant!

<content>
{content}
</content>";

pub const DEFAULT_TRANSLATE_PROMPT: &str = r"You are a translation expert, skilled in translating various languages, and maintaining accuracy, faithfulness, and elegance in translation.
Next, I will send you text. Please translate it into {target_lang}, and return the translation result directly, without adding any explanations or other content.

Please translate the <source_text> section:
<source_text>
{source_text}
</source_text>";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// A persona the user chats with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Assistant {
    pub id: Uuid,
    pub name: String,
    /// Falls back to the global chat model when unset
    pub chat_model_id: Option<Uuid>,
    pub system_prompt: String,
    pub temperature: f32,
    pub top_p: f32,
    /// Messages sent to the model after truncation; zero or less keeps all
    pub context_message_size: i64,
    pub stream_output: bool,
    pub message_template: String,
    /// Seeded into every new conversation
    pub preset_messages: Vec<Message>,
    /// Names of local tools enabled for this assistant
    pub local_tools: Vec<String>,
    pub thinking_budget: Option<i32>,
}

impl Default for Assistant {
    fn default() -> Self {
        Self {
            id: Uuid::nil(),
            name: String::new(),
            chat_model_id: None,
            system_prompt: String::new(),
            temperature: 0.6,
            top_p: 1.0,
            context_message_size: 32,
            stream_output: true,
            message_template: DEFAULT_MESSAGE_TEMPLATE.to_string(),
            preset_messages: Vec::new(),
            local_tools: Vec::new(),
            thinking_budget: Some(1024),
        }
    }
}

/// User settings relevant to generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub assistant_id: Uuid,
    pub assistants: Vec<Assistant>,
    pub chat_model_id: Option<Uuid>,
    /// Falls back to the chat model when unset
    pub title_model_id: Option<Uuid>,
    /// Suggestions are skipped when unset
    pub suggestion_model_id: Option<Uuid>,
    /// Falls back to the chat model when unset
    pub translate_model_id: Option<Uuid>,
    pub enable_web_search: bool,
    pub title_prompt: String,
    pub suggestion_prompt: String,
    pub translate_prompt: String,
    pub user_nickname: String,
    /// Locale name substituted into prompts
    pub locale: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            assistant_id: Uuid::nil(),
            assistants: vec![Assistant::default()],
            chat_model_id: None,
            title_model_id: None,
            suggestion_model_id: None,
            translate_model_id: None,
            enable_web_search: false,
            title_prompt: DEFAULT_TITLE_PROMPT.to_string(),
            suggestion_prompt: DEFAULT_SUGGESTION_PROMPT.to_string(),
            translate_prompt: DEFAULT_TRANSLATE_PROMPT.to_string(),
            user_nickname: String::new(),
            locale: "English".to_string(),
        }
    }
}

impl Settings {
    /// The selected assistant, or the first one, or a default persona
    pub fn current_assistant(&self) -> Assistant {
        self.assistants
            .iter()
            .find(|a| a.id == self.assistant_id)
            .or_else(|| self.assistants.first())
            .cloned()
            .unwrap_or_default()
    }

    /// Chat model for the current assistant
    pub fn current_chat_model_id(&self) -> Option<Uuid> {
        self.current_assistant().chat_model_id.or(self.chat_model_id)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Read side of the live settings.
///
/// Sessions take one snapshot when they start and use it throughout.
#[derive(Debug, Clone)]
pub struct SettingsProvider {
    rx: watch::Receiver<Settings>,
}

impl SettingsProvider {
    /// Provider plus the sender used to publish changes
    pub fn channel(initial: Settings) -> (watch::Sender<Settings>, Self) {
        let (tx, rx) = watch::channel(initial);
        (tx, Self { rx })
    }

    /// Provider whose settings never change
    pub fn fixed(settings: Settings) -> Self {
        Self::channel(settings).1
    }

    pub fn snapshot(&self) -> Settings {
        self.rx.borrow().clone()
    }
}

/// Substitute `{key}` placeholders in a prompt template
pub fn apply_placeholders(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

/// Process configuration read from the environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub files_dir: PathBuf,
    pub settings_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        let base = PathBuf::from(home).join(".threadline");
        Self {
            db_path: std::env::var("THREADLINE_DB_PATH")
                .map_or_else(|_| base.join("threadline.db"), PathBuf::from),
            files_dir: std::env::var("THREADLINE_FILES_DIR")
                .map_or_else(|_| base.join("files"), PathBuf::from),
            settings_path: std::env::var("THREADLINE_SETTINGS").ok().map(PathBuf::from),
        }
    }

    /// Settings from the configured file, or defaults when none is set
    pub fn load_settings(&self) -> Result<Settings, ConfigError> {
        match &self.settings_path {
            Some(path) => Settings::load(path),
            None => Ok(Settings::default()),
        }
    }
}
