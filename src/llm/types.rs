//! Common types for model backend interactions

use crate::message::Message;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declared capability of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelAbility {
    Tool,
    Reasoning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Image,
}

/// Provider-side tools the model runs on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltInTool {
    Search,
    UrlContext,
}

/// A configured chat model and its capability set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: Uuid,
    /// Provider-facing model name
    pub model_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_modalities")]
    pub input_modalities: Vec<Modality>,
    #[serde(default = "default_modalities")]
    pub output_modalities: Vec<Modality>,
    #[serde(default)]
    pub abilities: Vec<ModelAbility>,
    #[serde(default)]
    pub built_in_tools: Vec<BuiltInTool>,
}

fn default_modalities() -> Vec<Modality> {
    vec![Modality::Text]
}

impl ModelInfo {
    pub fn new(model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        Self {
            id: Uuid::new_v4(),
            display_name: model_id.clone(),
            model_id,
            input_modalities: default_modalities(),
            output_modalities: default_modalities(),
            abilities: Vec::new(),
            built_in_tools: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_abilities(mut self, abilities: impl IntoIterator<Item = ModelAbility>) -> Self {
        self.abilities = abilities.into_iter().collect();
        self
    }

    pub fn supports_tools(&self) -> bool {
        self.abilities.contains(&ModelAbility::Tool)
    }

    pub fn supports_reasoning(&self) -> bool {
        self.abilities.contains(&ModelAbility::Reasoning)
    }

    pub fn has_built_in_tools(&self) -> bool {
        !self.built_in_tools.is_empty()
    }

    pub fn display_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.model_id
        } else {
            &self.display_name
        }
    }
}

/// Sampling parameters for one request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: ModelInfo,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    /// Reasoning budget in tokens; only sent to reasoning-capable models
    pub thinking_budget: Option<i32>,
    pub max_tokens: Option<u32>,
}

impl GenerationParams {
    pub fn new(model: ModelInfo) -> Self {
        Self {
            model,
            temperature: None,
            top_p: None,
            thinking_budget: None,
            max_tokens: None,
        }
    }
}

/// Tool definition
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Backend request
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub params: GenerationParams,
}

impl GenerationRequest {
    /// Single prompt, no tools (titles, suggestions, translation)
    pub fn prompt(text: impl Into<String>, params: GenerationParams) -> Self {
        Self {
            system: None,
            messages: vec![Message::user(text)],
            tools: Vec::new(),
            params,
        }
    }
}
