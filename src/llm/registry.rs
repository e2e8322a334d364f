//! Model registry for resolving configured models to backends

use super::{LoggingBackend, ModelBackend, ModelInfo};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

struct RegisteredModel {
    info: ModelInfo,
    backend: Arc<dyn ModelBackend>,
}

/// Registry of available models, keyed by the model's configuration id
#[derive(Default)]
pub struct ModelRegistry {
    models: HashMap<Uuid, RegisteredModel>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model; the backend is wrapped with logging
    pub fn register(&mut self, info: ModelInfo, backend: Arc<dyn ModelBackend>) {
        let backend: Arc<dyn ModelBackend> =
            Arc::new(LoggingBackend::new(backend, info.model_id.clone()));
        self.models.insert(info.id, RegisteredModel { info, backend });
    }

    #[must_use]
    pub fn with_model(mut self, info: ModelInfo, backend: Arc<dyn ModelBackend>) -> Self {
        self.register(info, backend);
        self
    }

    pub fn info(&self, id: Uuid) -> Option<&ModelInfo> {
        self.models.get(&id).map(|m| &m.info)
    }

    /// Get a model and its backend by id
    pub fn get(&self, id: Uuid) -> Option<(ModelInfo, Arc<dyn ModelBackend>)> {
        self.models
            .get(&id)
            .map(|m| (m.info.clone(), m.backend.clone()))
    }

    /// Resolve `id`, falling back to `fallback` when `id` is unset or unknown
    pub fn resolve(
        &self,
        id: Option<Uuid>,
        fallback: Option<Uuid>,
    ) -> Option<(ModelInfo, Arc<dyn ModelBackend>)> {
        id.and_then(|id| self.get(id))
            .or_else(|| fallback.and_then(|id| self.get(id)))
    }

    pub fn has_models(&self) -> bool {
        !self.models.is_empty()
    }

    pub fn available_models(&self) -> Vec<&str> {
        self.models.values().map(|m| m.info.model_id.as_str()).collect()
    }
}
