//! Runtime configuration.
//!
//! Settings come from an optional YAML file merged under environment
//! variable overrides, so a deployment can pin defaults in
//! `config.yml` while secrets stay in the environment.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::RagError;
use crate::llm::provider::ProviderKind;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Gemini API credentials and models.
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_embedding_model: String,

    /// OpenRouter credentials and model.
    pub openrouter_api_key: String,
    pub openrouter_model: String,
    pub openrouter_base_url: String,

    /// Provider used when a request does not name one.
    pub default_provider: ProviderKind,

    /// Chunking.
    pub chunk_size: usize,
    pub chunk_overlap: usize,

    /// Retrieval.
    pub max_search_results: usize,

    /// Caches.
    pub embedding_cache_capacity: usize,
    pub keyword_cache_capacity: usize,

    /// Embedding sub-batch cap per provider call.
    pub embedding_batch_size: usize,

    /// Bound on any single provider call.
    pub provider_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            gemini_model: "gemini-2.5-flash-lite".to_string(),
            gemini_embedding_model: "text-embedding-004".to_string(),
            openrouter_api_key: String::new(),
            openrouter_model: "tngtech/deepseek-r1t2-chimera:free".to_string(),
            openrouter_base_url: OPENROUTER_BASE_URL.to_string(),
            default_provider: ProviderKind::Gemini,
            chunk_size: 1000,
            chunk_overlap: 200,
            max_search_results: 10,
            embedding_cache_capacity: 1000,
            keyword_cache_capacity: 1000,
            embedding_batch_size: 50,
            provider_timeout_secs: 60,
        }
    }
}

impl Settings {
    /// Load settings: YAML file (if present) merged under env overrides.
    pub fn load() -> Result<Self, RagError> {
        let mut settings = match Self::config_path() {
            Some(path) if path.exists() => Self::from_yaml_file(&path)?,
            _ => Self::default(),
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, RagError> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents)
            .map_err(|err| RagError::Store(format!("invalid config {}: {}", path.display(), err)))
    }

    fn config_path() -> Option<PathBuf> {
        if let Ok(path) = env::var("QUARRY_CONFIG_PATH") {
            return Some(PathBuf::from(path));
        }
        let local = PathBuf::from("config.yml");
        local.exists().then_some(local)
    }

    fn apply_env_overrides(&mut self) {
        override_string(&mut self.gemini_api_key, "GEMINI_API_KEY");
        override_string(&mut self.gemini_model, "GEMINI_MODEL");
        override_string(&mut self.gemini_embedding_model, "GEMINI_EMBEDDING_MODEL");
        override_string(&mut self.openrouter_api_key, "OPENROUTER_API_KEY");
        override_string(&mut self.openrouter_model, "OPENROUTER_MODEL");
        override_string(&mut self.openrouter_base_url, "OPENROUTER_BASE_URL");
        override_parsed(&mut self.chunk_size, "CHUNK_SIZE");
        override_parsed(&mut self.chunk_overlap, "CHUNK_OVERLAP");
        override_parsed(&mut self.max_search_results, "MAX_SEARCH_RESULTS");
        override_parsed(&mut self.embedding_cache_capacity, "EMBEDDING_CACHE_SIZE");
        override_parsed(&mut self.keyword_cache_capacity, "KEYWORD_CACHE_SIZE");
        override_parsed(&mut self.embedding_batch_size, "EMBEDDING_BATCH_SIZE");
        override_parsed(&mut self.provider_timeout_secs, "PROVIDER_TIMEOUT_SECS");

        if let Ok(value) = env::var("DEFAULT_AI_PROVIDER") {
            if let Ok(kind) = ProviderKind::from_str(&value) {
                self.default_provider = kind;
            } else {
                tracing::warn!("Unknown DEFAULT_AI_PROVIDER '{}', keeping {}", value, self.default_provider);
            }
        }
    }

    /// Providers whose credentials are configured.
    pub fn available_providers(&self) -> Vec<ProviderKind> {
        let mut providers = Vec::new();
        if !self.gemini_api_key.is_empty() {
            providers.push(ProviderKind::Gemini);
        }
        if !self.openrouter_api_key.is_empty() {
            providers.push(ProviderKind::OpenRouter);
        }
        providers
    }

    pub fn validate(&self) -> Result<(), RagError> {
        if self.available_providers().is_empty() {
            return Err(RagError::ProviderUnavailable(
                "at least one API key is required (GEMINI_API_KEY or OPENROUTER_API_KEY)"
                    .to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Store(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

fn override_string(target: &mut String, key: &str) {
    if let Ok(value) = env::var(key) {
        if !value.is_empty() {
            *target = value;
        }
    }
}

fn override_parsed<T: FromStr + Copy>(target: &mut T, key: &str) {
    if let Ok(value) = env::var(key) {
        if let Ok(parsed) = value.parse::<T>() {
            *target = parsed;
        }
    }
}
