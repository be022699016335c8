use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::types::GenerationRequest;
use crate::core::errors::RagError;

/// Tagged provider choice. Adding a provider means adding one variant and
/// one `LlmProvider` implementation; dispatch code stays untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    OpenRouter,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Gemini => write!(f, "gemini"),
            ProviderKind::OpenRouter => write!(f, "openrouter"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = RagError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(ProviderKind::Gemini),
            "openrouter" => Ok(ProviderKind::OpenRouter),
            other => Err(RagError::ProviderError(format!(
                "unknown provider: {other}"
            ))),
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g. "gemini", "openrouter").
    fn name(&self) -> &str;

    /// Single-shot generation.
    async fn generate(&self, request: GenerationRequest) -> Result<String, RagError>;

    /// Streaming generation: text fragments arrive on the channel as the
    /// provider produces them; the channel closing is end-of-stream.
    async fn generate_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<mpsc::Receiver<Result<String, RagError>>, RagError>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Output vector width for the configured embedding model.
    fn dimensions(&self) -> usize;

    /// Embed a single retrieval query.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;

    /// Embed a batch of document texts. Callers must verify the returned
    /// count before pairing vectors with inputs.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError>;
}
