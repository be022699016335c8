use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::Settings;
use crate::core::errors::RagError;
use crate::ingest::{Chunker, IngestionPipeline};
use crate::llm::provider::{EmbeddingProvider, LlmProvider, ProviderKind};
use crate::llm::{GeminiProvider, OpenRouterProvider};
use crate::rag::{AnswerService, Embedder, KeywordExpander, Retriever};
use crate::store::SqliteDocumentStore;

/// Shared application state: the wired-up pipeline and answer services.
///
/// Everything is constructed once here and injected where needed; there
/// are no global singletons, so tests can build isolated instances with
/// fresh cache state.
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub store: Arc<SqliteDocumentStore>,
    pub pipeline: Arc<IngestionPipeline>,
    pub answers: Arc<AnswerService>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    /// Initialize the application state.
    ///
    /// 1. Validate settings (at least one provider credential)
    /// 2. Open the document store
    /// 3. Build providers, caches, retrieval, and the answer service
    pub async fn initialize(settings: Settings, db_path: PathBuf) -> Result<Self, RagError> {
        settings.validate()?;

        let timeout = Duration::from_secs(settings.provider_timeout_secs);
        let gemini = Arc::new(GeminiProvider::new(
            settings.gemini_api_key.clone(),
            settings.gemini_model.clone(),
            settings.gemini_embedding_model.clone(),
            timeout,
        ));
        let openrouter = Arc::new(OpenRouterProvider::new(
            settings.openrouter_api_key.clone(),
            settings.openrouter_model.clone(),
            settings.openrouter_base_url.clone(),
            timeout,
        ));

        let embedding: Arc<dyn EmbeddingProvider> = gemini.clone();
        let store = Arc::new(
            SqliteDocumentStore::with_path(db_path, embedding.dimensions()).await?,
        );

        let embedder = Arc::new(Embedder::new(
            embedding,
            settings.embedding_cache_capacity,
        ));

        let expansion_provider: Arc<dyn LlmProvider> = match settings.default_provider {
            ProviderKind::Gemini => gemini.clone(),
            ProviderKind::OpenRouter => openrouter.clone(),
        };
        let expander = Arc::new(KeywordExpander::new(
            expansion_provider,
            settings.keyword_cache_capacity,
        ));

        let retriever = Arc::new(Retriever::new(store.clone(), embedder.clone()));

        let mut answers = AnswerService::new(
            settings.default_provider,
            expander,
            retriever,
            settings.max_search_results,
        );
        if !settings.gemini_api_key.is_empty() {
            answers.register_provider(ProviderKind::Gemini, gemini);
        }
        if !settings.openrouter_api_key.is_empty() {
            answers.register_provider(ProviderKind::OpenRouter, openrouter);
        }

        let pipeline = Arc::new(IngestionPipeline::new(
            store.clone(),
            embedder,
            Chunker::new(settings.chunk_size, settings.chunk_overlap),
            settings.embedding_batch_size,
        ));

        Ok(AppState {
            settings,
            store,
            pipeline,
            answers: Arc::new(answers),
        })
    }
}
