//! Generation orchestrator.
//!
//! Drives a request through its phases: context retrieval (keyword
//! expansion + vector search + assembly, all best-effort), prompt
//! building, and dispatch to the selected provider in blocking or
//! streaming mode. Retrieval problems degrade to an ungrounded answer;
//! generation problems always surface to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::context::assemble_context;
use super::keywords::KeywordExpander;
use super::search::Retriever;
use crate::core::errors::RagError;
use crate::llm::provider::{LlmProvider, ProviderKind};
use crate::llm::types::GenerationRequest;
use crate::store::KnowledgeScopes;

#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub prompt: String,
    pub system_instructions: Option<String>,
    pub scopes: KnowledgeScopes,
    pub provider: Option<ProviderKind>,
    pub expand_keywords: bool,
}

impl AnswerRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_instructions: None,
            scopes: KnowledgeScopes::default(),
            provider: None,
            expand_keywords: true,
        }
    }

    pub fn with_scopes(mut self, scopes: KnowledgeScopes) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn with_system(mut self, instructions: impl Into<String>) -> Self {
        self.system_instructions = Some(instructions.into());
        self
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn without_expansion(mut self) -> Self {
        self.expand_keywords = false;
        self
    }
}

pub struct AnswerService {
    providers: HashMap<ProviderKind, Arc<dyn LlmProvider>>,
    default_provider: ProviderKind,
    expander: Arc<KeywordExpander>,
    retriever: Arc<Retriever>,
    max_results: usize,
}

impl AnswerService {
    pub fn new(
        default_provider: ProviderKind,
        expander: Arc<KeywordExpander>,
        retriever: Arc<Retriever>,
        max_results: usize,
    ) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider,
            expander,
            retriever,
            max_results,
        }
    }

    pub fn register_provider(&mut self, kind: ProviderKind, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(kind, provider);
    }

    pub fn available_providers(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = self.providers.keys().copied().collect();
        kinds.sort_by_key(|kind| kind.to_string());
        kinds
    }

    pub fn default_provider(&self) -> ProviderKind {
        self.default_provider
    }

    fn resolve_provider(
        &self,
        requested: Option<ProviderKind>,
    ) -> Result<&Arc<dyn LlmProvider>, RagError> {
        let kind = requested.unwrap_or(self.default_provider);
        self.providers
            .get(&kind)
            .ok_or_else(|| RagError::ProviderUnavailable(format!("{kind} is not configured")))
    }

    /// Retrieve grounding context for a query. Best-effort: an empty scope
    /// set skips retrieval, and any expansion or search failure degrades
    /// to an empty context rather than failing the request.
    pub async fn retrieve_context(
        &self,
        query: &str,
        scopes: &KnowledgeScopes,
        expand_keywords: bool,
    ) -> String {
        if scopes.is_empty() {
            return String::new();
        }

        let search_text = if expand_keywords {
            self.expander.expand(query).await.join(", ")
        } else {
            query.to_string()
        };

        match self
            .retriever
            .search(&search_text, scopes, self.max_results)
            .await
        {
            Ok(sections) => {
                let context = assemble_context(&sections);
                tracing::info!(
                    "Retrieved {} sections, context length {} chars",
                    sections.len(),
                    context.len()
                );
                context
            }
            Err(err) => {
                tracing::warn!("Context retrieval failed, answering ungrounded: {}", err);
                String::new()
            }
        }
    }

    /// Final prompt: context block (with the no-quoting instruction) when
    /// grounding exists, then the user question.
    pub fn build_prompt(context: &str, question: &str) -> String {
        if context.is_empty() {
            return question.to_string();
        }

        format!(
            "Context Information:\n{context}\n\n\
             IMPORTANT: Answer the question using the Context Information above. \
             Do NOT repeat or quote the Context Information in your response unless explicitly asked.\n\n\
             User Question: {question}"
        )
    }

    async fn prepare(&self, request: &AnswerRequest) -> Result<GenerationRequest, RagError> {
        if request.prompt.trim().is_empty() {
            return Err(RagError::EmptyInput("prompt cannot be empty".to_string()));
        }

        let context = self
            .retrieve_context(&request.prompt, &request.scopes, request.expand_keywords)
            .await;
        let prompt = Self::build_prompt(&context, &request.prompt);

        let mut generation = GenerationRequest::new(prompt);
        if let Some(instructions) = &request.system_instructions {
            generation = generation.with_system(instructions.clone());
        }
        Ok(generation)
    }

    /// Blocking answer: the full generated text.
    pub async fn answer(&self, request: AnswerRequest) -> Result<String, RagError> {
        let provider = self.resolve_provider(request.provider)?;
        let generation = self.prepare(&request).await?;
        provider.generate(generation).await
    }

    /// Streaming answer: fragments arrive on the channel as the provider
    /// produces them; the channel closing is the end-of-stream marker.
    pub async fn answer_stream(
        &self,
        request: AnswerRequest,
    ) -> Result<mpsc::Receiver<Result<String, RagError>>, RagError> {
        let provider = self.resolve_provider(request.provider)?;
        let generation = self.prepare(&request).await?;
        provider.generate_stream(generation).await
    }
}
