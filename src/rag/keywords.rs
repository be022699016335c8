//! Generative keyword expansion.
//!
//! Broadens a user query into related search terms before retrieval. The
//! expansion model is best-effort: on any failure the original query is
//! the whole result, so retrieval never aborts on expansion problems.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::TtlCache;
use crate::llm::provider::LlmProvider;
use crate::llm::types::GenerationRequest;

pub const DEFAULT_KEYWORD_CACHE_CAPACITY: usize = 1000;

const KEYWORD_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

pub struct KeywordExpander {
    provider: Arc<dyn LlmProvider>,
    cache: Mutex<TtlCache<String, Vec<String>>>,
}

impl KeywordExpander {
    pub fn new(provider: Arc<dyn LlmProvider>, cache_capacity: usize) -> Self {
        Self {
            provider,
            cache: Mutex::new(TtlCache::new(cache_capacity, KEYWORD_CACHE_TTL)),
        }
    }

    fn expansion_prompt(query: &str) -> String {
        format!(
            "You are a search expert. Generate 5-10 search keywords for the following user question.\n\
             The keywords will be used to search a document database.\n\n\
             User Question: \"{query}\"\n\n\
             Rules:\n\
             1. If the question is not in English, generate keywords in BOTH the original language and English.\n\
             2. Include synonyms, related terms, and important nouns.\n\
             3. Remove question words (what, how, why).\n\
             4. Return ONLY the keywords separated by commas.\n\n\
             Keywords:"
        )
    }

    /// Split a model response into terms and put the original query first.
    fn parse_terms(response: &str, query: &str) -> Vec<String> {
        let separator = if response.contains(',') { ',' } else { '\n' };

        let mut terms: Vec<String> = response
            .split(separator)
            .map(|term| term.trim().to_string())
            .filter(|term| !term.is_empty())
            .collect();
        terms.dedup();

        if !terms.iter().any(|term| term == query) {
            terms.insert(0, query.to_string());
        }
        terms
    }

    /// Expand a query into an ordered list of search terms, cached by the
    /// exact query string. Never fails: a model error degrades to
    /// `[query]`.
    pub async fn expand(&self, query: &str) -> Vec<String> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }

        if let Some(terms) = self.cache.lock().unwrap().get(&query.to_string()) {
            tracing::debug!("Keyword cache hit for '{}'", query);
            return terms;
        }

        let request = GenerationRequest::new(Self::expansion_prompt(query));
        let terms = match self.provider.generate(request).await {
            Ok(response) => Self::parse_terms(&response, query),
            Err(err) => {
                tracing::warn!("Keyword expansion failed for '{}': {}", query, err);
                return vec![query.to_string()];
            }
        };

        self.cache
            .lock()
            .unwrap()
            .insert(query.to_string(), terms.clone());
        terms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::RagError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct ScriptedProvider {
        response: Option<String>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(response: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                response: response.map(|s| s.to_string()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _request: GenerationRequest) -> Result<String, RagError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response
                .clone()
                .ok_or_else(|| RagError::ProviderError("scripted failure".to_string()))
        }

        async fn generate_stream(
            &self,
            _request: GenerationRequest,
        ) -> Result<mpsc::Receiver<Result<String, RagError>>, RagError> {
            Err(RagError::ProviderError("not streamed".to_string()))
        }
    }

    #[test]
    fn comma_and_newline_responses_both_parse() {
        let terms = KeywordExpander::parse_terms("server setup, install guide, config", "q");
        assert_eq!(terms, vec!["q", "server setup", "install guide", "config"]);

        let terms = KeywordExpander::parse_terms("server setup\ninstall guide\n", "q");
        assert_eq!(terms, vec!["q", "server setup", "install guide"]);
    }

    #[test]
    fn original_query_is_not_duplicated() {
        let terms = KeywordExpander::parse_terms("install, how to install", "install");
        assert_eq!(terms[0], "install");
        assert_eq!(terms.iter().filter(|t| *t == "install").count(), 1);
    }

    #[tokio::test]
    async fn model_failure_degrades_to_the_query_alone() {
        let expander = KeywordExpander::new(ScriptedProvider::new(None), 16);
        let terms = expander.expand("how to install the server").await;
        assert_eq!(terms, vec!["how to install the server".to_string()]);
    }

    #[tokio::test]
    async fn expansion_is_cached_by_exact_query() {
        let provider = ScriptedProvider::new(Some("alpha, beta"));
        let expander = KeywordExpander::new(provider.clone(), 16);

        let first = expander.expand("q").await;
        let second = expander.expand("q").await;
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let provider = ScriptedProvider::new(None);
        let expander = KeywordExpander::new(provider.clone(), 16);

        expander.expand("q").await;
        expander.expand("q").await;
        // both attempts reached the provider: a failure must not pin the
        // fallback into the cache
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }
}
