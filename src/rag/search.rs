//! Scoped vector search.
//!
//! Embeds the query text, asks the document store for the nearest chunks
//! within the allowed knowledge scopes, and falls back to raw document
//! content for a lone bot scope whose chunks produced no hits.

use std::sync::Arc;

use super::context::ContextSection;
use super::embedder::Embedder;
use crate::core::errors::RagError;
use crate::store::{DocumentStore, KnowledgeScopes};

pub struct Retriever {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<Embedder>,
}

impl Retriever {
    pub fn new(store: Arc<dyn DocumentStore>, embedder: Arc<Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Nearest chunks for the query text, ordered by ascending distance.
    ///
    /// An empty scope set is refused outright rather than widened to the
    /// whole corpus. When nothing matches and the scope set is exactly one
    /// bot, each of that bot's documents' retained raw text is returned
    /// verbatim so small bots without working chunks still answer from
    /// their uploads.
    pub async fn search(
        &self,
        query_text: &str,
        scopes: &KnowledgeScopes,
        limit: usize,
    ) -> Result<Vec<ContextSection>, RagError> {
        if scopes.is_empty() {
            return Err(RagError::ScopeRequired);
        }

        let embedding = self.embedder.embed(query_text).await?;
        let hits = self
            .store
            .nearest_chunks(&embedding, scopes, limit)
            .await?;

        if hits.is_empty() {
            if let Some(bot_id) = scopes.lone_bot() {
                tracing::info!("No chunks matched, falling back to raw content for bot {}", bot_id);
                return self.raw_content_fallback(bot_id).await;
            }
            return Ok(Vec::new());
        }

        Ok(hits
            .into_iter()
            .map(|hit| ContextSection::new(hit.source, hit.chunk.content))
            .collect())
    }

    async fn raw_content_fallback(&self, bot_id: &str) -> Result<Vec<ContextSection>, RagError> {
        let documents = self.store.documents_for_bot(bot_id).await?;
        Ok(documents
            .into_iter()
            .filter_map(|doc| {
                let content = doc.content.filter(|text| !text.trim().is_empty())?;
                Some(ContextSection::new(doc.filename, content))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::EmbeddingProvider;
    use crate::store::{
        ChunkRecord, DocumentRecord, DocumentStatus, SqliteDocumentStore,
    };
    use async_trait::async_trait;
    use chrono::Utc;

    struct FixedEmbedding(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedding {
        fn dimensions(&self) -> usize {
            self.0.len()
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, RagError> {
            Ok(self.0.clone())
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
            Ok(vec![self.0.clone(); texts.len()])
        }
    }

    async fn test_store() -> Arc<SqliteDocumentStore> {
        let tmp = std::env::temp_dir().join(format!("quarry-search-{}.db", uuid::Uuid::new_v4()));
        Arc::new(SqliteDocumentStore::with_path(tmp, 3).await.unwrap())
    }

    fn retriever(store: Arc<SqliteDocumentStore>, query_embedding: Vec<f32>) -> Retriever {
        let embedder = Arc::new(Embedder::new(Arc::new(FixedEmbedding(query_embedding)), 16));
        Retriever::new(store, embedder)
    }

    fn document(id: &str, bot: Option<&str>, kb: Option<&str>, content: Option<&str>) -> DocumentRecord {
        DocumentRecord {
            id: id.to_string(),
            knowledge_base_id: kb.map(|s| s.to_string()),
            bot_id: bot.map(|s| s.to_string()),
            filename: format!("{id}.txt"),
            file_type: "txt".to_string(),
            content: content.map(|s| s.to_string()),
            file_size: 0,
            total_chunks: 0,
            status: DocumentStatus::Completed,
            error_message: None,
            uploaded_at: Utc::now(),
        }
    }

    fn chunk(id: &str, doc: &str, content: &str) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            document_id: doc.to_string(),
            chunk_index: 0,
            total_chunks: 1,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn empty_scope_set_is_refused() {
        let store = test_store().await;
        let retriever = retriever(store, vec![1.0, 0.0, 0.0]);

        let err = retriever
            .search("anything", &KnowledgeScopes::default(), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::ScopeRequired));
    }

    #[tokio::test]
    async fn matching_chunks_become_labeled_sections() {
        let store = test_store().await;
        store
            .insert_document(&document("d1", None, Some("kb1"), None))
            .await
            .unwrap();
        store
            .insert_chunks(vec![(chunk("c1", "d1", "Alpha bravo charlie."), vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        let retriever = retriever(store, vec![1.0, 0.0, 0.0]);
        let scopes = KnowledgeScopes::knowledge_bases(vec!["kb1".to_string()]);
        let sections = retriever.search("alpha", &scopes, 10).await.unwrap();

        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].source, "d1.txt");
        assert_eq!(sections[0].content, "Alpha bravo charlie.");
    }

    #[tokio::test]
    async fn lone_bot_scope_falls_back_to_raw_content() {
        let store = test_store().await;
        store
            .insert_document(&document("d1", Some("bot1"), None, Some("Full manual text.")))
            .await
            .unwrap();
        // no chunks at all for this bot

        let retriever = retriever(store, vec![1.0, 0.0, 0.0]);
        let sections = retriever
            .search("anything", &KnowledgeScopes::bot("bot1"), 10)
            .await
            .unwrap();

        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].source, "d1.txt");
        assert_eq!(sections[0].content, "Full manual text.");
    }

    #[tokio::test]
    async fn knowledge_base_scope_never_falls_back_to_raw_content() {
        let store = test_store().await;
        store
            .insert_document(&document("d1", None, Some("kb1"), Some("Full manual text.")))
            .await
            .unwrap();

        let retriever = retriever(store, vec![1.0, 0.0, 0.0]);
        let scopes = KnowledgeScopes::knowledge_bases(vec!["kb1".to_string()]);
        let sections = retriever.search("anything", &scopes, 10).await.unwrap();
        assert!(sections.is_empty());
    }
}
