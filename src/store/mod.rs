//! Document store — persistence boundary for documents and their chunks.
//!
//! The trait abstracts over storage backends for the ingestion pipeline and
//! vector search. The primary implementation is `SqliteDocumentStore` in the
//! `sqlite` module.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::RagError;

pub use sqlite::SqliteDocumentStore;

/// Processing state of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "completed" => DocumentStatus::Completed,
            "failed" => DocumentStatus::Failed,
            _ => DocumentStatus::Processing,
        }
    }
}

/// A source file and its extracted text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    /// Owning knowledge base, if any. At most one of the two scope fields
    /// is set by an upload path.
    pub knowledge_base_id: Option<String>,
    /// Owning bot, if any.
    pub bot_id: Option<String>,
    pub filename: String,
    pub file_type: String,
    /// Retained extracted text; feeds the bot raw-content fallback.
    pub content: Option<String>,
    pub file_size: i64,
    pub total_chunks: i64,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// A bounded text segment of a document. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub document_id: String,
    /// Index within the original split sequence, `< total_chunks`.
    pub chunk_index: i64,
    pub total_chunks: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A search hit: the chunk, its source label, and the L2 distance to the
/// query embedding (lower is closer).
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: ChunkRecord,
    pub source: String,
    pub distance: f32,
}

/// The set of knowledge scopes a search is restricted to.
///
/// An empty set means the search returns nothing; it never widens to the
/// whole corpus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnowledgeScopes {
    pub knowledge_base_ids: Vec<String>,
    pub bot_id: Option<String>,
}

impl KnowledgeScopes {
    pub fn knowledge_bases<I: IntoIterator<Item = String>>(ids: I) -> Self {
        Self {
            knowledge_base_ids: ids.into_iter().collect(),
            bot_id: None,
        }
    }

    pub fn bot(id: impl Into<String>) -> Self {
        Self {
            knowledge_base_ids: Vec::new(),
            bot_id: Some(id.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.knowledge_base_ids.is_empty() && self.bot_id.is_none()
    }

    /// The bot id when the scope set is exactly one bot and nothing else.
    pub fn lone_bot(&self) -> Option<&str> {
        if self.knowledge_base_ids.is_empty() {
            self.bot_id.as_deref()
        } else {
            None
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist a new document record (normally in `Processing` state).
    async fn insert_document(&self, document: &DocumentRecord) -> Result<(), RagError>;

    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentRecord>, RagError>;

    /// Retain a document's extracted text (feeds the bot raw-content
    /// fallback).
    async fn set_document_content(&self, document_id: &str, content: &str) -> Result<(), RagError>;

    /// Record the terminal state of an ingestion run.
    async fn finish_document(
        &self,
        document_id: &str,
        status: DocumentStatus,
        error_message: Option<&str>,
        total_chunks: i64,
    ) -> Result<(), RagError>;

    /// Persist a batch of chunks with their embeddings. Rejects embeddings
    /// whose dimensionality differs from the store's configured width.
    async fn insert_chunks(&self, items: Vec<(ChunkRecord, Vec<f32>)>) -> Result<(), RagError>;

    /// Chunks nearest to the query embedding (ascending L2 distance),
    /// OR-filtered by the supplied scopes. An empty scope set yields an
    /// empty result.
    async fn nearest_chunks(
        &self,
        query_embedding: &[f32],
        scopes: &KnowledgeScopes,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, RagError>;

    async fn documents_for_bot(&self, bot_id: &str) -> Result<Vec<DocumentRecord>, RagError>;

    /// Delete a document, cascade its chunks, and decrement the owning
    /// knowledge base's counters. Returns false when the id is unknown.
    async fn delete_document(&self, document_id: &str) -> Result<bool, RagError>;

    async fn chunk_count(&self, document_id: &str) -> Result<usize, RagError>;

    /// A document's chunks ordered by `chunk_index`.
    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<ChunkRecord>, RagError>;

    async fn create_knowledge_base(&self, id: &str, name: &str) -> Result<(), RagError>;

    /// Atomically adjust the aggregate counters on a knowledge base,
    /// floored at zero.
    async fn adjust_scope_counters(
        &self,
        knowledge_base_id: &str,
        file_delta: i64,
        chunk_delta: i64,
    ) -> Result<(), RagError>;

    /// `(file_count, chunk_count)` for a knowledge base.
    async fn knowledge_base_counters(
        &self,
        knowledge_base_id: &str,
    ) -> Result<Option<(i64, i64)>, RagError>;
}
