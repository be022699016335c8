//! Retrieval-augmented answer backend.
//!
//! Ingests documents (extraction, chunking, batched embedding), retrieves
//! grounding context by vector similarity within allowed knowledge
//! scopes, and orchestrates blocking or streaming answer generation
//! across providers.

pub mod cache;
pub mod core;
pub mod ingest;
pub mod llm;
pub mod rag;
pub mod sse;
pub mod state;
pub mod store;

pub use crate::core::config::Settings;
pub use crate::core::errors::RagError;
pub use crate::ingest::{Chunker, FileUpload, IngestionOutcome, IngestionPipeline, UploadScope};
pub use crate::llm::{
    GeminiProvider, GenerationRequest, LlmProvider, OpenRouterProvider, ProviderKind,
};
pub use crate::rag::{
    assemble_context, AnswerRequest, AnswerService, Embedder, KeywordExpander, Retriever,
};
pub use crate::state::AppState;
pub use crate::store::{
    ChunkRecord, DocumentRecord, DocumentStatus, DocumentStore, KnowledgeScopes, ScoredChunk,
    SqliteDocumentStore,
};
