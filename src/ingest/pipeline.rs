//! Ingestion pipeline.
//!
//! Orchestrates extraction, chunking, size-capped batch embedding, and
//! chunk persistence for one uploaded file. Sub-batches embed
//! concurrently; results are reassembled by original index offsets, so
//! `chunk_index` always reflects the split order no matter which batch
//! finishes first. A failed sub-batch drops its chunks and lowers the
//! final count without aborting the document.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};

use super::chunker::Chunker;
use super::extract::{extract_text, FileKind};
use crate::core::errors::RagError;
use crate::rag::Embedder;
use crate::store::{ChunkRecord, DocumentRecord, DocumentStatus, DocumentStore};

/// Concurrent embedding calls in flight per document.
const MAX_CONCURRENT_SUB_BATCHES: usize = 4;

/// An uploaded file as received from the caller.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub filename: String,
    pub declared_type: String,
    pub bytes: Vec<u8>,
}

/// The single knowledge scope an upload lands in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadScope {
    KnowledgeBase(String),
    Bot(String),
}

#[derive(Debug, Clone)]
pub struct IngestionOutcome {
    pub document_id: String,
    pub chunks_created: usize,
    pub file_size: i64,
    pub status: DocumentStatus,
}

pub struct IngestionPipeline {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<Embedder>,
    chunker: Chunker,
    batch_size: usize,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<Embedder>,
        chunker: Chunker,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            chunker,
            batch_size: batch_size.max(1),
        }
    }

    /// Ingest one file into the given scope.
    ///
    /// The document record is created in `Processing` state up front and
    /// always reaches a terminal state before this returns: `Completed`
    /// when at least one chunk was persisted, `Failed` otherwise.
    /// Concurrent ingestion of the *same* document is not supported; the
    /// caller must serialize per document.
    pub async fn ingest(
        &self,
        upload: FileUpload,
        scope: UploadScope,
    ) -> Result<IngestionOutcome, RagError> {
        let kind = FileKind::from_str(&upload.declared_type)?;
        let file_size = upload.bytes.len() as i64;
        let document_id = uuid::Uuid::new_v4().to_string();

        let (knowledge_base_id, bot_id) = match &scope {
            UploadScope::KnowledgeBase(id) => (Some(id.clone()), None),
            UploadScope::Bot(id) => (None, Some(id.clone())),
        };

        self.store
            .insert_document(&DocumentRecord {
                id: document_id.clone(),
                knowledge_base_id: knowledge_base_id.clone(),
                bot_id,
                filename: upload.filename.clone(),
                file_type: kind.as_str().to_string(),
                content: None,
                file_size,
                total_chunks: 0,
                status: DocumentStatus::Processing,
                error_message: None,
                uploaded_at: Utc::now(),
            })
            .await?;

        let text = match extract_text(&upload.bytes, kind) {
            Ok(text) => text,
            Err(err) => {
                self.store
                    .finish_document(&document_id, DocumentStatus::Failed, Some(&err.to_string()), 0)
                    .await?;
                return Err(err);
            }
        };

        if text.trim().is_empty() {
            tracing::warn!("No text extracted from {}", upload.filename);
            self.store
                .finish_document(
                    &document_id,
                    DocumentStatus::Failed,
                    Some("no text could be extracted"),
                    0,
                )
                .await?;
            return Ok(IngestionOutcome {
                document_id,
                chunks_created: 0,
                file_size,
                status: DocumentStatus::Failed,
            });
        }

        self.store.set_document_content(&document_id, &text).await?;

        let texts = self.chunker.split(&text);
        let total_chunks = texts.len();
        tracing::info!(
            "Split {} into {} chunks, embedding in batches of {}",
            upload.filename,
            total_chunks,
            self.batch_size
        );

        let survivors = self.embed_chunks(&document_id, texts).await;
        let chunks_created = survivors.len();

        if let Err(err) = self.store.insert_chunks(survivors).await {
            self.store
                .finish_document(&document_id, DocumentStatus::Failed, Some(&err.to_string()), 0)
                .await?;
            return Err(err);
        }

        let status = if chunks_created > 0 {
            DocumentStatus::Completed
        } else {
            DocumentStatus::Failed
        };
        let error_message = (chunks_created == 0).then_some("no chunks produced");

        self.store
            .finish_document(&document_id, status, error_message, chunks_created as i64)
            .await?;

        if status == DocumentStatus::Completed {
            if let Some(kb_id) = &knowledge_base_id {
                self.store
                    .adjust_scope_counters(kb_id, 1, chunks_created as i64)
                    .await?;
            }
        }

        Ok(IngestionOutcome {
            document_id,
            chunks_created,
            file_size,
            status,
        })
    }

    /// Embed chunk texts in size-capped sub-batches, fanning out
    /// concurrently and pairing each surviving vector with its original
    /// split index. A failed sub-batch is skipped, not fatal.
    async fn embed_chunks(
        &self,
        document_id: &str,
        texts: Vec<String>,
    ) -> Vec<(ChunkRecord, Vec<f32>)> {
        let total_chunks = texts.len() as i64;

        let batches: Vec<(usize, Vec<String>)> = texts
            .chunks(self.batch_size)
            .enumerate()
            .map(|(batch_idx, slice)| (batch_idx * self.batch_size, slice.to_vec()))
            .collect();

        let results: Vec<(usize, Vec<String>, Result<Vec<Vec<f32>>, RagError>)> =
            stream::iter(batches.into_iter().map(|(offset, batch)| {
                let embedder = Arc::clone(&self.embedder);
                async move {
                    let outcome = embedder.embed_batch(&batch).await;
                    (offset, batch, outcome)
                }
            }))
            .buffer_unordered(MAX_CONCURRENT_SUB_BATCHES)
            .collect()
            .await;

        let mut paired = Vec::new();
        let mut skipped = 0usize;

        for (offset, batch, outcome) in results {
            match outcome {
                Ok(vectors) => {
                    for (position, (content, embedding)) in
                        batch.into_iter().zip(vectors).enumerate()
                    {
                        paired.push((
                            ChunkRecord {
                                id: uuid::Uuid::new_v4().to_string(),
                                document_id: document_id.to_string(),
                                chunk_index: (offset + position) as i64,
                                total_chunks,
                                content,
                                created_at: Utc::now(),
                            },
                            embedding,
                        ));
                    }
                }
                Err(err) => {
                    skipped += 1;
                    tracing::warn!(
                        "Dropping embedding sub-batch at offset {} ({} chunks): {}",
                        offset,
                        batch.len(),
                        err
                    );
                }
            }
        }

        if skipped > 0 {
            tracing::warn!(
                "{} of the document's embedding sub-batches were skipped",
                skipped
            );
        }

        paired.sort_by_key(|(chunk, _)| chunk.chunk_index);
        paired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::EmbeddingProvider;
    use crate::store::SqliteDocumentStore;
    use async_trait::async_trait;

    const DIMS: usize = 3;
    const POISON: &str = "zzpoisonzz";

    /// Embeds every text to a unit vector; under-returns for any batch
    /// containing the poison marker and errors outright when told to.
    struct StubEmbedding {
        fail_all: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for StubEmbedding {
        fn dimensions(&self) -> usize {
            DIMS
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, RagError> {
            Ok(vec![1.0, 0.0, 0.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
            if self.fail_all {
                return Err(RagError::ProviderError("embedding offline".to_string()));
            }
            let count = if texts.iter().any(|t| t.contains(POISON)) {
                texts.len() - 1
            } else {
                texts.len()
            };
            Ok(vec![vec![1.0, 0.0, 0.0]; count])
        }
    }

    async fn pipeline(fail_all: bool, batch_size: usize) -> (IngestionPipeline, Arc<SqliteDocumentStore>) {
        let tmp = std::env::temp_dir().join(format!("quarry-ingest-{}.db", uuid::Uuid::new_v4()));
        let store = Arc::new(SqliteDocumentStore::with_path(tmp, DIMS).await.unwrap());
        store.create_knowledge_base("kb1", "Manuals").await.unwrap();

        let embedder = Arc::new(Embedder::new(Arc::new(StubEmbedding { fail_all }), 16));
        // 20-char budget: each short test paragraph becomes its own chunk
        let pipeline = IngestionPipeline::new(
            store.clone(),
            embedder,
            Chunker::new(20, 0),
            batch_size,
        );
        (pipeline, store)
    }

    fn upload(text: &str) -> FileUpload {
        FileUpload {
            filename: "notes.txt".to_string(),
            declared_type: "txt".to_string(),
            bytes: text.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn unsupported_type_fails_before_creating_a_record() {
        let (pipeline, _store) = pipeline(false, 50).await;
        let err = pipeline
            .ingest(
                FileUpload {
                    filename: "tool.exe".to_string(),
                    declared_type: "exe".to_string(),
                    bytes: vec![1, 2, 3],
                },
                UploadScope::KnowledgeBase("kb1".to_string()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::UnsupportedType(_)));
    }

    #[tokio::test]
    async fn whitespace_only_file_fails_without_an_error() {
        let (pipeline, store) = pipeline(false, 50).await;
        let outcome = pipeline
            .ingest(upload("   \n\n \t "), UploadScope::KnowledgeBase("kb1".to_string()))
            .await
            .unwrap();

        assert_eq!(outcome.chunks_created, 0);
        assert_eq!(outcome.status, DocumentStatus::Failed);

        let doc = store.get_document(&outcome.document_id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert_eq!(doc.error_message.as_deref(), Some("no text could be extracted"));
        assert_eq!(store.chunk_count(&outcome.document_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn chunk_indices_form_a_contiguous_range_across_sub_batches() {
        let (pipeline, store) = pipeline(false, 2).await;
        // five short paragraphs, one chunk each under the 20-char budget
        let text = "Alpha one.\n\nBravo two.\n\nCharlie three.\n\nDelta four.\n\nEcho five.";
        let outcome = pipeline
            .ingest(upload(text), UploadScope::KnowledgeBase("kb1".to_string()))
            .await
            .unwrap();

        assert_eq!(outcome.status, DocumentStatus::Completed);
        assert_eq!(outcome.chunks_created, 5);

        let chunks = store.chunks_for_document(&outcome.document_id).await.unwrap();
        let indices: Vec<i64> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert!(chunks.iter().all(|c| c.total_chunks == 5));
        assert!(chunks.iter().all(|c| c.chunk_index < c.total_chunks));

        let doc = store.get_document(&outcome.document_id).await.unwrap().unwrap();
        assert_eq!(doc.total_chunks, 5);
        assert_eq!(doc.content.as_deref(), Some(text));

        assert_eq!(
            store.knowledge_base_counters("kb1").await.unwrap(),
            Some((1, 5))
        );
    }

    #[tokio::test]
    async fn failed_sub_batch_drops_its_chunks_but_keeps_original_offsets() {
        let (pipeline, store) = pipeline(false, 1).await;
        let text = format!("Alpha one.\n\nBravo {POISON}.\n\nCharlie three.");
        let outcome = pipeline
            .ingest(upload(&text), UploadScope::KnowledgeBase("kb1".to_string()))
            .await
            .unwrap();

        // the poisoned sub-batch is dropped entirely, the rest survive
        assert_eq!(outcome.status, DocumentStatus::Completed);
        assert_eq!(outcome.chunks_created, 2);

        let chunks = store.chunks_for_document(&outcome.document_id).await.unwrap();
        let indices: Vec<i64> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 2]);
        assert!(chunks.iter().all(|c| c.total_chunks == 3));

        // the document's own count reflects persisted chunks only
        let doc = store.get_document(&outcome.document_id).await.unwrap().unwrap();
        assert_eq!(doc.total_chunks, 2);
        assert_eq!(
            store.knowledge_base_counters("kb1").await.unwrap(),
            Some((1, 2))
        );
    }

    #[tokio::test]
    async fn all_sub_batches_failing_marks_the_document_failed() {
        let (pipeline, store) = pipeline(true, 2).await;
        let outcome = pipeline
            .ingest(
                upload("Alpha one.\n\nBravo two."),
                UploadScope::KnowledgeBase("kb1".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(outcome.chunks_created, 0);
        assert_eq!(outcome.status, DocumentStatus::Failed);

        let doc = store.get_document(&outcome.document_id).await.unwrap().unwrap();
        assert_eq!(doc.error_message.as_deref(), Some("no chunks produced"));
        assert_eq!(
            store.knowledge_base_counters("kb1").await.unwrap(),
            Some((0, 0))
        );
    }

    #[tokio::test]
    async fn bot_uploads_retain_content_for_the_fallback() {
        let (pipeline, store) = pipeline(false, 50).await;
        let outcome = pipeline
            .ingest(upload("Short bot manual."), UploadScope::Bot("bot1".to_string()))
            .await
            .unwrap();

        assert_eq!(outcome.status, DocumentStatus::Completed);
        let docs = store.documents_for_bot("bot1").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content.as_deref(), Some("Short bot manual."));
    }
}
