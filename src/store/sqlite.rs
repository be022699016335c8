//! SQLite-backed document store.
//!
//! In-process store using SQLite for document/chunk metadata and
//! brute-force L2 distance over little-endian f32 blobs for search.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::{
    ChunkRecord, DocumentRecord, DocumentStatus, DocumentStore, KnowledgeScopes, ScoredChunk,
};
use crate::core::errors::RagError;

pub struct SqliteDocumentStore {
    pool: SqlitePool,
    /// Embedding width the corpus is locked to.
    dimensions: usize,
    #[allow(dead_code)]
    db_path: PathBuf,
}

impl SqliteDocumentStore {
    pub async fn with_path(db_path: PathBuf, dimensions: usize) -> Result<Self, RagError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(RagError::store)?;

        let store = Self {
            pool,
            dimensions,
            db_path,
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), RagError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS knowledge_bases (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                file_count INTEGER NOT NULL DEFAULT 0,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(RagError::store)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                knowledge_base_id TEXT,
                bot_id TEXT,
                filename TEXT NOT NULL,
                file_type TEXT NOT NULL DEFAULT '',
                content TEXT,
                file_size INTEGER NOT NULL DEFAULT 0,
                total_chunks INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'processing',
                error_message TEXT,
                uploaded_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(RagError::store)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                chunk_index INTEGER NOT NULL,
                total_chunks INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(RagError::store)?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)",
            "CREATE INDEX IF NOT EXISTS idx_documents_kb ON documents(knowledge_base_id)",
            "CREATE INDEX IF NOT EXISTS idx_documents_bot ON documents(bot_id)",
            "CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(RagError::store)?;
        }

        Ok(())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    /// Euclidean distance; `f32::MAX` on width mismatch so malformed rows
    /// sort last instead of poisoning the result.
    fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return f32::MAX;
        }
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt()
    }

    fn check_dimensions(&self, embedding: &[f32]) -> Result<(), RagError> {
        if embedding.len() != self.dimensions {
            return Err(RagError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }
        Ok(())
    }

    fn parse_timestamp(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> DocumentRecord {
        let status: String = row.get("status");
        let uploaded_at: String = row.get("uploaded_at");
        DocumentRecord {
            id: row.get("id"),
            knowledge_base_id: row.get("knowledge_base_id"),
            bot_id: row.get("bot_id"),
            filename: row.get("filename"),
            file_type: row.get("file_type"),
            content: row.get("content"),
            file_size: row.get("file_size"),
            total_chunks: row.get("total_chunks"),
            status: DocumentStatus::parse(&status),
            error_message: row.get("error_message"),
            uploaded_at: Self::parse_timestamp(&uploaded_at),
        }
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> ChunkRecord {
        let created_at: String = row.get("created_at");
        ChunkRecord {
            id: row.get("id"),
            document_id: row.get("document_id"),
            chunk_index: row.get("chunk_index"),
            total_chunks: row.get("total_chunks"),
            content: row.get("content"),
            created_at: Self::parse_timestamp(&created_at),
        }
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn insert_document(&self, document: &DocumentRecord) -> Result<(), RagError> {
        sqlx::query(
            "INSERT INTO documents
                (id, knowledge_base_id, bot_id, filename, file_type, content,
                 file_size, total_chunks, status, error_message, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&document.id)
        .bind(&document.knowledge_base_id)
        .bind(&document.bot_id)
        .bind(&document.filename)
        .bind(&document.file_type)
        .bind(&document.content)
        .bind(document.file_size)
        .bind(document.total_chunks)
        .bind(document.status.as_str())
        .bind(&document.error_message)
        .bind(document.uploaded_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RagError::store)?;

        Ok(())
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentRecord>, RagError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?1")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RagError::store)?;

        Ok(row.as_ref().map(Self::row_to_document))
    }

    async fn set_document_content(&self, document_id: &str, content: &str) -> Result<(), RagError> {
        sqlx::query("UPDATE documents SET content = ?1 WHERE id = ?2")
            .bind(content)
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(RagError::store)?;

        Ok(())
    }

    async fn finish_document(
        &self,
        document_id: &str,
        status: DocumentStatus,
        error_message: Option<&str>,
        total_chunks: i64,
    ) -> Result<(), RagError> {
        sqlx::query(
            "UPDATE documents SET status = ?1, error_message = ?2, total_chunks = ?3
             WHERE id = ?4",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(total_chunks)
        .bind(document_id)
        .execute(&self.pool)
        .await
        .map_err(RagError::store)?;

        Ok(())
    }

    async fn insert_chunks(&self, items: Vec<(ChunkRecord, Vec<f32>)>) -> Result<(), RagError> {
        if items.is_empty() {
            return Ok(());
        }

        for (_, embedding) in &items {
            self.check_dimensions(embedding)?;
        }

        let mut tx = self.pool.begin().await.map_err(RagError::store)?;

        for (chunk, embedding) in &items {
            let blob = Self::serialize_embedding(embedding);
            sqlx::query(
                "INSERT INTO chunks
                    (id, document_id, chunk_index, total_chunks, content, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(chunk.total_chunks)
            .bind(&chunk.content)
            .bind(&blob)
            .bind(chunk.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(RagError::store)?;
        }

        tx.commit().await.map_err(RagError::store)?;
        Ok(())
    }

    async fn nearest_chunks(
        &self,
        query_embedding: &[f32],
        scopes: &KnowledgeScopes,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        // Security control: an empty scope set never widens to the corpus.
        if scopes.is_empty() {
            return Ok(Vec::new());
        }
        self.check_dimensions(query_embedding)?;

        let mut clauses = Vec::new();
        if !scopes.knowledge_base_ids.is_empty() {
            let placeholders = vec!["?"; scopes.knowledge_base_ids.len()].join(", ");
            clauses.push(format!("d.knowledge_base_id IN ({})", placeholders));
        }
        if scopes.bot_id.is_some() {
            clauses.push("d.bot_id = ?".to_string());
        }

        let sql = format!(
            "SELECT c.id, c.document_id, c.chunk_index, c.total_chunks, c.content,
                    c.embedding, c.created_at, d.filename
             FROM chunks c
             JOIN documents d ON d.id = c.document_id
             WHERE {}",
            clauses.join(" OR ")
        );

        let mut query = sqlx::query(&sql);
        for kb_id in &scopes.knowledge_base_ids {
            query = query.bind(kb_id);
        }
        if let Some(bot_id) = &scopes.bot_id {
            query = query.bind(bot_id);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(RagError::store)?;

        let mut scored: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let embedding_bytes: Vec<u8> = row.get("embedding");
                let stored = Self::deserialize_embedding(&embedding_bytes);
                ScoredChunk {
                    chunk: Self::row_to_chunk(row),
                    source: row.get("filename"),
                    distance: Self::l2_distance(query_embedding, &stored),
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit.max(1));

        Ok(scored)
    }

    async fn documents_for_bot(&self, bot_id: &str) -> Result<Vec<DocumentRecord>, RagError> {
        let rows = sqlx::query("SELECT * FROM documents WHERE bot_id = ?1 ORDER BY uploaded_at")
            .bind(bot_id)
            .fetch_all(&self.pool)
            .await
            .map_err(RagError::store)?;

        Ok(rows.iter().map(Self::row_to_document).collect())
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool, RagError> {
        let Some(document) = self.get_document(document_id).await? else {
            return Ok(false);
        };
        let chunks = self.chunk_count(document_id).await? as i64;

        let mut tx = self.pool.begin().await.map_err(RagError::store)?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?1")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(RagError::store)?;
        sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(RagError::store)?;

        if let Some(kb_id) = &document.knowledge_base_id {
            sqlx::query(
                "UPDATE knowledge_bases
                 SET file_count = MAX(0, file_count - 1),
                     chunk_count = MAX(0, chunk_count - ?1)
                 WHERE id = ?2",
            )
            .bind(chunks)
            .bind(kb_id)
            .execute(&mut *tx)
            .await
            .map_err(RagError::store)?;
        }

        tx.commit().await.map_err(RagError::store)?;
        Ok(true)
    }

    async fn chunk_count(&self, document_id: &str) -> Result<usize, RagError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?1")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await
            .map_err(RagError::store)?;

        Ok(count as usize)
    }

    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<ChunkRecord>, RagError> {
        let rows = sqlx::query(
            "SELECT id, document_id, chunk_index, total_chunks, content, created_at
             FROM chunks WHERE document_id = ?1 ORDER BY chunk_index",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(RagError::store)?;

        Ok(rows.iter().map(Self::row_to_chunk).collect())
    }

    async fn create_knowledge_base(&self, id: &str, name: &str) -> Result<(), RagError> {
        sqlx::query("INSERT OR IGNORE INTO knowledge_bases (id, name) VALUES (?1, ?2)")
            .bind(id)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(RagError::store)?;

        Ok(())
    }

    async fn adjust_scope_counters(
        &self,
        knowledge_base_id: &str,
        file_delta: i64,
        chunk_delta: i64,
    ) -> Result<(), RagError> {
        sqlx::query(
            "UPDATE knowledge_bases
             SET file_count = MAX(0, file_count + ?1),
                 chunk_count = MAX(0, chunk_count + ?2)
             WHERE id = ?3",
        )
        .bind(file_delta)
        .bind(chunk_delta)
        .bind(knowledge_base_id)
        .execute(&self.pool)
        .await
        .map_err(RagError::store)?;

        Ok(())
    }

    async fn knowledge_base_counters(
        &self,
        knowledge_base_id: &str,
    ) -> Result<Option<(i64, i64)>, RagError> {
        let row = sqlx::query("SELECT file_count, chunk_count FROM knowledge_bases WHERE id = ?1")
            .bind(knowledge_base_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RagError::store)?;

        Ok(row.map(|row| (row.get("file_count"), row.get("chunk_count"))))
    }
}
