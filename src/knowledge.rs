//! Knowledge base types, storage facade, and data ingestion

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::provider::EmbeddingProvider;
use crate::storage::{SimilarEntry, SqliteStorage, VectorStorage};

/// Origin of a knowledge entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Owned by a single user (profile facts, ingested expenses)
    Internal,

    /// Shared reference data (market prices, cost of living)
    External,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::Internal => write!(f, "internal"),
            SourceType::External => write!(f, "external"),
        }
    }
}

/// An embedded knowledge base entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    /// Unique entry ID
    pub id: Uuid,

    /// Owning user (empty string for shared external entries)
    pub user_id: String,

    /// Origin of the entry
    pub source_type: SourceType,

    /// Category label (profile, expense, market_data, ...)
    pub category: String,

    /// The knowledge content
    pub content: String,

    /// Embedding vector for similarity search
    #[serde(skip)]
    pub embedding: Vec<f32>,

    /// Optional structured metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    /// When the entry was created
    pub created_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    /// Create a new internal (user-owned) entry
    pub fn internal(
        user_id: impl Into<String>,
        category: impl Into<String>,
        content: impl Into<String>,
        embedding: Vec<f32>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            source_type: SourceType::Internal,
            category: category.into(),
            content: content.into(),
            embedding,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Create a new external (shared) entry
    pub fn external(
        category: impl Into<String>,
        content: impl Into<String>,
        embedding: Vec<f32>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: String::new(),
            source_type: SourceType::External,
            category: category.into(),
            content: content.into(),
            embedding,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Override the creation timestamp
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Projection of a knowledge entry handed to the prompt builder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Facade over the knowledge storage backends.
///
/// Internal entries live in SQLite (queried by owner, recency order);
/// external entries live in the vector store (queried by similarity).
pub struct KnowledgeStore {
    sqlite: SqliteStorage,
    vector: VectorStorage,
}

impl KnowledgeStore {
    /// Create a new knowledge store
    pub async fn new(config: &Config) -> Result<Self> {
        config.ensure_dirs()?;

        let sqlite = SqliteStorage::new(config)?;
        let vector = VectorStorage::new(config).await?;

        Ok(Self { sqlite, vector })
    }

    /// Get the SQLite storage
    pub fn sqlite(&self) -> &SqliteStorage {
        &self.sqlite
    }

    /// Insert or update an internal entry, keyed on (user, category, content)
    pub fn upsert_internal(&self, entry: &KnowledgeEntry) -> Result<()> {
        self.sqlite.upsert_internal_knowledge(entry)
    }

    /// Fetch a user's most recent entries
    pub fn find_by_owner(&self, user_id: &str, limit: usize) -> Result<Vec<KnowledgeSnippet>> {
        self.sqlite.personal_entries(user_id, limit)
    }

    /// Add a shared external entry
    pub async fn add_external(&self, entry: &KnowledgeEntry) -> Result<()> {
        self.vector.add_external(entry).await
    }

    /// Find external entries similar to the query embedding
    pub async fn find_similar(
        &self,
        query_embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SimilarEntry>> {
        self.vector.search(query_embedding, threshold, limit).await
    }
}

/// Embeds and persists knowledge entries
pub struct KnowledgeIngestor {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<KnowledgeStore>,
}

impl KnowledgeIngestor {
    /// Create a new ingestor
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<KnowledgeStore>) -> Self {
        Self { embedder, store }
    }

    /// Ingest user-owned data into the personal knowledge base.
    ///
    /// Idempotent: re-ingesting identical (user, category, content) refreshes
    /// the stored embedding and metadata instead of creating a second entry.
    pub async fn ingest_internal(
        &self,
        user_id: &str,
        category: &str,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<KnowledgeEntry> {
        if content.trim().is_empty() {
            return Err(Error::invalid_input("No data provided for ingestion"));
        }

        // Embed the full payload so category and metadata shifts are reflected
        let payload = serde_json::to_string(&serde_json::json!({
            "category": category,
            "content": content,
            "metadata": metadata,
        }))?;
        let embedding = self.embedder.embed(&payload).await?;

        let entry = KnowledgeEntry::internal(user_id, category, content, embedding, metadata);
        self.store.upsert_internal(&entry)?;

        tracing::debug!(user_id, category, "Ingested internal knowledge entry");
        Ok(entry)
    }

    /// Ingest shared external data into the similarity-searchable store
    pub async fn ingest_external(
        &self,
        category: &str,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<KnowledgeEntry> {
        if content.trim().is_empty() {
            return Err(Error::invalid_input("No data provided for ingestion"));
        }

        let embedding = self.embedder.embed(content).await?;

        let entry = KnowledgeEntry::external(category, content, embedding, metadata);
        self.store.add_external(&entry).await?;

        tracing::debug!(category, "Ingested external knowledge entry");
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FixedEmbedder {
        dimensions: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let seed = text.len() as f32;
            Ok((0..self.dimensions).map(|i| seed + i as f32).collect())
        }
    }

    async fn store() -> (TempDir, Arc<KnowledgeStore>) {
        let dir = TempDir::new().unwrap();
        let mut config = Config::with_data_dir(dir.path());
        config.embedding_dimensions = 4;
        let store = KnowledgeStore::new(&config).await.unwrap();
        (dir, Arc::new(store))
    }

    #[tokio::test]
    async fn ingest_internal_is_idempotent() {
        let (_dir, store) = store().await;
        let ingestor = KnowledgeIngestor::new(Arc::new(FixedEmbedder { dimensions: 4 }), store.clone());

        ingestor
            .ingest_internal("user-1", "profile", "monthly income 5jt", None)
            .await
            .unwrap();
        ingestor
            .ingest_internal(
                "user-1",
                "profile",
                "monthly income 5jt",
                Some(serde_json::json!({ "source": "onboarding" })),
            )
            .await
            .unwrap();

        assert_eq!(store.sqlite().knowledge_entry_count("user-1").unwrap(), 1);

        // Metadata from the second ingest won
        let entries = store.find_by_owner("user-1", 5).unwrap();
        assert_eq!(entries[0].metadata.as_ref().unwrap()["source"], "onboarding");
    }

    #[tokio::test]
    async fn ingest_external_is_retrievable_by_similarity() {
        let (_dir, store) = store().await;
        let ingestor = KnowledgeIngestor::new(Arc::new(FixedEmbedder { dimensions: 4 }), store.clone());

        let entry = ingestor
            .ingest_external(
                "market_data",
                "harga beras 15rb per kg",
                Some(serde_json::json!({ "region": "jakarta" })),
            )
            .await
            .unwrap();

        let matches = store.find_similar(&entry.embedding, 0.75, 3).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].content, "harga beras 15rb per kg");
        assert_eq!(matches[0].metadata.as_ref().unwrap()["region"], "jakarta");
    }

    #[tokio::test]
    async fn ingest_external_rejects_empty_content() {
        let (_dir, store) = store().await;
        let ingestor = KnowledgeIngestor::new(Arc::new(FixedEmbedder { dimensions: 4 }), store);

        let result = ingestor.ingest_external("market_data", "", None).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn ingest_internal_rejects_empty_content() {
        let (_dir, store) = store().await;
        let ingestor = KnowledgeIngestor::new(Arc::new(FixedEmbedder { dimensions: 4 }), store);

        let result = ingestor.ingest_internal("user-1", "profile", "   ", None).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
