//! Context retrieval for RAG-style prompt enrichment

use std::sync::Arc;

use crate::config::Config;
use crate::knowledge::{KnowledgeSnippet, KnowledgeStore};
use crate::provider::EmbeddingProvider;

/// Retrieved context ready for injection into the system prompt.
///
/// Built fresh per request; never cached across requests.
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    /// Knowledge entries owned by the user, newest first
    pub personal: Vec<KnowledgeSnippet>,

    /// External knowledge relevant to the query
    pub external: Vec<KnowledgeSnippet>,

    /// Embedding of the query, `None` when retrieval was unavailable
    pub query_embedding: Option<Vec<f32>>,
}

impl RetrievedContext {
    /// Create an empty context
    pub fn empty() -> Self {
        Self {
            personal: Vec::new(),
            external: Vec::new(),
            query_embedding: None,
        }
    }

    /// Check if context is empty
    pub fn is_empty(&self) -> bool {
        self.personal.is_empty() && self.external.is_empty()
    }
}

/// Retrieves personal and external knowledge relevant to a query.
///
/// Degrades instead of failing: any internal error yields an empty context,
/// so a broken knowledge base never blocks a chat turn.
pub struct ContextRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<KnowledgeStore>,
    external_limit: usize,
    similarity_threshold: f32,
}

impl ContextRetriever {
    /// Create a new context retriever
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<KnowledgeStore>,
        config: &Config,
    ) -> Self {
        Self {
            embedder,
            store,
            external_limit: config.external_context_limit,
            similarity_threshold: config.external_similarity_threshold,
        }
    }

    /// Retrieve context for a query.
    ///
    /// Each data source failure is logged and treated as an empty list for
    /// that source; it never aborts the other source's fetch.
    pub async fn retrieve(&self, user_id: &str, query: &str, limit: usize) -> RetrievedContext {
        let query_embedding = match self.embedder.embed(query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Query embedding failed, retrieval unavailable");
                return RetrievedContext::empty();
            }
        };

        let personal = match self.store.find_by_owner(user_id, limit) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Personal context fetch failed");
                Vec::new()
            }
        };

        let external = match self
            .store
            .find_similar(&query_embedding, self.similarity_threshold, self.external_limit)
            .await
        {
            Ok(matches) => matches.into_iter().map(KnowledgeSnippet::from).collect(),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "External context fetch failed");
                Vec::new()
            }
        };

        tracing::debug!(
            user_id,
            personal = personal.len(),
            external = external.len(),
            "Retrieved context"
        );

        RetrievedContext {
            personal,
            external,
            query_embedding: Some(query_embedding),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::knowledge::KnowledgeEntry;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FixedEmbedder {
        dimensions: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.5; self.dimensions])
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::embedding("provider down"))
        }
    }

    async fn store() -> (TempDir, Arc<KnowledgeStore>) {
        let dir = TempDir::new().unwrap();
        let mut config = Config::with_data_dir(dir.path());
        config.embedding_dimensions = 4;
        let store = KnowledgeStore::new(&config).await.unwrap();
        (dir, Arc::new(store))
    }

    fn retriever(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<KnowledgeStore>,
    ) -> ContextRetriever {
        let mut config = Config::default();
        config.embedding_dimensions = 4;
        ContextRetriever::new(embedder, store, &config)
    }

    #[tokio::test]
    async fn embedding_failure_degrades_to_empty_context() {
        let (_dir, store) = store().await;
        let retriever = retriever(Arc::new(FailingEmbedder), store);

        let context = retriever.retrieve("user-1", "berapa pengeluaran saya?", 5).await;
        assert!(context.is_empty());
        assert!(context.query_embedding.is_none());
    }

    #[tokio::test]
    async fn personal_entries_are_returned_without_similarity_filter() {
        let (_dir, store) = store().await;

        for i in 0..3 {
            let entry = KnowledgeEntry::internal(
                "user-1",
                "expense",
                format!("expense record {}", i),
                vec![0.0; 4],
                None,
            );
            store.upsert_internal(&entry).unwrap();
        }

        let retriever = retriever(Arc::new(FixedEmbedder { dimensions: 4 }), store);
        let context = retriever.retrieve("user-1", "pengeluaran bulan ini", 5).await;

        assert_eq!(context.personal.len(), 3);
        assert!(context.query_embedding.is_some());
    }

    #[tokio::test]
    async fn other_users_entries_are_not_visible() {
        let (_dir, store) = store().await;

        let entry =
            KnowledgeEntry::internal("user-2", "profile", "someone else", vec![0.0; 4], None);
        store.upsert_internal(&entry).unwrap();

        let retriever = retriever(Arc::new(FixedEmbedder { dimensions: 4 }), store);
        let context = retriever.retrieve("user-1", "profil saya", 5).await;

        assert!(context.personal.is_empty());
    }

    #[tokio::test]
    async fn external_matches_are_filtered_by_similarity_and_capped() {
        let (_dir, store) = store().await;

        // FixedEmbedder answers every query with [0.5; 4], so these are exact
        // matches and the last one is far away
        for i in 0..4 {
            let entry = KnowledgeEntry::external(
                "market_data",
                format!("indikator {}", i),
                vec![0.5; 4],
                None,
            );
            store.add_external(&entry).await.unwrap();
        }
        let far = KnowledgeEntry::external("market_data", "tidak relevan", vec![9.0, 0.0, 0.0, 0.0], None);
        store.add_external(&far).await.unwrap();

        let retriever = retriever(Arc::new(FixedEmbedder { dimensions: 4 }), store);
        let context = retriever.retrieve("user-1", "indikator ekonomi", 5).await;

        // external_context_limit is 3, and the far entry never qualifies
        assert_eq!(context.external.len(), 3);
        assert!(context.external.iter().all(|s| s.content != "tidak relevan"));
    }

    #[tokio::test]
    async fn personal_store_failure_still_fetches_external() {
        let (_dir, store) = store().await;

        let entry = KnowledgeEntry::external("market_data", "harga beras", vec![0.5; 4], None);
        store.add_external(&entry).await.unwrap();

        // Break the personal source only
        store.sqlite().run_sql("DROP TABLE knowledge_entries").unwrap();

        let retriever = retriever(Arc::new(FixedEmbedder { dimensions: 4 }), store);
        let context = retriever.retrieve("user-1", "harga beras", 5).await;

        assert!(context.personal.is_empty());
        assert_eq!(context.external.len(), 1);
        assert!(context.query_embedding.is_some());
    }

    #[tokio::test]
    async fn limit_caps_personal_entries() {
        let (_dir, store) = store().await;

        for i in 0..8 {
            let entry = KnowledgeEntry::internal(
                "user-1",
                "expense",
                format!("entry {}", i),
                vec![0.0; 4],
                None,
            );
            store.upsert_internal(&entry).unwrap();
        }

        let retriever = retriever(Arc::new(FixedEmbedder { dimensions: 4 }), store);
        let context = retriever.retrieve("user-1", "query", 5).await;

        assert_eq!(context.personal.len(), 5);
    }
}
