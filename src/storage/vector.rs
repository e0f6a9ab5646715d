//! Vector storage using LanceDB for external knowledge similarity search

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use lance_arrow::FixedSizeListArrayExt;
use lancedb::connect;
use lancedb::query::{ExecutableQuery, QueryBase};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::knowledge::{KnowledgeEntry, KnowledgeSnippet};

const TABLE_NAME: &str = "external_knowledge";

/// Vector storage backend using LanceDB.
///
/// Holds the shared external knowledge base (market data, cost-of-living
/// figures, economic indicators) queryable by embedding similarity.
pub struct VectorStorage {
    db: lancedb::Connection,
    dimensions: usize,
}

impl VectorStorage {
    /// Create a new vector storage
    pub async fn new(config: &Config) -> Result<Self> {
        let db = connect(config.vector_db_path().to_str().unwrap())
            .execute()
            .await
            .map_err(|e| Error::vector_db(e.to_string()))?;

        let storage = Self {
            db,
            dimensions: config.embedding_dimensions,
        };

        // Ensure table exists
        storage.ensure_table().await?;

        Ok(storage)
    }

    /// Get the schema for the external knowledge table
    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("category", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, true),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimensions as i32,
                ),
                false,
            ),
        ])
    }

    /// Ensure the external knowledge table exists
    async fn ensure_table(&self) -> Result<()> {
        let tables = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| Error::vector_db(e.to_string()))?;

        if !tables.contains(&TABLE_NAME.to_string()) {
            // Create empty table with schema
            let schema = Arc::new(self.schema());

            let empty_batch = RecordBatch::new_empty(schema.clone());
            let batches = vec![empty_batch];
            let reader = RecordBatchIterator::new(batches.into_iter().map(Ok), schema);

            self.db
                .create_table(TABLE_NAME, Box::new(reader))
                .execute()
                .await
                .map_err(|e| Error::vector_db(e.to_string()))?;
        }

        Ok(())
    }

    /// Add an external knowledge entry to the vector store
    pub async fn add_external(&self, entry: &KnowledgeEntry) -> Result<()> {
        if entry.embedding.len() != self.dimensions {
            return Err(Error::vector_db(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimensions,
                entry.embedding.len()
            )));
        }

        let metadata = entry
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        // Build arrays for the record batch
        let id_array = StringArray::from(vec![entry.id.to_string()]);
        let category_array = StringArray::from(vec![entry.category.clone()]);
        let content_array = StringArray::from(vec![entry.content.clone()]);
        let metadata_array = StringArray::from(vec![metadata]);

        // Build the vector array
        let values = Float32Array::from(entry.embedding.clone());
        let vector_array = FixedSizeListArray::try_new_from_values(values, self.dimensions as i32)
            .map_err(|e: arrow_schema::ArrowError| Error::vector_db(e.to_string()))?;

        let schema = Arc::new(self.schema());
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(id_array) as Arc<dyn Array>,
                Arc::new(category_array),
                Arc::new(content_array),
                Arc::new(metadata_array),
                Arc::new(vector_array),
            ],
        )
        .map_err(|e| Error::vector_db(e.to_string()))?;

        let batches = vec![batch];
        let reader = RecordBatchIterator::new(batches.into_iter().map(Ok), schema);

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| Error::vector_db(e.to_string()))?;

        table
            .add(Box::new(reader))
            .execute()
            .await
            .map_err(|e| Error::vector_db(e.to_string()))?;

        Ok(())
    }

    /// Search for external knowledge similar to the query embedding
    pub async fn search(
        &self,
        query_embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SimilarEntry>> {
        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e: lancedb::Error| Error::vector_db(e.to_string()))?;

        let query = table
            .vector_search(query_embedding.to_vec())
            .map_err(|e: lancedb::Error| Error::vector_db(e.to_string()))?
            .limit(limit);

        let stream = query
            .execute()
            .await
            .map_err(|e: lancedb::Error| Error::vector_db(e.to_string()))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect::<Vec<RecordBatch>>()
            .await
            .map_err(|e: lancedb::Error| Error::vector_db(e.to_string()))?;

        let mut results = Vec::new();

        for batch in batches {
            let content_col: &Arc<dyn Array> = batch
                .column_by_name("content")
                .ok_or_else(|| Error::vector_db("Missing content column"))?;
            let metadata_col: &Arc<dyn Array> = batch
                .column_by_name("metadata")
                .ok_or_else(|| Error::vector_db("Missing metadata column"))?;
            let distance_col: &Arc<dyn Array> = batch
                .column_by_name("_distance")
                .ok_or_else(|| Error::vector_db("Missing _distance column"))?;

            let contents = content_col
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| Error::vector_db("content column is not StringArray"))?;
            let metadatas = metadata_col
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| Error::vector_db("metadata column is not StringArray"))?;
            let distances = distance_col
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| Error::vector_db("_distance column is not Float32Array"))?;

            for i in 0..batch.num_rows() {
                let distance = distances.value(i);
                // LanceDB returns L2 distance, convert to similarity score
                let score = 1.0 / (1.0 + distance);

                if score >= threshold {
                    let metadata = if metadatas.is_null(i) {
                        None
                    } else {
                        serde_json::from_str(metadatas.value(i)).ok()
                    };

                    results.push(SimilarEntry {
                        content: contents.value(i).to_string(),
                        metadata,
                        score,
                    });
                }
            }
        }

        Ok(results)
    }
}

/// Result from a vector similarity search
#[derive(Debug, Clone)]
pub struct SimilarEntry {
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub score: f32,
}

impl From<SimilarEntry> for KnowledgeSnippet {
    fn from(entry: SimilarEntry) -> Self {
        Self {
            content: entry.content,
            metadata: entry.metadata,
        }
    }
}

use futures::TryStreamExt;
