//! SQLite storage for internal knowledge entries and behavior records

use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::behavior::{BehaviorData, BehaviorRecord};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::knowledge::{KnowledgeEntry, KnowledgeSnippet};

/// SQLite storage backend
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Create a new SQLite storage
    pub fn new(config: &Config) -> Result<Self> {
        let conn = Connection::open(config.sqlite_path())?;

        // Initialize schema
        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub(crate) fn run_sql(&self, sql: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    /// Insert an internal knowledge entry, or update embedding and metadata
    /// in place when the same (user, category, content) was already ingested.
    ///
    /// The conditional write is a single statement against the uniqueness
    /// index, so concurrent ingests of the same data cannot duplicate rows.
    pub fn upsert_internal_knowledge(&self, entry: &KnowledgeEntry) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO knowledge_entries (
                id, user_id, source_type, category, content, embedding, metadata, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(user_id, category, content) DO UPDATE SET
                embedding = excluded.embedding,
                metadata = excluded.metadata
            "#,
            params![
                entry.id.to_string(),
                entry.user_id,
                entry.source_type.to_string(),
                entry.category,
                entry.content,
                serde_json::to_string(&entry.embedding)?,
                entry
                    .metadata
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                entry.created_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    /// Fetch the most recent knowledge entries owned by a user.
    ///
    /// No similarity filter is applied to personal knowledge; this is a
    /// straight recency scan.
    pub fn personal_entries(&self, user_id: &str, limit: usize) -> Result<Vec<KnowledgeSnippet>> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;

        let mut stmt = conn.prepare(
            r#"
            SELECT content, metadata FROM knowledge_entries
            WHERE user_id = ?1
            ORDER BY created_at DESC
            LIMIT ?2
            "#,
        )?;

        let rows = stmt.query_map(params![user_id, limit as i64], |row| {
            let metadata: Option<String> = row.get(1)?;
            Ok((row.get::<_, String>(0)?, metadata))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (content, metadata) = row?;
            entries.push(KnowledgeSnippet {
                content,
                metadata: metadata.as_deref().map(serde_json::from_str).transpose()?,
            });
        }

        Ok(entries)
    }

    /// Count knowledge entries owned by a user
    pub fn knowledge_entry_count(&self, user_id: &str) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM knowledge_entries WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;

        Ok(count as usize)
    }

    /// Insert a behavior record, or update the analysis in place when one
    /// already exists for (user, behavior type).
    pub fn upsert_behavior(
        &self,
        user_id: &str,
        behavior_type: &str,
        data: &BehaviorData,
    ) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO user_behaviors (
                id, user_id, behavior_type, behavior_data, confidence_score, last_updated
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id, behavior_type) DO UPDATE SET
                behavior_data = excluded.behavior_data,
                confidence_score = excluded.confidence_score,
                last_updated = excluded.last_updated
            "#,
            params![
                Uuid::new_v4().to_string(),
                user_id,
                behavior_type,
                serde_json::to_string(data)?,
                data.confidence_score,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    /// Get a behavior record for a user
    pub fn get_behavior(
        &self,
        user_id: &str,
        behavior_type: &str,
    ) -> Result<Option<BehaviorRecord>> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;

        let result = conn
            .query_row(
                r#"
                SELECT id, user_id, behavior_type, behavior_data, confidence_score, last_updated
                FROM user_behaviors
                WHERE user_id = ?1 AND behavior_type = ?2
                "#,
                params![user_id, behavior_type],
                |row| {
                    Ok(BehaviorRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        behavior_type: row.get(2)?,
                        behavior_data: row.get(3)?,
                        confidence_score: row.get(4)?,
                        last_updated: row.get(5)?,
                    })
                },
            )
            .optional()?;

        result.map(|row| row.into_record()).transpose()
    }

    /// Count behavior records for a user
    pub fn behavior_record_count(&self, user_id: &str, behavior_type: &str) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM user_behaviors WHERE user_id = ?1 AND behavior_type = ?2",
            params![user_id, behavior_type],
            |row| row.get(0),
        )?;

        Ok(count as usize)
    }
}

/// Intermediate struct for reading from SQLite
struct BehaviorRow {
    id: String,
    user_id: String,
    behavior_type: String,
    behavior_data: String,
    confidence_score: f64,
    last_updated: String,
}

impl BehaviorRow {
    fn into_record(self) -> Result<BehaviorRecord> {
        Ok(BehaviorRecord {
            id: Uuid::parse_str(&self.id).map_err(|e| Error::storage(e.to_string()))?,
            user_id: self.user_id,
            behavior_type: self.behavior_type,
            behavior_data: serde_json::from_str(&self.behavior_data)?,
            confidence_score: self.confidence_score as f32,
            last_updated: chrono::DateTime::parse_from_rfc3339(&self.last_updated)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .map_err(|e| Error::storage(e.to_string()))?,
        })
    }
}
