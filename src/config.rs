//! Configuration for artaloka

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the assistant core
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for all storage
    pub data_dir: PathBuf,

    /// Base URL of the OpenAI-compatible API
    pub api_base_url: String,

    /// Embedding model name
    pub embedding_model: String,

    /// Chat completion model name
    pub chat_model: String,

    /// Embedding dimensions (1536 for text-embedding-3-small)
    pub embedding_dimensions: usize,

    /// Maximum tokens per generated response
    pub max_completion_tokens: u32,

    /// Timeout applied to every provider HTTP call
    pub request_timeout: Duration,

    /// Personal knowledge entries fetched per query
    pub personal_context_limit: usize,

    /// External knowledge entries fetched per query
    pub external_context_limit: usize,

    /// Minimum similarity score for external knowledge (0.0 - 1.0)
    pub external_similarity_threshold: f32,

    /// Conversation turns included in the generation window
    pub history_window: usize,

    /// Conversation turns examined per behavior analysis
    pub analysis_window: usize,

    /// Messages loaded from a session when handling a turn
    pub session_history_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("artaloka");

        Self {
            data_dir,
            api_base_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            chat_model: "gpt-4".to_string(),
            embedding_dimensions: 1536,
            max_completion_tokens: 500,
            request_timeout: Duration::from_secs(60),
            personal_context_limit: 5,
            external_context_limit: 3,
            external_similarity_threshold: 0.75,
            history_window: 10,
            analysis_window: 10,
            session_history_limit: 20,
        }
    }
}

impl Config {
    /// Create a new config with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("knowledge.db")
    }

    /// Get the path to the vector database
    pub fn vector_db_path(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }

    /// Get the directory holding per-session conversation logs
    pub fn conversations_path(&self) -> PathBuf {
        self.data_dir.join("conversations")
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.conversations_path())?;
        std::fs::create_dir_all(self.vector_db_path())?;
        Ok(())
    }
}
