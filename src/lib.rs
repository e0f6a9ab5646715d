//! # ArtaLoka Core
//!
//! The personalization core of the ArtaLoka personal-finance assistant:
//! retrieval-augmented chat generation driven by a per-user behavior model.
//!
//! ## Architecture
//!
//! Two tightly coupled halves share one data plane:
//! - **Personalization pipeline** - retrieves personal and external
//!   knowledge, reads the behavior model, assembles a system prompt, and
//!   generates a response with a confidence score.
//! - **Behavior learning engine** - after each turn, analyzes recent
//!   conversation to update the user's communication style, interests,
//!   goals, and activity patterns.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use artaloka::{Assistant, Config, OpenAiClient};
//! use std::sync::Arc;
//!
//! let config = Config::default();
//! let client = Arc::new(OpenAiClient::from_env(&config)?);
//! let assistant = Assistant::new(&config, client.clone(), client).await?;
//!
//! let outcome = assistant.handle_message(user_id, session_id, "halo").await?;
//! println!("{}", outcome.result.response);
//! ```

pub mod assistant;
pub mod behavior;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod message;
pub mod openai;
pub mod pipeline;
pub mod provider;
pub mod retrieval;
pub mod storage;

pub use assistant::{Assistant, TurnOutcome};
pub use behavior::{BehaviorData, BehaviorEngine};
pub use config::Config;
pub use error::{Error, Result};
pub use knowledge::{KnowledgeEntry, KnowledgeIngestor, KnowledgeStore, SourceType};
pub use message::{Message, Role};
pub use openai::OpenAiClient;
pub use pipeline::{PersonalizationPipeline, ResponseResult};
pub use provider::{ChatTurn, CompletionProvider, EmbeddingProvider};
pub use retrieval::{ContextRetriever, RetrievedContext};
