//! Storage backends for artaloka

mod jsonl;
mod sqlite;
pub mod vector;

pub use jsonl::HistoryStorage;
pub use sqlite::SqliteStorage;
pub use vector::{SimilarEntry, VectorStorage};
