//! Provider traits for embedding and chat completion backends
//!
//! Both the retriever and the learning engine talk to the model layer through
//! these traits, so tests can substitute fakes without any network access.

use async_trait::async_trait;

use crate::error::Result;
use crate::message::{Message, Role};

/// A role/content pair sent to the completion provider.
///
/// This is the projection of a stored [`Message`] used for the generation
/// window: everything except role and content is dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatTurn {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Converts text into a fixed-length embedding vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text.
    ///
    /// Fails with [`crate::Error::Embedding`] when the provider returns no
    /// vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Generates text from a system prompt and ordered conversation turns
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Generate a response.
    ///
    /// The provider may stream partial output internally, but callers consume
    /// only the fully assembled text. Fails with
    /// [`crate::Error::Generation`] on provider error.
    async fn complete(
        &self,
        system_prompt: &str,
        turns: &[ChatTurn],
        temperature: f32,
    ) -> Result<String>;
}
