//! OpenAI-compatible API client for embeddings and chat completions

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::provider::{ChatTurn, CompletionProvider, EmbeddingProvider};

/// Client for an OpenAI-compatible HTTP API.
///
/// Implements both [`EmbeddingProvider`] and [`CompletionProvider`]. One
/// instance is shared process-wide; `reqwest::Client` handles connection
/// pooling internally.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    embedding_model: String,
    chat_model: String,
    max_completion_tokens: u32,
}

impl OpenAiClient {
    /// Create a new client with an explicit API key
    pub fn new(config: &Config, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            embedding_model: config.embedding_model.clone(),
            chat_model: config.chat_model.clone(),
            max_completion_tokens: config.max_completion_tokens,
        })
    }

    /// Create a new client reading the API key from `OPENAI_API_KEY`
    pub fn from_env(config: &Config) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::config("OPENAI_API_KEY is not set"))?;
        Self::new(config, api_key)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            input: text,
            model: &self.embedding_model,
        };

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::embedding(format!("Embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::embedding(format!(
                "Embedding request returned {}: {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::embedding(format!("Invalid embedding response: {}", e)))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| Error::embedding("No embedding data returned"))
    }
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    async fn complete(
        &self,
        system_prompt: &str,
        turns: &[ChatTurn],
        temperature: f32,
    ) -> Result<String> {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(ChatMessage {
            role: "system",
            content: system_prompt,
        });
        for turn in turns {
            messages.push(ChatMessage {
                role: match turn.role {
                    crate::message::Role::User => "user",
                    crate::message::Role::Assistant => "assistant",
                },
                content: &turn.content,
            });
        }

        let request = ChatCompletionRequest {
            model: &self.chat_model,
            messages,
            temperature,
            max_tokens: self.max_completion_tokens,
            stream: true,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::generation(format!("Completion request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::generation(format!(
                "Completion request returned {}: {}",
                status, body
            )));
        }

        // Assemble the streamed delta chunks into the final text
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut chunks: Vec<String> = Vec::new();

        while let Some(bytes) = stream.next().await {
            let bytes =
                bytes.map_err(|e| Error::generation(format!("Stream read failed: {}", e)))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..=pos);

                let Some(payload) = line.strip_prefix("data:") else {
                    continue;
                };
                let payload = payload.trim();
                if payload.is_empty() || payload == "[DONE]" {
                    continue;
                }

                if let Some(delta) = extract_delta(payload) {
                    chunks.push(delta);
                }
            }
        }

        Ok(chunks.join(""))
    }
}

/// Pull `choices[0].delta.content` from an SSE chunk, ignoring malformed lines
fn extract_delta(payload: &str) -> Option<String> {
    let value: Value = serde_json::from_str(payload).ok()?;
    value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}
