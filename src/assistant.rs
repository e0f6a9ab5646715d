//! Per-turn orchestration
//!
//! Wires the chat history store, the personalization pipeline, and the
//! behavior learning engine together for a single user-facing turn. The
//! pipeline invocation is synchronous (its result gates the caller's
//! response); the learning run is scheduled fire-and-forget after the
//! response is already determined.

use std::sync::Arc;

use crate::behavior::BehaviorEngine;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::knowledge::KnowledgeStore;
use crate::message::{Message, Role};
use crate::pipeline::{PersonalizationPipeline, ResponseResult};
use crate::provider::{CompletionProvider, EmbeddingProvider};
use crate::retrieval::ContextRetriever;
use crate::storage::HistoryStorage;

/// The stored assistant message and the pipeline result for one turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub message: Message,
    pub result: ResponseResult,
}

/// Process-scoped assistant core.
///
/// All components are explicitly constructed and injected; there is no
/// module-level state, so tests can build an assistant per test over fakes.
pub struct Assistant {
    history: Arc<HistoryStorage>,
    pipeline: PersonalizationPipeline,
    engine: BehaviorEngine,
    session_history_limit: usize,
}

impl Assistant {
    /// Build the full component graph over the given providers
    pub async fn new(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        completion: Arc<dyn CompletionProvider>,
    ) -> Result<Self> {
        config.ensure_dirs()?;

        let store = Arc::new(KnowledgeStore::new(config).await?);
        let history = Arc::new(HistoryStorage::new(config)?);

        let engine = BehaviorEngine::new(completion.clone(), store.sqlite().clone(), config);
        let retriever = ContextRetriever::new(embedder, store, config);
        let pipeline =
            PersonalizationPipeline::new(retriever, engine.clone(), completion, config);

        Ok(Self {
            history,
            pipeline,
            engine,
            session_history_limit: config.session_history_limit,
        })
    }

    /// Get the chat history store
    pub fn history(&self) -> &HistoryStorage {
        &self.history
    }

    /// Get the behavior engine
    pub fn engine(&self) -> &BehaviorEngine {
        &self.engine
    }

    /// Handle one user message in a session.
    ///
    /// Persistence failures propagate; a lost message would corrupt the
    /// history the user expects to be durable. The response itself cannot
    /// fail, and neither can scheduling the behavior analysis.
    pub async fn handle_message(
        &self,
        user_id: &str,
        session_id: &str,
        text: &str,
    ) -> Result<TurnOutcome> {
        if text.trim().is_empty() {
            return Err(Error::invalid_input("Message text is empty"));
        }

        let user_message = Message::new(session_id, Role::User, text);
        self.history.append(&user_message)?;

        let chat_history = self
            .history
            .read_last_n(session_id, self.session_history_limit)?;

        let result = self.pipeline.respond(user_id, text, &chat_history).await;

        let assistant_message = Message::new(session_id, Role::Assistant, &result.response)
            .with_metadata(serde_json::json!({
                "context_used": result.context_used,
                "confidence_score": result.confidence_score,
            }));
        self.history.append(&assistant_message)?;

        self.schedule_analysis(user_id, chat_history, assistant_message.clone());

        Ok(TurnOutcome {
            message: assistant_message,
            result,
        })
    }

    /// Schedule a behavior analysis over the turn's transcript.
    ///
    /// Fire-and-forget: nothing awaits the task, submission cannot fail, and
    /// any error inside it is logged and discarded.
    fn schedule_analysis(
        &self,
        user_id: &str,
        mut transcript: Vec<Message>,
        assistant_message: Message,
    ) {
        transcript.push(assistant_message);
        let engine = self.engine.clone();
        let user_id = user_id.to_string();

        tokio::spawn(async move {
            if let Err(e) = engine.analyze(&user_id, &transcript).await {
                tracing::warn!(user_id, error = %e, "Background behavior analysis failed");
            }
        });
    }
}
