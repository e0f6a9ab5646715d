//! Personalization pipeline
//!
//! Turns a raw user message into a context-enriched, behavior-tuned response.
//! The pipeline is a terminal absorber for generation failures: its caller
//! always gets a response, worst case the canned apology.

use serde::Serialize;
use std::sync::Arc;

use crate::behavior::{BehaviorData, BehaviorEngine, FormalityLevel, MessageLengthPreference};
use crate::config::Config;
use crate::error::Result;
use crate::message::Message;
use crate::provider::{ChatTurn, CompletionProvider};
use crate::retrieval::{ContextRetriever, RetrievedContext};

/// Canned response returned when any pipeline step fails
pub const FALLBACK_RESPONSE: &str =
    "Maaf, saya sedang mengalami kendala. Bisakah Anda mengulangi pertanyaan?";

/// Confidence attached to the canned fallback response
pub const FALLBACK_CONFIDENCE: f32 = 0.1;

/// Temperature used when no behavior model exists or the formality level is
/// mixed
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// How many context sources fed the response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContextUsed {
    pub personal_sources: usize,
    pub external_sources: usize,
}

/// The outcome of one pipeline invocation
#[derive(Debug, Clone, Serialize)]
pub struct ResponseResult {
    pub response: String,
    pub context_used: ContextUsed,
    pub confidence_score: f32,
}

impl ResponseResult {
    /// The fixed degraded result
    pub fn fallback() -> Self {
        Self {
            response: FALLBACK_RESPONSE.to_string(),
            context_used: ContextUsed {
                personal_sources: 0,
                external_sources: 0,
            },
            confidence_score: FALLBACK_CONFIDENCE,
        }
    }
}

/// Orchestrates retrieval, behavior lookup, prompt assembly, and generation
pub struct PersonalizationPipeline {
    retriever: ContextRetriever,
    engine: BehaviorEngine,
    completion: Arc<dyn CompletionProvider>,
    personal_context_limit: usize,
    history_window: usize,
}

impl PersonalizationPipeline {
    /// Create a new pipeline
    pub fn new(
        retriever: ContextRetriever,
        engine: BehaviorEngine,
        completion: Arc<dyn CompletionProvider>,
        config: &Config,
    ) -> Self {
        Self {
            retriever,
            engine,
            completion,
            personal_context_limit: config.personal_context_limit,
            history_window: config.history_window,
        }
    }

    /// Generate a personalized response.
    ///
    /// Never fails: any internal error is logged and replaced by the canned
    /// fallback, so the user-facing turn always gets an answer.
    pub async fn respond(&self, user_id: &str, query: &str, history: &[Message]) -> ResponseResult {
        match self.try_respond(user_id, query, history).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(user_id, error = %e, "Response generation failed, using fallback");
                ResponseResult::fallback()
            }
        }
    }

    async fn try_respond(
        &self,
        user_id: &str,
        query: &str,
        history: &[Message],
    ) -> Result<ResponseResult> {
        let context = self
            .retriever
            .retrieve(user_id, query, self.personal_context_limit)
            .await;

        let model = self.engine.model(user_id);

        let system_prompt = build_system_prompt(&context, model.as_ref());
        let temperature = select_temperature(model.as_ref());

        // Window the history and append the current query as the final turn
        let start = history.len().saturating_sub(self.history_window);
        let mut turns: Vec<ChatTurn> = history[start..].iter().map(ChatTurn::from).collect();
        turns.push(ChatTurn::user(query));

        let response = self
            .completion
            .complete(&system_prompt, &turns, temperature)
            .await?;

        Ok(ResponseResult {
            response,
            context_used: ContextUsed {
                personal_sources: context.personal.len(),
                external_sources: context.external.len(),
            },
            confidence_score: response_confidence(&context, model.as_ref()),
        })
    }
}

/// Select the generation temperature from the user's formality level
pub fn select_temperature(model: Option<&BehaviorData>) -> f32 {
    match model.map(|m| m.communication_style.formality_level) {
        Some(FormalityLevel::Formal) => 0.5,
        Some(FormalityLevel::Casual) => 0.8,
        _ => DEFAULT_TEMPERATURE,
    }
}

/// Score the pipeline's own confidence in the response it produced.
///
/// Monotonically non-decreasing in the number of sources and in the model
/// confidence, clamped to 0.95.
pub fn response_confidence(context: &RetrievedContext, model: Option<&BehaviorData>) -> f32 {
    let mut confidence = 0.5;

    confidence += context.personal.len() as f32 * 0.1;
    confidence += context.external.len() as f32 * 0.05;

    if let Some(model) = model {
        confidence += model.confidence_score * 0.3;
    }

    confidence.min(0.95)
}

/// Assemble the system prompt from retrieved context and the behavior model.
///
/// Deterministic, pure function of its inputs.
pub fn build_system_prompt(context: &RetrievedContext, model: Option<&BehaviorData>) -> String {
    let mut prompt = String::from(
        "Anda adalah asisten AI yang cerdas dan bernama ArtaLoka. Tugas Anda adalah \
         memberikan jawaban yang relevan dan dipersonalisasi berdasarkan pengetahuan \
         tentang user dan data kontekstual.\n",
    );

    prompt.push_str("\nKONTEKS PERSONAL USER:\n");
    for snippet in &context.personal {
        prompt.push_str(&format!("- {}\n", snippet.content));
    }

    prompt.push_str("\nINFORMASI EKSTERNAL RELEVAN:\n");
    for snippet in &context.external {
        prompt.push_str(&format!("- {}\n", snippet.content));
    }

    if let Some(model) = model {
        prompt.push_str("\nPROFIL KEPRIBADIAN USER:\n");

        let style = &model.communication_style;
        prompt.push_str(&format!(
            "- Gaya komunikasi: {}, preferensi pesan {}\n",
            serde_variant(&style.formality_level),
            serde_variant(&style.message_length_preference),
        ));

        match style.formality_level {
            FormalityLevel::Formal => {
                prompt.push_str("- Gunakan bahasa yang sopan dan formal\n");
            }
            FormalityLevel::Casual => {
                prompt.push_str("- Gunakan bahasa yang santai dan friendly\n");
            }
            FormalityLevel::Mixed => {}
        }

        match style.message_length_preference {
            MessageLengthPreference::Short => {
                prompt.push_str("- Berikan jawaban yang concise dan to-the-point\n");
            }
            MessageLengthPreference::Long => {
                prompt.push_str("- Berikan penjelasan yang detail dan komprehensif\n");
            }
            MessageLengthPreference::Medium => {}
        }

        prompt.push_str(&format!(
            "- Minat utama: {}\n",
            join_or_placeholder(&model.interests.primary_interests)
        ));
        prompt.push_str(&format!(
            "- Tujuan: {}\n",
            join_or_placeholder(&model.goals.short_term_goals)
        ));
    }

    prompt.push_str(
        "\nINSTRUKSI RESPONSE:\n\
         1. Gunakan informasi personal dan eksternal di atas untuk memberikan jawaban yang relevan\n\
         2. Sesuaikan gaya bahasa dengan preferensi user\n\
         3. Jika tidak ada informasi yang relevan, berikan jawaban umum yang membantu\n\
         4. Selalu berikan jawaban dalam Bahasa Indonesia kecuali diminta sebaliknya\n\
         5. Jika menyangkut data finansial atau ekonomi, pastikan informasi akurat dan terkini\n\
         6. Berikan saran yang actionable dan praktis\n\
         \n\
         Berikan response yang natural, membantu, dan sesuai dengan kepribadian user.\n",
    );

    prompt
}

fn join_or_placeholder(items: &[String]) -> String {
    if items.is_empty() {
        "belum teridentifikasi".to_string()
    } else {
        items.join(", ")
    }
}

/// Lowercase serde representation of a unit enum variant
fn serde_variant<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .unwrap_or_default()
}
