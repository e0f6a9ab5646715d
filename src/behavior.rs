//! Behavior learning engine
//!
//! Incrementally builds a per-user behavior model from chat history. Three of
//! the analysis steps classify text through the completion provider and parse
//! the structured output; the activity pattern step is a pure tally. Parse
//! failures fall back to documented defaults, but persistence failures
//! propagate: a silently lost behavior update is worse than a visible error
//! to the task that scheduled it.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::{Message, Role};
use crate::provider::{ChatTurn, CompletionProvider};
use crate::storage::SqliteStorage;

/// The single behavior type this engine maintains per user
pub const COMPREHENSIVE_ANALYSIS: &str = "comprehensive_analysis";

/// Temperature used for the classification prompts
const ANALYSIS_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormalityLevel {
    Formal,
    Casual,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLengthPreference {
    Short,
    Medium,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionStyle {
    Direct,
    Exploratory,
    Detailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expressiveness {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferredLanguage {
    Indonesian,
    English,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    High,
    Medium,
    Low,
}

/// How the user writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationStyle {
    pub formality_level: FormalityLevel,
    pub message_length_preference: MessageLengthPreference,
    pub question_style: QuestionStyle,
    pub emotion_expression: Expressiveness,
    pub preferred_language: PreferredLanguage,
}

impl CommunicationStyle {
    /// Default substituted when the classification output cannot be parsed
    pub fn fallback() -> Self {
        Self {
            formality_level: FormalityLevel::Casual,
            message_length_preference: MessageLengthPreference::Medium,
            question_style: QuestionStyle::Direct,
            emotion_expression: Expressiveness::Medium,
            preferred_language: PreferredLanguage::Mixed,
        }
    }
}

/// Topics the user keeps coming back to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interests {
    #[serde(default)]
    pub primary_interests: Vec<String>,
    #[serde(default)]
    pub secondary_interests: Vec<String>,
    #[serde(default)]
    pub interest_categories: BTreeMap<String, f32>,
}

impl Interests {
    /// Default substituted when the classification output cannot be parsed
    pub fn fallback() -> Self {
        Self {
            primary_interests: Vec::new(),
            secondary_interests: Vec::new(),
            interest_categories: BTreeMap::new(),
        }
    }
}

/// What the user is working toward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goals {
    #[serde(default)]
    pub short_term_goals: Vec<String>,
    #[serde(default)]
    pub long_term_goals: Vec<String>,
    #[serde(default)]
    pub goal_categories: BTreeMap<String, Vec<String>>,
    #[serde(default = "default_urgency")]
    pub urgency_level: UrgencyLevel,
}

fn default_urgency() -> UrgencyLevel {
    UrgencyLevel::Medium
}

impl Goals {
    /// Default substituted when the classification output cannot be parsed
    pub fn fallback() -> Self {
        Self {
            short_term_goals: Vec::new(),
            long_term_goals: Vec::new(),
            goal_categories: BTreeMap::new(),
            urgency_level: UrgencyLevel::Medium,
        }
    }
}

/// When the user is active, tallied from message timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTimePatterns {
    /// The 3 most frequent hours of day (0-23)
    pub peak_hours: Vec<u32>,
    /// The 3 most frequent days of week (0 = Sunday)
    pub peak_days: Vec<u32>,
    pub total_interactions: usize,
    /// Normalized over a fixed 7-day window regardless of actual span
    pub avg_daily_interactions: f32,
}

/// The full per-user behavior model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorData {
    pub communication_style: CommunicationStyle,
    pub interests: Interests,
    pub goals: Goals,
    pub active_time_patterns: ActiveTimePatterns,
    pub confidence_score: f32,
    pub last_analysis: DateTime<Utc>,
}

impl BehaviorData {
    /// A model built entirely from fallbacks, as stored for a user whose
    /// analyses all failed to parse
    pub fn initial(interaction_count: usize) -> Self {
        Self {
            communication_style: CommunicationStyle::fallback(),
            interests: Interests::fallback(),
            goals: Goals::fallback(),
            active_time_patterns: active_time_patterns(&[]),
            confidence_score: confidence_score(interaction_count),
            last_analysis: Utc::now(),
        }
    }
}

/// A persisted behavior model row
#[derive(Debug, Clone)]
pub struct BehaviorRecord {
    pub id: Uuid,
    pub user_id: String,
    pub behavior_type: String,
    pub behavior_data: BehaviorData,
    pub confidence_score: f32,
    pub last_updated: DateTime<Utc>,
}

/// Model confidence grows with the number of tracked interactions, capped at
/// 0.95
pub fn confidence_score(interaction_count: usize) -> f32 {
    (0.1 + interaction_count as f32 * 0.05).min(0.95)
}

/// Tally message timestamps into peak hours and days.
///
/// Buckets are kept in first-seen order and the sort is stable, so ties keep
/// the earlier-seen bucket first.
pub fn active_time_patterns(messages: &[Message]) -> ActiveTimePatterns {
    let hours = messages.iter().map(|m| m.created_at.hour());
    let days = messages
        .iter()
        .map(|m| m.created_at.weekday().num_days_from_sunday());

    ActiveTimePatterns {
        peak_hours: top_buckets(hours),
        peak_days: top_buckets(days),
        total_interactions: messages.len(),
        avg_daily_interactions: messages.len() as f32 / 7.0,
    }
}

fn top_buckets(values: impl Iterator<Item = u32>) -> Vec<u32> {
    let mut counts: Vec<(u32, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(bucket, _)| *bucket == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }

    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.into_iter().take(3).map(|(bucket, _)| bucket).collect()
}

/// Learns a behavior model from conversation history
#[derive(Clone)]
pub struct BehaviorEngine {
    completion: Arc<dyn CompletionProvider>,
    store: SqliteStorage,
    analysis_window: usize,
}

impl BehaviorEngine {
    /// Create a new behavior engine
    pub fn new(
        completion: Arc<dyn CompletionProvider>,
        store: SqliteStorage,
        config: &Config,
    ) -> Self {
        Self {
            completion,
            store,
            analysis_window: config.analysis_window,
        }
    }

    /// Analyze recent conversation and persist the updated behavior model.
    ///
    /// Confidence is computed from the full supplied history, while the
    /// classification steps look at the most recent analysis window only.
    pub async fn analyze(&self, user_id: &str, messages: &[Message]) -> Result<()> {
        let start = messages.len().saturating_sub(self.analysis_window);
        let recent = &messages[start..];

        let communication_style = self.analyze_communication_style(recent).await?;
        let interests = self.identify_interests(recent).await?;
        let goals = self.analyze_goals(recent).await?;

        let data = BehaviorData {
            communication_style,
            interests,
            goals,
            active_time_patterns: active_time_patterns(recent),
            confidence_score: confidence_score(messages.len()),
            last_analysis: Utc::now(),
        };

        self.store
            .upsert_behavior(user_id, COMPREHENSIVE_ANALYSIS, &data)?;

        tracing::info!(
            user_id,
            confidence = data.confidence_score,
            "Behavior analysis completed"
        );
        Ok(())
    }

    /// Get a user's behavior model.
    ///
    /// The read path never fails: a missing record and a store error both
    /// yield `None`, so personalization works even with no model yet.
    pub fn model(&self, user_id: &str) -> Option<BehaviorData> {
        match self.store.get_behavior(user_id, COMPREHENSIVE_ANALYSIS) {
            Ok(record) => record.map(|r| r.behavior_data),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Behavior model read failed");
                None
            }
        }
    }

    async fn analyze_communication_style(&self, messages: &[Message]) -> Result<CommunicationStyle> {
        let user_messages = join_contents(messages, Some(Role::User));

        let prompt = format!(
            r#"Analisis gaya komunikasi user berdasarkan pesan-pesan berikut:

{user_messages}

Berikan analisis dalam format JSON dengan fields:
- formality_level: "formal" | "casual" | "mixed"
- message_length_preference: "short" | "medium" | "long"
- question_style: "direct" | "exploratory" | "detailed"
- emotion_expression: "high" | "medium" | "low"
- preferred_language: "indonesian" | "english" | "mixed"

Hanya return JSON tanpa penjelasan tambahan."#
        );

        let response = self
            .completion
            .complete(
                "You are an expert in communication pattern analysis. Return only valid JSON.",
                &[ChatTurn::user(prompt)],
                ANALYSIS_TEMPERATURE,
            )
            .await?;

        Ok(parse_or_fallback(&response, CommunicationStyle::fallback))
    }

    async fn identify_interests(&self, messages: &[Message]) -> Result<Interests> {
        let conversation = join_contents(messages, None);

        let prompt = format!(
            r#"Identifikasi minat dan topik yang sering dibahas user:

{conversation}

Return JSON dengan format:
{{
  "primary_interests": ["topic1", "topic2"],
  "secondary_interests": ["topic3", "topic4"],
  "interest_categories": {{
    "finance": 0.8,
    "technology": 0.6
  }}
}}

Score dari 0-1 berdasarkan seberapa sering topik muncul."#
        );

        let response = self
            .completion
            .complete(
                "You are an expert in interest analysis. Return only valid JSON.",
                &[ChatTurn::user(prompt)],
                ANALYSIS_TEMPERATURE,
            )
            .await?;

        Ok(parse_or_fallback(&response, Interests::fallback))
    }

    async fn analyze_goals(&self, messages: &[Message]) -> Result<Goals> {
        let user_messages = join_contents(messages, Some(Role::User));

        let prompt = format!(
            r#"Identifikasi tujuan dan goals user berdasarkan pertanyaan-pertanyaannya:

{user_messages}

Return JSON:
{{
  "short_term_goals": ["goal1", "goal2"],
  "long_term_goals": ["goal3", "goal4"],
  "goal_categories": {{
    "financial": ["saving money", "investment"],
    "personal": ["skill development"]
  }},
  "urgency_level": "high" | "medium" | "low"
}}"#
        );

        let response = self
            .completion
            .complete(
                "You are an expert in goal analysis. Return only valid JSON.",
                &[ChatTurn::user(prompt)],
                ANALYSIS_TEMPERATURE,
            )
            .await?;

        Ok(parse_or_fallback(&response, Goals::fallback))
    }
}

/// Join message contents, optionally keeping a single role. The full
/// transcript is role-tagged; a filtered subset is raw content only.
fn join_contents(messages: &[Message], role: Option<Role>) -> String {
    match role {
        Some(role) => messages
            .iter()
            .filter(|m| m.role == role)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        None => messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Parse classification output, substituting the documented default on any
/// parse failure
fn parse_or_fallback<T: DeserializeOwned>(response: &str, fallback: fn() -> T) -> T {
    match serde_json::from_str(response.trim()).map_err(|e| Error::parse(e.to_string())) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, "Analysis output was not valid JSON, using fallback");
            fallback()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Returns a canned response per analysis step, matched on the system
    /// prompt
    struct ScriptedCompletion {
        style: String,
        interests: String,
        goals: String,
    }

    impl ScriptedCompletion {
        fn invalid() -> Self {
            Self {
                style: "sorry, no JSON here".into(),
                interests: "```json maybe```".into(),
                goals: "{broken".into(),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedCompletion {
        async fn complete(
            &self,
            system_prompt: &str,
            _turns: &[ChatTurn],
            _temperature: f32,
        ) -> Result<String> {
            if system_prompt.contains("communication pattern") {
                Ok(self.style.clone())
            } else if system_prompt.contains("interest") {
                Ok(self.interests.clone())
            } else if system_prompt.contains("goal") {
                Ok(self.goals.clone())
            } else {
                Err(Error::generation("unexpected prompt"))
            }
        }
    }

    struct FailingCompletion;

    #[async_trait]
    impl CompletionProvider for FailingCompletion {
        async fn complete(
            &self,
            _system_prompt: &str,
            _turns: &[ChatTurn],
            _temperature: f32,
        ) -> Result<String> {
            Err(Error::generation("provider down"))
        }
    }

    fn sqlite() -> (TempDir, SqliteStorage) {
        let dir = TempDir::new().unwrap();
        let config = Config::with_data_dir(dir.path());
        config.ensure_dirs().unwrap();
        let storage = SqliteStorage::new(&config).unwrap();
        (dir, storage)
    }

    fn engine(completion: Arc<dyn CompletionProvider>, store: SqliteStorage) -> BehaviorEngine {
        BehaviorEngine::new(completion, store, &Config::default())
    }

    fn message_at_hour(hour: u32) -> Message {
        let created_at = chrono::DateTime::parse_from_rfc3339(&format!(
            "2024-06-03T{:02}:15:00Z",
            hour
        ))
        .unwrap()
        .with_timezone(&Utc);
        Message::new("session-1", Role::User, "halo").with_created_at(created_at)
    }

    #[test]
    fn confidence_grows_and_caps() {
        assert!((confidence_score(1) - 0.15).abs() < 1e-6);
        assert!((confidence_score(4) - 0.30).abs() < 1e-6);
        assert!((confidence_score(20) - 0.95).abs() < 1e-6);
        // Capped, not 1.10
        assert!((confidence_score(40) - 0.95).abs() < 1e-6);
    }

    #[test]
    fn peak_hours_break_ties_by_first_seen() {
        let messages: Vec<Message> = [9, 9, 14, 9].iter().map(|h| message_at_hour(*h)).collect();
        let patterns = active_time_patterns(&messages);

        assert_eq!(patterns.peak_hours, vec![9, 14]);
        assert_eq!(patterns.total_interactions, 4);
        assert!((patterns.avg_daily_interactions - 4.0 / 7.0).abs() < 1e-6);
    }

    #[test]
    fn peak_hours_keep_top_three() {
        let messages: Vec<Message> = [1, 1, 1, 2, 2, 3, 3, 4]
            .iter()
            .map(|h| message_at_hour(*h))
            .collect();
        let patterns = active_time_patterns(&messages);

        assert_eq!(patterns.peak_hours, vec![1, 2, 3]);
    }

    #[test]
    fn empty_history_has_no_peaks() {
        let patterns = active_time_patterns(&[]);
        assert!(patterns.peak_hours.is_empty());
        assert!(patterns.peak_days.is_empty());
        assert_eq!(patterns.total_interactions, 0);
    }

    #[tokio::test]
    async fn parse_failure_falls_back_to_defaults() {
        let (_dir, store) = sqlite();
        let engine = engine(Arc::new(ScriptedCompletion::invalid()), store.clone());

        let messages = vec![Message::new("session-1", Role::User, "halo")];
        engine.analyze("user-1", &messages).await.unwrap();

        let model = engine.model("user-1").unwrap();
        assert_eq!(model.communication_style, CommunicationStyle::fallback());
        assert_eq!(model.interests, Interests::fallback());
        assert_eq!(model.goals, Goals::fallback());
        assert!((model.confidence_score - 0.15).abs() < 1e-6);
    }

    #[tokio::test]
    async fn valid_analysis_output_is_stored() {
        let (_dir, store) = sqlite();
        let completion = ScriptedCompletion {
            style: r#"{
                "formality_level": "formal",
                "message_length_preference": "short",
                "question_style": "detailed",
                "emotion_expression": "low",
                "preferred_language": "indonesian"
            }"#
            .into(),
            interests: r#"{
                "primary_interests": ["investasi"],
                "secondary_interests": ["teknologi"],
                "interest_categories": {"finance": 0.9}
            }"#
            .into(),
            goals: r#"{
                "short_term_goals": ["menabung 10jt"],
                "long_term_goals": ["beli rumah"],
                "goal_categories": {"financial": ["menabung"]},
                "urgency_level": "high"
            }"#
            .into(),
        };
        let engine = engine(Arc::new(completion), store);

        let messages = vec![
            Message::new("session-1", Role::User, "bagaimana cara investasi?"),
            Message::new("session-1", Role::Assistant, "mulai dari reksadana"),
        ];
        engine.analyze("user-1", &messages).await.unwrap();

        let model = engine.model("user-1").unwrap();
        assert_eq!(model.communication_style.formality_level, FormalityLevel::Formal);
        assert_eq!(model.interests.primary_interests, vec!["investasi"]);
        assert_eq!(model.goals.urgency_level, UrgencyLevel::High);
        assert!((model.confidence_score - 0.20).abs() < 1e-6);
    }

    #[tokio::test]
    async fn completion_failure_propagates_and_writes_nothing() {
        let (_dir, store) = sqlite();
        let engine = engine(Arc::new(FailingCompletion), store.clone());

        let messages = vec![Message::new("session-1", Role::User, "halo")];
        assert!(engine.analyze("user-1", &messages).await.is_err());
        assert!(engine.model("user-1").is_none());
    }

    #[tokio::test]
    async fn concurrent_analyze_keeps_single_record() {
        let (_dir, store) = sqlite();
        let engine = engine(Arc::new(ScriptedCompletion::invalid()), store.clone());

        let messages = vec![Message::new("session-1", Role::User, "halo")];
        let a = engine.clone();
        let b = engine.clone();
        let msgs_a = messages.clone();
        let msgs_b = messages.clone();

        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.analyze("user-1", &msgs_a).await }),
            tokio::spawn(async move { b.analyze("user-1", &msgs_b).await }),
        );
        ra.unwrap().unwrap();
        rb.unwrap().unwrap();

        assert_eq!(
            store
                .behavior_record_count("user-1", COMPREHENSIVE_ANALYSIS)
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn model_is_none_for_unknown_user() {
        let (_dir, store) = sqlite();
        let engine = engine(Arc::new(FailingCompletion), store);
        assert!(engine.model("nobody").is_none());
    }

    #[test]
    fn fallbacks_match_documented_defaults() {
        let style = CommunicationStyle::fallback();
        assert_eq!(style.formality_level, FormalityLevel::Casual);
        assert_eq!(style.message_length_preference, MessageLengthPreference::Medium);
        assert_eq!(style.question_style, QuestionStyle::Direct);
        assert_eq!(style.emotion_expression, Expressiveness::Medium);
        assert_eq!(style.preferred_language, PreferredLanguage::Mixed);

        let goals = Goals::fallback();
        assert_eq!(goals.urgency_level, UrgencyLevel::Medium);
        assert!(goals.short_term_goals.is_empty());
    }
}
