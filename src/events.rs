//! Wire vocabulary for the scoring backend's event streams.
//!
//! All three streaming endpoints (submit-answer, follow-up, battle-analysis)
//! share one framing and one event vocabulary; only the payload of the
//! terminal event differs.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Terminal payloads
// ---------------------------------------------------------------------------

/// Token accounting attached to a result for display (never persisted here).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageInfo {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
}

/// One interviewer-role sub-score inside a result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleScore {
    pub role_key: String,
    pub role_name: String,
    pub score: u32,
    #[serde(default)]
    pub comment: String,
}

/// The scored evaluation of one answer by one model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerResult {
    pub id: u64,
    pub user: u64,
    pub question: u64,
    #[serde(default)]
    pub question_title: String,
    #[serde(default)]
    pub category_name: String,
    #[serde(default)]
    pub user_answer: String,
    #[serde(default)]
    pub corrected_answer: String,
    pub ai_score: u32,
    #[serde(default)]
    pub ai_highlights: Vec<String>,
    #[serde(default)]
    pub ai_missing_points: Vec<String>,
    #[serde(default)]
    pub ai_suggestion: String,
    #[serde(default)]
    pub ai_improved_answer: String,
    #[serde(default)]
    pub ai_role_scores: Vec<RoleScore>,
    #[serde(default)]
    pub ai_model_name: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageInfo>,
}

/// Head-to-head analysis of two answers to the same question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BattleResult {
    pub winner: String,
    pub score_a: u32,
    pub score_b: u32,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub a_can_learn_from_b: Vec<String>,
    #[serde(default)]
    pub b_can_learn_from_a: Vec<String>,
    #[serde(default)]
    pub common_missing: Vec<String>,
}

// ---------------------------------------------------------------------------
// StreamEvent — closed union over the wire event kinds
// ---------------------------------------------------------------------------

/// One decoded event from a backend stream.
///
/// Ordering within a stream: `Thinking*` precedes `Content*`; `Result` /
/// `BattleResult` is terminal-success, `Error` terminal-failure; `Done` is an
/// end-of-stream marker that may arrive before or after a terminal event and
/// never overrides a terminal state already set.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Thinking { content: String },
    Content { content: String },
    Correction { original: String, corrected: Option<String> },
    Result(Box<AnswerResult>),
    BattleResult(Box<BattleResult>),
    Error { detail: String },
    Done,
}

#[derive(Debug, Deserialize)]
struct ContentPayload {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct CorrectionPayload {
    #[serde(default)]
    original: String,
    #[serde(default)]
    corrected: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    detail: String,
}

impl StreamEvent {
    /// Map a framed record (event name + JSON payload) to a typed event.
    ///
    /// Unknown event names and payloads that don't match the expected shape
    /// return `None`; the framing layer drops such records without aborting
    /// the stream.
    pub fn from_record(event: &str, data: &serde_json::Value) -> Option<StreamEvent> {
        match event {
            "thinking" => serde_json::from_value::<ContentPayload>(data.clone())
                .ok()
                .map(|p| StreamEvent::Thinking { content: p.content }),
            "content" => serde_json::from_value::<ContentPayload>(data.clone())
                .ok()
                .map(|p| StreamEvent::Content { content: p.content }),
            "correction" => serde_json::from_value::<CorrectionPayload>(data.clone())
                .ok()
                .map(|p| StreamEvent::Correction { original: p.original, corrected: p.corrected }),
            "result" => serde_json::from_value::<AnswerResult>(data.clone())
                .ok()
                .map(|r| StreamEvent::Result(Box::new(r))),
            "battleResult" => serde_json::from_value::<BattleResult>(data.clone())
                .ok()
                .map(|r| StreamEvent::BattleResult(Box::new(r))),
            "error" => serde_json::from_value::<ErrorPayload>(data.clone())
                .ok()
                .map(|p| StreamEvent::Error { detail: p.detail }),
            "done" => Some(StreamEvent::Done),
            _ => None,
        }
    }
}
