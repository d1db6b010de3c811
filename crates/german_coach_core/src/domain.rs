//! crates/german_coach_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs carry the camelCase wire format shared by the AI backend
//! schemas and the persisted report files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Model => write!(f, "model"),
        }
    }
}

/// One role-tagged entry in a conversation transcript.
///
/// The trailing model message of a turn starts out empty and grows in place
/// as streamed chunks arrive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// The evaluation record produced at the end of a conversation session.
///
/// Immutable once created. The id doubles as the creation timestamp, so ids
/// are unique and monotonically time-ordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationReport {
    pub id: String,
    pub date: DateTime<Utc>,
    pub overall_feedback: String,
    pub grammar_score: f64,
    pub vocabulary_score: f64,
    pub fluency_score: f64,
    pub positive_points: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    pub transcript: Vec<ChatMessage>,
}

/// One textual diff unit from a handwriting analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WritingCorrection {
    pub original: String,
    pub corrected: String,
    pub explanation: String,
}

/// The evaluation record produced for one analyzed handwriting image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WritingReport {
    pub id: String,
    pub date: DateTime<Utc>,
    /// The submitted image as a self-contained `data:` URL.
    pub image_url: String,
    pub overall_feedback: String,
    pub corrections: Vec<WritingCorrection>,
    pub positive_points: Vec<String>,
}

/// A named proficiency tier, derived from the running score average.
/// Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level {
    pub number: u8,
    pub name: &'static str,
}

/// Rounded average over all conversation reports of the per-report mean of
/// the three scores. An empty list averages to 0.
pub fn average_score(reports: &[ConversationReport]) -> u32 {
    if reports.is_empty() {
        return 0;
    }
    let total: f64 = reports
        .iter()
        .map(|r| (r.grammar_score + r.vocabulary_score + r.fluency_score) / 3.0)
        .sum();
    (total / reports.len() as f64).round() as u32
}

/// Maps an average score onto one of the five tiers. Lower bounds are
/// inclusive, so exactly 75 is already "Fortgeschrittener".
pub fn level_for(average_score: u32) -> Level {
    if average_score >= 90 {
        Level { number: 5, name: "Meister" }
    } else if average_score >= 75 {
        Level { number: 4, name: "Fortgeschrittener" }
    } else if average_score >= 50 {
        Level { number: 3, name: "Gesprächig" }
    } else if average_score >= 25 {
        Level { number: 2, name: "Anfänger" }
    } else {
        Level { number: 1, name: "Neuling" }
    }
}
