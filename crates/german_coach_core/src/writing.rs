//! crates/german_coach_core/src/writing.rs
//!
//! The writing session manager: owns a single submitted handwriting image,
//! drives the one-shot vision analysis, and stores the resulting report.

use crate::domain::{WritingCorrection, WritingReport};
use crate::ports::{
    AnalysisSchema, ErrorSlot, GenerativeAiService, PortError, PortResult, PromptPart,
    ReportStore,
};
use base64::{engine::general_purpose, Engine as _};
use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

const MAX_FILE_SIZE_MB: usize = 5;
const MAX_FILE_SIZE_BYTES: usize = MAX_FILE_SIZE_MB * 1024 * 1024;

const HANDWRITING_ANALYSIS_PROMPT: &str = "You are a helpful and encouraging German language teacher. Analyze the handwritten German text in the provided image.
      - Identify any mistakes in grammar, spelling, or vocabulary.
      - Provide a brief, encouraging summary of the user's performance.
      - Create a list of specific corrections. For each correction, provide the original text snippet, the corrected version, and a simple explanation.
      - Create a list of 2-3 things the user did well (e.g., good vocabulary usage, correct sentence structure).
      - Structure your response strictly as JSON.";

/// The JSON schema the backend must conform its handwriting analysis to.
fn writing_analysis_schema() -> AnalysisSchema {
    AnalysisSchema {
        name: "handwriting_analysis",
        schema: json!({
            "type": "object",
            "properties": {
                "overallFeedback": { "type": "string" },
                "corrections": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "original": { "type": "string" },
                            "corrected": { "type": "string" },
                            "explanation": { "type": "string" }
                        },
                        "required": ["original", "corrected", "explanation"],
                        "additionalProperties": false
                    }
                },
                "positivePoints": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["overallFeedback", "corrections", "positivePoints"],
            "additionalProperties": false
        }),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WritingAnalysis {
    overall_feedback: String,
    corrections: Vec<WritingCorrection>,
    positive_points: Vec<String>,
}

/// The lifecycle of one writing-analysis session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritingState {
    Idle,
    ImageSelected,
    Analyzing,
    ReportReady,
}

/// Encodes an image into a self-contained `data:` URL.
fn encode_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime_type,
        general_purpose::STANDARD.encode(bytes)
    )
}

/// Splits a data URL back into its MIME type and base64 payload.
fn extract_image_payload(data_url: &str) -> Option<(String, String)> {
    let pattern = Regex::new(r"^data:(image/[a-z]+);base64,(.*)$").unwrap();
    let captures = pattern.captures(data_url)?;
    Some((captures[1].to_string(), captures[2].to_string()))
}

//=========================================================================================
// Writing Session Manager
//=========================================================================================

pub struct WritingSessionManager {
    ai: Arc<dyn GenerativeAiService>,
    store: Arc<dyn ReportStore>,
    errors: ErrorSlot,
    state: WritingState,
    selected_image: Option<String>,
    reports: Vec<WritingReport>,
    latest: Option<WritingReport>,
}

impl WritingSessionManager {
    /// Creates the manager and loads the historical report list. A load
    /// failure degrades to an empty history.
    pub async fn new(
        ai: Arc<dyn GenerativeAiService>,
        store: Arc<dyn ReportStore>,
        errors: ErrorSlot,
    ) -> Self {
        let reports = match store.load_writing_reports().await {
            Ok(reports) => reports,
            Err(e) => {
                warn!("Failed to load writing reports: {e}");
                Vec::new()
            }
        };
        Self {
            ai,
            store,
            errors,
            state: WritingState::Idle,
            selected_image: None,
            reports,
            latest: None,
        }
    }

    /// Accepts an uploaded image: enforces the 5 MB ceiling and the image
    /// MIME type, then stores it as a data URL and moves to `ImageSelected`.
    /// Rejections leave the state untouched.
    pub fn select_image(&mut self, mime_type: &str, bytes: &[u8]) -> PortResult<()> {
        match self.state {
            WritingState::Idle | WritingState::ImageSelected => {}
            _ => {
                return Err(PortError::InvalidInput(
                    "an analysis is already in progress".to_string(),
                ))
            }
        }

        if bytes.len() > MAX_FILE_SIZE_BYTES {
            let message = format!("Image size exceeds {MAX_FILE_SIZE_MB}MB.");
            self.errors.set(message.clone());
            return Err(PortError::InvalidInput(message));
        }
        if !mime_type
            .strip_prefix("image/")
            .is_some_and(|subtype| !subtype.is_empty() && subtype.bytes().all(|b| b.is_ascii_lowercase()))
        {
            self.errors.set("Could not read file.");
            return Err(PortError::InvalidInput(format!(
                "unsupported file type: {mime_type}"
            )));
        }

        self.selected_image = Some(encode_data_url(mime_type, bytes));
        self.state = WritingState::ImageSelected;
        self.errors.clear();
        Ok(())
    }

    /// Runs the handwriting analysis over the selected image. On failure the
    /// image is retained and the session reverts to `ImageSelected` so the
    /// user can retry.
    pub async fn analyze(&mut self) -> PortResult<WritingReport> {
        if self.state != WritingState::ImageSelected {
            return Err(PortError::InvalidInput(
                "no image selected for analysis".to_string(),
            ));
        }
        let Some(data_url) = self.selected_image.clone() else {
            return Err(PortError::InvalidInput(
                "no image selected for analysis".to_string(),
            ));
        };
        self.state = WritingState::Analyzing;

        let Some((mime_type, data)) = extract_image_payload(&data_url) else {
            self.errors.set("Invalid image format.");
            self.state = WritingState::ImageSelected;
            return Err(PortError::InvalidInput("malformed data URL".to_string()));
        };

        let result = self
            .ai
            .run_structured_analysis(
                vec![
                    PromptPart::Text(HANDWRITING_ANALYSIS_PROMPT.to_string()),
                    PromptPart::InlineImage { mime_type, data },
                ],
                writing_analysis_schema(),
            )
            .await
            .and_then(|value| {
                serde_json::from_value::<WritingAnalysis>(value)
                    .map_err(|e| PortError::MalformedResponse(e.to_string()))
            });

        match result {
            Ok(analysis) => {
                let now = Utc::now();
                let report = WritingReport {
                    id: now.to_rfc3339_opts(SecondsFormat::Millis, true),
                    date: now,
                    image_url: data_url,
                    overall_feedback: analysis.overall_feedback,
                    corrections: analysis.corrections,
                    positive_points: analysis.positive_points,
                };
                self.latest = Some(report.clone());
                self.reports.insert(0, report.clone());
                if let Err(e) = self.store.save_writing_reports(&self.reports).await {
                    warn!("Failed to persist writing reports: {e}");
                }
                self.state = WritingState::ReportReady;
                self.errors.clear();
                Ok(report)
            }
            Err(e) => {
                warn!("Writing analysis failed: {e}");
                self.errors.set("Failed to analyze writing sample.");
                self.state = WritingState::ImageSelected;
                Err(e)
            }
        }
    }

    /// Unconditionally returns to idle, clearing the image, the latest
    /// report, and the error slot.
    pub fn reset(&mut self) {
        self.state = WritingState::Idle;
        self.selected_image = None;
        self.latest = None;
        self.errors.clear();
    }

    pub fn state(&self) -> WritingState {
        self.state
    }

    pub fn selected_image(&self) -> Option<&str> {
        self.selected_image.as_deref()
    }

    /// Historical reports, newest first.
    pub fn reports(&self) -> &[WritingReport] {
        &self.reports
    }

    pub fn latest_report(&self) -> Option<&WritingReport> {
        self.latest.as_ref()
    }

    pub fn last_error(&self) -> Option<String> {
        self.errors.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ConversationReport;
    use crate::ports::ChatSession;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    struct ScriptedVisionAi {
        analyses: StdMutex<VecDeque<PortResult<serde_json::Value>>>,
        calls: StdMutex<u32>,
    }

    impl ScriptedVisionAi {
        fn new(analyses: Vec<PortResult<serde_json::Value>>) -> Self {
            Self {
                analyses: StdMutex::new(analyses.into()),
                calls: StdMutex::new(0),
            }
        }
    }

    #[async_trait]
    impl GenerativeAiService for ScriptedVisionAi {
        async fn start_chat(
            &self,
            _system_instruction: &str,
        ) -> PortResult<Arc<dyn ChatSession>> {
            Err(PortError::Unexpected("not a chat test".into()))
        }

        async fn run_structured_analysis(
            &self,
            parts: Vec<PromptPart>,
            _schema: AnalysisSchema,
        ) -> PortResult<serde_json::Value> {
            *self.calls.lock().unwrap() += 1;
            assert!(
                parts
                    .iter()
                    .any(|p| matches!(p, PromptPart::InlineImage { .. })),
                "analysis request must carry the image"
            );
            self.analyses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(PortError::Unexpected("no scripted analysis".into())))
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        writing: StdMutex<Vec<WritingReport>>,
        writing_saves: StdMutex<u32>,
    }

    #[async_trait]
    impl ReportStore for MemoryStore {
        async fn load_conversation_reports(&self) -> PortResult<Vec<ConversationReport>> {
            Ok(Vec::new())
        }

        async fn save_conversation_reports(
            &self,
            _reports: &[ConversationReport],
        ) -> PortResult<()> {
            Ok(())
        }

        async fn load_writing_reports(&self) -> PortResult<Vec<WritingReport>> {
            Ok(self.writing.lock().unwrap().clone())
        }

        async fn save_writing_reports(&self, reports: &[WritingReport]) -> PortResult<()> {
            *self.writing.lock().unwrap() = reports.to_vec();
            *self.writing_saves.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn analysis_value() -> serde_json::Value {
        json!({
            "overallFeedback": "Schön geschrieben!",
            "corrections": [{
                "original": "Ich habe gegangen",
                "corrected": "Ich bin gegangen",
                "explanation": "gehen forms its perfect tense with sein"
            }],
            "positivePoints": ["Clear handwriting"]
        })
    }

    async fn manager_with(
        ai: ScriptedVisionAi,
        store: Arc<MemoryStore>,
    ) -> WritingSessionManager {
        WritingSessionManager::new(Arc::new(ai), store, ErrorSlot::new()).await
    }

    #[tokio::test]
    async fn oversized_files_are_rejected_without_a_state_change() {
        let mut manager = manager_with(
            ScriptedVisionAi::new(vec![]),
            Arc::new(MemoryStore::default()),
        )
        .await;

        let oversized = vec![0u8; MAX_FILE_SIZE_BYTES + 1];
        assert!(manager.select_image("image/png", &oversized).is_err());
        assert_eq!(manager.state(), WritingState::Idle);
        assert!(manager.selected_image().is_none());
        assert_eq!(manager.last_error().as_deref(), Some("Image size exceeds 5MB."));
    }

    #[tokio::test]
    async fn a_file_at_the_limit_is_accepted() {
        let mut manager = manager_with(
            ScriptedVisionAi::new(vec![]),
            Arc::new(MemoryStore::default()),
        )
        .await;

        let at_limit = vec![0u8; MAX_FILE_SIZE_BYTES];
        manager
            .select_image("image/png", &at_limit)
            .expect("at the limit is allowed");
        assert_eq!(manager.state(), WritingState::ImageSelected);
        assert!(manager
            .selected_image()
            .unwrap()
            .starts_with("data:image/png;base64,"));
        assert!(manager.last_error().is_none());
    }

    #[tokio::test]
    async fn non_image_uploads_are_rejected() {
        let mut manager = manager_with(
            ScriptedVisionAi::new(vec![]),
            Arc::new(MemoryStore::default()),
        )
        .await;

        assert!(manager.select_image("application/pdf", b"%PDF-").is_err());
        assert_eq!(manager.state(), WritingState::Idle);
        assert_eq!(manager.last_error().as_deref(), Some("Could not read file."));
    }

    #[tokio::test]
    async fn analysis_success_produces_and_persists_a_report() {
        let store = Arc::new(MemoryStore::default());
        let mut manager =
            manager_with(ScriptedVisionAi::new(vec![Ok(analysis_value())]), store.clone()).await;

        manager.select_image("image/jpeg", b"not really a jpeg").unwrap();
        let data_url = manager.selected_image().unwrap().to_string();

        let report = manager.analyze().await.expect("analysis succeeds");
        assert_eq!(report.image_url, data_url);
        assert_eq!(report.corrections.len(), 1);
        assert_eq!(manager.state(), WritingState::ReportReady);
        assert_eq!(manager.reports().len(), 1);
        assert_eq!(*store.writing_saves.lock().unwrap(), 1);
        assert!(manager.last_error().is_none());
    }

    #[tokio::test]
    async fn analysis_failure_keeps_the_image_for_retry() {
        let store = Arc::new(MemoryStore::default());
        let mut manager = manager_with(
            ScriptedVisionAi::new(vec![Err(PortError::Unexpected("backend down".into()))]),
            store.clone(),
        )
        .await;

        manager.select_image("image/png", b"pixels").unwrap();
        assert!(manager.analyze().await.is_err());

        assert_eq!(manager.state(), WritingState::ImageSelected);
        assert!(manager.selected_image().is_some());
        assert!(manager.reports().is_empty());
        assert_eq!(*store.writing_saves.lock().unwrap(), 0);
        assert_eq!(
            manager.last_error().as_deref(),
            Some("Failed to analyze writing sample.")
        );
    }

    #[tokio::test]
    async fn a_malformed_data_url_never_reaches_the_gateway() {
        let ai = Arc::new(ScriptedVisionAi::new(vec![Ok(analysis_value())]));
        let store = Arc::new(MemoryStore::default());
        let mut manager =
            WritingSessionManager::new(ai.clone(), store, ErrorSlot::new()).await;

        manager.select_image("image/png", b"pixels").unwrap();
        // Corrupt the stored URL the way a broken upstream encoder would.
        manager.selected_image = Some("data:text/plain;base64,aGFsbG8=".to_string());

        assert!(manager.analyze().await.is_err());
        assert_eq!(manager.state(), WritingState::ImageSelected);
        assert_eq!(manager.last_error().as_deref(), Some("Invalid image format."));
        assert_eq!(*ai.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let mut manager = manager_with(
            ScriptedVisionAi::new(vec![Ok(analysis_value())]),
            Arc::new(MemoryStore::default()),
        )
        .await;

        manager.select_image("image/png", b"pixels").unwrap();
        manager.analyze().await.expect("analysis succeeds");
        manager.reset();

        assert_eq!(manager.state(), WritingState::Idle);
        assert!(manager.selected_image().is_none());
        assert!(manager.latest_report().is_none());
        assert!(manager.last_error().is_none());
        // History survives a reset; only the active session is cleared.
        assert_eq!(manager.reports().len(), 1);
    }

    #[test]
    fn data_url_round_trip() {
        let url = encode_data_url("image/webp", &[1, 2, 3, 4]);
        let (mime, payload) = extract_image_payload(&url).expect("well formed");
        assert_eq!(mime, "image/webp");
        assert_eq!(general_purpose::STANDARD.decode(payload).unwrap(), [1, 2, 3, 4]);
    }
}
