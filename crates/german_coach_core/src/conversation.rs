//! crates/german_coach_core/src/conversation.rs
//!
//! The conversation session manager: owns the chat transcript, drives the
//! streaming exchange with the AI backend, and triggers the end-of-session
//! analysis that produces a scored report.

use crate::domain::{
    average_score, level_for, ChatMessage, ConversationReport, Level,
};
use crate::ports::{
    AnalysisSchema, ChatSession, ErrorSlot, GenerativeAiService, PortError, PortResult,
    PromptPart, ReportStore,
};
use chrono::{SecondsFormat, Utc};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tracing::warn;

const SYSTEM_INSTRUCTION_CHAT: &str = "You are Herr Schmidt, a friendly, patient, and encouraging German language teacher. \
Converse with the user in German to help them practice for an exam. \
Keep your responses relatively short and clear, suitable for a language learner. \
Your goal is to maintain a natural conversation. \
Do not explicitly correct every mistake, but you can subtly model the correct grammar or vocabulary in your responses.";

const GREETING: &str =
    "Hallo! Ich bin Herr Schmidt. Lass uns auf Deutsch sprechen. Wie geht es Ihnen heute?";

const ANALYSIS_PROMPT_TEMPLATE: &str = r#"You are a German language teaching expert. Analyze the following conversation transcript between a student (user) and a teacher (model). Provide a detailed analysis based on the student's performance.

Transcript:
---
{transcript}
---

Your task is to evaluate the student's German skills and provide a report in a strict JSON format.

1.  **overallFeedback**: Write a brief, encouraging paragraph summarizing the student's performance. Mention their strengths and the general impression.
2.  **scores (0-100)**:
    *   **grammarScore**: Rate the student's grammatical accuracy. Consider sentence structure, verb conjugations, noun cases (nominative, accusative, dative), and prepositions.
    *   **vocabularyScore**: Rate the student's use of vocabulary. Consider the range of words, appropriateness of word choice, and avoidance of repetition.
    *   **fluencyScore**: Rate the student's conversational fluency. Consider the flow of the conversation, hesitation, and the ability to express ideas smoothly.
3.  **positivePoints**: List 2-3 specific things the student did well. Be specific, e.g., "Correctly used the dative case in 'Ich gebe dem Mann ein Buch'."
4.  **areasForImprovement**: List 2-3 specific, actionable areas for improvement. Provide examples from the transcript, e.g., "The verb should be in the second position in main clauses. Instead of 'Heute ich gehe...', it should be 'Heute gehe ich...'."

Ensure your entire output is only the JSON object, with no surrounding text or markdown."#;

/// The JSON schema the backend must conform its conversation analysis to.
/// Field names, types and required sets match the persisted report format.
fn conversation_analysis_schema() -> AnalysisSchema {
    AnalysisSchema {
        name: "conversation_analysis",
        schema: json!({
            "type": "object",
            "properties": {
                "overallFeedback": { "type": "string" },
                "grammarScore": { "type": "number" },
                "vocabularyScore": { "type": "number" },
                "fluencyScore": { "type": "number" },
                "positivePoints": { "type": "array", "items": { "type": "string" } },
                "areasForImprovement": { "type": "array", "items": { "type": "string" } }
            },
            "required": [
                "overallFeedback",
                "grammarScore",
                "vocabularyScore",
                "fluencyScore",
                "positivePoints",
                "areasForImprovement"
            ],
            "additionalProperties": false
        }),
    }
}

/// The payload the analysis call returns, before it is stamped into a report.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationAnalysis {
    overall_feedback: String,
    grammar_score: f64,
    vocabulary_score: f64,
    fluency_score: f64,
    positive_points: Vec<String>,
    areas_for_improvement: Vec<String>,
}

/// The lifecycle of one conversation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    Active,
    Analyzing,
    ReportReady,
}

/// The reply to one submitted utterance. Errors are absorbed into the shared
/// error slot, so the stream always ends normally; dropping it stops both
/// consumption and transcript growth.
pub type ReplyStream = Pin<Box<dyn Stream<Item = String> + Send>>;

//=========================================================================================
// Conversation Session Manager
//=========================================================================================

pub struct ConversationSessionManager {
    ai: Arc<dyn GenerativeAiService>,
    store: Arc<dyn ReportStore>,
    errors: ErrorSlot,
    state: ConversationState,
    chat: Option<Arc<dyn ChatSession>>,
    transcript: Arc<Mutex<Vec<ChatMessage>>>,
    reports: Vec<ConversationReport>,
    latest: Option<ConversationReport>,
}

impl ConversationSessionManager {
    /// Creates the manager and loads the historical report list. A load
    /// failure degrades to an empty history.
    pub async fn new(
        ai: Arc<dyn GenerativeAiService>,
        store: Arc<dyn ReportStore>,
        errors: ErrorSlot,
    ) -> Self {
        let reports = match store.load_conversation_reports().await {
            Ok(reports) => reports,
            Err(e) => {
                warn!("Failed to load conversation reports: {e}");
                Vec::new()
            }
        };
        Self {
            ai,
            store,
            errors,
            state: ConversationState::Idle,
            chat: None,
            transcript: Arc::new(Mutex::new(Vec::new())),
            reports,
            latest: None,
        }
    }

    /// Opens a fresh chat context (discarding any prior one), seeds the
    /// transcript with the scripted greeting, and activates the session.
    /// Returns the greeting message so the caller can play it back.
    pub async fn start(&mut self) -> PortResult<ChatMessage> {
        match self.state {
            ConversationState::Idle | ConversationState::ReportReady => {}
            _ => {
                return Err(PortError::InvalidInput(
                    "a conversation is already in progress".to_string(),
                ))
            }
        }

        let chat = match self.ai.start_chat(SYSTEM_INSTRUCTION_CHAT).await {
            Ok(chat) => chat,
            Err(e) => {
                self.errors.set(e.to_string());
                return Err(e);
            }
        };

        let greeting = ChatMessage::model(GREETING);
        self.chat = Some(chat);
        *self.transcript.lock().expect("transcript lock poisoned") = vec![greeting.clone()];
        self.latest = None;
        self.state = ConversationState::Active;
        self.errors.clear();
        Ok(greeting)
    }

    /// Appends a user message plus an empty placeholder model message, then
    /// returns the reply as a chunk stream. Each polled chunk is appended to
    /// the placeholder before it is yielded, so transcript observers see
    /// monotonically growing prefixes in arrival order.
    ///
    /// A no-op returning an empty stream outside the active state.
    pub async fn submit_utterance(&mut self, text: &str) -> ReplyStream {
        if self.state != ConversationState::Active {
            return Box::pin(futures::stream::empty());
        }
        let Some(chat) = self.chat.clone() else {
            return Box::pin(futures::stream::empty());
        };

        {
            let mut transcript = self.transcript.lock().expect("transcript lock poisoned");
            transcript.push(ChatMessage::user(text));
            transcript.push(ChatMessage::model(""));
        }

        let upstream = match chat.stream_turn(text).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to open reply stream: {e}");
                self.errors.set("Error communicating with the AI.");
                return Box::pin(futures::stream::empty());
            }
        };

        let transcript = Arc::clone(&self.transcript);
        let errors = self.errors.clone();
        Box::pin(async_stream::stream! {
            let mut upstream = upstream;
            while let Some(item) = upstream.next().await {
                match item {
                    Ok(chunk) => {
                        {
                            let mut transcript =
                                transcript.lock().expect("transcript lock poisoned");
                            if let Some(last) = transcript.last_mut() {
                                last.text.push_str(&chunk);
                            }
                        }
                        yield chunk;
                    }
                    Err(e) => {
                        warn!("Reply stream failed: {e}");
                        errors.set("Error communicating with the AI.");
                        break;
                    }
                }
            }
        })
    }

    /// Ends the active session: runs the structured analysis over the full
    /// transcript and turns the result into a persisted report. On failure
    /// the session falls back to idle; the transcript is discarded either
    /// way.
    pub async fn end(&mut self) -> PortResult<ConversationReport> {
        if self.state != ConversationState::Active {
            return Err(PortError::InvalidInput(
                "no active conversation to end".to_string(),
            ));
        }
        self.state = ConversationState::Analyzing;

        let snapshot = self
            .transcript
            .lock()
            .expect("transcript lock poisoned")
            .clone();
        let transcript_string = snapshot
            .iter()
            .map(|m| format!("{}: {}", m.role, m.text))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = ANALYSIS_PROMPT_TEMPLATE.replace("{transcript}", &transcript_string);

        let result = self
            .ai
            .run_structured_analysis(
                vec![PromptPart::Text(prompt)],
                conversation_analysis_schema(),
            )
            .await
            .and_then(|value| {
                serde_json::from_value::<ConversationAnalysis>(value)
                    .map_err(|e| PortError::MalformedResponse(e.to_string()))
            });

        self.transcript
            .lock()
            .expect("transcript lock poisoned")
            .clear();

        match result {
            Ok(analysis) => {
                let now = Utc::now();
                let report = ConversationReport {
                    id: now.to_rfc3339_opts(SecondsFormat::Millis, true),
                    date: now,
                    overall_feedback: analysis.overall_feedback,
                    grammar_score: analysis.grammar_score,
                    vocabulary_score: analysis.vocabulary_score,
                    fluency_score: analysis.fluency_score,
                    positive_points: analysis.positive_points,
                    areas_for_improvement: analysis.areas_for_improvement,
                    transcript: snapshot,
                };
                self.latest = Some(report.clone());
                self.reports.insert(0, report.clone());
                if let Err(e) = self.store.save_conversation_reports(&self.reports).await {
                    warn!("Failed to persist conversation reports: {e}");
                }
                self.state = ConversationState::ReportReady;
                self.errors.clear();
                Ok(report)
            }
            Err(e) => {
                warn!("Conversation analysis failed: {e}");
                self.errors.set("Failed to analyze the conversation.");
                self.state = ConversationState::Idle;
                Err(e)
            }
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// A snapshot of the active transcript.
    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.transcript
            .lock()
            .expect("transcript lock poisoned")
            .clone()
    }

    /// Historical reports, newest first.
    pub fn reports(&self) -> &[ConversationReport] {
        &self.reports
    }

    pub fn latest_report(&self) -> Option<&ConversationReport> {
        self.latest.as_ref()
    }

    pub fn average_score(&self) -> u32 {
        average_score(&self.reports)
    }

    pub fn level(&self) -> Level {
        level_for(average_score(&self.reports))
    }

    pub fn last_error(&self) -> Option<String> {
        self.errors.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Role, WritingReport};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    struct ScriptedChat {
        replies: StdMutex<VecDeque<Vec<PortResult<String>>>>,
    }

    #[async_trait]
    impl ChatSession for ScriptedChat {
        async fn stream_turn(&self, _message: &str) -> PortResult<crate::ports::ChunkStream> {
            let chunks = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default();
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    struct ScriptedAi {
        chat: Arc<ScriptedChat>,
        fail_start: bool,
        analyses: StdMutex<VecDeque<PortResult<serde_json::Value>>>,
    }

    impl ScriptedAi {
        fn new(replies: Vec<Vec<PortResult<String>>>) -> Self {
            Self {
                chat: Arc::new(ScriptedChat {
                    replies: StdMutex::new(replies.into()),
                }),
                fail_start: false,
                analyses: StdMutex::new(VecDeque::new()),
            }
        }

        fn with_analysis(self, analysis: PortResult<serde_json::Value>) -> Self {
            self.analyses.lock().unwrap().push_back(analysis);
            self
        }
    }

    #[async_trait]
    impl GenerativeAiService for ScriptedAi {
        async fn start_chat(
            &self,
            _system_instruction: &str,
        ) -> PortResult<Arc<dyn ChatSession>> {
            if self.fail_start {
                return Err(PortError::MissingCredential("OPENAI_API_KEY".to_string()));
            }
            Ok(self.chat.clone())
        }

        async fn run_structured_analysis(
            &self,
            _parts: Vec<PromptPart>,
            _schema: AnalysisSchema,
        ) -> PortResult<serde_json::Value> {
            self.analyses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(PortError::Unexpected("no scripted analysis".into())))
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        conversation: StdMutex<Vec<ConversationReport>>,
        conversation_saves: StdMutex<u32>,
    }

    #[async_trait]
    impl ReportStore for MemoryStore {
        async fn load_conversation_reports(&self) -> PortResult<Vec<ConversationReport>> {
            Ok(self.conversation.lock().unwrap().clone())
        }

        async fn save_conversation_reports(
            &self,
            reports: &[ConversationReport],
        ) -> PortResult<()> {
            *self.conversation.lock().unwrap() = reports.to_vec();
            *self.conversation_saves.lock().unwrap() += 1;
            Ok(())
        }

        async fn load_writing_reports(&self) -> PortResult<Vec<WritingReport>> {
            Ok(Vec::new())
        }

        async fn save_writing_reports(&self, _reports: &[WritingReport]) -> PortResult<()> {
            Ok(())
        }
    }

    fn analysis_value() -> serde_json::Value {
        json!({
            "overallFeedback": "Gut gemacht!",
            "grammarScore": 80.0,
            "vocabularyScore": 70.0,
            "fluencyScore": 90.0,
            "positivePoints": ["Correct verb position"],
            "areasForImprovement": ["Practice dative case"]
        })
    }

    async fn manager_with(ai: ScriptedAi, store: Arc<MemoryStore>) -> ConversationSessionManager {
        ConversationSessionManager::new(Arc::new(ai), store, ErrorSlot::new()).await
    }

    #[tokio::test]
    async fn streamed_chunks_grow_the_placeholder_in_arrival_order() {
        let ai = ScriptedAi::new(vec![vec![
            Ok("Sehr".to_string()),
            Ok(" gut!".to_string()),
        ]]);
        let mut manager = manager_with(ai, Arc::new(MemoryStore::default())).await;

        manager.start().await.expect("start");
        let mut stream = manager.submit_utterance("Ich gehe in die Schule").await;

        assert_eq!(stream.next().await.as_deref(), Some("Sehr"));
        assert_eq!(manager.transcript().last().unwrap().text, "Sehr");

        assert_eq!(stream.next().await.as_deref(), Some(" gut!"));
        assert!(stream.next().await.is_none());

        let transcript = manager.transcript();
        let last = transcript.last().unwrap();
        assert_eq!(last.role, Role::Model);
        assert_eq!(last.text, "Sehr gut!");
        assert_eq!(transcript[transcript.len() - 2].text, "Ich gehe in die Schule");
    }

    #[tokio::test]
    async fn submit_outside_active_state_is_a_noop() {
        let ai = ScriptedAi::new(vec![]);
        let mut manager = manager_with(ai, Arc::new(MemoryStore::default())).await;

        let mut stream = manager.submit_utterance("Hallo").await;
        assert!(stream.next().await.is_none());
        assert!(manager.transcript().is_empty());
        assert_eq!(manager.state(), ConversationState::Idle);
    }

    #[tokio::test]
    async fn ending_a_session_produces_and_persists_a_report() {
        let ai = ScriptedAi::new(vec![vec![Ok("Prima!".to_string())]])
            .with_analysis(Ok(analysis_value()));
        let store = Arc::new(MemoryStore::default());
        let mut manager = manager_with(ai, store.clone()).await;

        manager.start().await.expect("start");
        let mut stream = manager.submit_utterance("Ich lerne Deutsch").await;
        while stream.next().await.is_some() {}
        drop(stream);

        let report = manager.end().await.expect("analysis succeeds");
        assert_eq!(report.grammar_score, 80.0);
        assert_eq!(report.transcript.len(), 3); // greeting + user + model reply
        assert_eq!(manager.state(), ConversationState::ReportReady);
        assert!(manager.transcript().is_empty());
        assert_eq!(manager.reports().len(), 1);
        assert_eq!(manager.latest_report().unwrap().id, report.id);
        assert_eq!(*store.conversation_saves.lock().unwrap(), 1);
        assert!(manager.last_error().is_none());
    }

    #[tokio::test]
    async fn analysis_failure_discards_the_session() {
        let ai = ScriptedAi::new(vec![vec![Ok("Ja".to_string())]])
            .with_analysis(Err(PortError::Unexpected("backend down".into())));
        let store = Arc::new(MemoryStore::default());
        let mut manager = manager_with(ai, store.clone()).await;

        manager.start().await.expect("start");
        let mut stream = manager.submit_utterance("Hallo").await;
        while stream.next().await.is_some() {}
        drop(stream);

        assert!(manager.end().await.is_err());
        assert_eq!(manager.state(), ConversationState::Idle);
        assert!(manager.transcript().is_empty());
        assert!(manager.reports().is_empty());
        assert_eq!(*store.conversation_saves.lock().unwrap(), 0);
        assert_eq!(
            manager.last_error().as_deref(),
            Some("Failed to analyze the conversation.")
        );
    }

    #[tokio::test]
    async fn stream_error_is_absorbed_into_the_error_slot() {
        let ai = ScriptedAi::new(vec![vec![
            Ok("Sehr".to_string()),
            Err(PortError::Unexpected("connection reset".into())),
        ]]);
        let mut manager = manager_with(ai, Arc::new(MemoryStore::default())).await;

        manager.start().await.expect("start");
        let mut stream = manager.submit_utterance("Hallo").await;
        assert_eq!(stream.next().await.as_deref(), Some("Sehr"));
        // The failure ends the stream normally instead of surfacing an item.
        assert!(stream.next().await.is_none());
        assert_eq!(
            manager.last_error().as_deref(),
            Some("Error communicating with the AI.")
        );
        assert_eq!(manager.transcript().last().unwrap().text, "Sehr");
    }

    #[tokio::test]
    async fn start_failure_records_the_error_and_stays_idle() {
        let mut ai = ScriptedAi::new(vec![]);
        ai.fail_start = true;
        let mut manager = manager_with(ai, Arc::new(MemoryStore::default())).await;

        assert!(manager.start().await.is_err());
        assert_eq!(manager.state(), ConversationState::Idle);
        assert!(manager.last_error().is_some());
    }

    #[tokio::test]
    async fn start_is_rejected_while_a_session_is_active() {
        let ai = ScriptedAi::new(vec![]);
        let mut manager = manager_with(ai, Arc::new(MemoryStore::default())).await;

        manager.start().await.expect("start");
        assert!(matches!(
            manager.start().await,
            Err(PortError::InvalidInput(_))
        ));
        assert_eq!(manager.state(), ConversationState::Active);
    }
}
