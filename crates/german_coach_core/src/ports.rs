//! crates/german_coach_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! core to be independent of specific external implementations like the
//! generative-AI backend or the speech engines.

use crate::domain::{ConversationReport, WritingReport};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
///
/// The variants mirror the product's error taxonomy: configuration errors are
/// fatal to the gateway, validation errors never reach the network, and the
/// no-speech condition carries its own softer, retry-inviting message.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Missing API credential: {0}")]
    MissingCredential(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Malformed model response: {0}")]
    MalformedResponse(String),
    #[error("I didn't hear anything. Please try again.")]
    NoSpeech,
    #[error("Speech engine is not available: {0}")]
    SpeechUnavailable(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// An asynchronous sequence of opaque text fragments, in arrival order.
/// Dropping the stream stops consumption deterministically.
pub type ChunkStream = Pin<Box<dyn Stream<Item = PortResult<String>> + Send>>;

//=========================================================================================
// Shared Error Slot
//=========================================================================================

/// The single-slot, user-visible error shared across both session managers
/// and the gateway: the latest message replaces any previous one, and the
/// slot clears implicitly on the next successful operation.
#[derive(Clone, Default)]
pub struct ErrorSlot(Arc<Mutex<Option<String>>>);

impl ErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, message: impl Into<String>) {
        *self.0.lock().expect("error slot lock poisoned") = Some(message.into());
    }

    pub fn clear(&self) {
        *self.0.lock().expect("error slot lock poisoned") = None;
    }

    pub fn current(&self) -> Option<String> {
        self.0.lock().expect("error slot lock poisoned").clone()
    }
}

//=========================================================================================
// Generative AI Gateway Ports
//=========================================================================================

/// One part of a structured-analysis prompt: plain text or an inline image.
#[derive(Debug, Clone)]
pub enum PromptPart {
    Text(String),
    InlineImage {
        mime_type: String,
        /// Base64 payload, without the `data:` URL framing.
        data: String,
    },
}

/// A JSON schema the backend must shape its analysis response to.
#[derive(Debug, Clone)]
pub struct AnalysisSchema {
    pub name: &'static str,
    pub schema: serde_json::Value,
}

/// A stateful chat context scoped to one conversation session.
#[async_trait]
pub trait ChatSession: Send + Sync {
    /// Sends one user turn into the context and yields the reply as a stream
    /// of text fragments. The accumulated reply becomes part of the context
    /// once the stream ends.
    async fn stream_turn(&self, message: &str) -> PortResult<ChunkStream>;
}

#[async_trait]
pub trait GenerativeAiService: Send + Sync {
    /// Opens a fresh chat context with the given system instruction.
    async fn start_chat(&self, system_instruction: &str) -> PortResult<Arc<dyn ChatSession>>;

    /// Single request/response call that demands schema-conforming JSON from
    /// the backend. A parse failure or schema violation is a gateway-level
    /// failure, never a partial object.
    async fn run_structured_analysis(
        &self,
        parts: Vec<PromptPart>,
        schema: AnalysisSchema,
    ) -> PortResult<serde_json::Value>;
}

//=========================================================================================
// Speech Engine Ports
//=========================================================================================

/// One synthesizer voice as advertised by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceInfo {
    pub name: String,
    /// BCP 47 language tag, e.g. `de-DE`.
    pub language: String,
    /// Vendor-flagged higher-quality voice.
    pub premium: bool,
}

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Transcribes one captured phrase into text.
    async fn recognize(&self, audio: &[u8], language: &str) -> PortResult<String>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// The voices this engine can speak with.
    fn voices(&self) -> Vec<VoiceInfo>;

    /// Renders text to audio with the given voice, or the engine default
    /// when `voice` is `None`.
    async fn synthesize(&self, text: &str, voice: Option<&str>, language: &str)
        -> PortResult<Vec<u8>>;
}

//=========================================================================================
// Report Store Port
//=========================================================================================

/// Client-local persistence for the two historical report lists. Each list is
/// an independent blob, loaded once at startup and rewritten wholesale on
/// every new report.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn load_conversation_reports(&self) -> PortResult<Vec<ConversationReport>>;

    async fn save_conversation_reports(&self, reports: &[ConversationReport]) -> PortResult<()>;

    async fn load_writing_reports(&self) -> PortResult<Vec<WritingReport>>;

    async fn save_writing_reports(&self, reports: &[WritingReport]) -> PortResult<()>;
}
