pub mod conversation;
pub mod domain;
pub mod ports;
pub mod speech;
pub mod writing;

pub use conversation::{ConversationSessionManager, ConversationState, ReplyStream};
pub use domain::{
    average_score, level_for, ChatMessage, ConversationReport, Level, Role, WritingCorrection,
    WritingReport,
};
pub use ports::{
    AnalysisSchema, ChatSession, ChunkStream, ErrorSlot, GenerativeAiService, PortError,
    PortResult, PromptPart, ReportStore, SpeechRecognizer, SpeechSynthesizer, VoiceInfo,
};
pub use speech::{select_voice, NullSpeechEngine, SpeechAdapter};
pub use writing::{WritingSessionManager, WritingState};
