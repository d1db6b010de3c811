pub mod gateway;
pub mod recognizer;
pub mod store;
pub mod synthesizer;

pub use gateway::OpenAiGatewayAdapter;
pub use recognizer::WhisperRecognizerAdapter;
pub use store::JsonReportStore;
pub use synthesizer::{parse_voice, OpenAiTtsAdapter};
