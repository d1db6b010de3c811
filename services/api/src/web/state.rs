//! services/api/src/web/state.rs
//!
//! Defines the application's shared and connection-specific states.

use crate::config::Config;
use german_coach_core::conversation::ConversationSessionManager;
use german_coach_core::speech::SpeechAdapter;
use german_coach_core::writing::WritingSessionManager;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all
/// handlers. The session managers are instantiated exactly once and every
/// view operates on the same instances.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub conversation: Arc<Mutex<ConversationSessionManager>>,
    pub writing: Arc<Mutex<WritingSessionManager>>,
    pub speech: Arc<SpeechAdapter>,
}

//=========================================================================================
// ConnectionState (Specific to One WebSocket Connection)
//=========================================================================================

/// The state for a single, active WebSocket connection.
pub struct ConnectionState {
    /// Correlates this connection's log lines.
    pub connection_id: Uuid,
    /// Whether binary frames are currently buffered as microphone capture.
    pub capturing: bool,
    pub audio_buffer: Vec<u8>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            capturing: false,
            audio_buffer: Vec::new(),
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}
