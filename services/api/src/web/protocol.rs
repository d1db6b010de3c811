//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the
//! API server for the conversation practice view.

use german_coach_core::domain::ConversationReport;
use serde::{Deserialize, Serialize};

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================
// NOTE: Captured microphone audio (raw PCM16) is sent as Binary frames while
// a speech capture is open, not as part of this enum.
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Starts a fresh conversation session.
    Start,

    /// A typed user utterance for the active session.
    Utterance { text: String },

    /// The user pressed the microphone button. Any playback is cancelled and
    /// the server starts buffering binary audio frames.
    SpeechStarted,

    /// The user released the microphone button; the buffered audio should be
    /// transcribed and treated like a typed utterance.
    SpeechEnded,

    /// Ends the active session and requests the performance analysis.
    End,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================
// NOTE: The teacher's voice is sent as raw Binary frames, not as part of this
// enum. These messages provide context for that audio.
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the session is active; carries the scripted greeting.
    Started { greeting: String },

    /// Echoes what the recognizer heard, so the UI can show the user's turn.
    UserTranscript { text: String },

    /// One streamed fragment of the teacher's reply, in arrival order.
    ReplyChunk { text: String },

    /// The reply stream ended; carries the fully accumulated reply text.
    ReplyEnded { text: String },

    /// The session is being analyzed. The UI can show a "grading..." state.
    AnalysisStarted,

    /// The end-of-session report is ready.
    ReportReady { report: ConversationReport },

    /// Reports an error to the client, which should display the message.
    Error { message: String },
}
