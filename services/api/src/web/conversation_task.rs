//! services/api/src/web/conversation_task.rs
//!
//! This module contains the asynchronous "worker" functions that drive one
//! conversation turn (typed or spoken) and the end-of-session analysis,
//! relaying progress to the client over the shared WebSocket sender.

use crate::web::{protocol::ServerMessage, state::AppState};
use axum::extract::ws::{Message, WebSocket};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use german_coach_core::domain::Role;
use german_coach_core::ports::{PortError, PortResult};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Serializes and sends one protocol message. Returns `false` when the
/// client is gone so callers can stop early.
pub async fn send_message(
    ws_sender: &Arc<Mutex<SplitSink<WebSocket, Message>>>,
    message: &ServerMessage,
) -> bool {
    let json = serde_json::to_string(message).expect("protocol messages serialize");
    ws_sender
        .lock()
        .await
        .send(Message::Text(json.into()))
        .await
        .is_ok()
}

/// Drives one typed utterance through the conversation manager: streams the
/// reply chunk-by-chunk to the client, then synthesizes the full reply as
/// binary playback audio.
pub async fn utterance_turn(
    app_state: Arc<AppState>,
    ws_sender: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    text: String,
) -> PortResult<()> {
    let start_time = Instant::now();
    let error_before = {
        let manager = app_state.conversation.lock().await;
        manager.last_error()
    };

    let mut stream = {
        let mut manager = app_state.conversation.lock().await;
        manager.submit_utterance(&text).await
    };

    while let Some(chunk) = stream.next().await {
        if !send_message(&ws_sender, &ServerMessage::ReplyChunk { text: chunk }).await {
            // Dropping the stream stops consumption and transcript growth.
            return Err(PortError::Unexpected(
                "client disconnected mid-reply".to_string(),
            ));
        }
    }
    drop(stream);
    info!("⏱️ Reply stream took: {:?}", start_time.elapsed());

    let (full_text, error_after) = {
        let manager = app_state.conversation.lock().await;
        let full_text = manager
            .transcript()
            .last()
            .filter(|m| m.role == Role::Model)
            .map(|m| m.text.clone())
            .unwrap_or_default();
        (full_text, manager.last_error())
    };

    if let Some(message) = error_after.filter(|e| error_before.as_ref() != Some(e)) {
        send_message(&ws_sender, &ServerMessage::Error { message }).await;
        return Ok(());
    }

    if !send_message(
        &ws_sender,
        &ServerMessage::ReplyEnded {
            text: full_text.clone(),
        },
    )
    .await
    {
        return Ok(());
    }

    if !full_text.is_empty() {
        speak_to_client(&app_state, &ws_sender, &full_text).await;
    }

    Ok(())
}

/// Transcribes one captured phrase and, when something was heard, runs it
/// through the same path as a typed utterance.
pub async fn voice_turn(
    app_state: Arc<AppState>,
    ws_sender: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    audio: Vec<u8>,
) -> PortResult<()> {
    let stt_start = Instant::now();
    let language = &app_state.config.speech_language;
    let transcript = match app_state.speech.listen(&audio, language).await {
        Ok(transcript) => transcript,
        Err(e @ PortError::NoSpeech) => {
            // The softer, retry-inviting message.
            send_message(
                &ws_sender,
                &ServerMessage::Error {
                    message: e.to_string(),
                },
            )
            .await;
            return Ok(());
        }
        Err(e) => {
            warn!("Speech recognition failed: {e}");
            send_message(
                &ws_sender,
                &ServerMessage::Error {
                    message: format!("Speech recognition error: {e}"),
                },
            )
            .await;
            return Ok(());
        }
    };
    info!("⏱️ STT took: {:?}", stt_start.elapsed());

    if transcript.is_empty() {
        // A listen cycle was already outstanding; ignore this one.
        return Ok(());
    }

    if !send_message(
        &ws_sender,
        &ServerMessage::UserTranscript {
            text: transcript.clone(),
        },
    )
    .await
    {
        return Ok(());
    }

    utterance_turn(app_state, ws_sender, transcript).await
}

/// Ends the active session: runs the analysis and delivers the report.
pub async fn end_session(
    app_state: Arc<AppState>,
    ws_sender: Arc<Mutex<SplitSink<WebSocket, Message>>>,
) -> PortResult<()> {
    if !send_message(&ws_sender, &ServerMessage::AnalysisStarted).await {
        return Ok(());
    }

    let analysis_start = Instant::now();
    let result = {
        let mut manager = app_state.conversation.lock().await;
        manager.end().await
    };
    info!("⏱️ Analysis took: {:?}", analysis_start.elapsed());

    match result {
        Ok(report) => {
            send_message(&ws_sender, &ServerMessage::ReportReady { report }).await;
            Ok(())
        }
        Err(e) => {
            let message = {
                let manager = app_state.conversation.lock().await;
                manager.last_error().unwrap_or_else(|| e.to_string())
            };
            send_message(&ws_sender, &ServerMessage::Error { message }).await;
            Err(e)
        }
    }
}

/// Synthesizes text and ships it to the client as one binary frame. Playback
/// problems never fail the turn; the reply text has already been delivered.
pub async fn speak_to_client(
    app_state: &Arc<AppState>,
    ws_sender: &Arc<Mutex<SplitSink<WebSocket, Message>>>,
    text: &str,
) {
    let tts_start = Instant::now();
    match app_state
        .speech
        .speak(text, &app_state.config.speech_language)
        .await
    {
        Ok(audio) if audio.is_empty() => {
            // Superseded by a later speak() or stop(); nothing to play.
        }
        Ok(audio) => {
            info!("⏱️ TTS took: {:?}", tts_start.elapsed());
            if ws_sender
                .lock()
                .await
                .send(Message::Binary(audio.into()))
                .await
                .is_err()
            {
                warn!("Failed to send playback audio to client.");
            }
        }
        Err(PortError::SpeechUnavailable(reason)) => {
            // The null engine is injected on platforms without speech support.
            info!("Skipping playback: {reason}");
        }
        Err(e) => {
            warn!("Speech synthesis failed: {e}");
            send_message(
                ws_sender,
                &ServerMessage::Error {
                    message: format!("Speech synthesis error: {e}"),
                },
            )
            .await;
        }
    }
}
