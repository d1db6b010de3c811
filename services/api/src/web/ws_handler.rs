//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! It dispatches the conversation protocol onto the shared session manager
//! and delegates turn work to the conversation tasks.

use crate::web::{
    conversation_task::{end_session, send_message, speak_to_client, utterance_turn, voice_turn},
    protocol::{ClientMessage, ServerMessage},
    state::{AppState, ConnectionState},
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use bytes::Bytes;
use futures::stream::{SplitSink, StreamExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(ws: WebSocketUpgrade, State(app_state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let mut connection = ConnectionState::new();
    info!(
        "New WebSocket connection established: {}",
        connection.connection_id
    );

    // The sender is wrapped in an Arc<Mutex<>> to allow for shared mutable access across tasks.
    let (sender, mut receiver) = socket.split();
    let ws_sender = Arc::new(Mutex::new(sender));

    loop {
        if let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text_message(text.to_string(), &app_state, &ws_sender, &mut connection)
                        .await;
                }
                Message::Binary(data) => {
                    buffer_audio(&mut connection, data);
                }
                Message::Close(_) => {
                    info!("Client sent close message.");
                    break;
                }
                _ => {}
            }
        } else {
            info!("Client disconnected.");
            break;
        }
    }

    // --- Cleanup ---
    app_state.speech.stop();
    info!("WebSocket connection closed: {}", connection.connection_id);
}

/// Appends one binary frame to the capture buffer while a capture is open.
fn buffer_audio(connection: &mut ConnectionState, data: Bytes) {
    if connection.capturing {
        connection.audio_buffer.extend_from_slice(&data);
    }
}

/// Helper function to handle the logic for different `ClientMessage` variants.
async fn handle_text_message(
    text: String,
    app_state: &Arc<AppState>,
    ws_sender: &Arc<Mutex<SplitSink<WebSocket, Message>>>,
    connection: &mut ConnectionState,
) {
    match serde_json::from_str::<ClientMessage>(&text) {
        Ok(client_msg) => match client_msg {
            ClientMessage::Start => {
                info!("Start message received. Opening a fresh session.");
                let result = {
                    let mut manager = app_state.conversation.lock().await;
                    manager.start().await
                };
                match result {
                    Ok(greeting) => {
                        if send_message(
                            ws_sender,
                            &ServerMessage::Started {
                                greeting: greeting.text.clone(),
                            },
                        )
                        .await
                        {
                            speak_to_client(app_state, ws_sender, &greeting.text).await;
                        }
                    }
                    Err(e) => {
                        let message = {
                            let manager = app_state.conversation.lock().await;
                            manager.last_error().unwrap_or_else(|| e.to_string())
                        };
                        send_message(ws_sender, &ServerMessage::Error { message }).await;
                    }
                }
            }
            ClientMessage::Utterance { text } => {
                if let Err(e) =
                    utterance_turn(app_state.clone(), ws_sender.clone(), text).await
                {
                    warn!("Utterance turn failed: {e}");
                }
            }
            ClientMessage::SpeechStarted => {
                info!("SpeechStarted message received. Buffering capture audio.");
                // Barge-in: cancel any playback before listening.
                app_state.speech.stop();
                connection.capturing = true;
                connection.audio_buffer.clear();
            }
            ClientMessage::SpeechEnded => {
                info!("SpeechEnded message received.");
                connection.capturing = false;
                let audio = std::mem::take(&mut connection.audio_buffer);
                if let Err(e) = voice_turn(app_state.clone(), ws_sender.clone(), audio).await {
                    warn!("Voice turn failed: {e}");
                }
            }
            ClientMessage::End => {
                info!("End message received. Running the session analysis.");
                if let Err(e) = end_session(app_state.clone(), ws_sender.clone()).await {
                    warn!("Session analysis failed: {e}");
                }
            }
        },
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
        }
    }
}
