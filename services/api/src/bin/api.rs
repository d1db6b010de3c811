//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        parse_voice, JsonReportStore, OpenAiGatewayAdapter, OpenAiTtsAdapter,
        WhisperRecognizerAdapter,
    },
    config::Config,
    error::ApiError,
    web::{
        analyze_writing_handler, progress_handler, reset_writing_handler, rest::ApiDoc,
        state::AppState, upload_writing_image_handler, writing_status_handler, ws_handler,
    },
};
use async_openai::{config::OpenAIConfig, types::audio::SpeechModel, Client};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderValue, Method,
    },
    routing::{get, post},
    Router,
};
use german_coach_core::{
    conversation::ConversationSessionManager,
    ports::{ErrorSlot, SpeechRecognizer, SpeechSynthesizer},
    speech::{NullSpeechEngine, SpeechAdapter},
    writing::WritingSessionManager,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Initialize the Report Store ---
    let store = Arc::new(JsonReportStore::new(&config.data_dir));
    info!("Report store rooted at {}", config.data_dir.display());

    // --- 3. Initialize the AI Gateway ---
    // Without a credential the gateway starts unconfigured: the server still
    // runs, but every AI operation reports the missing credential.
    let errors = ErrorSlot::new();
    if config.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; AI operations will be unavailable.");
        errors.set("OPENAI_API_KEY environment variable not set.");
    }
    let gateway = Arc::new(OpenAiGatewayAdapter::new(
        config.openai_api_key.as_deref(),
        config.chat_model.clone(),
        config.analysis_model.clone(),
    ));

    // --- 4. Initialize the Speech Engines ---
    // Speech support is capability-injected: with a credential we wire the
    // Whisper recognizer and the TTS synthesizer, otherwise the null engine.
    let speech = match config.openai_api_key.as_deref() {
        Some(key) => {
            if parse_voice(&config.tts_voice).is_none() {
                return Err(ApiError::Internal(format!(
                    "Invalid TTS voice specified in config: '{}'",
                    config.tts_voice
                )));
            }
            let tts_model = match config.tts_model.as_str() {
                "tts-1" => SpeechModel::Tts1,
                "tts-1-hd" => SpeechModel::Tts1Hd,
                other => SpeechModel::Other(other.to_string()),
            };
            let openai_client =
                Client::with_config(OpenAIConfig::new().with_api_key(key));
            let recognizer: Arc<dyn SpeechRecognizer> = Arc::new(WhisperRecognizerAdapter::new(
                openai_client.clone(),
                config.stt_model.clone(),
            ));
            let synthesizer: Arc<dyn SpeechSynthesizer> = Arc::new(OpenAiTtsAdapter::new(
                openai_client,
                tts_model,
                config.tts_voice.clone(),
                config.speech_language.clone(),
            ));
            Arc::new(SpeechAdapter::new(recognizer, synthesizer))
        }
        None => Arc::new(SpeechAdapter::new(
            Arc::new(NullSpeechEngine),
            Arc::new(NullSpeechEngine),
        )),
    };

    // --- 5. Instantiate the Session Managers (once, at startup) ---
    let conversation = Arc::new(Mutex::new(
        ConversationSessionManager::new(gateway.clone(), store.clone(), errors.clone()).await,
    ));
    let writing = Arc::new(Mutex::new(
        WritingSessionManager::new(gateway, store, errors).await,
    ));

    // --- 6. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        config: config.clone(),
        conversation,
        writing,
        speech,
    });

    let cors_origin = config
        .frontend_origin
        .parse::<HeaderValue>()
        .map_err(|e| ApiError::Internal(format!("Invalid FRONTEND_ORIGIN: {e}")))?;
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE, ACCEPT]);

    // --- 7. Create the Web Router ---
    let api_router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/writing", get(writing_status_handler))
        .route("/writing/image", post(upload_writing_image_handler))
        .route("/writing/analyze", post(analyze_writing_handler))
        .route("/writing/reset", post(reset_writing_handler))
        .route("/progress", get(progress_handler))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 8. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
