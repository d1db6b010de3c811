//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the Writing and Progress REST endpoints
//! and the master definition for the OpenAPI specification.

use crate::web::state::AppState;
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use german_coach_core::domain::{
    ChatMessage, ConversationReport, WritingCorrection, WritingReport,
};
use german_coach_core::ports::PortError;
use german_coach_core::writing::WritingState;
use serde::Serialize;
use std::sync::Arc;
use tracing::error;
use utoipa::{OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        upload_writing_image_handler,
        analyze_writing_handler,
        reset_writing_handler,
        writing_status_handler,
        progress_handler,
    ),
    components(
        schemas(
            ChatMessageDto,
            ConversationReportDto,
            WritingCorrectionDto,
            WritingReportDto,
            WritingStatusResponse,
            LevelDto,
            ProgressResponse,
        )
    ),
    tags(
        (name = "German Coach API", description = "API endpoints for the German conversation and writing coach.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// One role-tagged transcript entry.
#[derive(Serialize, ToSchema)]
pub struct ChatMessageDto {
    role: String,
    text: String,
}

impl From<&ChatMessage> for ChatMessageDto {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role.to_string(),
            text: message.text.clone(),
        }
    }
}

/// One historical conversation report.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationReportDto {
    id: String,
    date: DateTime<Utc>,
    overall_feedback: String,
    grammar_score: f64,
    vocabulary_score: f64,
    fluency_score: f64,
    positive_points: Vec<String>,
    areas_for_improvement: Vec<String>,
    transcript: Vec<ChatMessageDto>,
}

impl From<&ConversationReport> for ConversationReportDto {
    fn from(report: &ConversationReport) -> Self {
        Self {
            id: report.id.clone(),
            date: report.date,
            overall_feedback: report.overall_feedback.clone(),
            grammar_score: report.grammar_score,
            vocabulary_score: report.vocabulary_score,
            fluency_score: report.fluency_score,
            positive_points: report.positive_points.clone(),
            areas_for_improvement: report.areas_for_improvement.clone(),
            transcript: report.transcript.iter().map(ChatMessageDto::from).collect(),
        }
    }
}

/// One textual diff unit from a handwriting analysis.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WritingCorrectionDto {
    original: String,
    corrected: String,
    explanation: String,
}

impl From<&WritingCorrection> for WritingCorrectionDto {
    fn from(correction: &WritingCorrection) -> Self {
        Self {
            original: correction.original.clone(),
            corrected: correction.corrected.clone(),
            explanation: correction.explanation.clone(),
        }
    }
}

/// One historical writing report.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WritingReportDto {
    id: String,
    date: DateTime<Utc>,
    image_url: String,
    overall_feedback: String,
    corrections: Vec<WritingCorrectionDto>,
    positive_points: Vec<String>,
}

impl From<&WritingReport> for WritingReportDto {
    fn from(report: &WritingReport) -> Self {
        Self {
            id: report.id.clone(),
            date: report.date,
            image_url: report.image_url.clone(),
            overall_feedback: report.overall_feedback.clone(),
            corrections: report.corrections.iter().map(WritingCorrectionDto::from).collect(),
            positive_points: report.positive_points.clone(),
        }
    }
}

/// The current writing session, as shown by the Writing view.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WritingStatusResponse {
    /// One of `idle`, `image_selected`, `analyzing`, `report_ready`.
    state: String,
    has_image: bool,
    latest_report: Option<WritingReportDto>,
    error: Option<String>,
}

fn writing_state_name(state: WritingState) -> &'static str {
    match state {
        WritingState::Idle => "idle",
        WritingState::ImageSelected => "image_selected",
        WritingState::Analyzing => "analyzing",
        WritingState::ReportReady => "report_ready",
    }
}

/// The derived proficiency tier.
#[derive(Serialize, ToSchema)]
pub struct LevelDto {
    number: u8,
    name: String,
}

/// Everything the Progress view renders.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    average_score: u32,
    level: LevelDto,
    conversation_reports: Vec<ConversationReportDto>,
    writing_reports: Vec<WritingReportDto>,
}

fn status_for(error: &PortError) -> StatusCode {
    match error {
        PortError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        PortError::MissingCredential(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Upload a handwriting image for the writing session.
///
/// Accepts a multipart/form-data request with a single image part. Files over
/// 5 MB and non-image uploads are rejected without touching the session.
#[utoipa::path(
    post,
    path = "/writing/image",
    request_body(content_type = "multipart/form-data", description = "The handwriting image to upload."),
    responses(
        (status = 200, description = "Image accepted", body = WritingStatusResponse),
        (status = 400, description = "Bad request (oversized file, non-image upload, or missing part)")
    )
)]
pub async fn upload_writing_image_handler(
    State(app_state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (mime_type, data) = if let Some(field) = multipart.next_field().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("Failed to read multipart data: {}", e),
        )
    })? {
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field.bytes().await.map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                format!("Failed to read file bytes: {}", e),
            )
        })?;
        (mime_type, data)
    } else {
        return Err((
            StatusCode::BAD_REQUEST,
            "Multipart form must include an image".to_string(),
        ));
    };

    let mut manager = app_state.writing.lock().await;
    match manager.select_image(&mime_type, &data) {
        Ok(()) => Ok(Json(WritingStatusResponse {
            state: writing_state_name(manager.state()).to_string(),
            has_image: manager.selected_image().is_some(),
            latest_report: manager.latest_report().map(WritingReportDto::from),
            error: manager.last_error(),
        })),
        Err(e) => Err((
            status_for(&e),
            manager.last_error().unwrap_or_else(|| e.to_string()),
        )),
    }
}

/// Analyze the selected handwriting image.
///
/// On failure the image is retained and the session stays in
/// `image_selected` so the analysis can be retried.
#[utoipa::path(
    post,
    path = "/writing/analyze",
    responses(
        (status = 200, description = "Analysis complete", body = WritingReportDto),
        (status = 400, description = "No image selected"),
        (status = 500, description = "The analysis failed"),
        (status = 503, description = "The AI gateway is not configured")
    )
)]
pub async fn analyze_writing_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let mut manager = app_state.writing.lock().await;
    match manager.analyze().await {
        Ok(report) => Ok(Json(WritingReportDto::from(&report))),
        Err(e) => {
            error!("Writing analysis failed: {e}");
            Err((
                status_for(&e),
                manager.last_error().unwrap_or_else(|| e.to_string()),
            ))
        }
    }
}

/// Reset the writing session.
#[utoipa::path(
    post,
    path = "/writing/reset",
    responses(
        (status = 204, description = "Session reset")
    )
)]
pub async fn reset_writing_handler(State(app_state): State<Arc<AppState>>) -> impl IntoResponse {
    app_state.writing.lock().await.reset();
    StatusCode::NO_CONTENT
}

/// The current writing session state.
#[utoipa::path(
    get,
    path = "/writing",
    responses(
        (status = 200, description = "Current writing session", body = WritingStatusResponse)
    )
)]
pub async fn writing_status_handler(State(app_state): State<Arc<AppState>>) -> impl IntoResponse {
    let manager = app_state.writing.lock().await;
    Json(WritingStatusResponse {
        state: writing_state_name(manager.state()).to_string(),
        has_image: manager.selected_image().is_some(),
        latest_report: manager.latest_report().map(WritingReportDto::from),
        error: manager.last_error(),
    })
}

/// Everything the Progress view needs: the running average, the derived
/// level, and both report histories (newest first).
#[utoipa::path(
    get,
    path = "/progress",
    responses(
        (status = 200, description = "Progress overview", body = ProgressResponse)
    )
)]
pub async fn progress_handler(State(app_state): State<Arc<AppState>>) -> impl IntoResponse {
    let conversation = app_state.conversation.lock().await;
    let writing = app_state.writing.lock().await;
    let level = conversation.level();
    Json(ProgressResponse {
        average_score: conversation.average_score(),
        level: LevelDto {
            number: level.number,
            name: level.name.to_string(),
        },
        conversation_reports: conversation
            .reports()
            .iter()
            .map(ConversationReportDto::from)
            .collect(),
        writing_reports: writing.reports().iter().map(WritingReportDto::from).collect(),
    })
}
