use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use utoipa::OpenApi;

use super::{ApiDoc, ConvertedAudio, GenerateRequest, HealthResponse};
use crate::api::routes::AppState;
use crate::error::{AppError, ErrorResponse};

const OUTPUT_FILENAME: &str = "processed_output.wav";

/// Generate speech
///
/// Synthesizes the prompt in the described voice, runs it through RVC voice
/// conversion and returns the converted WAV.
#[utoipa::path(
    post,
    path = "/tts/generate",
    tag = "tts",
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "Converted audio", content_type = "audio/wav", body = ConvertedAudio),
        (status = 400, description = "Malformed request body", body = ErrorResponse),
        (status = 415, description = "Body is not JSON", body = ErrorResponse),
        (status = 422, description = "Body does not match the request schema", body = ErrorResponse),
        (status = 500, description = "Synthesis or voice conversion failed", body = ErrorResponse)
    )
)]
pub async fn generate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload?;
    let prompt = request.prompt();
    let description = request.description();

    tracing::info!(prompt_chars = prompt.chars().count(), %description, "Generating speech");

    // Synthesize on whichever device finishes first
    let audio = state.coordinator.race(description, prompt).await?;

    // Voice conversion
    let wav = state.rvc.convert(&audio).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "audio/wav".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", OUTPUT_FILENAME),
            ),
        ],
        wav,
    )
        .into_response())
}

/// Service health
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        devices: state.coordinator.devices(),
    })
}

pub async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
