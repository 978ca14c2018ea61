use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::rvc::ConversionError;
use crate::tts::AllDevicesFailed;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Invalid request body: {0}")]
    InvalidBody(#[from] JsonRejection),

    #[error(transparent)]
    Synthesis(#[from] AllDevicesFailed),

    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::InvalidBody(rejection) => (rejection.status(), "BAD_REQUEST", rejection.body_text()),
            AppError::Synthesis(e) => {
                for failure in &e.failures {
                    tracing::error!(device = %failure.device, error = ?failure, "Device failure");
                }
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "ALL_DEVICES_FAILED",
                    e.to_string(),
                )
            }
            AppError::Conversion(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.code(), e.to_string()),
        };

        tracing::error!(error = ?self, "Request failed: {} - {}", code, message);

        (
            status,
            Json(ErrorResponse {
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}
