pub mod handlers;
pub mod routes;

use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

use crate::error::ErrorResponse;

pub const DEFAULT_PROMPT: &str = "Hello, how can I assist you today?";
pub const DEFAULT_DESCRIPTION: &str = "A neutral English female voice.";

/// Request body for speech generation
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct GenerateRequest {
    /// The text to be spoken.
    #[serde(default)]
    #[schema(default = "Hello, how can I assist you today?", example = "Hey, how are you doing today?")]
    pub prompt: Option<String>,
    /// Description of the speaker's voice.
    #[serde(default)]
    #[schema(default = "A neutral English female voice.", example = "A neutral English female voice.")]
    pub description: Option<String>,
}

impl GenerateRequest {
    pub fn prompt(&self) -> &str {
        self.prompt.as_deref().unwrap_or(DEFAULT_PROMPT)
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or(DEFAULT_DESCRIPTION)
    }
}

/// Converted WAV file, sent as an attachment.
#[derive(Debug, ToSchema)]
#[schema(value_type = String, format = Binary)]
#[allow(dead_code)]
pub struct ConvertedAudio(Vec<u8>);

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub devices: Vec<String>,
}

#[derive(OpenApi)]
#[openapi(
    info(title = "TTS API", description = "Text-to-speech with RVC voice conversion"),
    paths(handlers::generate, handlers::health),
    components(schemas(GenerateRequest, ConvertedAudio, HealthResponse, ErrorResponse)),
    tags((name = "tts", description = "TTS operations"))
)]
pub struct ApiDoc;
