use serde::Deserialize;
use serde_json::Value;

pub const PROCESS_COMPLETED: &str = "process_completed";

/// One message from the `/queue/data` event stream.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueEvent {
    pub msg: String,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub output: Option<Value>,
}

impl QueueEvent {
    pub fn is_completed(&self) -> bool {
        self.msg == PROCESS_COMPLETED
    }

    /// URL of the converted file: `output.data[1].url`.
    pub fn output_url(&self) -> Option<&str> {
        self.output.as_ref()?.get("data")?.get(1)?.get("url")?.as_str()
    }

    /// Error message the backend attached to a failed job, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.output.as_ref()?.get("error")?.as_str()
    }
}

/// Parse one line of the event stream.
///
/// Returns `Ok(None)` for blank lines and SSE comments. The `data: ` prefix
/// is optional.
pub fn parse_line(line: &str) -> Result<Option<QueueEvent>, serde_json::Error> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let payload = line.strip_prefix("data:").unwrap_or(line).trim_start();
    serde_json::from_str(payload).map(Some)
}
