use std::sync::Arc;
use std::time::Duration;

use super::{AudioBuffer, SpeechModel, SynthesisError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

/// A worker gave up after its whole retry budget.
#[derive(thiserror::Error, Debug)]
#[error("Synthesis failed on {device} after {attempts} attempt(s): {source}")]
pub struct SynthesisFailure {
    pub device: String,
    pub attempts: u32,
    #[source]
    pub source: SynthesisError,
}

/// Runs one model replica with bounded retry.
pub struct SynthesisWorker {
    device: String,
    model: Arc<dyn SpeechModel>,
    policy: RetryPolicy,
}

impl SynthesisWorker {
    pub fn new(device: impl Into<String>, model: Arc<dyn SpeechModel>, policy: RetryPolicy) -> Self {
        Self {
            device: device.into(),
            model,
            policy,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub async fn synthesize(
        &self,
        description: &str,
        prompt: &str,
    ) -> Result<AudioBuffer, SynthesisFailure> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt(description, prompt).await {
                Ok(audio) => {
                    tracing::debug!(
                        device = %self.device,
                        attempt,
                        frames = audio.frames(),
                        channels = audio.channels(),
                        "Generated audio"
                    );
                    return Ok(audio);
                }
                Err(e) if attempt < max_attempts => {
                    tracing::warn!(
                        device = %self.device,
                        attempt,
                        error = %e,
                        "Synthesis attempt failed, retrying"
                    );
                    tokio::time::sleep(self.policy.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        device = %self.device,
                        attempt,
                        error = ?e,
                        "Synthesis attempts exhausted"
                    );
                    return Err(SynthesisFailure {
                        device: self.device.clone(),
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }

    async fn attempt(&self, description: &str, prompt: &str) -> Result<AudioBuffer, SynthesisError> {
        let model = Arc::clone(&self.model);
        let description = description.to_string();
        let prompt = prompt.to_string();

        tokio::task::spawn_blocking(move || {
            let raw = model.generate(&description, &prompt)?;
            AudioBuffer::from_model_output(raw, model.sample_rate())
        })
        .await
        .map_err(|e| SynthesisError::Task(e.to_string()))?
    }
}
