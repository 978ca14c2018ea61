use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::task::{Id, JoinSet};

use super::{AudioBuffer, SynthesisError, SynthesisFailure, SynthesisWorker};

/// Every worker failed to produce audio.
#[derive(thiserror::Error, Debug)]
#[error("Failed to generate audio on all {} device(s)", .failures.len())]
pub struct AllDevicesFailed {
    pub failures: Vec<SynthesisFailure>,
}

/// Races one request across every worker and keeps the first success.
///
/// Once a winner is accepted the other worker tasks are aborted: they start
/// no further attempts, but an inference call already running on the
/// blocking pool finishes and its result is dropped.
#[derive(Clone)]
pub struct RaceCoordinator {
    workers: Vec<Arc<SynthesisWorker>>,
}

impl RaceCoordinator {
    pub fn new(workers: Vec<SynthesisWorker>) -> Self {
        Self {
            workers: workers.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn devices(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.device().to_string()).collect()
    }

    pub async fn race(&self, description: &str, prompt: &str) -> Result<AudioBuffer, AllDevicesFailed> {
        let attempts = self.workers.iter().map(|worker| {
            let worker = Arc::clone(worker);
            let description = description.to_string();
            let prompt = prompt.to_string();
            let device = worker.device().to_string();
            (device, async move { worker.synthesize(&description, &prompt).await })
        });

        first_success(attempts).await
    }
}

/// Spawn every device's attempt and return the first success.
async fn first_success<I, F>(attempts: I) -> Result<AudioBuffer, AllDevicesFailed>
where
    I: IntoIterator<Item = (String, F)>,
    F: Future<Output = Result<AudioBuffer, SynthesisFailure>> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    let mut devices: HashMap<Id, String> = HashMap::new();

    for (device, attempt) in attempts {
        let label = device.clone();
        let handle = tasks.spawn(async move { (label, attempt.await) });
        devices.insert(handle.id(), device);
    }

    let mut failures = Vec::new();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((device, Ok(audio))) => {
                tracing::info!(%device, frames = audio.frames(), "Device won synthesis race");
                tasks.abort_all();
                return Ok(audio);
            }
            Ok((device, Err(failure))) => {
                tracing::error!(%device, error = %failure, "Generation failed on one device");
                failures.push(failure);
            }
            Err(e) => {
                let device = devices
                    .remove(&e.id())
                    .unwrap_or_else(|| "unknown".to_string());
                tracing::error!(%device, error = ?e, "Synthesis task panicked");
                failures.push(SynthesisFailure {
                    device,
                    attempts: 0,
                    source: SynthesisError::Task(e.to_string()),
                });
            }
        }
    }

    Err(AllDevicesFailed { failures })
}
