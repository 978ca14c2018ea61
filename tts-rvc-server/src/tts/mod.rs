pub mod audio;
pub mod device;
pub mod model;
pub mod onnx;
pub mod race;
pub mod worker;

use std::path::Path;
use std::sync::Arc;

use ndarray::ArrayD;

pub use audio::AudioBuffer;
pub use device::Device;
pub use model::{ModelConfig, ModelFiles};
pub use onnx::OnnxSpeechModel;
pub use race::{AllDevicesFailed, RaceCoordinator};
pub use worker::{RetryPolicy, SynthesisFailure, SynthesisWorker};

/// Failure of a single synthesis attempt (or of loading a model).
#[derive(thiserror::Error, Debug)]
pub enum SynthesisError {
    #[error("Model load failed: {0}")]
    Load(String),

    #[error("Tokenization failed: {0}")]
    Tokenize(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Generated audio is empty or invalid (shape {0:?})")]
    InvalidOutput(Vec<usize>),

    #[error("Synthesis task aborted: {0}")]
    Task(String),
}

/// A text-to-speech model replica: description + prompt in, raw samples out.
///
/// Implementations are called from the blocking thread pool and may take
/// seconds per call.
pub trait SpeechModel: Send + Sync {
    fn generate(&self, description: &str, prompt: &str) -> Result<ArrayD<f32>, SynthesisError>;

    fn sample_rate(&self) -> u32;
}

/// Load one replica per device and wrap each in a worker.
pub fn load_workers(
    model_dir: &Path,
    devices: &[Device],
    policy: RetryPolicy,
) -> Result<Vec<SynthesisWorker>, SynthesisError> {
    let files = ModelFiles::locate(model_dir)?;
    let tokenizer = onnx::load_tokenizer(&files)?;

    devices
        .iter()
        .map(|&device| {
            let model = OnnxSpeechModel::load(&files, Arc::clone(&tokenizer), device)?;
            Ok(SynthesisWorker::new(device.to_string(), Arc::new(model), policy))
        })
        .collect()
}
