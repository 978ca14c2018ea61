use std::sync::{Arc, Mutex};

use ndarray::{ArrayD, IxDyn};
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use tokenizers::Tokenizer;

use super::model::ModelFiles;
use super::{Device, SpeechModel, SynthesisError};

/// Load the shared tokenizer for a model directory.
pub fn load_tokenizer(files: &ModelFiles) -> Result<Arc<Tokenizer>, SynthesisError> {
    let tokenizer = Tokenizer::from_file(&files.tokenizer_path)
        .map_err(|e| SynthesisError::Load(format!("Failed to load tokenizer: {}", e)))?;
    Ok(Arc::new(tokenizer))
}

/// One replica of the exported speech model, bound to a single device.
pub struct OnnxSpeechModel {
    device: Device,
    session: Mutex<Session>,
    tokenizer: Arc<Tokenizer>,
    sample_rate: u32,
}

impl OnnxSpeechModel {
    pub fn load(
        files: &ModelFiles,
        tokenizer: Arc<Tokenizer>,
        device: Device,
    ) -> Result<Self, SynthesisError> {
        let mut builder = Session::builder()
            .map_err(|e| SynthesisError::Load(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| SynthesisError::Load(format!("Failed to set optimization level: {}", e)))?;

        if let Device::Cuda(id) = device {
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(id)
                    .build()
                    .error_on_failure()])
                .map_err(|e| {
                    SynthesisError::Load(format!("Failed to register {}: {}", device, e))
                })?;
        }

        let session = builder
            .commit_from_file(&files.model_path)
            .map_err(|e| SynthesisError::Load(format!("Failed to load model on {}: {}", device, e)))?;

        tracing::info!(%device, "Loaded speech model replica");

        Ok(Self {
            device,
            session: Mutex::new(session),
            tokenizer,
            sample_rate: files.config.sampling_rate,
        })
    }

    fn encode(&self, text: &str) -> Result<Vec<i64>, SynthesisError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| SynthesisError::Tokenize(e.to_string()))?;
        Ok(encoding.get_ids().iter().map(|&id| id as i64).collect())
    }
}

impl SpeechModel for OnnxSpeechModel {
    fn generate(&self, description: &str, prompt: &str) -> Result<ArrayD<f32>, SynthesisError> {
        let input_ids = self.encode(description)?;
        let prompt_ids = self.encode(prompt)?;

        // input_ids: [batch, description_len], prompt_input_ids: [batch, prompt_len]
        let input_value = Value::from_array((vec![1, input_ids.len()], input_ids))
            .map_err(|e| SynthesisError::Inference(format!("Failed to create input tensor: {}", e)))?;
        let prompt_value = Value::from_array((vec![1, prompt_ids.len()], prompt_ids))
            .map_err(|e| SynthesisError::Inference(format!("Failed to create prompt tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| SynthesisError::Inference(format!("Session on {} is poisoned", self.device)))?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_value,
                "prompt_input_ids" => prompt_value
            ])
            .map_err(|e| SynthesisError::Inference(format!("Inference failed on {}: {}", self.device, e)))?;

        let output = outputs
            .get("audio")
            .or_else(|| outputs.get("audio_values"))
            .ok_or_else(|| SynthesisError::Inference("Missing audio output tensor".to_string()))?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| SynthesisError::Inference(format!("Failed to extract output tensor: {}", e)))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())
            .map_err(|e| SynthesisError::Inference(format!("Unexpected output layout: {}", e)))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
