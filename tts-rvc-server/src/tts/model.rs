use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};

use super::SynthesisError;

const MODEL_FILE: &str = "model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: u32,
}

fn default_sampling_rate() -> u32 {
    44100
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            sampling_rate: default_sampling_rate(),
        }
    }
}

/// Files making up an exported speech model directory.
#[derive(Debug)]
pub struct ModelFiles {
    pub config: ModelConfig,
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
}

impl ModelFiles {
    pub fn locate(model_dir: &Path) -> Result<Self, SynthesisError> {
        let model_path = model_dir.join(MODEL_FILE);
        let tokenizer_path = model_dir.join(TOKENIZER_FILE);
        let config_path = model_dir.join(CONFIG_FILE);

        if !model_path.exists() {
            return Err(SynthesisError::Load(format!(
                "model not found at {}",
                model_path.display()
            )));
        }

        if !tokenizer_path.exists() {
            return Err(SynthesisError::Load(format!(
                "tokenizer not found at {}",
                tokenizer_path.display()
            )));
        }

        let config = if config_path.exists() {
            let file = File::open(&config_path)
                .map_err(|e| SynthesisError::Load(format!("Failed to open config: {}", e)))?;
            serde_json::from_reader(file)
                .map_err(|e| SynthesisError::Load(format!("Invalid model config: {}", e)))?
        } else {
            ModelConfig::default()
        };

        Ok(Self {
            config,
            model_path,
            tokenizer_path,
        })
    }
}
