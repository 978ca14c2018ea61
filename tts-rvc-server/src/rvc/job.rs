use std::path::{Path, PathBuf};
use std::time::Instant;

use uuid::Uuid;

use super::ConversionError;
use crate::tts::AudioBuffer;

/// WAV file in the shared directory, removed when dropped.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub async fn write(path: PathBuf, contents: &[u8]) -> std::io::Result<Self> {
        tokio::fs::write(&path, contents).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed scratch file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove scratch file"
            ),
        }
    }
}

/// One conversion job, scoped to a fresh session id.
#[derive(Debug)]
pub struct ConversionJob {
    pub session_id: String,
    pub source: ScratchFile,
    pub submitted_at: Instant,
}

impl ConversionJob {
    /// Write `audio` to a per-session file under `shared_dir`.
    pub async fn prepare(shared_dir: &Path, audio: &AudioBuffer) -> Result<Self, ConversionError> {
        let session_id = Uuid::new_v4().simple().to_string();
        let wav = audio.to_wav()?;
        let path = shared_dir.join(format!("tts-{}.wav", session_id));
        let source = ScratchFile::write(path, &wav).await?;

        tracing::debug!(
            session = %session_id,
            path = %source.path().display(),
            bytes = wav.len(),
            "Wrote conversion input"
        );

        Ok(Self {
            session_id,
            source,
            submitted_at: Instant::now(),
        })
    }
}

/// Where the backend put the converted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResult {
    pub output_url: String,
}
