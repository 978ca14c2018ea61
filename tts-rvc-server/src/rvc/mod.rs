//! Client for the RVC voice-conversion queue.
//!
//! A conversion is three round trips against the backend: join the queue
//! with a job, read `/queue/data` until the job reports completion, then
//! download the produced file. Every job runs under its own session id.

pub mod events;
pub mod job;
pub mod params;

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{StatusCode, Url};

use crate::tts::AudioBuffer;

pub use job::{ConversionJob, ConversionResult, ScratchFile};
pub use params::{ConversionParams, JoinRequest};

const USER_AGENT: &str = concat!("tts-rvc-server/", env!("CARGO_PKG_VERSION"));

#[derive(thiserror::Error, Debug)]
pub enum ConversionError {
    #[error("Failed to process with RVC: queue join returned {0}")]
    Submit(StatusCode),

    #[error("Failed to retrieve processed file from RVC: no completion after {attempts} poll attempt(s)")]
    Timeout { attempts: u32 },

    #[error("Failed to download the processed WAV file: server returned {0}")]
    Download(StatusCode),

    #[error("RVC reported a failed conversion: {0}")]
    Failed(String),

    #[error("Invalid RVC URL: {0}")]
    InvalidUrl(String),

    #[error("RVC request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Scratch file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV encoding failed: {0}")]
    Wav(#[from] hound::Error),
}

impl ConversionError {
    pub fn code(&self) -> &'static str {
        match self {
            ConversionError::Submit(_) => "CONVERSION_SUBMIT_FAILED",
            ConversionError::Timeout { .. } => "CONVERSION_TIMEOUT",
            ConversionError::Download(_) => "DOWNLOAD_FAILED",
            ConversionError::Failed(_) => "CONVERSION_FAILED",
            ConversionError::InvalidUrl(_) => "INVALID_URL",
            ConversionError::Http(_) => "HTTP_ERROR",
            ConversionError::Io(_) => "IO_ERROR",
            ConversionError::Wav(_) => "WAV_ERROR",
        }
    }
}

/// Poll budget for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
    /// Upper bound on a single `/queue/data` read.
    pub read_timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_secs(2),
            read_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RvcSettings {
    pub base_url: String,
    pub shared_dir: PathBuf,
    pub fn_index: u32,
    pub trigger_id: u32,
    pub poll: PollPolicy,
    pub params: ConversionParams,
}

impl Default for RvcSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:7865".to_string(),
            shared_dir: PathBuf::from("/mnt/ml1_data"),
            fn_index: 2,
            trigger_id: 33,
            poll: PollPolicy::default(),
            params: ConversionParams::default(),
        }
    }
}

pub struct RvcClient {
    http: reqwest::Client,
    base_url: Url,
    settings: RvcSettings,
}

impl RvcClient {
    pub fn new(settings: RvcSettings) -> Result<Self, ConversionError> {
        // A trailing slash keeps any base path when joining endpoints.
        let mut base = settings.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| ConversionError::InvalidUrl(format!("{}: {}", settings.base_url, e)))?;

        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;

        Ok(Self {
            http,
            base_url,
            settings,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Convert `audio` and return the converted WAV bytes.
    pub async fn convert(&self, audio: &AudioBuffer) -> Result<Bytes, ConversionError> {
        let job = ConversionJob::prepare(&self.settings.shared_dir, audio).await?;

        self.submit(&job).await?;
        let result = self.poll(&job).await?;
        let wav = self.download(&result).await?;

        tracing::info!(
            session = %job.session_id,
            elapsed_ms = job.submitted_at.elapsed().as_millis() as u64,
            bytes = wav.len(),
            "RVC conversion finished"
        );

        Ok(wav)
    }

    async fn submit(&self, job: &ConversionJob) -> Result<(), ConversionError> {
        let body = JoinRequest {
            data: self.settings.params.to_positional(job.source.path()),
            event_data: None,
            fn_index: self.settings.fn_index,
            trigger_id: self.settings.trigger_id,
            session_hash: &job.session_id,
        };

        let response = self
            .http
            .post(self.endpoint("queue/join")?)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(session = %job.session_id, %status, "RVC rejected the job");
            return Err(ConversionError::Submit(status));
        }

        tracing::debug!(session = %job.session_id, "Submitted RVC job");
        Ok(())
    }

    async fn poll(&self, job: &ConversionJob) -> Result<ConversionResult, ConversionError> {
        let policy = self.settings.poll;
        let attempts = policy.attempts.max(1);

        for attempt in 1..=attempts {
            match tokio::time::timeout(policy.read_timeout, self.read_events(job)).await {
                Ok(Ok(Some(url))) => {
                    tracing::debug!(session = %job.session_id, attempt, %url, "RVC job completed");
                    return Ok(ConversionResult {
                        output_url: self.resolve(&url)?,
                    });
                }
                Ok(Ok(None)) => {
                    tracing::debug!(session = %job.session_id, attempt, "RVC job not completed yet");
                }
                Ok(Err(ConversionError::Http(e))) => {
                    tracing::warn!(session = %job.session_id, attempt, error = %e, "RVC poll failed");
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    tracing::warn!(session = %job.session_id, attempt, "RVC poll timed out");
                }
            }

            if attempt < attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }

        Err(ConversionError::Timeout { attempts })
    }

    /// Read one `/queue/data` stream; `Some(url)` once the job completed.
    async fn read_events(&self, job: &ConversionJob) -> Result<Option<String>, ConversionError> {
        let mut url = self.endpoint("queue/data")?;
        url.query_pairs_mut()
            .append_pair("session_hash", &job.session_id);

        let response = self
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(session = %job.session_id, %status, "RVC event stream unavailable");
            return Ok(None);
        }

        let mut stream = response.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            pending.extend_from_slice(&chunk?);

            while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                if let Some(url) = scan_line(&job.session_id, &line)? {
                    return Ok(Some(url));
                }
            }
        }

        scan_line(&job.session_id, &pending)
    }

    async fn download(&self, result: &ConversionResult) -> Result<Bytes, ConversionError> {
        let response = self.http.get(&result.output_url).send().await?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(url = %result.output_url, %status, "Failed to download converted audio");
            return Err(ConversionError::Download(status));
        }

        Ok(response.bytes().await?)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ConversionError> {
        self.base_url
            .join(path)
            .map_err(|e| ConversionError::InvalidUrl(format!("{}: {}", path, e)))
    }

    /// Absolute URLs pass through; relative ones are joined to the base URL.
    fn resolve(&self, url: &str) -> Result<String, ConversionError> {
        match Url::parse(url) {
            Ok(absolute) => Ok(absolute.into()),
            Err(_) => Ok(self.endpoint(url.trim_start_matches('/'))?.into()),
        }
    }
}

/// Check one raw stream line for the completion event.
fn scan_line(session_id: &str, raw: &[u8]) -> Result<Option<String>, ConversionError> {
    let line = String::from_utf8_lossy(raw);

    let event = match events::parse_line(&line) {
        Ok(Some(event)) => event,
        Ok(None) => return Ok(None),
        Err(e) => {
            tracing::warn!(session = %session_id, error = %e, line = %line.trim_end(), "Skipping unparseable RVC event");
            return Ok(None);
        }
    };

    tracing::trace!(session = %session_id, msg = %event.msg, "RVC event");

    if !event.is_completed() {
        return Ok(None);
    }

    match event.output_url() {
        Some(url) => Ok(Some(url.to_string())),
        None => Err(ConversionError::Failed(
            event
                .error_message()
                .unwrap_or("completed without an output file")
                .to_string(),
        )),
    }
}
