//! Process configuration, read from environment variables at startup.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::rvc::{ConversionParams, PollPolicy, RvcSettings};
use crate::tts::device::parse_device_list;
use crate::tts::{Device, RetryPolicy};

#[derive(thiserror::Error, Debug)]
#[error("Invalid value for {key}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub model_dir: PathBuf,
    pub devices: Vec<Device>,
    pub retry: RetryPolicy,
    pub rvc: RvcSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let rvc_defaults = RvcSettings::default();
        let params_defaults = ConversionParams::default();

        let devices = match env.raw("TTS_DEVICES") {
            Some(list) => parse_device_list(&list).map_err(|reason| ConfigError {
                key: "TTS_DEVICES",
                reason,
            })?,
            None => vec![Device::Cuda(0), Device::Cuda(1)],
        };

        let retry = RetryPolicy {
            max_attempts: env.parse("TTS_MAX_ATTEMPTS", 5)?,
            delay: env.millis("TTS_RETRY_DELAY_MS", 2000)?,
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError {
                key: "TTS_MAX_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }

        let poll = PollPolicy {
            attempts: env.parse("RVC_POLL_ATTEMPTS", 10)?,
            interval: env.millis("RVC_POLL_INTERVAL_MS", 2000)?,
            read_timeout: env.millis("RVC_POLL_TIMEOUT_MS", 30_000)?,
        };
        if poll.attempts == 0 {
            return Err(ConfigError {
                key: "RVC_POLL_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }

        let params = ConversionParams {
            speaker_id: env.parse("RVC_SPEAKER_ID", params_defaults.speaker_id)?,
            transpose: env.parse("RVC_TRANSPOSE", params_defaults.transpose)?,
            f0_method: env.string("RVC_F0_METHOD", &params_defaults.f0_method),
            manual_index_path: params_defaults.manual_index_path,
            index_path: env.string("RVC_INDEX_PATH", &params_defaults.index_path),
            index_rate: env.parse("RVC_INDEX_RATE", params_defaults.index_rate)?,
            filter_radius: env.parse("RVC_FILTER_RADIUS", params_defaults.filter_radius)?,
            resample_sr: env.parse("RVC_RESAMPLE_SR", params_defaults.resample_sr)?,
            rms_mix_rate: env.parse("RVC_RMS_MIX_RATE", params_defaults.rms_mix_rate)?,
            protect: env.parse("RVC_PROTECT", params_defaults.protect)?,
        };

        Ok(Self {
            host: env.string("HOST", "0.0.0.0"),
            port: env.parse("PORT", 5000)?,
            model_dir: PathBuf::from(env.string("MODEL_DIR", "./model")),
            devices,
            retry,
            rvc: RvcSettings {
                base_url: env.string("RVC_URL", &rvc_defaults.base_url),
                shared_dir: env
                    .raw("RVC_SHARED_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(rvc_defaults.shared_dir),
                fn_index: env.parse("RVC_FN_INDEX", rvc_defaults.fn_index)?,
                trigger_id: env.parse("RVC_TRIGGER_ID", rvc_defaults.trigger_id)?,
                poll,
                params,
            },
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.raw(key) {
            Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError {
                key,
                reason: format!("'{}' ({})", value, e),
            }),
            None => Ok(default),
        }
    }

    fn millis(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parse(key, default).map(Duration::from_millis)
    }
}
