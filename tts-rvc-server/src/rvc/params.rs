use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;

/// Tuning parameters for one RVC inference job.
///
/// The queue expects them as a positional array matching the WebUI's
/// single-file conversion signature; [`ConversionParams::to_positional`] is
/// the only place that knows that order.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionParams {
    pub speaker_id: u32,
    /// Pitch shift in semitones.
    pub transpose: i32,
    pub f0_method: String,
    pub manual_index_path: String,
    pub index_path: String,
    pub index_rate: f64,
    pub filter_radius: u32,
    /// `0` keeps the source sample rate.
    pub resample_sr: u32,
    pub rms_mix_rate: f64,
    pub protect: f64,
}

impl Default for ConversionParams {
    fn default() -> Self {
        Self {
            speaker_id: 0,
            transpose: -2,
            f0_method: "rmvpe".to_string(),
            manual_index_path: String::new(),
            index_path: "logs/kobold/added_IVF94_Flat_nprobe_1_kobold_v2.index".to_string(),
            index_rate: 0.75,
            filter_radius: 3,
            resample_sr: 0,
            rms_mix_rate: 0.25,
            protect: 0.33,
        }
    }
}

impl ConversionParams {
    pub fn to_positional(&self, input: &Path) -> Vec<Value> {
        vec![
            json!(self.speaker_id),
            json!(input.to_string_lossy()),
            json!(self.transpose),
            // f0 curve file, unused
            Value::Null,
            json!(self.f0_method),
            json!(self.manual_index_path),
            json!(self.index_path),
            json!(self.index_rate),
            json!(self.filter_radius),
            json!(self.resample_sr),
            json!(self.rms_mix_rate),
            json!(self.protect),
        ]
    }
}

/// Body of `POST /queue/join`.
#[derive(Debug, Serialize)]
pub struct JoinRequest<'a> {
    pub data: Vec<Value>,
    pub event_data: Option<Value>,
    pub fn_index: u32,
    pub trigger_id: u32,
    pub session_hash: &'a str,
}
