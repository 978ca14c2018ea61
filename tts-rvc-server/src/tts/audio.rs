use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};
use ndarray::{Array2, ArrayD, Axis, Ix2};

use super::SynthesisError;

/// Synthesized PCM audio: `frames x channels` samples in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Array2<f32>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Normalize a raw model output into a 2-D buffer.
    ///
    /// Unit axes are squeezed away and a flat vector becomes a single
    /// channel column. Anything that is empty, not 2-D afterwards, or has
    /// more channels than a WAV header can hold is rejected with
    /// [`SynthesisError::InvalidOutput`].
    pub fn from_model_output(raw: ArrayD<f32>, sample_rate: u32) -> Result<Self, SynthesisError> {
        let original_shape = raw.shape().to_vec();
        let invalid = || SynthesisError::InvalidOutput(original_shape.clone());

        let squeezed: Vec<usize> = original_shape.iter().copied().filter(|&d| d != 1).collect();
        let mut audio = raw
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order(squeezed.as_slice())
            .map_err(|_| invalid())?;

        if audio.ndim() == 1 {
            audio = audio.insert_axis(Axis(1));
        }

        if audio.is_empty() || audio.ndim() != 2 {
            return Err(invalid());
        }

        let samples = audio.into_dimensionality::<Ix2>().map_err(|_| invalid())?;

        // WAV stores the channel count as u16
        if u16::try_from(samples.ncols()).is_err() {
            return Err(invalid());
        }

        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn samples(&self) -> &Array2<f32> {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.samples.nrows()
    }

    pub fn channels(&self) -> usize {
        self.samples.ncols()
    }

    /// Encode as 16-bit PCM WAV, frames interleaved across channels.
    pub fn to_wav(&self) -> Result<Vec<u8>, hound::Error> {
        let spec = WavSpec {
            channels: self.channels() as u16,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let mut buffer = Vec::new();
        {
            let cursor = Cursor::new(&mut buffer);
            let mut writer = WavWriter::new(cursor, spec)?;

            for frame in self.samples.rows() {
                for &sample in frame {
                    let scaled = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                    writer.write_sample(scaled)?;
                }
            }

            writer.finalize()?;
        }

        Ok(buffer)
    }
}
