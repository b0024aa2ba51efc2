//! # Audio Decoding Module
//!
//! Turns an uploaded file on disk into the single-channel signal the tempo estimator expects.
//!
//! ## Key Components:
//! - **Decoder**: probes the container, decodes every packet of the first audio track and
//!   averages channels down to mono (`decoder.rs`)
//! - **Resampler**: converts the mono signal to the fixed analysis sample rate (`resample.rs`)
//!
//! ## Output Format:
//! - **Sample Rate**: the configured analysis rate (44.1kHz by default)
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: `f32` samples, nominally within [-1.0, 1.0]

pub mod decoder;    // Container probing and packet decoding
pub mod resample;   // Sinc resampling to the analysis rate

pub use decoder::{decode_file, DecodeError, DecodeOptions};

/// A decoded, mono, fixed-rate signal ready for tempo analysis.
///
/// The source format is kept only for logging; analysis always uses `samples`
/// at `sample_rate`.
#[derive(Debug, Clone)]
pub struct DecodedSignal {
    /// Mono samples at `sample_rate`
    pub samples: Vec<f32>,

    /// Sample rate of `samples` in Hz
    pub sample_rate: u32,

    /// Sample rate of the uploaded stream before resampling
    pub source_sample_rate: u32,

    /// Channel count of the uploaded stream before downmixing
    pub source_channels: usize,
}

impl DecodedSignal {
    /// Wrap mono samples that are already at the analysis rate.
    #[cfg(test)]
    pub fn from_mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            source_sample_rate: sample_rate,
            source_channels: 1,
        }
    }

    /// Duration of the signal in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Root-mean-square level, accumulated in f64 so long files don't lose precision.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = self.samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum_sq / self.samples.len() as f64).sqrt() as f32
    }
}

/// Average interleaved frames down to one channel.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    match channels {
        0 => {}
        1 => out.extend_from_slice(interleaved),
        _ => {
            let scale = 1.0 / channels as f32;
            out.extend(
                interleaved
                    .chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() * scale),
            );
        }
    }
}
