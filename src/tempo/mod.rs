//! # Tempo and Beat Estimation
//!
//! Estimates the tempo (BPM) of a decoded mono signal and the timestamps of its beats.
//!
//! ## Pipeline:
//! 1. **Onset envelope** (`onset.rs`): log-magnitude STFT, multi-band spectral flux,
//!    local-mean removal
//! 2. **Periodicity** (`periodicity.rs`): autocorrelation of the envelope weighted by a
//!    tempo preference, refined to a fractional period
//! 3. **Beat tracking** (`beats.rs`): dynamic programming that snaps a near-regular grid
//!    to the strongest onsets
//!
//! ## Guarantees:
//! - **Deterministic**: the same samples and options always give the same estimate
//! - **Bounded**: a non-zero BPM always lies within `[min_bpm, max_bpm]`
//! - **Ordered**: beat timestamps are strictly increasing and inside the signal
//! - **Degenerate input**: silence, clips shorter than `min_duration_secs` and signals
//!   without periodic onsets return [`TempoEstimate::none`] (`bpm = 0`, no beats)

pub mod beats;        // Dynamic-programming beat tracker
pub mod onset;        // Onset strength envelope
pub mod periodicity;  // Autocorrelation tempo picking

use crate::audio::DecodedSignal;
use crate::config::TempoConfig;
use rustfft::FftPlanner;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// The analysis result returned to clients.
///
/// Serializes to exactly `{ "bpm": ..., "beat_timestamps": [...] }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TempoEstimate {
    /// Tempo rounded to two decimal places, 0.0 when no tempo was found
    pub bpm: f64,

    /// Beat positions in seconds from the start of the audio
    pub beat_timestamps: Vec<f64>,
}

impl TempoEstimate {
    pub fn new(bpm: f64, beat_timestamps: Vec<f64>) -> Self {
        Self {
            bpm: (bpm * 100.0).round() / 100.0,
            beat_timestamps,
        }
    }

    /// Sentinel for audio without a detectable tempo.
    pub fn none() -> Self {
        Self {
            bpm: 0.0,
            beat_timestamps: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EstimateError {
    #[error("sample {index} is not a finite number")]
    NonFiniteSample { index: usize },

    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("invalid tempo options: {0}")]
    InvalidOptions(String),
}

/// Estimator tuning, usually built from the `[tempo]` config section.
#[derive(Debug, Clone)]
pub struct TempoOptions {
    pub min_bpm: f64,
    pub max_bpm: f64,
    pub prior_bpm: f64,
    pub window_size: usize,
    pub hop_size: usize,
    pub tightness: f64,
    pub min_duration_secs: f64,
    pub silence_threshold: f32,
}

impl From<&TempoConfig> for TempoOptions {
    fn from(cfg: &TempoConfig) -> Self {
        Self {
            min_bpm: cfg.min_bpm,
            max_bpm: cfg.max_bpm,
            prior_bpm: cfg.prior_bpm,
            window_size: cfg.window_size,
            hop_size: cfg.hop_size,
            tightness: cfg.tightness,
            min_duration_secs: cfg.min_duration_secs,
            silence_threshold: cfg.silence_threshold,
        }
    }
}

impl Default for TempoOptions {
    fn default() -> Self {
        Self::from(&TempoConfig::default())
    }
}

impl TempoOptions {
    fn validate(&self) -> Result<(), EstimateError> {
        if !(self.min_bpm > 0.0 && self.min_bpm < self.max_bpm) {
            return Err(EstimateError::InvalidOptions(format!(
                "bpm range {}..{} is empty",
                self.min_bpm, self.max_bpm
            )));
        }
        if self.window_size < 2 || self.hop_size == 0 {
            return Err(EstimateError::InvalidOptions(format!(
                "window {} / hop {} cannot frame a signal",
                self.window_size, self.hop_size
            )));
        }
        Ok(())
    }
}

/// Reusable estimator. Holds the FFT planner and analysis window so repeated
/// estimates don't re-plan.
pub struct TempoDetector {
    planner: FftPlanner<f32>,
    window: Vec<f32>,
    opts: TempoOptions,
}

impl TempoDetector {
    pub fn new(opts: TempoOptions) -> Result<Self, EstimateError> {
        opts.validate()?;
        let mut planner = FftPlanner::<f32>::new();
        let _ = planner.plan_fft_forward(opts.window_size); // warm-up
        Ok(Self {
            planner,
            window: onset::hann_window(opts.window_size),
            opts,
        })
    }

    /// Estimate tempo and beats for `signal`.
    ///
    /// Errors are reserved for inputs that cannot be analysed at all (NaN samples, zero
    /// sample rate). Audio that simply has no tempo yields [`TempoEstimate::none`].
    pub fn estimate(&mut self, signal: &DecodedSignal) -> Result<TempoEstimate, EstimateError> {
        if signal.sample_rate == 0 {
            return Err(EstimateError::InvalidSampleRate(signal.sample_rate));
        }
        if let Some(index) = signal.samples.iter().position(|s| !s.is_finite()) {
            return Err(EstimateError::NonFiniteSample { index });
        }

        let duration = signal.duration_secs();
        if duration < self.opts.min_duration_secs {
            debug!(duration, "Clip too short for tempo analysis");
            return Ok(TempoEstimate::none());
        }

        let rms = signal.rms();
        if rms < self.opts.silence_threshold {
            debug!(rms, "Signal is silent");
            return Ok(TempoEstimate::none());
        }

        let env = onset::onset_envelope(
            &signal.samples,
            signal.sample_rate,
            &self.window,
            self.opts.hop_size,
            &mut self.planner,
        );
        if env.is_flat() {
            debug!("No onsets found");
            return Ok(TempoEstimate::none());
        }

        let Some(candidate) = periodicity::estimate_period(
            &env.values,
            env.frame_rate,
            self.opts.min_bpm,
            self.opts.max_bpm,
            self.opts.prior_bpm,
        ) else {
            debug!(frames = env.values.len(), "No periodic structure in onset envelope");
            return Ok(TempoEstimate::none());
        };

        let beat_frames = beats::track_beats(&env.values, candidate.period_frames, self.opts.tightness);
        if beat_frames.len() < 2 {
            debug!(bpm = candidate.bpm, "Beat tracking found fewer than two beats");
            return Ok(TempoEstimate::none());
        }

        let bpm = beats::grid_bpm(&beat_frames, candidate.period_frames, env.frame_rate)
            .unwrap_or(candidate.bpm)
            .clamp(self.opts.min_bpm, self.opts.max_bpm);

        let beat_timestamps: Vec<f64> = beat_frames
            .iter()
            .map(|&f| env.frame_time(f))
            .filter(|&t| t <= duration)
            .collect();

        debug!(
            autocorrelation_bpm = candidate.bpm,
            bpm,
            strength = candidate.strength,
            beats = beat_timestamps.len(),
            "Tempo estimated"
        );

        Ok(TempoEstimate::new(bpm, beat_timestamps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{click_track, noise, sine};

    const SR: u32 = 44_100;

    fn estimate_tempo(signal: &DecodedSignal, opts: &TempoOptions) -> Result<TempoEstimate, EstimateError> {
        TempoDetector::new(opts.clone())?.estimate(signal)
    }

    fn is_sentinel(estimate: &TempoEstimate) -> bool {
        *estimate == TempoEstimate::none()
    }

    fn estimate(samples: Vec<f32>) -> TempoEstimate {
        estimate_tempo(&DecodedSignal::from_mono(samples, SR), &TempoOptions::default()).unwrap()
    }

    #[test]
    fn test_click_track_at_120_bpm() {
        let result = estimate(click_track(120.0, 10.0, SR));

        assert!((result.bpm - 120.0).abs() <= 2.0, "bpm was {}", result.bpm);
        assert!(result.beat_timestamps.len() >= 17, "only {} beats", result.beat_timestamps.len());
        for pair in result.beat_timestamps.windows(2) {
            let gap = pair[1] - pair[0];
            assert!((gap - 0.5).abs() < 0.03, "uneven beat gap {}", gap);
        }
        assert!(result.beat_timestamps.iter().all(|&t| (0.0..=10.0).contains(&t)));
    }

    #[test]
    fn test_other_tempi_are_not_folded_to_the_prior() {
        let secs = 15.0;
        for target in [90.0, 140.0, 170.0, 200.0] {
            let result = estimate(click_track(target, secs, SR));
            assert!((result.bpm - target).abs() <= 2.0, "expected {} got {}", target, result.bpm);
            let expected_beats = secs * target / 60.0;
            assert!(
                result.beat_timestamps.len() as f64 >= 0.8 * expected_beats,
                "{} BPM: only {} beats",
                target,
                result.beat_timestamps.len()
            );
        }
    }

    #[test]
    fn test_estimate_is_deterministic() {
        let samples = click_track(128.0, 8.0, SR);
        let first = estimate(samples.clone());
        let second = estimate(samples);
        assert_eq!(first, second);
    }

    #[test]
    fn test_bpm_is_rounded_to_two_decimals() {
        let estimate = TempoEstimate::new(119.98765, vec![0.5]);
        assert_eq!(estimate.bpm, 119.99);
        let json = serde_json::to_value(&estimate).unwrap();
        assert_eq!(json, serde_json::json!({ "bpm": 119.99, "beat_timestamps": [0.5] }));
    }

    #[test]
    fn test_silence_and_short_clips_return_sentinel() {
        assert!(is_sentinel(&estimate(vec![0.0; SR as usize * 5])));
        assert!(is_sentinel(&estimate(click_track(120.0, 0.5, SR))));
        assert!(is_sentinel(&estimate(Vec::new())));
    }

    #[test]
    fn test_steady_tone_and_noise_do_not_crash() {
        for samples in [sine(440.0, 5.0, SR, 0.5), noise(5.0, SR, 0.3)] {
            let result = estimate(samples);
            assert!(result.bpm == 0.0 || (40.0..=208.0).contains(&result.bpm));
            assert!(result.beat_timestamps.windows(2).all(|w| w[1] >= w[0]));
        }
    }

    #[test]
    fn test_non_finite_samples_are_rejected() {
        let mut samples = click_track(120.0, 2.0, SR);
        samples[100] = f32::NAN;
        let err = estimate_tempo(&DecodedSignal::from_mono(samples, SR), &TempoOptions::default()).unwrap_err();
        assert!(matches!(err, EstimateError::NonFiniteSample { index: 100 }));
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        let opts = TempoOptions { min_bpm: 200.0, max_bpm: 100.0, ..TempoOptions::default() };
        assert!(TempoDetector::new(opts).is_err());
    }
}
