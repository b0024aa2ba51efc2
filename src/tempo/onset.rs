//! # Onset Envelope
//!
//! Onset strength as multi-band spectral flux over a centered STFT. Each band's mean
//! log-magnitude rise is summed per hop, then a moving average is removed and the
//! result scaled to unit standard deviation.

use rustfft::{num_complex::Complex, num_traits::Zero, FftPlanner};

/// Magnitude compression constant for `ln(1 + C * |X|)`.
const LOG_COMPRESSION: f32 = 1000.0;
/// Upper edges (Hz) of the flux bands; the last band runs to Nyquist.
const BAND_EDGES_HZ: [f32; 4] = [150.0, 400.0, 1600.0, 6400.0];
/// Span of the moving average removed from the raw flux.
const LOCAL_MEAN_SECS: f64 = 0.25;

#[derive(Debug, Clone)]
pub struct OnsetEnvelope {
    /// One value per hop, non-negative, unit standard deviation (or all zero)
    pub values: Vec<f32>,
    /// Envelope frames per second
    pub frame_rate: f64,
}

impl OnsetEnvelope {
    /// True when there is nothing to track (no onsets at all).
    pub fn is_flat(&self) -> bool {
        self.values.iter().all(|&v| v == 0.0)
    }

    /// Time in seconds of the centre of `frame`.
    pub fn frame_time(&self, frame: usize) -> f64 {
        frame as f64 / self.frame_rate
    }
}

/// Periodic Hann window.
pub fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / n as f32).cos())
        .collect()
}

/// Compute the onset envelope of a mono signal.
///
/// Frames are centered: frame `t` covers `[t*hop - N/2, t*hop + N/2)`, zero padded at both
/// ends, so its timestamp is simply `t * hop / sample_rate`. The very first frame is compared
/// against silence, which makes a sound starting at t = 0 count as an onset.
pub fn onset_envelope(
    samples: &[f32],
    sample_rate: u32,
    window: &[f32],
    hop: usize,
    planner: &mut FftPlanner<f32>,
) -> OnsetEnvelope {
    let n = window.len();
    let frame_rate = sample_rate as f64 / hop as f64;
    if samples.is_empty() || n == 0 || hop == 0 {
        return OnsetEnvelope { values: Vec::new(), frame_rate };
    }

    let half = n / 2 + 1;
    let fft = planner.plan_fft_forward(n);
    let bands = band_bins(sample_rate, n);
    // Scales a full-scale sinusoid to a magnitude of about 1.
    let mag_norm = 2.0 / window.iter().sum::<f32>();

    let frames = samples.len() / hop + 1;
    let pad = (n / 2) as isize;
    let mut buf: Vec<Complex<f32>> = vec![Complex::zero(); n];
    let mut prev = vec![0.0f32; half];
    let mut cur = vec![0.0f32; half];
    let mut flux = vec![0.0f32; frames];

    for (t, flux_t) in flux.iter_mut().enumerate() {
        let start = (t * hop) as isize - pad;
        for (k, slot) in buf.iter_mut().enumerate() {
            let idx = start + k as isize;
            let s = if idx >= 0 && (idx as usize) < samples.len() {
                samples[idx as usize]
            } else {
                0.0
            };
            *slot = Complex::new(s * window[k], 0.0);
        }
        fft.process(&mut buf);

        for (b, c) in cur.iter_mut().enumerate() {
            *c = (1.0 + LOG_COMPRESSION * buf[b].norm() * mag_norm).ln();
        }

        // Each band contributes its mean rise, so narrow low bands weigh as much as wide high ones.
        *flux_t = bands
            .iter()
            .map(|&(lo, hi)| {
                let rise: f32 = (lo..hi).map(|b| (cur[b] - prev[b]).max(0.0)).sum();
                rise / (hi - lo) as f32
            })
            .sum();

        std::mem::swap(&mut prev, &mut cur);
    }

    let mean_span = ((LOCAL_MEAN_SECS * frame_rate).round() as usize) | 1;
    let detrended = subtract_local_mean(&flux, mean_span);
    OnsetEnvelope {
        values: normalize_std(detrended),
        frame_rate,
    }
}

/// Bin ranges `[lo, hi)` for each flux band, skipping DC and empty bands.
fn band_bins(sample_rate: u32, n: usize) -> Vec<(usize, usize)> {
    let half = n / 2 + 1;
    let to_bin = |hz: f32| ((hz * n as f32 / sample_rate as f32).round() as usize).clamp(1, half);

    let mut edges = vec![1usize];
    edges.extend(BAND_EDGES_HZ.iter().map(|&hz| to_bin(hz)));
    edges.push(half);

    edges
        .windows(2)
        .map(|w| (w[0], w[1]))
        .filter(|(lo, hi)| hi > lo)
        .collect()
}

/// Half-wave rectified difference from a centered moving average of width `span` (odd).
fn subtract_local_mean(x: &[f32], span: usize) -> Vec<f32> {
    if x.is_empty() {
        return Vec::new();
    }
    let radius = span / 2;
    let mut prefix = Vec::with_capacity(x.len() + 1);
    prefix.push(0.0f64);
    for &v in x {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + v as f64);
    }

    (0..x.len())
        .map(|i| {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(x.len());
            let mean = (prefix[hi] - prefix[lo]) / (hi - lo) as f64;
            (x[i] as f64 - mean).max(0.0) as f32
        })
        .collect()
}

fn normalize_std(mut x: Vec<f32>) -> Vec<f32> {
    if x.is_empty() {
        return x;
    }
    let n = x.len() as f64;
    let mean = x.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = x.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    if std < 1e-9 {
        x.iter_mut().for_each(|v| *v = 0.0);
        return x;
    }
    let inv = (1.0 / std) as f32;
    x.iter_mut().for_each(|v| *v *= inv);
    x
}
