//! # Periodicity
//!
//! Tempo period from the autocorrelation of the onset envelope, with a comb-filter
//! check that settles which octave of the peak is the beat.

/// Width (in octaves) of the log-Gaussian tempo preference.
const PRIOR_OCTAVE_WIDTH: f64 = 1.0;
/// Share of the slower period's comb strength the doubled tempo needs to be preferred.
const OCTAVE_SUPPORT: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoCandidate {
    pub bpm: f64,
    /// Beat period in envelope frames (fractional)
    pub period_frames: f64,
    /// Prior-weighted autocorrelation at the chosen lag
    pub strength: f64,
}

/// Unbiased autocorrelation for lags `0..=max_lag`.
pub fn autocorrelation(x: &[f32], max_lag: usize) -> Vec<f64> {
    let n = x.len();
    (0..=max_lag)
        .map(|lag| {
            if lag >= n {
                return 0.0;
            }
            let sum: f64 = x[..n - lag]
                .iter()
                .zip(&x[lag..])
                .map(|(&a, &b)| a as f64 * b as f64)
                .sum();
            sum / (n - lag) as f64
        })
        .collect()
}

/// Preference for tempi near `prior_bpm`, 1.0 at the centre.
pub fn tempo_prior(bpm: f64, prior_bpm: f64) -> f64 {
    let octaves = (bpm / prior_bpm).log2() / PRIOR_OCTAVE_WIDTH;
    (-0.5 * octaves * octaves).exp()
}

/// Pick the beat period of `env` within `[min_bpm, max_bpm]`.
///
/// The prior-weighted autocorrelation peak can land on half the real tempo when both
/// sit equally far from `prior_bpm`. The pick is therefore moved up an octave for as
/// long as a comb at the faster period finds onsets nearly as strong as at the slower one.
///
/// Returns `None` when the envelope is too short to hold two periods of the slowest
/// reachable tempo, or has no positive periodic correlation at all.
pub fn estimate_period(
    env: &[f32],
    frame_rate: f64,
    min_bpm: f64,
    max_bpm: f64,
    prior_bpm: f64,
) -> Option<TempoCandidate> {
    let n = env.len();
    let lag_min = ((60.0 * frame_rate / max_bpm).floor() as usize).max(1);
    // At least two full periods must fit in the envelope.
    let lag_max = ((60.0 * frame_rate / min_bpm).ceil() as usize).min(n / 2);
    if lag_max <= lag_min + 1 {
        return None;
    }

    let ac = autocorrelation(env, lag_max + 1);

    let mut best_lag = 0usize;
    let mut best_score = 0.0f64;
    for lag in lag_min..=lag_max {
        let bpm = 60.0 * frame_rate / lag as f64;
        let score = ac[lag] * tempo_prior(bpm, prior_bpm);
        if score > best_score {
            best_score = score;
            best_lag = lag;
        }
    }
    if best_lag == 0 {
        return None;
    }

    let mut lag = best_lag;
    while let Some(faster) = faster_octave(env, &ac, lag, lag_min, lag_max) {
        lag = faster;
    }

    let period = refine_lag(&ac, lag);
    let bpm = (60.0 * frame_rate / period).clamp(min_bpm, max_bpm);
    Some(TempoCandidate {
        bpm,
        period_frames: 60.0 * frame_rate / bpm,
        strength: ac[lag] * tempo_prior(bpm, prior_bpm),
    })
}

/// The lag near `lag / 2` if the doubled tempo is in range and the comb supports it.
fn faster_octave(env: &[f32], ac: &[f64], lag: usize, lag_min: usize, lag_max: usize) -> Option<usize> {
    let half = lag as f64 / 2.0;
    let fast = (lag_min..=lag_max.min(lag - 1))
        .filter(|&l| (l as f64 - half).abs() <= 1.0)
        .fold(None, |best: Option<usize>, l| match best {
            Some(b) if ac[b] >= ac[l] => Some(b),
            _ => Some(l),
        })?;

    let slow_support = comb_strength(env, refine_lag(ac, lag));
    let fast_support = comb_strength(env, refine_lag(ac, fast));
    if slow_support > 0.0 && fast_support >= OCTAVE_SUPPORT * slow_support {
        Some(fast)
    } else {
        None
    }
}

/// Parabolic interpolation on the raw autocorrelation around `lag`.
fn refine_lag(ac: &[f64], lag: usize) -> f64 {
    if lag == 0 || lag + 1 >= ac.len() {
        return lag as f64;
    }
    let (a, b, c) = (ac[lag - 1], ac[lag], ac[lag + 1]);
    let denom = a - 2.0 * b + c;
    let delta = if denom < 0.0 {
        (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    lag as f64 + delta
}

/// Mean onset strength on a pulse grid of `period` frames, at the best phase.
///
/// Each pulse takes the maximum of the envelope within one frame of its position, so a
/// fractional period does not drift off the peaks.
pub fn comb_strength(env: &[f32], period: f64) -> f64 {
    if env.is_empty() || !period.is_finite() || period < 1.0 {
        return 0.0;
    }

    let mut best = 0.0f64;
    for phase in 0..period.ceil() as usize {
        let (mut sum, mut count) = (0.0f64, 0usize);
        let mut pos = phase as f64;
        while (pos.round() as usize) < env.len() {
            let centre = pos.round() as usize;
            let lo = centre.saturating_sub(1);
            let hi = (centre + 2).min(env.len());
            sum += env[lo..hi].iter().fold(0.0f32, |m, &v| m.max(v)) as f64;
            count += 1;
            pos += period;
        }
        if count > 0 {
            best = best.max(sum / count as f64);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Unit impulses every `period` frames (fractional periods are rounded per beat).
    fn pulse_train(period: f64, len: usize) -> Vec<f32> {
        let mut env = vec![0.0f32; len];
        let mut k = 0.0;
        while (k * period).round() < len as f64 {
            env[(k * period).round() as usize] = 1.0;
            k += 1.0;
        }
        env
    }

    #[test]
    fn test_autocorrelation_of_pulse_train_peaks_at_period() {
        let ac = autocorrelation(&pulse_train(10.0, 200), 30);
        assert!(ac[10] > ac[9] && ac[10] > ac[11]);
        assert!(ac[20] > ac[15]);
        assert_eq!(autocorrelation(&[1.0, 1.0], 4)[3], 0.0);
    }

    #[test]
    fn test_prior_prefers_centre_and_is_symmetric_in_octaves() {
        assert_eq!(tempo_prior(120.0, 120.0), 1.0);
        assert!(tempo_prior(60.0, 120.0) < 1.0);
        assert!((tempo_prior(60.0, 120.0) - tempo_prior(240.0, 120.0)).abs() < 1e-12);
    }

    #[test]
    fn test_finds_120_bpm_not_its_octaves() {
        let frame_rate = 44_100.0 / 512.0;
        let env = pulse_train(60.0 * frame_rate / 120.0, 900);
        let cand = estimate_period(&env, frame_rate, 40.0, 208.0, 120.0).unwrap();
        assert!((cand.bpm - 120.0).abs() < 2.0, "got {}", cand.bpm);
        assert!(cand.strength > 0.0);
    }

    #[test]
    fn test_fast_tempi_are_not_halved() {
        let frame_rate = 44_100.0 / 512.0;
        for target in [170.0, 200.0] {
            let env = pulse_train(60.0 * frame_rate / target, 1300);
            let cand = estimate_period(&env, frame_rate, 40.0, 208.0, 120.0).unwrap();
            assert!((cand.bpm - target).abs() < 2.0, "expected {} got {}", target, cand.bpm);
        }
    }

    #[test]
    fn test_slow_tempi_are_not_doubled() {
        let frame_rate = 44_100.0 / 512.0;
        for target in [60.0, 90.0] {
            let env = pulse_train(60.0 * frame_rate / target, 1300);
            let cand = estimate_period(&env, frame_rate, 40.0, 208.0, 120.0).unwrap();
            assert!((cand.bpm - target).abs() < 2.0, "expected {} got {}", target, cand.bpm);
        }
    }

    #[test]
    fn test_comb_strength_halves_between_beats() {
        let env = pulse_train(40.0, 800);
        assert!((comb_strength(&env, 40.0) - 1.0).abs() < 1e-9);
        assert!((comb_strength(&env, 20.0) - 0.5).abs() < 0.05);
        assert_eq!(comb_strength(&[], 20.0), 0.0);
    }

    #[test]
    fn test_too_short_or_empty_has_no_period() {
        let frame_rate = 44_100.0 / 512.0;
        assert!(estimate_period(&[0.0; 20], frame_rate, 40.0, 208.0, 120.0).is_none());
        assert!(estimate_period(&vec![0.0; 900], frame_rate, 40.0, 208.0, 120.0).is_none());
    }
}
