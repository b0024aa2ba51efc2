//! # Beat Tracking
//!
//! Dynamic-programming beat tracking over the onset envelope.

/// Maximum relative disagreement between the beat grid and the autocorrelation period
/// for the grid to be trusted as the final tempo.
const GRID_AGREEMENT: f64 = 0.08;
/// Beats needed before the grid slope is used.
const MIN_GRID_BEATS: usize = 8;

/// Place beats on the envelope frames that best balance onset strength against
/// deviation from the target `period` (in frames).
///
/// Each frame's cumulative score is its onset value plus the best predecessor score within
/// `[period/2, 2*period]` frames back, penalised by `tightness * ln(interval/period)^2`.
/// The best-scoring frame is then backtracked to the start of its chain, and weak beats at
/// either end are trimmed. Returned frame indices are strictly increasing.
pub fn track_beats(env: &[f32], period: f64, tightness: f64) -> Vec<usize> {
    let n = env.len();
    if n == 0 || !period.is_finite() || period < 1.0 {
        return Vec::new();
    }

    let min_back = ((period / 2.0).round() as usize).max(1);
    let max_back = ((2.0 * period).round() as usize).max(min_back);

    let mut score = vec![0.0f64; n];
    let mut backlink: Vec<Option<usize>> = vec![None; n];

    for t in 0..n {
        let mut best: Option<(usize, f64)> = None;
        if t >= min_back {
            let lo = t.saturating_sub(max_back);
            for prev in lo..=(t - min_back) {
                let ratio = (t - prev) as f64 / period;
                let candidate = score[prev] - tightness * ratio.ln().powi(2);
                if best.map_or(true, |(_, s)| candidate > s) {
                    best = Some((prev, candidate));
                }
            }
        }

        let local = env[t] as f64;
        match best {
            Some((prev, s)) if s > 0.0 => {
                score[t] = local + s;
                backlink[t] = Some(prev);
            }
            _ => score[t] = local,
        }
    }

    let mut end = 0usize;
    for t in 1..n {
        if score[t] > score[end] {
            end = t;
        }
    }
    if score[end] <= 0.0 {
        return Vec::new();
    }

    let mut beats = Vec::new();
    let mut cursor = Some(end);
    while let Some(t) = cursor {
        beats.push(t);
        cursor = backlink[t];
    }
    beats.reverse();

    trim_weak_edges(env, beats)
}

/// Drop leading and trailing beats whose onset strength is under half the RMS
/// strength of all tracked beats.
fn trim_weak_edges(env: &[f32], beats: Vec<usize>) -> Vec<usize> {
    if beats.len() < 3 {
        return beats;
    }
    let mean_sq = beats.iter().map(|&b| (env[b] as f64).powi(2)).sum::<f64>() / beats.len() as f64;
    let threshold = 0.5 * mean_sq.sqrt();

    let first = beats.iter().position(|&b| env[b] as f64 >= threshold);
    let last = beats.iter().rposition(|&b| env[b] as f64 >= threshold);
    match (first, last) {
        (Some(first), Some(last)) => beats[first..=last].to_vec(),
        _ => beats,
    }
}

/// Tempo from the least-squares slope of beat frame against beat index, when the grid
/// is long enough and agrees with `period`. Returns `None` otherwise.
pub fn grid_bpm(beats: &[usize], period: f64, frame_rate: f64) -> Option<f64> {
    if beats.len() < MIN_GRID_BEATS {
        return None;
    }
    let n = beats.len() as f64;
    let mean_i = (n - 1.0) / 2.0;
    let mean_b = beats.iter().map(|&b| b as f64).sum::<f64>() / n;

    let (mut num, mut den) = (0.0f64, 0.0f64);
    for (i, &b) in beats.iter().enumerate() {
        let di = i as f64 - mean_i;
        num += di * (b as f64 - mean_b);
        den += di * di;
    }
    let slope = num / den;
    if !slope.is_finite() || slope <= 0.0 || ((slope - period) / period).abs() > GRID_AGREEMENT {
        return None;
    }
    Some(60.0 * frame_rate / slope)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spikes(positions: &[usize], len: usize) -> Vec<f32> {
        let mut env = vec![0.0f32; len];
        for &p in positions {
            env[p] = 5.0;
        }
        env
    }

    #[test]
    fn test_tracks_regular_spikes() {
        let positions: Vec<usize> = (0..10).map(|k| 5 + k * 20).collect();
        let env = spikes(&positions, 200);
        assert_eq!(track_beats(&env, 20.0, 100.0), positions);
    }

    #[test]
    fn test_bridges_a_missing_onset_without_inventing_offbeats() {
        // Beat 4 is missing; the tracker should keep the grid rather than jump to noise.
        let mut positions: Vec<usize> = (0..10).map(|k| 5 + k * 20).collect();
        positions.remove(4);
        let mut env = spikes(&positions, 200);
        env[95] = 0.5; // weak off-beat blip

        let beats = track_beats(&env, 20.0, 100.0);
        assert!(beats.windows(2).all(|w| w[1] > w[0]));
        assert!(!beats.contains(&95));
        assert_eq!(beats.first(), Some(&5));
        assert_eq!(beats.last(), Some(&185));
    }

    #[test]
    fn test_empty_and_degenerate_inputs() {
        assert!(track_beats(&[], 20.0, 100.0).is_empty());
        assert!(track_beats(&[0.0; 100], 20.0, 100.0).is_empty());
        assert!(track_beats(&[1.0; 100], f64::NAN, 100.0).is_empty());
        assert!(track_beats(&[1.0; 100], 0.5, 100.0).is_empty());
    }

    #[test]
    fn test_grid_bpm_uses_fractional_spacing() {
        let frame_rate = 44_100.0 / 512.0;
        let period = 60.0 * frame_rate / 120.0; // ~43.07 frames
        let beats: Vec<usize> = (0..20).map(|k| (k as f64 * period).round() as usize).collect();
        let bpm = grid_bpm(&beats, 43.0, frame_rate).unwrap();
        assert!((bpm - 120.0).abs() < 0.1, "got {}", bpm);

        assert!(grid_bpm(&beats[..4], period, frame_rate).is_none());
        assert!(grid_bpm(&beats, period * 1.5, frame_rate).is_none());
    }
}
