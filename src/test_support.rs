//! Fixtures shared by the unit tests: synthetic audio, WAV encoding and multipart bodies.

use crate::config::AppConfig;
use std::io::Cursor;
use std::path::Path;

pub const BOUNDARY: &str = "----bpm-analyzer-test-boundary";

/// Plain sine wave.
pub fn sine(freq: f32, secs: f32, sample_rate: u32, amplitude: f32) -> Vec<f32> {
    let n = (secs * sample_rate as f32) as usize;
    (0..n)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * freq * t).sin() * amplitude
        })
        .collect()
}

/// Metronome-style click track: a short decaying noise + 1kHz burst on every beat,
/// starting at t = 0.
pub fn click_track(bpm: f64, secs: f64, sample_rate: u32) -> Vec<f32> {
    let n = (secs * sample_rate as f64) as usize;
    let mut out = vec![0.0f32; n];
    let period = 60.0 / bpm;
    let click_len = (0.03 * sample_rate as f64) as usize;
    let mut rng = 0x1234_5678u32;

    let mut k = 0usize;
    loop {
        let start = (k as f64 * period * sample_rate as f64).round() as usize;
        if start >= n {
            break;
        }
        for i in 0..click_len.min(n - start) {
            rng = rng.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let noise = (rng >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0;
            let t = i as f32 / sample_rate as f32;
            let tone = (2.0 * std::f32::consts::PI * 1000.0 * t).sin();
            let env = (-t / 0.008).exp();
            out[start + i] += 0.8 * env * (0.5 * noise + 0.5 * tone);
        }
        k += 1;
    }
    out
}

/// Deterministic white noise in [-amplitude, amplitude].
pub fn noise(secs: f32, sample_rate: u32, amplitude: f32) -> Vec<f32> {
    let n = (secs * sample_rate as f32) as usize;
    let mut rng = 0x9e37_79b9u32;
    (0..n)
        .map(|_| {
            rng = rng.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            ((rng >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0) * amplitude
        })
        .collect()
}

/// Encode interleaved samples as a 16-bit PCM WAV file in memory.
pub fn wav_bytes(interleaved: &[f32], sample_rate: u32, channels: u16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in interleaved {
            writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn write_wav(path: &Path, interleaved: &[f32], sample_rate: u32, channels: u16) {
    std::fs::write(path, wav_bytes(interleaved, sample_rate, channels)).unwrap();
}

/// Build a `multipart/form-data` body with one file field.
/// Returns the Content-Type header value and the body.
pub fn multipart_body(field: &str, filename: &str, bytes: &[u8]) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    (format!("multipart/form-data; boundary={}", BOUNDARY), body)
}

/// Default config with uploads redirected into `temp_dir`.
pub fn test_config(temp_dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.analysis.temp_dir = Some(temp_dir.to_path_buf());
    config.analysis.max_concurrent_analyses = 4;
    config
}
