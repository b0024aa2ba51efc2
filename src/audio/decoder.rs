//! # Audio Decoding
//!
//! Decode an uploaded file into a mono signal at the analysis rate. The container is
//! detected from the content; the file extension is only a hint.

use super::{downmix_to_mono, resample, DecodedSignal};
use std::fs::File;
use std::io;
use std::path::Path;
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to open audio file: {0}")]
    Open(#[source] io::Error),

    #[error("unrecognised or unsupported audio container: {0}")]
    UnsupportedFormat(String),

    #[error("file contains no audio track")]
    NoAudioTrack,

    #[error("unsupported audio codec: {0}")]
    UnsupportedCodec(String),

    #[error("audio stream is corrupt: {0}")]
    Corrupt(String),

    #[error("audio stream decoded to zero samples")]
    NoSamples,

    #[error("audio is longer than the {limit_secs:.0}s limit")]
    TooLong { limit_secs: f64 },

    #[error("resampling failed: {0}")]
    Resample(String),
}

impl DecodeError {
    /// Problems with the uploaded bytes, as opposed to problems on our side.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, DecodeError::Open(_) | DecodeError::Resample(_))
    }
}

#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Rate the returned signal is resampled to
    pub target_sample_rate: u32,
    /// Streams longer than this are rejected
    pub max_duration_secs: f64,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            target_sample_rate: 44_100,
            max_duration_secs: 900.0,
        }
    }
}

/// Decode the first audio track of `path`, downmix to mono and resample to
/// `opts.target_sample_rate`.
///
/// The file extension is only a hint; the container is identified by probing its contents.
/// Individual corrupt packets are skipped, but a stream that yields nothing is an error.
pub fn decode_file(path: &Path, opts: &DecodeOptions) -> Result<DecodedSignal, DecodeError> {
    let file = File::open(path).map_err(DecodeError::Open)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::UnsupportedCodec(e.to_string()))?;

    let mut mono: Vec<f32> = Vec::new();
    let mut sample_buf: Option<(SignalSpec, SampleBuffer<f32>)> = None;
    let mut source_rate = codec_params.sample_rate.unwrap_or(0);
    let mut source_channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);
    let mut format_locked = false;
    let mut skipped_packets = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) if mono.is_empty() => return Err(DecodeError::Corrupt(e.to_string())),
            Err(e) => {
                // Truncated tail: keep what decoded cleanly.
                warn!(error = %e, decoded_samples = mono.len(), "Stopping at unreadable packet");
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(msg)) => {
                skipped_packets += 1;
                debug!(reason = msg, "Skipping undecodable packet");
                continue;
            }
            Err(SymphoniaError::IoError(e)) => {
                skipped_packets += 1;
                debug!(error = %e, "Skipping packet after I/O error");
                continue;
            }
            Err(e) => return Err(DecodeError::Corrupt(e.to_string())),
        };

        if decoded.frames() == 0 {
            continue;
        }

        let spec = *decoded.spec();
        if !format_locked {
            source_rate = spec.rate;
            source_channels = spec.channels.count();
            format_locked = true;
        }

        let capacity = decoded.capacity();
        let needs_new_buf = match &sample_buf {
            Some((buf_spec, buf)) => *buf_spec != spec || buf.capacity() < capacity * spec.channels.count(),
            None => true,
        };
        if needs_new_buf {
            sample_buf = Some((spec, SampleBuffer::<f32>::new(capacity as u64, spec)));
        }
        let Some((_, buf)) = sample_buf.as_mut() else {
            continue;
        };

        buf.copy_interleaved_ref(decoded);
        downmix_to_mono(buf.samples(), spec.channels.count(), &mut mono);

        let limit = (opts.max_duration_secs * source_rate.max(1) as f64) as usize;
        if mono.len() > limit {
            return Err(DecodeError::TooLong { limit_secs: opts.max_duration_secs });
        }
    }

    if skipped_packets > 0 {
        warn!(skipped_packets, "Some packets could not be decoded and were skipped");
    }

    if mono.is_empty() || source_rate == 0 {
        return Err(DecodeError::NoSamples);
    }

    let samples = if source_rate != opts.target_sample_rate {
        resample::resample_mono(&mono, source_rate, opts.target_sample_rate)
            .map_err(DecodeError::Resample)?
    } else {
        mono
    };

    debug!(
        source_rate,
        source_channels,
        samples = samples.len(),
        "Decoded audio to mono"
    );

    Ok(DecodedSignal {
        samples,
        sample_rate: opts.target_sample_rate,
        source_sample_rate: source_rate,
        source_channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sine, write_wav};

    #[test]
    fn test_decodes_stereo_wav_to_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let left = sine(440.0, 1.0, 44_100, 0.5);
        let interleaved: Vec<f32> = left.iter().flat_map(|&s| [s, s]).collect();
        write_wav(&path, &interleaved, 44_100, 2);

        let signal = decode_file(&path, &DecodeOptions::default()).unwrap();
        assert_eq!(signal.sample_rate, 44_100);
        assert_eq!(signal.source_channels, 2);
        assert_eq!(signal.samples.len(), 44_100);
        assert!((signal.rms() - 0.5 / 2f32.sqrt()).abs() < 0.01);
    }

    #[test]
    fn test_resamples_to_analysis_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("low.wav");
        write_wav(&path, &sine(220.0, 2.0, 22_050, 0.5), 22_050, 1);

        let signal = decode_file(&path, &DecodeOptions::default()).unwrap();
        assert_eq!(signal.source_sample_rate, 22_050);
        assert_eq!(signal.sample_rate, 44_100);
        assert_eq!(signal.samples.len(), 88_200);
    }

    #[test]
    fn test_text_file_is_rejected_as_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.mp3");
        std::fs::write(&path, "these are not the samples you are looking for\n".repeat(50)).unwrap();

        let err = decode_file(&path, &DecodeOptions::default()).unwrap_err();
        assert!(err.is_client_error(), "unexpected error: {:?}", err);
    }

    #[test]
    fn test_missing_file_is_internal_error() {
        let err = decode_file(Path::new("/nonexistent/upload.mp3"), &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, DecodeError::Open(_)));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_rejects_audio_over_duration_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.wav");
        write_wav(&path, &sine(440.0, 3.0, 8_000, 0.5), 8_000, 1);

        let opts = DecodeOptions { target_sample_rate: 8_000, max_duration_secs: 1.0 };
        let err = decode_file(&path, &opts).unwrap_err();
        assert!(matches!(err, DecodeError::TooLong { .. }));
        assert!(err.is_client_error());
    }
}
