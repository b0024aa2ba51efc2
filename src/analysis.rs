//! # Analysis Pipeline
//!
//! Glue between the scoped upload, the decoder and the tempo estimator. Everything in here
//! is synchronous and CPU/IO bound; handlers run it on the blocking thread pool.

use crate::audio::{self, DecodeError, DecodeOptions};
use crate::config::AppConfig;
use crate::tempo::{EstimateError, TempoDetector, TempoEstimate, TempoOptions};
use crate::upload::ScopedUpload;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("failed to store upload: {0}")]
    Storage(#[source] std::io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Estimate(#[from] EstimateError),
}

impl AnalysisError {
    /// Whether the failure is due to the uploaded content rather than the server.
    pub fn is_client_error(&self) -> bool {
        match self {
            AnalysisError::Decode(e) => e.is_client_error(),
            AnalysisError::Storage(_) | AnalysisError::Estimate(_) => false,
        }
    }
}

/// Everything one pipeline run needs, detached from the shared config so it can be moved
/// onto a blocking thread.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub decode: DecodeOptions,
    pub tempo: TempoOptions,
    pub temp_dir: Option<PathBuf>,
}

impl AnalysisSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            decode: DecodeOptions {
                target_sample_rate: config.analysis.sample_rate,
                max_duration_secs: config.analysis.max_duration_secs,
            },
            tempo: TempoOptions::from(&config.tempo),
            temp_dir: config.analysis.temp_dir.clone(),
        }
    }
}

/// Decode the file at `path` and estimate its tempo.
pub fn analyze_file(path: &Path, settings: &AnalysisSettings) -> Result<TempoEstimate, AnalysisError> {
    let decode_start = Instant::now();
    let signal = audio::decode_file(path, &settings.decode)?;
    debug!(
        duration_secs = signal.duration_secs(),
        source_sample_rate = signal.source_sample_rate,
        source_channels = signal.source_channels,
        decode_ms = decode_start.elapsed().as_millis() as u64,
        "Audio decoded"
    );

    let estimate_start = Instant::now();
    let mut detector = TempoDetector::new(settings.tempo.clone())?;
    let estimate = detector.estimate(&signal)?;
    debug!(
        estimate_ms = estimate_start.elapsed().as_millis() as u64,
        "Tempo estimation finished"
    );
    Ok(estimate)
}

/// Persist `bytes` to a scoped temp file, analyze it, and remove the file.
///
/// The file is removed on every path: explicitly after a normal run, or by the
/// `ScopedUpload` destructor if anything in between returns early or panics.
pub fn analyze_upload(
    bytes: &[u8],
    suffix: &str,
    settings: &AnalysisSettings,
    analysis_id: Uuid,
) -> Result<TempoEstimate, AnalysisError> {
    let started = Instant::now();
    let upload = ScopedUpload::persist(bytes, suffix, settings.temp_dir.as_deref())
        .map_err(AnalysisError::Storage)?;
    debug!(%analysis_id, path = %upload.path().display(), bytes = upload.size(), "Upload stored");

    let result = analyze_file(upload.path(), settings);

    if let Err(e) = upload.close() {
        // The analysis result is still valid; a stray file is an operator problem.
        warn!(%analysis_id, error = %e, "Failed to remove temporary upload");
    }

    match &result {
        Ok(estimate) => info!(
            %analysis_id,
            bpm = estimate.bpm,
            beats = estimate.beat_timestamps.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Analysis complete"
        ),
        Err(e) => debug!(%analysis_id, error = %e, "Analysis failed"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{click_track, test_config, wav_bytes};

    fn settings(dir: &Path) -> AnalysisSettings {
        AnalysisSettings::from_config(&test_config(dir))
    }

    #[test]
    fn test_analyze_upload_estimates_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let wav = wav_bytes(&click_track(120.0, 10.0, 44_100), 44_100, 1);

        let estimate = analyze_upload(&wav, ".wav", &settings(dir.path()), Uuid::new_v4()).unwrap();
        assert!((estimate.bpm - 120.0).abs() <= 2.0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_mislabelled_container_still_decodes() {
        // The frontend always uploads as ".mp3"; probing must not rely on the suffix.
        let dir = tempfile::tempdir().unwrap();
        let wav = wav_bytes(&click_track(120.0, 6.0, 44_100), 44_100, 1);
        let estimate = analyze_upload(&wav, ".mp3", &settings(dir.path()), Uuid::new_v4()).unwrap();
        assert!(estimate.bpm > 0.0);
    }

    #[test]
    fn test_decode_failure_is_client_error_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let err = analyze_upload(b"hello, world", ".mp3", &settings(dir.path()), Uuid::new_v4()).unwrap_err();
        assert!(err.is_client_error(), "unexpected error: {:?}", err);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_storage_failure_is_internal() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir.path().join("missing"));
        let err = analyze_upload(b"abc", ".mp3", &settings, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, AnalysisError::Storage(_)));
        assert!(!err.is_client_error());
    }
}
