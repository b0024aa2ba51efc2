//! # BPM Analysis Endpoint
//!
//! `POST /analyze-bpm/` accepts a `multipart/form-data` upload and answers with
//! `{ "bpm": <f64>, "beat_timestamps": [<f64>, ...] }`.
//!
//! ## Request flow:
//! 1. Stream the file field into memory, enforcing `max_upload_bytes` chunk by chunk
//! 2. Wait (bounded by `queue_timeout_secs`) for an analysis slot
//! 3. Run store → decode → estimate → cleanup on the blocking pool, bounded by `timeout_secs`
//! 4. Map the outcome onto a JSON success body or an [`AppError`]
//!
//! The blocking job owns the upload bytes, the slot permit and the active-analysis guard.
//! If the request times out, the job keeps running to completion and releases all three
//! (including the temp file) when it is done.

use crate::analysis::{self, AnalysisSettings};
use crate::config::AnalysisConfig;
use crate::error::{AppError, AppResult};
use crate::state::{AnalysisOutcome, AppState};
use crate::upload::suffix_for;
use actix_multipart::{Field, Multipart};
use actix_web::{http::header, web, HttpRequest, HttpResponse};
use futures_util::stream::StreamExt;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A file received from the form, before it is written anywhere.
#[derive(Debug)]
pub struct ReceivedUpload {
    pub field_name: String,
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

/// Handle `POST /analyze-bpm/`.
pub async fn analyze_bpm(
    req: HttpRequest,
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let analysis_id = Uuid::new_v4();
    let config = state.config.clone();

    let result = run_analysis(&req, &state, &mut payload, &config.analysis, analysis_id).await;
    if let Err(e) = &result {
        if e.is_client_error() {
            warn!(%analysis_id, kind = e.kind(), error = %e, "Rejected analysis request");
        } else {
            error!(%analysis_id, kind = e.kind(), error = %e, "Analysis request failed");
        }
    }
    result
}

async fn run_analysis(
    req: &HttpRequest,
    state: &web::Data<AppState>,
    payload: &mut Multipart,
    limits: &AnalysisConfig,
    analysis_id: Uuid,
) -> AppResult<HttpResponse> {
    ensure_multipart(req)?;

    let upload = read_upload(payload, limits).await?;
    info!(
        %analysis_id,
        field = %upload.field_name,
        filename = upload.filename.as_deref().unwrap_or("<none>"),
        bytes = upload.bytes.len(),
        "Upload received"
    );
    if upload.bytes.is_empty() {
        return Err(AppError::EmptyUpload);
    }
    let suffix = suffix_for(upload.filename.as_deref(), &limits.default_suffix);

    let permit = match state
        .acquire_analysis_slot(Duration::from_secs(limits.queue_timeout_secs))
        .await
    {
        Some(permit) => permit,
        None => {
            state.record_analysis_outcome(AnalysisOutcome::Rejected);
            return Err(AppError::Busy(format!(
                "all {} analysis slots stayed busy for {}s",
                limits.max_concurrent_analyses, limits.queue_timeout_secs
            )));
        }
    };

    let active = state.begin_analysis();
    let settings = AnalysisSettings::from_config(&state.config);
    let bytes = upload.bytes;
    let job = web::block(move || {
        // Released when the job ends, not when the request gives up on it.
        let _permit = permit;
        let _active = active;
        analysis::analyze_upload(&bytes, &suffix, &settings, analysis_id)
    });

    let timeout = Duration::from_secs(limits.timeout_secs);
    match tokio::time::timeout(timeout, job).await {
        Ok(Ok(Ok(estimate))) => {
            state.record_analysis_outcome(AnalysisOutcome::Completed);
            Ok(HttpResponse::Ok().json(estimate))
        }
        Ok(Ok(Err(e))) => {
            state.record_analysis_outcome(AnalysisOutcome::Failed);
            Err(AppError::from(e))
        }
        Ok(Err(e)) => {
            state.record_analysis_outcome(AnalysisOutcome::Failed);
            Err(AppError::Internal(format!("analysis task failed: {}", e)))
        }
        Err(_) => {
            state.record_analysis_outcome(AnalysisOutcome::TimedOut);
            Err(AppError::Timeout(limits.timeout_secs))
        }
    }
}

fn ensure_multipart(req: &HttpRequest) -> AppResult<()> {
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false);
    if is_multipart {
        Ok(())
    } else {
        Err(AppError::Validation(
            "expected a multipart/form-data request".to_string(),
        ))
    }
}

/// Pull the audio file out of the form.
///
/// The field named `limits.upload_field` wins. Without one, the first field that carries
/// a filename is used instead. Every other field is drained and ignored.
pub async fn read_upload(payload: &mut Multipart, limits: &AnalysisConfig) -> AppResult<ReceivedUpload> {
    let mut fallback: Option<ReceivedUpload> = None;

    while let Some(item) = payload.next().await {
        let mut field: Field = item?;

        let (name, filename) = match field.content_disposition() {
            Some(cd) => (
                cd.get_name().unwrap_or_default().to_string(),
                cd.get_filename().map(str::to_string),
            ),
            None => (String::new(), None),
        };

        if name == limits.upload_field {
            let bytes = read_field(&mut field, limits.max_upload_bytes).await?;
            return Ok(ReceivedUpload { field_name: name, filename, bytes });
        }

        if fallback.is_none() && filename.is_some() {
            let bytes = read_field(&mut field, limits.max_upload_bytes).await?;
            fallback = Some(ReceivedUpload { field_name: name, filename, bytes });
        } else {
            drain_field(&mut field).await?;
        }
    }

    fallback.ok_or_else(|| AppError::MissingFile(limits.upload_field.clone()))
}

/// Collect a field's bytes, failing as soon as the running total passes `limit`.
async fn read_field(field: &mut Field, limit: usize) -> AppResult<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk?;
        if bytes.len() + chunk.len() > limit {
            return Err(AppError::PayloadTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

async fn drain_field(field: &mut Field) -> AppResult<()> {
    while let Some(chunk) = field.next().await {
        chunk?;
    }
    Ok(())
}
