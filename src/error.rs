//! # Error Handling
//!
//! This module defines the HTTP-facing error type and how it is converted to responses.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Result<T, E> Type
//! - **Purpose**: Forces you to handle both success and failure cases
//! - **No exceptions**: Rust doesn't have try/catch, it uses Result instead
//!
//! ### Enums for Error Types
//! - **Variants**: Each enum variant represents a different kind of error
//! - **Pattern matching**: Use `match` to map each kind to an HTTP status
//!
//! ### Traits for Error Conversion
//! - **From trait**: Automatically converts between error types (enables `?`)
//! - **ResponseError trait**: Converts errors to HTTP responses
//! - **Display trait**: Defines how errors are formatted as strings
//!
//! ## Layering:
//! The audio, tempo and upload modules return their own `thiserror` enums. Handlers
//! convert them into `AppError` here, which is the only place that knows about
//! status codes.

use crate::analysis::AnalysisError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

/// Custom error types for the application.
///
/// ## Error Categories:
/// - **Client errors (4xx)**: the upload itself is the problem, retrying it unchanged won't help
/// - **Capacity errors (503)**: the server is saturated or the analysis ran too long
/// - **Server errors (500)**: storage, pipeline or configuration faults
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::EmptyUpload);
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Malformed request (bad multipart framing, missing headers)
    BadRequest(String),

    /// The request is well-formed HTTP but not an acceptable form (wrong content type)
    Validation(String),

    /// No file field was present in the form
    MissingFile(String),

    /// The file field was present but carried zero bytes
    EmptyUpload,

    /// Upload exceeded the configured size limit (bytes)
    PayloadTooLarge(usize),

    /// The upload could not be decoded as audio
    Decode(String),

    /// No analysis slot became free within the queue timeout
    Busy(String),

    /// The analysis did not finish within the configured timeout (seconds)
    Timeout(u64),

    /// Tempo estimation failed on decoded audio
    Analysis(String),

    /// Writing or removing the scoped upload file failed
    Storage(String),

    /// Internal server errors (join failures, unexpected states, etc.)
    Internal(String),

    /// Configuration file or environment variable problems
    ConfigError(String),
}

impl AppError {
    /// Machine-readable kind reported in the `kind` field of every error body.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::Validation(_) => "validation_error",
            AppError::MissingFile(_) => "missing_file",
            AppError::EmptyUpload => "empty_upload",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::Decode(_) => "decode_error",
            AppError::Busy(_) => "server_busy",
            AppError::Timeout(_) => "analysis_timeout",
            AppError::Analysis(_) => "analysis_error",
            AppError::Storage(_) => "storage_error",
            AppError::Internal(_) => "internal_error",
            AppError::ConfigError(_) => "config_error",
        }
    }

    /// Whether the caller caused this error (used to pick the log level).
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Implementation of the Display trait for AppError.
///
/// The text produced here is what ends up in the `error` field of the JSON body,
/// so it is phrased for API clients rather than for operators.
impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::MissingFile(field) => write!(f, "No audio file provided in form field '{}'", field),
            AppError::EmptyUpload => write!(f, "Uploaded file is empty"),
            AppError::PayloadTooLarge(limit) => write!(f, "Uploaded file exceeds the {} byte limit", limit),
            AppError::Decode(msg) => write!(f, "Could not decode audio: {}", msg),
            AppError::Busy(msg) => write!(f, "Server busy: {}", msg),
            AppError::Timeout(secs) => write!(f, "Analysis did not finish within {} seconds", secs),
            AppError::Analysis(msg) => write!(f, "Tempo analysis failed: {}", msg),
            AppError::Storage(msg) => write!(f, "Temporary storage error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

/// Implementation of the ResponseError trait for AppError.
///
/// ## HTTP Status Code Mapping:
/// - BadRequest/Validation/MissingFile/EmptyUpload/Decode → 400 (Bad Request)
/// - PayloadTooLarge → 413 (Payload Too Large)
/// - Busy/Timeout → 503 (Service Unavailable)
/// - Analysis/Storage/Internal/ConfigError → 500 (Internal Server Error)
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": "Could not decode audio: no supported audio container found",
///   "kind": "decode_error",
///   "timestamp": "2025-01-01T12:00:00Z"
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_)
            | AppError::Validation(_)
            | AppError::MissingFile(_)
            | AppError::EmptyUpload
            | AppError::Decode(_) => StatusCode::BAD_REQUEST,              // 400
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE, // 413
            AppError::Busy(_) | AppError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE, // 503
            AppError::Analysis(_)
            | AppError::Storage(_)
            | AppError::Internal(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR, // 500
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.to_string(),                      // Human-readable error message
            "kind": self.kind(),                            // Machine-readable error type
            "timestamp": chrono::Utc::now().to_rfc3339()    // When the error occurred
        }))
    }
}

/// Pipeline failures keep their client/server classification when they cross into HTTP.
impl From<AnalysisError> for AppError {
    fn from(err: AnalysisError) -> Self {
        if err.is_client_error() {
            AppError::Decode(err.to_string())
        } else {
            match err {
                AnalysisError::Storage(e) => AppError::Storage(e.to_string()),
                other => AppError::Analysis(other.to_string()),
            }
        }
    }
}

/// Automatic conversion from anyhow::Error to AppError.
///
/// When you use `?` with an anyhow::Error, it automatically becomes an AppError::Internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Multipart framing errors are always the client's fault.
impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Multipart error: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

/// Automatic conversion from configuration errors to AppError.
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
///
/// `AppResult<HttpResponse>` reads better in handler signatures than
/// `Result<HttpResponse, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
