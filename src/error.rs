//! # Error Handling
//!
//! Defines the request-level error taxonomy and how each failure is converted
//! to an HTTP response. Every stage of the transcription pipeline (read →
//! convert → recognize → shape) returns a typed error that is mapped exactly
//! once, here, at the transport boundary.
//!
//! ## Error Categories:
//! - **PayloadTooLarge**: Upload exceeds the configured ceiling (413)
//! - **Conversion**: The external audio converter exited non-zero (500)
//! - **Recognition**: The speech model failed on the normalized waveform (500)
//! - **BadRequest**: Malformed multipart input (400)
//! - **Internal**: Anything unexpected; reported with a fixed message (500)
//!
//! ## Response Format:
//! All error bodies use the same wire shape:
//! ```json
//! {"detail": "Audio conversion failed"}
//! ```

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

use crate::audio::convert::ConvertError;

/// Request-processing errors for the transcription service.
///
/// ## Leakage policy:
/// `Conversion` and `Internal` carry server-side context (converter stderr,
/// source error text) that is logged but never sent to the client; the
/// client sees a fixed detail string. `Recognition` surfaces the model's
/// error message as the detail.
#[derive(Debug)]
pub enum AppError {
    /// Upload body exceeded the size ceiling after a full read
    PayloadTooLarge,

    /// The external converter reported failure; holds its diagnostic output
    Conversion(String),

    /// The recognizer raised during inference
    Recognition(String),

    /// Client sent an unusable multipart body
    BadRequest(String),

    /// Unexpected server-side failure caught at the outer boundary
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::PayloadTooLarge => write!(f, "File too large. Max 25MB."),
            AppError::Conversion(diag) => write!(f, "Audio conversion failed: {}", diag),
            AppError::Recognition(msg) => write!(f, "Recognition error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, detail) = match self {
            AppError::PayloadTooLarge => (
                actix_web::http::StatusCode::PAYLOAD_TOO_LARGE,
                "File too large. Max 25MB.".to_string(),
            ),
            AppError::Conversion(diag) => {
                // Converter diagnostics stay in the server log
                tracing::error!("Converter error: {}", diag);
                (
                    actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "Audio conversion failed".to_string(),
                )
            }
            AppError::Recognition(msg) => {
                tracing::error!("Transcription error: {}", msg);
                (
                    actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                    msg.clone(),
                )
            }
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                msg.clone(),
            ),
            AppError::Internal(msg) => {
                tracing::error!("Unhandled error: {}", msg);
                (
                    actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        HttpResponse::build(status).json(json!({ "detail": detail }))
    }
}

/// Anything still typed as `anyhow::Error` at the boundary is unexpected by
/// definition and gets the non-leaking treatment.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<ConvertError> for AppError {
    fn from(err: ConvertError) -> Self {
        AppError::Conversion(err.to_string())
    }
}

impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Multipart error: {}", err))
    }
}

/// Shorthand for handler results.
pub type AppResult<T> = Result<T, AppError>;
