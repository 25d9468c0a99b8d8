//! Error types for seismo-fs
//!
//! Every variant is terminal for the request; nothing is retried internally.
//! Client cancellation is not represented here: it is a normal outcome of the
//! stream, not a failure.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Diagnostic returned when the body cannot be turned into a finite source
pub const PARSE_MESSAGE: &str = "Could not parse the body contents. Incorrect USGS param file?";

/// Diagnostic returned for any extraction failure (details are only logged)
pub const EXTRACTION_MESSAGE: &str = "Could not extract seismogram. Make sure, the components \
are valid, and the depth settings are correct.";

/// Diagnostic returned when every receiver was skipped
pub const NO_RESULTS_MESSAGE: &str = "No seismograms found for the given phase relative \
offsets. This could either be due to the chosen phase not existing for the specific \
source-receiver geometry or arriving too late/with too large offsets if the database is \
not long enough.";

/// Request error taxonomy
#[derive(Debug, Error)]
pub enum FsError {
    /// Malformed source payload or failed source preparation (400)
    #[error("{0}")]
    Parse(String),

    /// Time window or receiver specification outside allowed bounds (400)
    #[error("{0}")]
    Validation(String),

    /// Station query matched nothing (404)
    #[error("{0}")]
    NotFound(String),

    /// The database could not produce a seismogram for valid-looking inputs (400)
    #[error("{}", EXTRACTION_MESSAGE)]
    Extraction,

    /// Every receiver was skipped (400)
    #[error("{}", NO_RESULTS_MESSAGE)]
    NoResults,

    /// Unexpected failure inside the service (500)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FsError {
    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            FsError::Parse(_)
            | FsError::Validation(_)
            | FsError::Extraction
            | FsError::NoResults => StatusCode::BAD_REQUEST,
            FsError::NotFound(_) => StatusCode::NOT_FOUND,
            FsError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<zip::result::ZipError> for FsError {
    fn from(err: zip::result::ZipError) -> Self {
        FsError::Internal(format!("Archive error: {}", err))
    }
}

impl From<std::io::Error> for FsError {
    fn from(err: std::io::Error) -> Self {
        FsError::Internal(format!("IO error: {}", err))
    }
}

impl IntoResponse for FsError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}

/// Result type for request handling
pub type FsResult<T> = Result<T, FsError>;
