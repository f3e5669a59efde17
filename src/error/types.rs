use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid PDF: {message}")]
    InvalidPdf { message: String },

    #[error("Invalid file: {message}")]
    InvalidFile { message: String },

    #[error("Invalid image: {message}")]
    InvalidImage { message: String },

    #[error("Unsupported content type {found:?}: expected {expected}")]
    InvalidContentType { found: String, expected: &'static str },

    #[error("Missing file in request")]
    MissingFile,

    #[error("Only one file can be uploaded per request")]
    TooManyFiles,

    #[error("File too large: uploads are limited to {limit_mb}MB, reduce the file size and try again")]
    FileTooLarge { limit_mb: usize },

    #[error("Processing timed out, try a smaller or simpler file")]
    Timeout,

    #[error("Rate limit exceeded: maximum concurrent requests reached")]
    RateLimitExceeded,

    #[error("PDF processing failed: {message}")]
    ProcessingError { message: String },

    #[error("Extraction produced an inconsistent result: {message}")]
    MalformedResult { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

/// Coarse classification surfaced to clients so they can tell a bad upload
/// apart from one that was simply too big or too slow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    ResourceExceeded,
    Internal,
}

impl AppError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::InvalidPdf { .. } => "INVALID_PDF",
            AppError::InvalidFile { .. } => "INVALID_FILE",
            AppError::InvalidImage { .. } => "INVALID_IMAGE",
            AppError::InvalidContentType { .. } => "INVALID_CONTENT_TYPE",
            AppError::MissingFile => "MISSING_FILE",
            AppError::TooManyFiles => "TOO_MANY_FILES",
            AppError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            AppError::Timeout => "REQUEST_TIMEOUT",
            AppError::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            AppError::ProcessingError { .. } => "PROCESSING_ERROR",
            AppError::MalformedResult { .. } => "MALFORMED_RESULT",
            AppError::ValidationError { .. } => "VALIDATION_ERROR",
            AppError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidPdf { .. } => StatusCode::BAD_REQUEST,
            AppError::InvalidFile { .. } => StatusCode::BAD_REQUEST,
            AppError::InvalidImage { .. } => StatusCode::BAD_REQUEST,
            AppError::InvalidContentType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::MissingFile => StatusCode::BAD_REQUEST,
            AppError::TooManyFiles => StatusCode::BAD_REQUEST,
            AppError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Timeout => StatusCode::REQUEST_TIMEOUT,
            AppError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            AppError::ProcessingError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::MalformedResult { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ValidationError { .. } => StatusCode::BAD_REQUEST,
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidPdf { .. }
            | AppError::InvalidFile { .. }
            | AppError::InvalidImage { .. }
            | AppError::InvalidContentType { .. }
            | AppError::MissingFile
            | AppError::TooManyFiles
            | AppError::ValidationError { .. } => ErrorKind::InvalidInput,
            AppError::FileTooLarge { .. } | AppError::Timeout | AppError::RateLimitExceeded => {
                ErrorKind::ResourceExceeded
            }
            AppError::ProcessingError { .. }
            | AppError::MalformedResult { .. }
            | AppError::Internal { .. } => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: String,
    code: &'a str,
    kind: ErrorKind,
    request_id: String,
    timestamp: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();
        let request_id = crate::middleware::current_request_id();

        if status.is_server_error() {
            tracing::error!(
                error_code = error_code,
                status_code = %status,
                request_id = %request_id,
                error_message = %message,
                "API error occurred"
            );
        } else {
            tracing::warn!(
                error_code = error_code,
                status_code = %status,
                request_id = %request_id,
                error_message = %message,
                "Request rejected"
            );
        }

        // `error` stays a plain string: browser clients display it verbatim.
        let body = Json(ErrorBody {
            success: false,
            error: message,
            code: error_code,
            kind: self.kind(),
            request_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
        });

        (status, body).into_response()
    }
}

// Convert common errors to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal {
            message: format!("{:#}", err),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: format!("IO error: {}", err),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ValidationError {
            message: format!("JSON parsing error: {}", err),
        }
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        AppError::Timeout
    }
}

// Helper methods for creating specific errors
impl AppError {
    pub fn invalid_pdf(message: impl Into<String>) -> Self {
        AppError::InvalidPdf {
            message: message.into(),
        }
    }

    pub fn invalid_file(message: impl Into<String>) -> Self {
        AppError::InvalidFile {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        AppError::MalformedResult {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AppError::ValidationError {
            message: message.into(),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        AppError::ProcessingError {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        AppError::Internal {
            message: message.into(),
        }
    }
}

/// Why a single embedded image could not be turned into a preview. These are
/// recovered inside an extraction run and never reach the client as-is.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image dictionary is missing /{0}")]
    MissingEntry(&'static str),

    #[error("invalid image dimensions {width}x{height}")]
    InvalidDimensions { width: i64, height: i64 },

    #[error("image of {pixels} pixels exceeds the limit of {limit}")]
    TooLarge { pixels: u64, limit: u64 },

    #[error("decompressed stream exceeds {limit} bytes")]
    StreamTooLarge { limit: u64 },

    #[error("unsupported filter /{0}")]
    UnsupportedFilter(String),

    #[error("unsupported color space {0}")]
    UnsupportedColorSpace(String),

    #[error("unsupported bits per component: {0}")]
    UnsupportedBitDepth(i64),

    #[error("corrupt stream data: {0}")]
    Corrupt(String),

    #[error("pixel data truncated: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("unrecognized image signature")]
    UnrecognizedFormat,

    #[error("image codec error: {0}")]
    Codec(#[from] image::ImageError),

    #[error("PDF object error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("decode worker failed: {0}")]
    Worker(String),

    #[error("extraction was cancelled before this image was decoded")]
    Cancelled,
}
