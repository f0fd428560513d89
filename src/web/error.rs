// Error responses for the HTTP API. Every variant renders as
// `{"error": "<message>"}` with a fixed, client-safe message.

use crate::catalog::CatalogError;
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    // Upload client errors
    NoFileUploaded,
    InvalidFileName,
    MultipleFiles,
    PayloadTooLarge,

    // Upload server-side errors
    SaveFailed,
    Busy,

    RequestTimeout,

    BadRequest(String),
    NotFound(String),
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NoFileUploaded
            | Self::InvalidFileName
            | Self::MultipleFiles
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::SaveFailed => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            Self::Busy | Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::NoFileUploaded => "No file uploaded",
            Self::InvalidFileName => "Invalid file name",
            Self::MultipleFiles => "Multiple files uploaded",
            Self::PayloadTooLarge => "File too large",
            Self::SaveFailed => "Failed to save the file",
            Self::Busy => "Busy, retry",
            Self::RequestTimeout => "Request timed out",
            Self::BadRequest(msg) | Self::NotFound(msg) | Self::ServiceUnavailable(msg) => msg,
        }
    }

    /// Classifies a failure to read the multipart body.
    pub fn from_multipart(err: &MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge
        } else {
            Self::NoFileUploaded
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message() }));
        (self.status(), body).into_response()
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Invalid(msg) => Self::BadRequest(msg),
            CatalogError::NotFound(_) => Self::NotFound("Product not found".to_string()),
            CatalogError::Closed => Self::ServiceUnavailable("Service shutting down".to_string()),
        }
    }
}
