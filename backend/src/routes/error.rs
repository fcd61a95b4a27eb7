use actix_multipart::MultipartError;
use actix_web::error::BlockingError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::storage::upload_store::UploadError;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("No file uploaded")]
    MissingFile(&'static str),
    #[error("No file selected")]
    EmptyFilename(&'static str),
    #[error("Unsupported file type")]
    UnsupportedType { allowed: Vec<String> },
    #[error("File too large")]
    FileTooLarge { limit: usize },
    #[error("Invalid upload")]
    InvalidPayload(String),
    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn message(&self) -> String {
        match self {
            ApiError::MissingFile(hint) | ApiError::EmptyFilename(hint) => hint.to_string(),
            ApiError::UnsupportedType { allowed } => {
                format!("Supported formats: {}", allowed.join(", "))
            }
            ApiError::FileTooLarge { limit } => {
                format!("Maximum upload size is {} bytes", limit)
            }
            ApiError::InvalidPayload(detail) => detail.clone(),
            ApiError::Internal(_) => "An unexpected error occurred".to_string(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            ApiError::Internal(detail) => log::error!("Internal error: {}", detail),
            other => log::warn!("Rejected request: {} ({})", other, other.message()),
        }
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
            message: self.message(),
        })
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::UnsupportedExtension { allowed } => ApiError::UnsupportedType { allowed },
            UploadError::FileTooLarge { limit } => ApiError::FileTooLarge { limit },
            UploadError::Stream(detail) => ApiError::InvalidPayload(detail),
            UploadError::Io(e) => ApiError::Internal(format!("scratch storage: {}", e)),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::InvalidPayload(err.to_string())
    }
}

impl From<BlockingError> for ApiError {
    fn from(err: BlockingError) -> Self {
        ApiError::Internal(format!("analysis worker: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_bad_requests() {
        let err = ApiError::from(UploadError::UnsupportedExtension {
            allowed: vec!["png".into(), "jpg".into()],
        });
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "Supported formats: png, jpg");

        let err = ApiError::EmptyFilename("Please select an image");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "No file selected");
    }

    #[test]
    fn storage_failures_are_internal_and_generic() {
        let err = ApiError::from(UploadError::Io(std::io::Error::other("disk full")));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message(), "An unexpected error occurred");
    }
}
