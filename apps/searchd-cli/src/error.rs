use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use searchd_core::ErrorKind;
use searchd_text::SearchError;

use crate::restricter::RestricterError;

const INTERNAL_MESSAGE: &str = "Something went wrong on the server. The admin is already informed.";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("restricter call failed: {0}")]
    Restricter(#[from] RestricterError),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::InvalidRequest(_) => ErrorKind::QueryInvalid,
            ApiError::Search(e) => e.kind(),
            ApiError::Restricter(_) => ErrorKind::QueryInternal,
        }
    }
}

/// Transport status for every error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::QueryInvalid => StatusCode::BAD_REQUEST,
        ErrorKind::AdmissionRejected => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::QueryInternal | ErrorKind::BuildFatal | ErrorKind::UpdateTransient => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = status_for(kind);
        let (error_type, message) = match kind {
            ErrorKind::QueryInvalid | ErrorKind::AdmissionRejected => {
                tracing::debug!(error_type = kind.as_str(), message = %self, "request rejected");
                (kind.as_str(), self.to_string())
            }
            _ => {
                tracing::error!(status_code = status.as_u16(), error = %self, "request failed");
                ("InternalError", INTERNAL_MESSAGE.to_string())
            }
        };
        let body = Json(json!({
            "error": {
                "type": error_type,
                "msg": message,
            }
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
