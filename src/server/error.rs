//! Error-to-HTTP response conversion.
//!
//! The only place a [`ServiceError`] becomes a status code. Handlers return
//! `Result<T, ApiError>` and let `?` do the translation.

use crate::error::{ErrorKind, ServiceError};
use crate::pipeline::Stage;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    kind: ErrorKind,
    stage: Option<Stage>,
}

impl ApiError {
    /// A 400 for request-shape problems caught before a job exists.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            kind: ErrorKind::Validation,
            stage: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Timeout => StatusCode::REQUEST_TIMEOUT,
        ErrorKind::RemoteStore
        | ErrorKind::Conversion
        | ErrorKind::Protocol
        | ErrorKind::Cancelled
        | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        let kind = e.kind();
        Self {
            status: status_for(kind),
            message: e.to_string(),
            kind,
            stage: e.stage(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                kind = %self.kind,
                error = %self.message,
                "OCR request failed"
            );
        }

        let body = json!({
            "error": self.message,
            "kind": self.kind,
            "stage": self.stage,
        });

        (self.status, Json(body)).into_response()
    }
}
