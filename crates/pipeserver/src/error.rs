use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use pipecore::{PipelineError, StoreError};
use serde::Serialize;
use std::fmt;

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Engine error rendered as `{"error": "..."}` with a matching status code
#[derive(Debug)]
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError(err)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            e if e.is_validation() => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::Node { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::Store(StoreError::InvalidTransition { .. }) | PipelineError::Cancelled => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        HttpResponse::build(status).json(ErrorResponse {
            error: self.0.to_string(),
        })
    }
}
