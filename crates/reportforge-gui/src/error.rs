use axum::{Json, http::StatusCode, response::IntoResponse};
use reportforge_core::ReportForgeError;
use serde::Serialize;
use std::fmt;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(error: impl ToString) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let payload = ErrorResponse {
            error: self.message,
        };
        (self.status, Json(payload)).into_response()
    }
}

impl From<ReportForgeError> for AppError {
    fn from(error: ReportForgeError) -> Self {
        let status = match &error {
            ReportForgeError::ProtocolViolation(_) => StatusCode::CONFLICT,
            ReportForgeError::UnsupportedProvider(_)
            | ReportForgeError::InvalidConfigurationValue { .. }
            | ReportForgeError::MissingSecret(_) => StatusCode::BAD_REQUEST,
            ReportForgeError::StreamConsumption { .. } => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, error.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal(error.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}
