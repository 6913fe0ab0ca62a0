use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

use crate::types::Source;

#[derive(Debug, Error)]
pub enum AppError {
    /// An external source failed, timed out, or returned an undecodable payload.
    #[error("Source unavailable ({which}): {reason}")]
    SourceUnavailable { which: Source, reason: String },

    /// The atomic batch write was rolled back.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[source] sqlx::Error),

    /// Never returned from a refresh; only logged.
    #[error("Summary generation failed: {0}")]
    SummaryGeneration(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::SourceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = match &self {
            AppError::SourceUnavailable { which, .. } => json!({
                "error": "External data source unavailable",
                "details": format!("Could not fetch data from {}", which.display_name()),
            }),
            AppError::Validation(details) => json!({
                "error": "Validation failed",
                "details": details,
            }),
            AppError::NotFound(what) => json!({ "error": format!("{what} not found") }),
            _ => json!({ "error": "Internal server error" }),
        };
        (status, Json(body)).into_response()
    }
}
