use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::path::PathBuf;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::availability::SelectionError;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{entity} {id} does not exist")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Booking conflict: {0}")]
    Conflict(String),

    #[error("Invalid data: {0}")]
    Invalid(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Failed to read business hours from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed business hours in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Business hours for {day} close before they open")]
    InvalidHours { day: String },
}

#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] ValidationErrors),

    #[error("Slots can't be resolved right now: {0}")]
    SlotsUnavailable(BackendError),

    #[error("Selected time can't be booked: {0}")]
    NotBookable(#[from] SelectionError),

    #[error("A newer slot request for this advisor and date took over, retry to get its result")]
    Superseded,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::MalformedPayload { .. } => StatusCode::BAD_REQUEST,
            AppError::SlotsUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotBookable { .. } => StatusCode::CONFLICT,
            AppError::Superseded => StatusCode::CONFLICT,
            AppError::Backend(BackendError::NotFound { .. }) => StatusCode::NOT_FOUND,
            AppError::Backend(BackendError::Conflict(_)) => StatusCode::CONFLICT,
            AppError::Backend(BackendError::Invalid(_)) => StatusCode::BAD_REQUEST,
            AppError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(err = %self, "Request failed");
        }

        (status, self.to_string()).into_response()
    }
}
