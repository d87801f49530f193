//! Error types and HTTP status mapping for the service.

use axum::http::StatusCode;

/// All errors that can occur in the ingestion service.
#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forecast error: {0}")]
    Forecast(#[from] sensorcast::ForecastError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// HTTP status returned to query clients.
    ///
    /// Request bodies are decoded into [`ServerError::InvalidPayload`], so a
    /// bare JSON error comes from a stored document and is a server fault.
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidPayload(_) | ServerError::InvalidParams(_) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Forecast(sensorcast::ForecastError::UnknownSensorType(_)) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::Forecast(_)
            | ServerError::Io(_)
            | ServerError::Json(_)
            | ServerError::Transport(_)
            | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
