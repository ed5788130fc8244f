//! Mapping of analytics failures onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::error::{AnalyticsError, ConfigError, StoreError};

// ---

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Analytics(AnalyticsError),

    #[error("{0}")]
    NotFound(String),
}

impl From<AnalyticsError> for ApiError {
    fn from(err: AnalyticsError) -> Self {
        Self::Analytics(err)
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        Self::Analytics(err.into())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Analytics(err.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        // ---
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Analytics(AnalyticsError::Config(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Analytics(AnalyticsError::Upstream(_)) => StatusCode::BAD_GATEWAY,
            Self::Analytics(AnalyticsError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let status = self.status();
        let message = self.to_string();
        error!(status = status.as_u16(), %message, "analytics request failed");
        (
            status,
            Json(json!({ "status": status.as_u16(), "message": message })),
        )
            .into_response()
    }
}
