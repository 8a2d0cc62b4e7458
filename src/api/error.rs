use crate::domain::CommandError;
use crate::domain::color::ColorConversionError;
use crate::effects::EffectError;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Effect(#[from] EffectError),
    #[error(transparent)]
    Colour(#[from] ColorConversionError),
    #[error(transparent)]
    Json(#[from] JsonRejection),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Command(CommandError::ShutDown) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Effect(EffectError::UnknownKind { .. }) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        debug!(status = status.as_u16(), "🌐 Rejected request: {}", self);
        let body = json!({
            "ok": false,
            "error": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
