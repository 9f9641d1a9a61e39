use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::backend::Capability;

/// Caller-supplied request problems, reported before any backend is tried.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Image is required")]
    MissingImage,
    #[error("image is not valid base64: {0}")]
    InvalidImage(String),
    #[error("no backends are configured for {0} requests")]
    CapabilityUnavailable(Capability),
    #[error("invalid request body: {0}")]
    InvalidBody(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct DetailEnvelope {
    detail: String,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Input(error) => (
                StatusCode::BAD_REQUEST,
                Json(DetailEnvelope {
                    detail: error.to_string(),
                }),
            )
                .into_response(),
            AppError::PayloadTooLarge(detail) => {
                (StatusCode::PAYLOAD_TOO_LARGE, Json(DetailEnvelope { detail })).into_response()
            }
            AppError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorEnvelope { error: message })).into_response()
            }
            AppError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorEnvelope { error: message }),
            )
                .into_response(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(rejection.body_text())
        } else {
            AppError::Input(InputError::InvalidBody(rejection.body_text()))
        }
    }
}

pub fn apply_header(headers: &mut axum::http::HeaderMap, name: &str, value: &str) {
    let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
        return;
    };
    let Ok(header_value) = HeaderValue::from_str(value) else {
        return;
    };
    headers.insert(header_name, header_value);
}
