use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use healthybites_core::error::{self, ApiError};

use crate::lifecycle::LifecycleError;
use crate::store::StoreError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Unknown phone, order or other resource (404)
    NotFound { resource: &'static str, id: String },
    /// Store failure (409 on a unique conflict, otherwise 500)
    Store(StoreError),
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
            received: None,
            docs_hint: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::NotFound { resource, id } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message: format!("{resource} '{id}' not found"),
                    field: None,
                    received: Some(serde_json::Value::String(id)),
                    request_id,
                    docs_hint: None,
                },
            ),
            AppError::Store(err) => {
                tracing::error!(error = %err, "store error");
                let (status, code, message, field) = match err {
                    StoreError::Conflict { field } => (
                        StatusCode::CONFLICT,
                        error::codes::CONFLICT,
                        format!("A record with this {field} already exists"),
                        Some(field),
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        error::codes::INTERNAL_ERROR,
                        "An internal error occurred".to_string(),
                        None,
                    ),
                };
                (
                    status,
                    ApiError {
                        error: code.to_string(),
                        message,
                        field,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Store(err)
    }
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotFound(id) => AppError::NotFound {
                resource: "order",
                id: id.to_string(),
            },
            LifecycleError::Validation(field) => {
                AppError::validation(field, format!("Missing required field: {field}"))
            }
            LifecycleError::Store(err) => AppError::Store(err),
            other => AppError::Validation {
                message: other.to_string(),
                field: None,
                received: None,
                docs_hint: None,
            },
        }
    }
}
