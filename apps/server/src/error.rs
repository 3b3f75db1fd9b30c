use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ApiResponse;

/// Errors returned by the payment provider client.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider did not answer within the configured timeout.
    /// Retryable, unlike a definitive rejection.
    #[error("платёжный провайдер не ответил вовремя")]
    Timeout,
    #[error("платёжный провайдер отклонил запрос ({status})")]
    Api { status: u16, body: String },
    #[error("ошибка запроса к платёжному провайдеру")]
    Http(#[source] reqwest::Error),
    #[error("неожиданный ответ платёжного провайдера: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Http(e)
        }
    }
}

/// Application error taxonomy, mapped onto HTTP statuses in `into_response`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    Verification(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(m) | AppError::InvalidState(m) | AppError::Verification(m) => {
                (StatusCode::BAD_REQUEST, m.clone())
            }
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
            AppError::Provider(e) => {
                tracing::error!("provider call failed: {}", e);
                (StatusCode::BAD_GATEWAY, e.to_string())
            }
            AppError::Db(e) => {
                tracing::error!("database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Ошибка сервера".into())
            }
        };

        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}
