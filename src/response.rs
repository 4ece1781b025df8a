//! JSON response envelope and API errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use serde::Serialize;
use thiserror::Error;
use wa_socket::{UserIdentity, WhatsAppError};

use crate::fetcher::FetchError;

/// `{ success, message?, error?, connected?, user? }`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserIdentity>,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            connected: None,
            user: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
            connected: None,
            user: None,
        }
    }

    pub fn status(user: Option<UserIdentity>) -> Self {
        Self {
            success: user.is_some(),
            message: None,
            error: None,
            connected: Some(user.is_some()),
            user,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// Required fields absent or falsy.
    #[error("{0}")]
    MissingFields(&'static str),
    /// Body was not a JSON object.
    #[error("{0}")]
    InvalidBody(String),
    #[error("WhatsApp socket is not connected")]
    NotConnected,
    #[error("{}", .0.message)]
    Downstream(#[from] WhatsAppError),
    #[error("{0}")]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    MethodNotAllowed(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingFields(_) | ApiError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::NotConnected
            | ApiError::Downstream(_)
            | ApiError::Fetch(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(ApiResponse::error(self.to_string()))).into_response()
    }
}
