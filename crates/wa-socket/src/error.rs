//! Crate-level error types for the WhatsApp Web socket.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Alias for `Result<T, WhatsAppError>`.
pub type WhatsAppResult<T> = Result<T, WhatsAppError>;

/// Uniform error type used across the socket crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppError {
    pub code: WhatsAppErrorCode,
    pub message: String,
    /// Optional lower-level detail (I/O error text, close code, ...).
    pub details: Option<String>,
}

impl fmt::Display for WhatsAppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)?;
        if let Some(ref d) = self.details {
            write!(f, " ({})", d)?;
        }
        Ok(())
    }
}

impl std::error::Error for WhatsAppError {}

/// Categorised error codes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WhatsAppErrorCode {
    // ── Connection ───────────────────────────────────────
    NotConnected,
    ConnectionClosed,
    HandshakeFailed,
    NetworkError,
    // ── Credentials ──────────────────────────────────────
    StorageError,
    SerializationError,
    // ── Messaging ────────────────────────────────────────
    InvalidContent,
    // ── Internal ─────────────────────────────────────────
    InternalError,
}

impl WhatsAppError {
    fn with_code(code: WhatsAppErrorCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: msg.into(),
            details: None,
        }
    }

    pub fn not_connected(msg: impl Into<String>) -> Self {
        Self::with_code(WhatsAppErrorCode::NotConnected, msg)
    }

    pub fn connection_closed(msg: impl Into<String>) -> Self {
        Self::with_code(WhatsAppErrorCode::ConnectionClosed, msg)
    }

    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::with_code(WhatsAppErrorCode::HandshakeFailed, msg)
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::with_code(WhatsAppErrorCode::NetworkError, msg)
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::with_code(WhatsAppErrorCode::StorageError, msg)
    }

    pub fn invalid_content(msg: impl Into<String>) -> Self {
        Self::with_code(WhatsAppErrorCode::InvalidContent, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_code(WhatsAppErrorCode::InternalError, msg)
    }

    /// Attach a detail string.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl From<std::io::Error> for WhatsAppError {
    fn from(e: std::io::Error) -> Self {
        Self::storage(e.to_string())
    }
}

impl From<serde_json::Error> for WhatsAppError {
    fn from(e: serde_json::Error) -> Self {
        Self::with_code(WhatsAppErrorCode::SerializationError, e.to_string())
    }
}
