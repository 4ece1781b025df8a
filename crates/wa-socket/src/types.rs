//! Shared types for the WhatsApp Web socket: connection updates, disconnect
//! reasons, identities, and outbound message payloads.

use serde::{Deserialize, Serialize};
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════
//  Connection
// ═══════════════════════════════════════════════════════════════════════

/// Transport state reported by the socket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

/// Why the socket closed. Status codes follow the WA Web stream errors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DisconnectReason {
    ConnectionClosed,
    ConnectionLost,
    /// QR refs ran out without a scan.
    TimedOut,
    ConnectionReplaced,
    LoggedOut,
    BadSession,
    RestartRequired,
    MultideviceMismatch,
    Forbidden,
    UnavailableService,
    Other(u16),
}

impl DisconnectReason {
    pub fn status_code(self) -> u16 {
        match self {
            Self::ConnectionClosed => 428,
            Self::ConnectionLost | Self::TimedOut => 408,
            Self::ConnectionReplaced => 440,
            Self::LoggedOut => 401,
            Self::BadSession => 500,
            Self::RestartRequired => 515,
            Self::MultideviceMismatch => 411,
            Self::Forbidden => 403,
            Self::UnavailableService => 503,
            Self::Other(code) => code,
        }
    }

    /// 408 is shared by `ConnectionLost` and `TimedOut`; the former wins.
    pub fn from_status_code(code: u16) -> Self {
        match code {
            428 => Self::ConnectionClosed,
            408 => Self::ConnectionLost,
            440 => Self::ConnectionReplaced,
            401 => Self::LoggedOut,
            500 => Self::BadSession,
            515 => Self::RestartRequired,
            411 => Self::MultideviceMismatch,
            403 => Self::Forbidden,
            503 => Self::UnavailableService,
            other => Self::Other(other),
        }
    }

    /// A logged-out session cannot be resumed without pairing again.
    pub fn is_logged_out(self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "status {}", code),
            named => write!(f, "{:?} ({})", named, named.status_code()),
        }
    }
}

/// Details of the most recent disconnect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastDisconnect {
    pub reason: DisconnectReason,
    pub message: String,
}

/// A connection-update event. Every field is optional: an update may carry
/// only a QR payload, only a state change, or both.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    pub connection: Option<ConnectionState>,
    pub last_disconnect: Option<LastDisconnect>,
    pub qr: Option<String>,
}

impl ConnectionUpdate {
    pub fn state(connection: ConnectionState) -> Self {
        Self {
            connection: Some(connection),
            ..Default::default()
        }
    }

    pub fn closed(reason: DisconnectReason, message: impl Into<String>) -> Self {
        Self {
            connection: Some(ConnectionState::Close),
            last_disconnect: Some(LastDisconnect {
                reason,
                message: message.into(),
            }),
            qr: None,
        }
    }

    pub fn qr(payload: impl Into<String>) -> Self {
        Self {
            qr: Some(payload.into()),
            ..Default::default()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Identity
// ═══════════════════════════════════════════════════════════════════════

/// The account a paired session is logged in as.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserIdentity {
    /// Device JID, e.g. `15551234567:3@s.whatsapp.net`.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════
//  Outbound messages
// ═══════════════════════════════════════════════════════════════════════

/// Payload of one outbound message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OutboundContent {
    #[serde(rename_all = "camelCase")]
    Image {
        #[serde(with = "crate::auth::b64")]
        image: Vec<u8>,
        caption: String,
        mimetype: String,
    },
    #[serde(rename_all = "camelCase")]
    Document {
        #[serde(with = "crate::auth::b64")]
        document: Vec<u8>,
        mimetype: String,
        file_name: String,
    },
    #[serde(rename_all = "camelCase")]
    Buttons {
        text: String,
        buttons: Vec<serde_json::Value>,
        header_type: u8,
    },
    Text {
        text: String,
    },
}

impl OutboundContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Short kind label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Document { .. } => "document",
            Self::Buttons { .. } => "buttons",
        }
    }
}

/// Key of a sent message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    pub id: String,
    pub remote_jid: String,
    pub from_me: bool,
}
