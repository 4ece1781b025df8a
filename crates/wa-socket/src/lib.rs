//! WhatsApp session seam and a WebSocket transport behind it.
//!
//! The [`socket`] module is the seam the gateway programs against. [`web`]
//! is a stand-in transport with its own handshake and framing; it is not
//! wire-compatible with the production WhatsApp Web service. Anything that
//! implements [`SocketFactory`] can replace it.

pub mod auth;
pub mod error;
pub mod frame;
pub mod jid;
pub mod noise;
pub mod qr;
pub mod socket;
pub mod types;
pub mod web;

pub use auth::{AuthCreds, MultiFileAuthStore};
pub use error::{WhatsAppError, WhatsAppErrorCode, WhatsAppResult};
pub use jid::JidKind;
pub use socket::{SocketEvent, SocketEvents, SocketFactory, WaSocket};
pub use types::{
    ConnectionState, ConnectionUpdate, DisconnectReason, LastDisconnect, MessageKey,
    OutboundContent, UserIdentity,
};
pub use web::{WebClientConfig, WebSocketFactory};
