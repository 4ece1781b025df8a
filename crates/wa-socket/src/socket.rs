//! The seam between the gateway and a messaging transport.
//!
//! A [`SocketFactory`] opens a session from stored credentials and hands
//! back the session handle together with its event stream. Connection
//! progress (QR payloads, open, close + reason) and credential changes are
//! only ever reported through that stream.

use crate::auth::AuthCreds;
use crate::error::WhatsAppResult;
use crate::types::{ConnectionUpdate, MessageKey, OutboundContent, UserIdentity};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Event emitted by a socket.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// Credentials changed and should be persisted.
    CredsUpdate(AuthCreds),
    ConnectionUpdate(ConnectionUpdate),
}

/// Receiving end of a socket's events. Ends when the socket task exits.
pub type SocketEvents = mpsc::UnboundedReceiver<SocketEvent>;

/// A live session handle.
#[async_trait]
pub trait WaSocket: Send + Sync {
    /// Identity the session is authenticated as, if paired.
    async fn user(&self) -> Option<UserIdentity>;

    /// Send one message to a fully-qualified JID.
    async fn send_message(&self, jid: &str, content: OutboundContent) -> WhatsAppResult<MessageKey>;

    /// Close the transport on purpose. No close event is emitted.
    async fn end(&self);
}

/// Opens sessions.
#[async_trait]
pub trait SocketFactory: Send + Sync {
    async fn connect(&self, creds: AuthCreds) -> WhatsAppResult<(Arc<dyn WaSocket>, SocketEvents)>;
}
