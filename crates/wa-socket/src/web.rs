//! WebSocket transport behind the [`SocketFactory`] seam.
//!
//! This speaks the crate's own framing: the handshake in [`crate::noise`],
//! the node codec in [`crate::frame`] and locally generated QR references.
//! It is not wire-compatible with the production WhatsApp Web service, so
//! `wsUrl` must point at a peer that speaks this framing (a bridge or a test
//! server). Swap in another [`SocketFactory`] to talk to WhatsApp itself.
//!
//! Each [`WebSocketFactory::connect`] spawns one connection task that owns
//! the WebSocket. The returned [`WebClient`] only shares state with that
//! task; everything the task observes is reported on the event channel, and
//! every send waits for the task to confirm the frame was written.

use crate::auth::AuthCreds;
use crate::error::{WhatsAppError, WhatsAppErrorCode, WhatsAppResult};
use crate::frame::{self, InboundNode};
use crate::jid;
use crate::noise::{NoiseHandshake, TransportCipher};
use crate::qr;
use crate::socket::{SocketEvent, SocketEvents, SocketFactory, WaSocket};
use crate::types::{
    ConnectionState, ConnectionUpdate, DisconnectReason, MessageKey, OutboundContent,
    UserIdentity,
};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::time::Interval;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{ORIGIN, USER_AGENT};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Default endpoint. Only useful behind a bridge that speaks this framing.
pub const WA_WEB_SOCKET_URL: &str = "wss://web.whatsapp.com/ws/chat";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, WsMessage>;
type WsRead = SplitStream<WsStream>;

// ─── Configuration ──────────────────────────────────────────────────────

/// Transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebClientConfig {
    pub ws_url: String,
    pub origin: String,
    pub user_agent: String,
    /// Browser description (name, platform, version).
    pub browser: (String, String, String),
    pub connect_timeout_secs: u64,
    /// Seconds between QR refreshes while unpaired.
    pub qr_refresh_interval_secs: u64,
    /// Refreshes after the first QR before giving up with `timedOut`.
    pub max_qr_refreshes: u32,
}

impl Default for WebClientConfig {
    fn default() -> Self {
        Self {
            ws_url: WA_WEB_SOCKET_URL.into(),
            origin: "https://web.whatsapp.com".into(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                         AppleWebKit/537.36 Chrome/120.0.0.0"
                .into(),
            browser: ("WaGateway".into(), "Desktop".into(), "0.1.0".into()),
            connect_timeout_secs: 20,
            qr_refresh_interval_secs: 20,
            max_qr_refreshes: 5,
        }
    }
}

// ─── Factory ────────────────────────────────────────────────────────────

/// Opens sessions over the stand-in WebSocket transport.
#[derive(Debug, Clone, Default)]
pub struct WebSocketFactory {
    config: WebClientConfig,
}

impl WebSocketFactory {
    pub fn new(config: WebClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SocketFactory for WebSocketFactory {
    async fn connect(&self, creds: AuthCreds) -> WhatsAppResult<(Arc<dyn WaSocket>, SocketEvents)> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            state: RwLock::new(ConnectionState::Connecting),
            user: RwLock::new(None),
        });

        let task = ConnectionTask {
            config: self.config.clone(),
            creds,
            shared: shared.clone(),
            events: event_tx,
            outbound_rx,
        };
        tokio::spawn(task.run(shutdown_rx));

        let client = WebClient {
            shared,
            outbound: outbound_tx,
            shutdown: shutdown_tx,
        };
        Ok((Arc::new(client), event_rx))
    }
}

// ─── Client handle ──────────────────────────────────────────────────────

/// A plaintext node and the sender waiting to hear whether it was written.
struct Outbound {
    node: Vec<u8>,
    written: oneshot::Sender<WhatsAppResult<()>>,
}

struct Shared {
    state: RwLock<ConnectionState>,
    user: RwLock<Option<UserIdentity>>,
}

/// Handle to one stand-in transport session.
pub struct WebClient {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Outbound>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for WebClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebClient").finish_non_exhaustive()
    }
}

impl WebClient {
    pub async fn connection_state(&self) -> ConnectionState {
        *self.shared.state.read().await
    }
}

#[async_trait]
impl WaSocket for WebClient {
    async fn user(&self) -> Option<UserIdentity> {
        self.shared.user.read().await.clone()
    }

    async fn send_message(&self, jid: &str, content: OutboundContent) -> WhatsAppResult<MessageKey> {
        if self.connection_state().await != ConnectionState::Open {
            return Err(WhatsAppError::not_connected("WhatsApp socket is not open"));
        }

        let id = generate_message_id();
        let node = frame::encode_message(&id, jid, &content)?;
        let (written, confirmation) = oneshot::channel();
        self.outbound
            .send(Outbound { node, written })
            .map_err(|_| WhatsAppError::connection_closed("connection task has exited"))?;

        // The sender is dropped unanswered if the task exits first.
        confirmation.await.map_err(|_| {
            WhatsAppError::connection_closed("connection closed before the message was written")
        })??;

        debug!("Wrote {} message {} to {}", content.kind(), id, jid);
        Ok(MessageKey {
            id,
            remote_jid: jid.to_string(),
            from_me: true,
        })
    }

    async fn end(&self) {
        self.shutdown.send_replace(true);
        *self.shared.state.write().await = ConnectionState::Close;
        *self.shared.user.write().await = None;
        info!("WhatsApp Web socket ended");
    }
}

/// Message ids look like the ones WA Web assigns: `3EB0` + 24 hex chars.
pub fn generate_message_id() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("3EB0{}", hex::encode(bytes).to_uppercase())
}

// ─── Connection task ────────────────────────────────────────────────────

struct ConnectionTask {
    config: WebClientConfig,
    creds: AuthCreds,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<SocketEvent>,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
}

enum NodeOutcome {
    Continue,
    Paired,
    Closed,
}

impl ConnectionTask {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => {
                debug!("Connection task stopped");
            }
            _ = self.drive() => {}
        }
        self.fail_pending();
    }

    /// Reject every send still queued once the socket is gone.
    fn fail_pending(&mut self) {
        self.outbound_rx.close();
        let mut failed = 0;
        while let Ok(pending) = self.outbound_rx.try_recv() {
            let _ = pending.written.send(Err(WhatsAppError::connection_closed(
                "connection closed before the message was written",
            )));
            failed += 1;
        }
        if failed > 0 {
            warn!("Failed {} unsent outbound frame(s)", failed);
        }
    }

    async fn drive(&mut self) {
        self.emit(ConnectionUpdate::state(ConnectionState::Connecting));

        let (name, platform, version) = &self.config.browser;
        info!(
            "Connecting to {} as {} / {} / {}",
            self.config.ws_url, name, platform, version
        );

        let ws = match self.open_websocket().await {
            Ok(ws) => ws,
            Err(e) => {
                self.close(DisconnectReason::ConnectionLost, e.message).await;
                return;
            }
        };
        info!("WebSocket connected");

        let (mut write, mut read) = ws.split();
        let cipher = match self.handshake(&mut write, &mut read).await {
            Ok(cipher) => cipher,
            Err(e) => {
                let reason = if e.code == WhatsAppErrorCode::NetworkError {
                    DisconnectReason::ConnectionLost
                } else {
                    DisconnectReason::BadSession
                };
                self.close(reason, format!("Noise handshake failed: {}", e.message))
                    .await;
                return;
            }
        };
        debug!("Noise handshake complete");

        let qr_timer = if self.creds.registered {
            self.go_open(self.creds.me.clone()).await;
            None
        } else {
            info!("Credentials are not paired, waiting for QR scan");
            let period = Duration::from_secs(self.config.qr_refresh_interval_secs)
                .max(Duration::from_millis(1));
            Some(tokio::time::interval(period))
        };

        self.message_loop(write, read, cipher, qr_timer).await;
    }

    async fn open_websocket(&self) -> WhatsAppResult<WsStream> {
        let mut request = self
            .config
            .ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| WhatsAppError::network(format!("WS request build: {}", e)))?;
        let headers = request.headers_mut();
        headers.insert(
            ORIGIN,
            HeaderValue::from_str(&self.config.origin)
                .map_err(|e| WhatsAppError::network(format!("bad origin header: {}", e)))?,
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.config.user_agent)
                .map_err(|e| WhatsAppError::network(format!("bad user agent: {}", e)))?,
        );

        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request)).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(WhatsAppError::network(format!(
                "WebSocket connect failed: {}",
                e
            ))),
            Err(_) => Err(WhatsAppError::network("WebSocket connect timed out")),
        }
    }

    async fn handshake(
        &self,
        write: &mut WsWrite,
        read: &mut WsRead,
    ) -> WhatsAppResult<TransportCipher> {
        let mut handshake = NoiseHandshake::new();

        write
            .send(WsMessage::Binary(handshake.client_hello().into()))
            .await
            .map_err(|e| WhatsAppError::network(format!("WS send error: {}", e)))?;
        debug!("Sent Noise client hello");

        let server_hello = read_binary(read).await?;
        handshake.process_server_hello(&server_hello)?;

        let client_finish = handshake.client_finish(&self.creds)?;
        write
            .send(WsMessage::Binary(client_finish.into()))
            .await
            .map_err(|e| WhatsAppError::network(format!("WS send error: {}", e)))?;

        handshake.split()
    }

    async fn message_loop(
        &mut self,
        mut write: WsWrite,
        mut read: WsRead,
        mut cipher: TransportCipher,
        mut qr_timer: Option<Interval>,
    ) {
        let mut qr_count: u32 = 0;

        loop {
            tokio::select! {
                Some(Outbound { node, written }) = self.outbound_rx.recv() => {
                    let sealed = match cipher.encrypt(&node) {
                        Ok(sealed) => sealed,
                        Err(e) => {
                            error!("Could not seal outbound frame: {}", e);
                            let _ = written.send(Err(e));
                            continue;
                        }
                    };
                    if let Err(e) = write.send(WsMessage::Binary(sealed.into())).await {
                        let message = format!("WS write: {}", e);
                        let _ = written.send(Err(WhatsAppError::network(message.clone())));
                        self.close(DisconnectReason::ConnectionLost, message).await;
                        return;
                    }
                    let _ = written.send(Ok(()));
                }
                msg = read.next() => match msg {
                    Some(Ok(WsMessage::Binary(data))) => {
                        let plain = match cipher.decrypt(&data) {
                            Ok(plain) => plain,
                            Err(e) => {
                                warn!("Frame decrypt error: {}", e);
                                continue;
                            }
                        };
                        let node = match frame::decode(&plain) {
                            Ok(node) => node,
                            Err(e) => {
                                warn!("Undecodable node: {}", e);
                                continue;
                            }
                        };
                        match self.handle_node(node).await {
                            NodeOutcome::Continue => {}
                            NodeOutcome::Paired => qr_timer = None,
                            NodeOutcome::Closed => return,
                        }
                    }
                    Some(Ok(WsMessage::Close(close))) => {
                        let detail = close
                            .map(|f| format!("closed by server ({})", u16::from(f.code)))
                            .unwrap_or_else(|| "closed by server".into());
                        self.close(DisconnectReason::ConnectionClosed, detail).await;
                        return;
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        debug!("Received ping ({} bytes)", payload.len());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.close(DisconnectReason::ConnectionLost, format!("WS read: {}", e))
                            .await;
                        return;
                    }
                    None => {
                        self.close(DisconnectReason::ConnectionClosed, "WebSocket stream ended")
                            .await;
                        return;
                    }
                },
                _ = next_tick(&mut qr_timer) => {
                    if qr_count > self.config.max_qr_refreshes {
                        self.close(DisconnectReason::TimedOut, "QR refs attempts ended")
                            .await;
                        return;
                    }
                    qr_count += 1;
                    debug!("Emitting QR code #{}", qr_count);
                    let payload = qr::pairing_payload(&qr::new_reference(), &self.creds);
                    self.emit(ConnectionUpdate::qr(payload));
                }
            }
        }
    }

    async fn handle_node(&mut self, node: InboundNode) -> NodeOutcome {
        match node {
            InboundNode::PairSuccess { jid, push_name } => {
                info!("Paired as {}", jid::user_part(&jid));
                let me = UserIdentity {
                    id: jid,
                    name: push_name,
                };
                self.creds.me = Some(me.clone());
                self.creds.registered = true;
                self.send_event(SocketEvent::CredsUpdate(self.creds.clone()));
                self.go_open(Some(me)).await;
                NodeOutcome::Paired
            }
            InboundNode::StreamError { code } => {
                let reason = DisconnectReason::from_status_code(code);
                self.close(reason, format!("Stream Errored ({})", code)).await;
                NodeOutcome::Closed
            }
            InboundNode::Message { size } => {
                debug!("Ignoring inbound message node ({} bytes)", size);
                NodeOutcome::Continue
            }
            InboundNode::Presence => {
                debug!("Ignoring presence node");
                NodeOutcome::Continue
            }
            InboundNode::Unknown(kind) => {
                debug!("Ignoring unknown node kind 0x{:02X}", kind);
                NodeOutcome::Continue
            }
        }
    }

    async fn go_open(&self, me: Option<UserIdentity>) {
        if let Some(ref user) = me {
            info!("Connection open as {}", jid::user_part(&user.id));
        }
        *self.shared.user.write().await = me;
        *self.shared.state.write().await = ConnectionState::Open;
        self.emit(ConnectionUpdate::state(ConnectionState::Open));
    }

    async fn close(&self, reason: DisconnectReason, message: impl Into<String>) {
        let message = message.into();
        warn!("Connection closed: {} - {}", reason, message);
        *self.shared.state.write().await = ConnectionState::Close;
        *self.shared.user.write().await = None;
        self.emit(ConnectionUpdate::closed(reason, message));
    }

    fn emit(&self, update: ConnectionUpdate) {
        self.send_event(SocketEvent::ConnectionUpdate(update));
    }

    fn send_event(&self, event: SocketEvent) {
        let _ = self.events.send(event);
    }
}

/// Resolves once `end()` is called or the client handle is dropped.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn read_binary(read: &mut WsRead) -> WhatsAppResult<Vec<u8>> {
    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(WsMessage::Binary(data)) => return Ok(data.to_vec()),
            Ok(WsMessage::Close(_)) => {
                return Err(WhatsAppError::network("WebSocket closed by server"));
            }
            Ok(_) => continue,
            Err(e) => return Err(WhatsAppError::network(format!("WS read: {}", e))),
        }
    }
    Err(WhatsAppError::network("WebSocket stream ended"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use x25519_dalek::{EphemeralSecret, PublicKey};

    const WAIT: Duration = Duration::from_secs(5);

    async fn next_update(events: &mut SocketEvents) -> ConnectionUpdate {
        loop {
            match tokio::time::timeout(WAIT, events.recv()).await {
                Ok(Some(SocketEvent::ConnectionUpdate(update))) => return update,
                Ok(Some(SocketEvent::CredsUpdate(_))) => continue,
                Ok(None) => panic!("event stream ended"),
                Err(_) => panic!("timed out waiting for a connection update"),
            }
        }
    }

    async fn next_binary(ws: &mut WebSocketStream<TcpStream>) -> Option<Vec<u8>> {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(WsMessage::Binary(data)) => return Some(data.to_vec()),
                Ok(WsMessage::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
        None
    }

    /// Fake server: answers the handshake, then hands the stream to `after`.
    async fn spawn_server<F, Fut>(after: F) -> (String, tokio::task::JoinHandle<Vec<Vec<u8>>>)
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Vec<Vec<u8>>> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws/chat", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let hello = next_binary(&mut ws).await.unwrap();
            assert_eq!(hello.len(), 34);
            let server_key = PublicKey::from(&EphemeralSecret::random_from_rng(rand::thread_rng()));
            ws.send(WsMessage::Binary(server_key.as_bytes().to_vec().into()))
                .await
                .unwrap();
            next_binary(&mut ws).await.unwrap();
            after(ws).await
        });
        (url, handle)
    }

    fn config_for(url: String) -> WebClientConfig {
        WebClientConfig {
            ws_url: url,
            connect_timeout_secs: 5,
            qr_refresh_interval_secs: 0,
            max_qr_refreshes: 0,
            ..Default::default()
        }
    }

    fn paired_creds() -> AuthCreds {
        let mut creds = AuthCreds::generate();
        creds.registered = true;
        creds.me = Some(UserIdentity {
            id: "15551234567:3@s.whatsapp.net".into(),
            name: Some("Ada".into()),
        });
        creds
    }

    #[test]
    fn test_generate_message_id() {
        let id = generate_message_id();
        assert!(id.starts_with("3EB0"));
        assert_eq!(id.len(), 28);
        assert!(id[4..].chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_default_config() {
        let config: WebClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.ws_url, WA_WEB_SOCKET_URL);
        assert_eq!(config.qr_refresh_interval_secs, 20);
        assert_eq!(config.max_qr_refreshes, 5);
    }

    #[tokio::test]
    async fn test_unreachable_server_closes_with_connection_lost() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws/chat", listener.local_addr().unwrap());
        drop(listener);

        let factory = WebSocketFactory::new(config_for(url));
        let (sock, mut events) = factory.connect(paired_creds()).await.unwrap();

        assert_eq!(
            next_update(&mut events).await.connection,
            Some(ConnectionState::Connecting)
        );
        let closed = next_update(&mut events).await;
        assert_eq!(closed.connection, Some(ConnectionState::Close));
        assert_eq!(
            closed.last_disconnect.unwrap().reason,
            DisconnectReason::ConnectionLost
        );

        let err = sock
            .send_message("1@s.whatsapp.net", OutboundContent::text("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.code, WhatsAppErrorCode::NotConnected);
        assert!(sock.user().await.is_none());
    }

    #[tokio::test]
    async fn test_paired_session_opens_and_sends() {
        let (url, server) = spawn_server(|mut ws| async move {
            let mut frames = Vec::new();
            if let Some(frame) = next_binary(&mut ws).await {
                frames.push(frame);
            }
            frames
        })
        .await;

        let factory = WebSocketFactory::new(config_for(url));
        let (sock, mut events) = factory.connect(paired_creds()).await.unwrap();

        assert_eq!(
            next_update(&mut events).await.connection,
            Some(ConnectionState::Connecting)
        );
        assert_eq!(
            next_update(&mut events).await.connection,
            Some(ConnectionState::Open)
        );
        assert_eq!(
            sock.user().await.unwrap().id,
            "15551234567:3@s.whatsapp.net"
        );

        let key = sock
            .send_message("15550000000@s.whatsapp.net", OutboundContent::text("hello"))
            .await
            .unwrap();
        assert!(key.id.starts_with("3EB0"));
        assert_eq!(key.remote_jid, "15550000000@s.whatsapp.net");
        assert!(key.from_me);

        let frames = tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
        assert_eq!(frames.len(), 1);
        // Sealed frames carry a 16-byte tag, so the plaintext is not visible.
        assert!(frames[0].len() > 16);
        assert!(!frames[0].windows(5).any(|w| w == b"hello"));

        sock.end().await;
    }

    fn open_shared() -> Arc<Shared> {
        Arc::new(Shared {
            state: RwLock::new(ConnectionState::Open),
            user: RwLock::new(None),
        })
    }

    #[tokio::test]
    async fn test_send_reports_the_write_outcome() {
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (shutdown, _) = watch::channel(false);
        let client = WebClient {
            shared: open_shared(),
            outbound,
            shutdown,
        };

        let writer = tokio::spawn(async move {
            let failed = outbound_rx.recv().await.unwrap();
            failed
                .written
                .send(Err(WhatsAppError::network("WS write: broken pipe")))
                .unwrap();
            // Dropped without an answer, as when the task exits mid-send.
            drop(outbound_rx.recv().await.unwrap());
            let written = outbound_rx.recv().await.unwrap();
            assert!(!written.node.is_empty());
            written.written.send(Ok(())).unwrap();
        });

        let err = client
            .send_message("1@s.whatsapp.net", OutboundContent::text("a"))
            .await
            .unwrap_err();
        assert_eq!(err.code, WhatsAppErrorCode::NetworkError);

        let err = client
            .send_message("1@s.whatsapp.net", OutboundContent::text("b"))
            .await
            .unwrap_err();
        assert_eq!(err.code, WhatsAppErrorCode::ConnectionClosed);

        let key = client
            .send_message("1@s.whatsapp.net", OutboundContent::text("c"))
            .await
            .unwrap();
        assert_eq!(key.remote_jid, "1@s.whatsapp.net");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_queued_sends_fail_when_the_task_exits() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws/chat", listener.local_addr().unwrap());
        drop(listener);

        let (events, mut event_rx) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let mut confirmations = Vec::new();
        for _ in 0..20 {
            let (written, confirmation) = oneshot::channel();
            outbound
                .send(Outbound {
                    node: vec![frame::NODE_MESSAGE],
                    written,
                })
                .unwrap();
            confirmations.push(confirmation);
        }

        let task = ConnectionTask {
            config: config_for(url),
            creds: paired_creds(),
            shared: open_shared(),
            events,
            outbound_rx,
        };
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::time::timeout(WAIT, task.run(shutdown_rx))
            .await
            .unwrap();

        for confirmation in confirmations {
            let err = confirmation.await.unwrap().unwrap_err();
            assert_eq!(err.code, WhatsAppErrorCode::ConnectionClosed);
        }
        let (written, _) = oneshot::channel();
        assert!(outbound
            .send(Outbound {
                node: Vec::new(),
                written,
            })
            .is_err());

        next_update(&mut event_rx).await; // connecting
        let closed = next_update(&mut event_rx).await;
        assert_eq!(
            closed.last_disconnect.unwrap().reason,
            DisconnectReason::ConnectionLost
        );
    }

    #[tokio::test]
    async fn test_server_close_reports_connection_closed() {
        let (url, _server) = spawn_server(|mut ws| async move {
            let _ = ws.close(None).await;
            Vec::new()
        })
        .await;

        let factory = WebSocketFactory::new(config_for(url));
        let (_sock, mut events) = factory.connect(paired_creds()).await.unwrap();

        next_update(&mut events).await; // connecting
        next_update(&mut events).await; // open
        let closed = next_update(&mut events).await;
        assert_eq!(
            closed.last_disconnect.unwrap().reason,
            DisconnectReason::ConnectionClosed
        );
    }

    #[tokio::test]
    async fn test_unpaired_session_emits_qr_then_times_out() {
        let (url, _server) = spawn_server(|mut ws| async move {
            while next_binary(&mut ws).await.is_some() {}
            Vec::new()
        })
        .await;

        let factory = WebSocketFactory::new(config_for(url));
        let creds = AuthCreds::generate();
        let (sock, mut events) = factory.connect(creds).await.unwrap();

        next_update(&mut events).await; // connecting
        let qr = next_update(&mut events).await;
        assert_eq!(qr.qr.unwrap().split(',').count(), 4);

        let closed = next_update(&mut events).await;
        assert_eq!(
            closed.last_disconnect.unwrap().reason,
            DisconnectReason::TimedOut
        );
        assert!(sock.user().await.is_none());
    }

    #[tokio::test]
    async fn test_end_stops_without_close_event() {
        let (url, _server) = spawn_server(|mut ws| async move {
            while next_binary(&mut ws).await.is_some() {}
            Vec::new()
        })
        .await;

        let factory = WebSocketFactory::new(config_for(url));
        let (sock, mut events) = factory.connect(paired_creds()).await.unwrap();
        next_update(&mut events).await; // connecting
        next_update(&mut events).await; // open

        sock.end().await;

        let rest = tokio::time::timeout(WAIT, events.recv()).await.unwrap();
        assert!(rest.is_none());
        let err = sock
            .send_message("1@s.whatsapp.net", OutboundContent::text("late"))
            .await
            .unwrap_err();
        assert_eq!(err.code, WhatsAppErrorCode::NotConnected);
    }
}
