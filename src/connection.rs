//! Connection Manager.
//!
//! Owns the single live WhatsApp session. `start()` opens a socket from the
//! stored credentials and spawns a pump for its events; close events feed
//! [`transition`] and, unless the account logged out, schedule another
//! `start()` under the reconnect policy. Installing a socket bumps a
//! generation counter so events from a replaced socket are dropped.

use crate::config::ReconnectPolicy;
use futures::future::{BoxFuture, FutureExt};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use wa_socket::qr;
use wa_socket::{
    ConnectionState, ConnectionUpdate, DisconnectReason, MultiFileAuthStore, SocketEvent,
    SocketEvents, SocketFactory, WaSocket, WhatsAppResult,
};

// ─── Session holder ─────────────────────────────────────────────────────

/// Holder of the current session handle, shared with the HTTP handlers.
///
/// Handlers read it at call time; a reconnect replaces the handle.
#[derive(Default)]
pub struct SessionHolder {
    current: RwLock<Option<Arc<dyn WaSocket>>>,
}

impl SessionHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holder pre-loaded with a session (tests, embedding).
    pub fn with_session(session: Arc<dyn WaSocket>) -> Self {
        Self {
            current: RwLock::new(Some(session)),
        }
    }

    pub async fn current(&self) -> Option<Arc<dyn WaSocket>> {
        self.current.read().await.clone()
    }

    /// Install a new session, returning the one it replaced.
    pub async fn replace(&self, session: Arc<dyn WaSocket>) -> Option<Arc<dyn WaSocket>> {
        self.current.write().await.replace(session)
    }

    pub async fn clear(&self) -> Option<Arc<dyn WaSocket>> {
        self.current.write().await.take()
    }
}

// ─── State machine ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LinkState {
    Connecting,
    Open,
    ClosedRetrying,
    /// Logged out, gave up, or shut down. Nothing restarts from here.
    ClosedTerminal,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    MarkReady,
    Reconnect(DisconnectReason),
    Stop(DisconnectReason),
}

/// The transition table.
///
/// A close without a reason reconnects; only `loggedOut` is terminal.
pub fn transition(current: LinkState, update: &ConnectionUpdate) -> (LinkState, Action) {
    match update.connection {
        Some(ConnectionState::Connecting) => (LinkState::Connecting, Action::None),
        Some(ConnectionState::Open) => (LinkState::Open, Action::MarkReady),
        Some(ConnectionState::Close) => {
            let reason = update
                .last_disconnect
                .as_ref()
                .map(|d| d.reason)
                .unwrap_or(DisconnectReason::ConnectionClosed);
            if reason.is_logged_out() {
                (LinkState::ClosedTerminal, Action::Stop(reason))
            } else {
                (LinkState::ClosedRetrying, Action::Reconnect(reason))
            }
        }
        None => (current, Action::None),
    }
}

// ─── Manager ────────────────────────────────────────────────────────────

pub struct ConnectionManager {
    factory: Arc<dyn SocketFactory>,
    store: MultiFileAuthStore,
    sessions: Arc<SessionHolder>,
    policy: ReconnectPolicy,
    print_qr: bool,
    state: RwLock<LinkState>,
    /// Held while a socket is installed or the manager shuts down, so the
    /// generation order matches the order sockets become current.
    install: Mutex<()>,
    generation: AtomicU64,
    attempts: AtomicU32,
    stopped: AtomicBool,
}

impl ConnectionManager {
    pub fn new(
        factory: Arc<dyn SocketFactory>,
        store: MultiFileAuthStore,
        sessions: Arc<SessionHolder>,
        policy: ReconnectPolicy,
        print_qr: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            factory,
            store,
            sessions,
            policy,
            print_qr,
            state: RwLock::new(LinkState::Connecting),
            install: Mutex::new(()),
            generation: AtomicU64::new(0),
            attempts: AtomicU32::new(0),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn sessions(&self) -> Arc<SessionHolder> {
        self.sessions.clone()
    }

    pub async fn state(&self) -> LinkState {
        *self.state.read().await
    }

    /// Open a fresh session and make it current.
    ///
    /// Boxed because the event pump it spawns can call back into `start`.
    pub fn start(self: &Arc<Self>) -> BoxFuture<'static, WhatsAppResult<()>> {
        let this = self.clone();
        async move {
            if this.stopped.load(Ordering::SeqCst) {
                debug!("Connection manager is shut down, not starting");
                return Ok(());
            }

            let creds = this.store.load_or_init_creds().await?;
            *this.state.write().await = LinkState::Connecting;

            let (socket, events) = this.factory.connect(creds).await?;

            let _install = this.install.lock().await;
            if this.stopped.load(Ordering::SeqCst) {
                debug!("Connection manager shut down while connecting, ending new socket");
                socket.end().await;
                return Ok(());
            }
            let generation = this.generation.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(previous) = this.sessions.replace(socket).await {
                previous.end().await;
            }
            info!("Started WhatsApp session (generation {})", generation);

            tokio::spawn(this.clone().pump_events(generation, events));
            Ok(())
        }
        .boxed()
    }

    /// First start at boot. A failure is logged and retried under the policy.
    pub async fn launch(self: &Arc<Self>) {
        if let Err(e) = self.start().await {
            error!("Initial connection failed: {}", e);
            self.schedule_reconnect();
        }
    }

    /// End the current session and stop reacting to events.
    pub async fn shutdown(&self) {
        {
            let _install = self.install.lock().await;
            self.stopped.store(true, Ordering::SeqCst);
            self.generation.fetch_add(1, Ordering::SeqCst);
            if let Some(session) = self.sessions.clear().await {
                session.end().await;
            }
        }
        *self.state.write().await = LinkState::ClosedTerminal;
        info!("Connection manager shut down");
    }

    async fn pump_events(self: Arc<Self>, generation: u64, mut events: SocketEvents) {
        while let Some(event) = events.recv().await {
            if !self.is_current(generation) {
                debug!("Dropping event from superseded socket (generation {})", generation);
                break;
            }
            match event {
                SocketEvent::CredsUpdate(creds) => {
                    if let Err(e) = self.store.save_creds(&creds).await {
                        error!("Failed to persist credentials: {}", e);
                    }
                }
                SocketEvent::ConnectionUpdate(update) => self.on_connection_update(update).await,
            }
        }
        debug!("Event stream for generation {} ended", generation);
    }

    async fn on_connection_update(self: &Arc<Self>, update: ConnectionUpdate) {
        if let Some(ref payload) = update.qr {
            self.show_qr(payload);
        }

        let action = {
            let mut state = self.state.write().await;
            let (next, action) = transition(*state, &update);
            *state = next;
            action
        };

        match action {
            Action::None => {}
            Action::MarkReady => {
                self.attempts.store(0, Ordering::SeqCst);
                info!("WhatsApp connection is ready");
            }
            Action::Reconnect(reason) => {
                warn!("Connection closed ({}), reconnecting", reason);
                self.schedule_reconnect();
            }
            Action::Stop(reason) => {
                error!(
                    "Connection closed ({}), not reconnecting. Remove {} and pair again",
                    reason,
                    self.store.dir().display()
                );
            }
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let attempt = this.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if !this.policy.allows(attempt) {
                error!("Giving up after {} reconnect attempts", attempt - 1);
                *this.state.write().await = LinkState::ClosedTerminal;
                return;
            }

            let delay = this.policy.delay_for(attempt);
            if !delay.is_zero() {
                info!("Reconnecting in {:?} (attempt {})", delay, attempt);
                tokio::time::sleep(delay).await;
            }
            if this.stopped.load(Ordering::SeqCst) {
                return;
            }

            if let Err(e) = this.start().await {
                error!("Reconnect attempt {} failed: {}", attempt, e);
                this.schedule_reconnect();
            }
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.stopped.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    fn show_qr(&self, payload: &str) {
        if !self.print_qr {
            info!("Received pairing QR code ({} chars)", payload.len());
            return;
        }
        match qr::render_terminal(payload) {
            Ok(art) => {
                info!("Scan this QR code in WhatsApp");
                println!("{}", art);
            }
            Err(e) => warn!("Could not render QR code: {}", e),
        }
    }
}
