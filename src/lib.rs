//! HTTP gateway for a WhatsApp Web session.

pub mod api;
pub mod config;
pub mod connection;
pub mod fetcher;
pub mod handlers;
pub mod logging;
pub mod response;

use api::ApiService;
use config::GatewayConfig;
use connection::{ConnectionManager, SessionHolder};
use fetcher::HttpFetcher;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use wa_socket::{MultiFileAuthStore, WebSocketFactory};

/// Wire everything up and serve until Ctrl-C.
pub async fn run(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // rustls needs a process-wide crypto provider before any TLS connection.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    let store = MultiFileAuthStore::open(&config.auth_dir).await?;
    let factory = Arc::new(WebSocketFactory::new(config.socket.clone()));
    let sessions = Arc::new(SessionHolder::new());
    let manager = ConnectionManager::new(
        factory,
        store,
        sessions.clone(),
        config.reconnect.clone(),
        config.print_qr_terminal,
    );

    let fetcher = HttpFetcher::new(config.fetch_timeout_secs.map(Duration::from_secs))?;
    let api = Arc::new(ApiService::new(sessions, Arc::new(fetcher)));

    manager.launch().await;

    let served = api
        .start_server(&config.bind_addr(), async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
        })
        .await;

    manager.shutdown().await;
    served
}
