//! Request Router.
//!
//! Binds the HTTP surface to the handlers. Panics inside a handler become a
//! 500 envelope, unknown routes a 404 envelope and a wrong method on a known
//! route a 405 envelope.

use axum::http::{Method, Uri};
use axum::response::{IntoResponse, Response};
use axum::{
    routing::{get, post},
    Router,
};
use log::info;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;

use crate::connection::SessionHolder;
use crate::fetcher::ContentFetcher;
use crate::handlers;
use crate::response::ApiError;

#[derive(Clone)]
pub struct ApiService {
    pub sessions: Arc<SessionHolder>,
    pub fetcher: Arc<dyn ContentFetcher>,
}

impl ApiService {
    pub fn new(sessions: Arc<SessionHolder>, fetcher: Arc<dyn ContentFetcher>) -> Self {
        Self { sessions, fetcher }
    }

    /// Serve until `shutdown` resolves.
    pub async fn start_server(
        self: Arc<Self>,
        addr: &str,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = self.create_router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("WhatsApp API server running at http://{}", listener.local_addr()?);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }

    pub fn create_router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/status", get(handlers::status))
            .route("/send-message", post(handlers::send_message))
            .route("/send-image", post(handlers::send_image))
            .route("/send-pdf", post(handlers::send_pdf))
            .route("/send-to-group", post(handlers::send_to_group))
            .route("/send-button-message", post(handlers::send_button_message))
            // Applies to the routes above, so it has to follow them.
            .method_not_allowed_fallback(method_not_allowed)
            .fallback(not_found)
            .layer(CatchPanicLayer::custom(panic_response))
            .with_state(self)
    }
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("No route for {}", uri.path()))
}

async fn method_not_allowed(method: Method, uri: Uri) -> ApiError {
    ApiError::MethodNotAllowed(format!("Cannot {} {}", method, uri.path()))
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "handler panicked".to_string()
    };
    ApiError::Internal(detail).into_response()
}

