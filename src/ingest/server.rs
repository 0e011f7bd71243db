//! Router and server lifecycle.
//!
//! ```text
//! GET  /health                      no auth
//! POST /webhooks/user-preferences   X-API-KEY, optional gzip body
//! POST /webhooks/membership         X-API-KEY, optional gzip body
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::{decompression::RequestDecompressionLayer, trace::TraceLayer};

use super::{auth::require_api_key, handler};
use crate::{log_info, Message};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    // ---
    api_key: Arc<str>,
    publish: mpsc::Sender<Message>,
}

impl AppState {
    /// `publish` is the inbound side of a running [`Publisher`](crate::Publisher).
    pub fn new(api_key: impl Into<String>, publish: mpsc::Sender<Message>) -> Self {
        Self {
            api_key: Arc::from(api_key.into()),
            publish,
        }
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }

    pub(crate) fn publisher(&self) -> &mpsc::Sender<Message> {
        &self.publish
    }
}

/// Build the ingest router.
///
/// Unsupported `Content-Encoding`s are refused with 415 before any handler
/// runs; other verbs on the webhook paths get 405.
pub fn create_router(state: AppState) -> Router {
    // ---
    let webhooks = Router::new()
        .route("/webhooks/user-preferences", post(handler::user_preferences))
        .route("/webhooks/membership", post(handler::membership))
        .layer(RequestDecompressionLayer::new())
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(handler::health))
        .merge(webhooks)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the ingest router on `addr` until `token` is cancelled.
///
/// In-flight requests are allowed to finish; their publishes are still
/// awaited as long as the publisher is running.
pub async fn start_server(
    state: AppState,
    addr: SocketAddr,
    token: CancellationToken,
) -> Result<(), std::io::Error> {
    // ---
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log_info!("ingest server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;

    log_info!("ingest server stopped");
    Ok(())
}
