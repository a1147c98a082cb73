//! Embedded HTTP server receiving webhook callbacks from the platform.

use crate::api::WebhookEvent;
use crate::webhooks::dispatch::{Dispatch, Dispatcher, NEW_TEXT_ITEM_PATH, PRESENCE_PATH};
use axum::{
    body::Bytes,
    extract::State,
    http::{StatusCode, Uri},
    routing::post,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Running webhook server; stop it with [`WebhookServer::stop`].
pub struct WebhookServer {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl WebhookServer {
    /// Bind `bind:port` and serve the dispatch table in a background task.
    pub async fn start(bind: &str, port: u16, dispatcher: Arc<Dispatcher>) -> std::io::Result<Self> {
        let bind_addr = format!("{}:{}", bind.trim(), port);
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let app = router(dispatcher);
        log::info!("webhook server listening on {}", local_addr);
        let handle = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                log::warn!("webhook server exited with error: {}", e);
            }
            log::info!("webhook server stopped");
        });
        Ok(Self {
            local_addr,
            shutdown_tx,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal graceful shutdown and wait for the serve task.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            log::debug!("webhook server task join: {}", e);
        }
    }
}

/// Routes for the dispatch table; unknown paths are logged and answered 404.
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route(NEW_TEXT_ITEM_PATH, post(new_text_item))
        .route(PRESENCE_PATH, post(presence_change))
        .fallback(not_found)
        .with_state(dispatcher)
}

fn parse_event(path: &str, body: &[u8]) -> Result<WebhookEvent, StatusCode> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        log::warn!("{}: request has no body", path);
        return Err(StatusCode::BAD_REQUEST);
    }
    serde_json::from_slice(body).map_err(|e| {
        log::warn!(
            "{}: error deserializing body: {} ({})",
            path,
            e,
            String::from_utf8_lossy(body)
        );
        StatusCode::BAD_REQUEST
    })
}

fn log_outcome(path: &str, outcome: Dispatch) -> StatusCode {
    if let Dispatch::Ignored(reason) = outcome {
        log::debug!("{}: event ignored: {}", path, reason);
    }
    StatusCode::OK
}

async fn new_text_item(State(dispatcher): State<Arc<Dispatcher>>, body: Bytes) -> StatusCode {
    match parse_event(NEW_TEXT_ITEM_PATH, &body) {
        Ok(event) => log_outcome(NEW_TEXT_ITEM_PATH, dispatcher.dispatch_text_item(event).await),
        Err(status) => status,
    }
}

async fn presence_change(State(dispatcher): State<Arc<Dispatcher>>, body: Bytes) -> StatusCode {
    match parse_event(PRESENCE_PATH, &body) {
        Ok(event) => log_outcome(PRESENCE_PATH, dispatcher.dispatch_presence(event).await),
        Err(status) => status,
    }
}

async fn not_found(uri: Uri) -> StatusCode {
    log::warn!("request not handled: {}", uri);
    StatusCode::NOT_FOUND
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_malformed_bodies_are_rejected() {
        assert_eq!(
            parse_event(NEW_TEXT_ITEM_PATH, b"").unwrap_err(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            parse_event(NEW_TEXT_ITEM_PATH, b"  \n").unwrap_err(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            parse_event(PRESENCE_PATH, b"{not json").unwrap_err(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn well_formed_body_parses() {
        let ev = parse_event(PRESENCE_PATH, br#"{"type":"USER.USER_PRESENCE_CHANGE"}"#).unwrap();
        assert_eq!(ev.typ, "USER.USER_PRESENCE_CHANGE");
        assert!(ev.new_state.is_none());
    }
}
