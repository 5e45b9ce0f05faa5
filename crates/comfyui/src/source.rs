//! Long-lived ComfyUI event source.
//!
//! [`EventSource`] owns one WebSocket connection task (connect ->
//! process -> reconnect) and fans every received event out to the
//! registered [`EventHandler`]s, in registration order. Connection state
//! is published on a [`watch`] channel so callers can wait for readiness
//! instead of sleeping.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use taskmon_core::events::EventHandler;

use crate::client::ComfyUIClient;
use crate::processor::process_messages;
use crate::reconnect::{reconnect_loop, ReconnectConfig};

/// Grace period for the connection task during shutdown.
const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Ordered list of handlers receiving every event.
#[derive(Default, Clone)]
pub struct HandlerSet {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl HandlerSet {
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait]
impl EventHandler for HandlerSet {
    async fn handle_event(&self, kind: &str, payload: &Value) {
        for handler in &self.handlers {
            handler.handle_event(kind, payload).await;
        }
    }
}

pub struct EventSource {
    client: Arc<ComfyUIClient>,
    reconnect: ReconnectConfig,
    handlers: HandlerSet,
    connected_tx: Arc<watch::Sender<bool>>,
    cancel: CancellationToken,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl EventSource {
    pub fn new(client: ComfyUIClient, reconnect: ReconnectConfig) -> Self {
        let (connected_tx, _) = watch::channel(false);
        Self {
            client: Arc::new(client),
            reconnect,
            handlers: HandlerSet::default(),
            connected_tx: Arc::new(connected_tx),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Add a handler. Handlers registered after [`start`](Self::start)
    /// are not seen by the running connection.
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.register(handler);
    }

    /// Receiver of the connected flag.
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected_tx.subscribe()
    }

    /// Spawn the connection task. Calling it again while a task is
    /// running does nothing.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let client = Arc::clone(&self.client);
        let reconnect = self.reconnect.clone();
        let handlers = self.handlers.clone();
        let connected_tx = Arc::clone(&self.connected_tx);
        let cancel = self.cancel.clone();

        tracing::info!(
            ws_url = client.ws_url(),
            handlers = handlers.len(),
            "Starting ComfyUI event source",
        );
        *task = Some(tokio::spawn(async move {
            run_connection_loop(&client, &reconnect, &handlers, &connected_tx, &cancel).await;
            tracing::info!("ComfyUI event source exited");
        }));
    }

    /// Stop the connection task, waiting briefly for it to exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down ComfyUI event source");
        self.cancel.cancel();

        if let Some(handle) = self.task.lock().await.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
                tracing::warn!("ComfyUI event source did not stop in time");
            }
        }
        self.connected_tx.send_replace(false);
    }
}

/// Core connection loop: connect -> process messages -> reconnect.
///
/// Runs until the cancellation token is triggered.
async fn run_connection_loop(
    client: &ComfyUIClient,
    reconnect: &ReconnectConfig,
    handlers: &HandlerSet,
    connected_tx: &watch::Sender<bool>,
    cancel: &CancellationToken,
) {
    loop {
        let Some(conn) = reconnect_loop(client, reconnect, cancel).await else {
            return;
        };
        connected_tx.send_replace(true);

        let mut ws_stream = conn.ws_stream;
        tokio::select! {
            _ = cancel.cancelled() => {
                connected_tx.send_replace(false);
                return;
            }
            _ = process_messages(&mut ws_stream, handlers) => {}
        }

        connected_tx.send_replace(false);
        if cancel.is_cancelled() {
            return;
        }
        tracing::info!(client_id = %conn.client_id, "ComfyUI connection lost, reconnecting");
    }
}
