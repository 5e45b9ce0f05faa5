use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskmon_api::config::ServerConfig;
use taskmon_api::router::build_app_router;
use taskmon_api::state::AppState;
use taskmon_comfyui::api::ComfyUIApi;
use taskmon_comfyui::client::ComfyUIClient;
use taskmon_comfyui::directory::ComfyUIDirectory;
use taskmon_comfyui::reconnect::ReconnectConfig;
use taskmon_comfyui::source::{EventSource, HandlerSet};
use taskmon_core::tracker::ProgressTracker;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "taskmon_api=debug,taskmon_comfyui=info,taskmon_core=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };
    tracing::info!(
        host = %config.host,
        port = config.port,
        comfyui_api_url = %config.comfyui_api_url,
        comfyui_ws_url = %config.comfyui_ws_url,
        events_token = config.events_token.is_some(),
        "Loaded server configuration",
    );

    // --- ComfyUI directory + tracker ---
    let api = ComfyUIApi::new(
        config.comfyui_api_url.clone(),
        Duration::from_secs(config.comfyui_request_timeout_secs),
    )
    .expect("Failed to build ComfyUI HTTP client");
    let directory = Arc::new(ComfyUIDirectory::new(api));
    let tracker = Arc::new(ProgressTracker::new(
        directory.clone(),
        config.monitor_node_kind.clone(),
    ));

    // --- Event handlers ---
    // The directory must see `execution_start` before the tracker folds it.
    let mut handlers = HandlerSet::default();
    handlers.register(directory);
    handlers.register(tracker.clone());
    let handlers = Arc::new(handlers);

    // --- Event source ---
    let mut source = EventSource::new(
        ComfyUIClient::new(config.comfyui_ws_url.clone()),
        ReconnectConfig {
            max_delay: Duration::from_secs(config.reconnect_max_delay_secs),
            ..Default::default()
        },
    );
    source.register(handlers.clone());
    source.start().await;

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        tracker,
        events: handlers,
        comfyui_connected: source.connected(),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    source.shutdown().await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
