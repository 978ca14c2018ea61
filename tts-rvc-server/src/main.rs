use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use tts_rvc_server::rvc::RvcClient;
use tts_rvc_server::tts::{self, RaceCoordinator};
use tts_rvc_server::{create_router, AppState, Config};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Configuration from environment
    let config = Config::from_env().expect("Invalid configuration");

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Invalid address");

    tracing::info!("TTS-RVC Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Starting server on http://{}", addr);
    tracing::info!("Model directory: {}", config.model_dir.display());
    tracing::info!("RVC backend: {}", config.rvc.base_url);
    tracing::info!("Shared directory: {}", config.rvc.shared_dir.display());

    // Load one model replica per device
    let model_dir = config.model_dir.clone();
    let devices = config.devices.clone();
    let retry = config.retry;
    let workers = tokio::task::spawn_blocking(move || tts::load_workers(&model_dir, &devices, retry))
        .await
        .expect("Model loading task panicked")
        .expect("Failed to load speech model");

    let coordinator = RaceCoordinator::new(workers);
    tracing::info!("Devices: {}", coordinator.devices().join(", "));

    let rvc = RvcClient::new(config.rvc).expect("Failed to create RVC client");

    // Create app state
    let state = Arc::new(AppState { coordinator, rvc });

    // Create router
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
