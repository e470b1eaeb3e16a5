use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use annolab_api::config::ServerConfig;
use annolab_api::engine::dispatcher::JobDispatcher;
use annolab_api::engine::queue::QueueManager;
use annolab_api::export_source::EngineExportSource;
use annolab_api::fallback::CpuFallbackDevice;
use annolab_api::router::build_app_router;
use annolab_api::state::AppState;
use annolab_api::storage::DirImageSource;
use annolab_api::ws;

use annolab_core::access::ProjectAccess;
use annolab_core::storage::ImageSource;
use annolab_events::StatusBroadcaster;
use annolab_export::ExportProcessor;
use annolab_inference::InferencePool;
use annolab_store::{ExportStore, InMemoryAccess, JobStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "annolab_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = config.port, "Loaded server configuration");

    // --- Project access (external authz stand-in, seeded from config) ---
    let access_registry = Arc::new(InMemoryAccess::new());
    for &(project_id, owner_id) in &config.project_owners {
        access_registry.add_project(project_id, owner_id).await;
    }
    let access: Arc<dyn ProjectAccess> = access_registry;

    // --- Stores ---
    let jobs = Arc::new(JobStore::new());
    let export_store = Arc::new(ExportStore::new());
    let images: Arc<dyn ImageSource> = Arc::new(DirImageSource::new(config.image_root.clone()));

    // --- Status broadcaster ---
    let broadcaster = Arc::new(StatusBroadcaster::new(Arc::clone(&access)));

    // --- Inference pool (CPU fallback device) ---
    let device = Arc::new(CpuFallbackDevice::new(config.device_memory_mb));
    let pool = InferencePool::start(config.inference_config(), device);

    // --- Queue manager + dispatcher ---
    let queue = QueueManager::new(
        Arc::clone(&jobs),
        Arc::clone(&pool),
        Arc::clone(&broadcaster),
        Arc::clone(&access),
    );
    let dispatcher = JobDispatcher::with_poll_interval(
        Arc::clone(&jobs),
        Arc::clone(&pool),
        Arc::clone(&images),
        Arc::clone(&broadcaster),
        std::time::Duration::from_millis(config.dispatch_poll_ms),
    );

    // --- Export processor ---
    let export_source = Arc::new(EngineExportSource::new(
        Arc::clone(&jobs),
        Arc::clone(&images),
    ));
    let exporter = ExportProcessor::new(
        Arc::clone(&export_store),
        export_source,
        Arc::clone(&broadcaster),
        config.export_root.clone(),
    );

    // --- WebSocket manager + relay ---
    let ws_manager = Arc::new(ws::WsManager::new());
    let shutdown = CancellationToken::new();
    tokio::spawn(ws::relay::run(
        Arc::clone(&broadcaster),
        Arc::clone(&ws_manager),
        shutdown.clone(),
    ));
    tokio::spawn(Arc::clone(&dispatcher).run(shutdown.clone()));

    // --- App state + router ---
    let state = AppState {
        config: Arc::new(config.clone()),
        queue,
        jobs,
        pool,
        exporter,
        broadcaster,
        access,
        ws_manager: Arc::clone(&ws_manager),
    };
    let app = build_app_router(state, &config);

    // --- Serve ---
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("invalid bind address");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind listener");
    tracing::info!(%addr, "Annolab API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone(), ws_manager))
        .await
        .expect("server error");
}

/// Wait for Ctrl-C, then stop background loops and close WebSockets.
async fn shutdown_signal(shutdown: CancellationToken, ws_manager: Arc<ws::WsManager>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
    ws_manager.shutdown_all().await;
}
