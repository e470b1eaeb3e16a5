//! Shared test harness: builds the same application the binary runs, with
//! temp directories for image and export storage and the CPU fallback
//! device, so tests exercise the full enqueue → dispatch → inference →
//! commit pipeline without external services.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use image::{GrayImage, Luma};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use annolab_api::config::ServerConfig;
use annolab_api::engine::dispatcher::JobDispatcher;
use annolab_api::engine::queue::QueueManager;
use annolab_api::export_source::EngineExportSource;
use annolab_api::fallback::CpuFallbackDevice;
use annolab_api::router::build_app_router;
use annolab_api::state::AppState;
use annolab_api::storage::DirImageSource;
use annolab_api::ws::WsManager;
use annolab_core::access::ProjectAccess;
use annolab_core::storage::ImageSource;
use annolab_events::StatusBroadcaster;
use annolab_export::ExportProcessor;
use annolab_inference::InferencePool;
use annolab_store::{ExportStore, InMemoryAccess, JobStore};

/// Project 10 is owned by user 1 and shared with user 3; project 11 is
/// owned by user 2.
pub const OWNER: i64 = 1;
pub const OTHER_USER: i64 = 2;
pub const SHARED_USER: i64 = 3;
pub const PROJECT: i64 = 10;
pub const OTHER_PROJECT: i64 = 11;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub export_store: Arc<ExportStore>,
    pub shutdown: CancellationToken,
    _image_root: tempfile::TempDir,
    _export_root: tempfile::TempDir,
}

/// Build the application. With `with_dispatcher` false, enqueued jobs stay
/// `Queued`, which makes cancellation paths deterministic.
pub async fn build_test_app(with_dispatcher: bool) -> TestApp {
    let image_root = tempfile::tempdir().expect("image root");
    let export_root = tempfile::tempdir().expect("export root");

    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        inference_workers: 2,
        device_memory_mb: 24_576,
        reserved_memory_mb: 2_048,
        inference_timeout_secs: 5,
        dispatch_poll_ms: 10,
        export_root: export_root.path().to_path_buf(),
        image_root: image_root.path().to_path_buf(),
        project_owners: Vec::new(),
    };

    let access_registry = Arc::new(InMemoryAccess::new());
    access_registry.add_project(PROJECT, OWNER).await;
    access_registry.add_project(OTHER_PROJECT, OTHER_USER).await;
    access_registry.grant_share(PROJECT, SHARED_USER).await;
    let access: Arc<dyn ProjectAccess> = access_registry;

    let jobs = Arc::new(JobStore::new());
    let export_store = Arc::new(ExportStore::new());
    let images: Arc<dyn ImageSource> = Arc::new(DirImageSource::new(config.image_root.clone()));
    let broadcaster = Arc::new(StatusBroadcaster::new(Arc::clone(&access)));

    let device = Arc::new(CpuFallbackDevice::new(config.device_memory_mb));
    let pool = InferencePool::start(config.inference_config(), device);

    let queue = QueueManager::new(
        Arc::clone(&jobs),
        Arc::clone(&pool),
        Arc::clone(&broadcaster),
        Arc::clone(&access),
    );

    let shutdown = CancellationToken::new();
    if with_dispatcher {
        let dispatcher = JobDispatcher::with_poll_interval(
            Arc::clone(&jobs),
            Arc::clone(&pool),
            Arc::clone(&images),
            Arc::clone(&broadcaster),
            Duration::from_millis(config.dispatch_poll_ms),
        );
        tokio::spawn(dispatcher.run(shutdown.clone()));
    }

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

    let state = AppState {
        config: Arc::new(config.clone()),
        queue,
        jobs,
        pool,
        exporter,
        broadcaster,
        access,
        ws_manager: Arc::new(WsManager::new()),
    };
    let router = build_app_router(state.clone(), &config);

    TestApp {
        router,
        state,
        export_store,
        shutdown,
        _image_root: image_root,
        _export_root: export_root,
    }
}

/// Write a 32x32 test image with a bright 8x8 square at (8, 8), as the
/// upload service would have stored it.
pub fn write_image(app: &TestApp, image_id: i64) {
    let mut canvas = GrayImage::from_pixel(32, 32, Luma([0u8]));
    for y in 8..16 {
        for x in 8..16 {
            canvas.put_pixel(x, y, Luma([255]));
        }
    }
    let path = app.state.config.image_root.join(format!("{image_id}.png"));
    canvas.save(path).expect("write test image");
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(
    router: &Router,
    method: Method,
    path: &str,
    user_id: Option<i64>,
    body: Option<serde_json::Value>,
) -> Response {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(user_id) = user_id {
        builder = builder.header("x-user-id", user_id.to_string());
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };
    router.clone().oneshot(request).await.expect("response")
}

pub async fn get(router: &Router, path: &str, user_id: i64) -> Response {
    send(router, Method::GET, path, Some(user_id), None).await
}

pub async fn post(
    router: &Router,
    path: &str,
    user_id: i64,
    body: serde_json::Value,
) -> Response {
    send(router, Method::POST, path, Some(user_id), Some(body)).await
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes()
        .to_vec()
}

/// Poll a job's status endpoint until it reaches a terminal status.
pub async fn wait_for_terminal(
    router: &Router,
    base: &str,
    job_id: &str,
    user_id: i64,
) -> serde_json::Value {
    for _ in 0..500 {
        let response = get(router, &format!("{base}/{job_id}"), user_id).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let status = json["data"]["status"].as_str().expect("status");
        if matches!(status, "completed" | "failed" | "cancelled") {
            return json["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not reach a terminal status");
}
