//! HTTP surface.
//!
//! | Route        | Purpose                                           |
//! |--------------|---------------------------------------------------|
//! | `POST /ocr`  | convert one document and wait for the result      |
//! | `GET /health`| proxy the inference backend's health endpoint     |
//! | `GET /`      | static liveness payload                           |
//! | `GET /jobs`  | snapshot of tracked jobs                          |

mod error;
mod routes;

pub use error::ApiError;
pub use routes::{Artifacts, JobsResponse, OcrForm, OcrResponse};

use crate::config::ServiceConfig;
use crate::convert::ConversionPipeline;
use crate::dispatcher::Dispatcher;
use crate::error::ServiceError;
use crate::pipeline::engine::EngineRegistry;
use crate::pipeline::inference::{ChatCompletionsBackend, InferenceBackend};
use crate::pipeline::render::PdfiumRasterizer;
use crate::store::StoreRegistry;
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub backend: Arc<dyn InferenceBackend>,
    /// How long `POST /ocr` waits for its job.
    pub wait_budget: Duration,
}

impl AppState {
    pub fn new(
        dispatcher: Dispatcher,
        backend: Arc<dyn InferenceBackend>,
        wait_budget: Duration,
    ) -> Self {
        Self {
            dispatcher,
            backend,
            wait_budget,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::root))
        .route("/ocr", post(routes::submit_ocr))
        .route("/health", get(routes::health))
        .route("/jobs", get(routes::list_jobs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wire the production service: chat-completions backend, configured OCR
/// engine, pdfium rasterizer, and a dispatcher running the pipeline.
///
/// Must be called inside a tokio runtime.
pub fn build_state(
    config: &ServiceConfig,
    stores: StoreRegistry,
) -> Result<AppState, ServiceError> {
    let backend: Arc<dyn InferenceBackend> =
        Arc::new(ChatCompletionsBackend::from_config(config)?);
    let engine = EngineRegistry::builtin(config, Arc::clone(&backend))?.get(&config.engine)?;
    let rasterizer = Arc::new(PdfiumRasterizer::new(config.pdfium_lib_path.clone()));

    let pipeline = ConversionPipeline::builder(stores, rasterizer, engine)
        .config(config)
        .build();
    let dispatcher = Dispatcher::start(
        Arc::new(pipeline),
        config.workers,
        config.cancel_on_timeout,
    );

    Ok(AppState::new(
        dispatcher,
        backend,
        Duration::from_secs(config.wait_timeout_secs),
    ))
}

/// Serve until `shutdown` resolves, then drain the worker pool.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let dispatcher = state.dispatcher.clone();
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on {}", addr);
    }
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    dispatcher.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}
