//! seismo-fs library - finite-source seismogram service
//!
//! Turns a fault-parameter file into synthetic seismograms for one or more
//! receivers and streams them back as MiniSEED or as a zip of SAC files.
//! The seismogram database, fault-file parser, signal kernels and travel-time
//! model are injected through the traits in [`backend`].

use axum::{extract::DefaultBodyLimit, routing::post, Router};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use seismo_common::ServiceConfig;

pub mod api;
pub mod archive;
pub mod args;
pub mod backend;
pub mod error;
pub mod orchestrator;
pub mod phase;
pub mod pool;
pub mod receivers;
pub mod source;
pub mod window;

use backend::Backend;
use pool::WorkerPool;
use receivers::StationInventory;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database and signal-processing collaborators (read-only)
    pub backend: Backend,
    pub config: Arc<ServiceConfig>,
    /// Shared gate for blocking work across all requests
    pub pool: WorkerPool,
}

impl AppState {
    /// Create new application state
    pub fn new(backend: Backend, config: ServiceConfig) -> Self {
        let pool = WorkerPool::new(config.blocking_workers);
        Self {
            backend,
            config: Arc::new(config),
            pool,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_body_bytes;

    Router::new()
        .route("/finite_source", post(api::post_finite_source))
        .layer(DefaultBodyLimit::max(body_limit))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the configured address and serve until `shutdown` resolves
///
/// When the configuration names a station inventory it replaces the one the
/// backend was built with.
pub async fn serve<F>(config: ServiceConfig, mut backend: Backend, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    config.validate()?;

    if let Some(path) = &config.station_inventory {
        backend.stations = Arc::new(StationInventory::load(path)?);
    }

    let listener = TcpListener::bind(&config.bind_addr).await?;
    serve_with_listener(listener, AppState::new(backend, config), shutdown).await
}

/// Resolve and load the configuration file, then [`serve`]
///
/// `config_path` takes priority over `SEISMO_CONFIG` and the user config
/// directory; with none of them present the compiled defaults are used.
pub async fn serve_from_config<F>(
    config_path: Option<&Path>,
    backend: Backend,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let config = ServiceConfig::resolve_and_load(config_path)?;
    serve(config, backend, shutdown).await
}

/// Serve on an already bound listener
pub async fn serve_with_listener<F>(
    listener: TcpListener,
    state: AppState,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(
        database_dt = state.backend.info.dt,
        database_npts = state.backend.info.npts,
        stations = state.backend.stations.len(),
        workers = state.pool.size(),
        "seismo-fs listening on http://{}",
        addr
    );

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
