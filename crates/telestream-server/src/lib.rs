//! HTTP relay that streams media from pooled upstream connections, turning client `Range`
//! requests into chunk-aligned upstream reads.

pub mod config;
pub mod http;
pub mod metrics;
pub mod pool;
pub mod producer;
pub mod server;
pub mod streamer;
pub mod upstream;

use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Instant;

use axum::middleware;
use axum::routing::get;

use metrics::Metrics;
use pool::ConnectionPool;
use telestream_http_range::DEFAULT_CHUNK_SIZE;

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<ConnectionPool>,
    pub metrics: Arc<Metrics>,
    started_at: Instant,
    chunk_size: u64,
}

impl AppState {
    pub fn new(pool: Arc<ConnectionPool>) -> prometheus::Result<Self> {
        Ok(Self {
            pool,
            metrics: Arc::new(Metrics::new()?),
            started_at: Instant::now(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Size of each upstream read. Defaults to [`DEFAULT_CHUNK_SIZE`].
    pub fn with_chunk_size(mut self, chunk_size: NonZeroU64) -> Self {
        self.chunk_size = chunk_size.get();
        self
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }
}

pub fn app(state: AppState) -> axum::Router {
    app_with(state, axum::Router::new())
}

/// [`app`] plus `extra` routes, all behind the observability layer.
pub(crate) fn app_with(state: AppState, extra: axum::Router) -> axum::Router {
    let metrics = Arc::clone(&state.metrics);
    http::router(state)
        .route("/healthz", get(health))
        .merge(extra)
        .route_layer(middleware::from_fn_with_state(
            metrics,
            http::observability::middleware,
        ))
}

async fn health() -> &'static str {
    "ok\n"
}

pub use server::{start, start_with_state, RunningServer, ServerConfig};
