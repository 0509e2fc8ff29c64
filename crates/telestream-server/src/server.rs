use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::pool::ConnectionPool;
use crate::upstream::{Connection, LocalDirConnection};
use crate::AppState;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub media_root: PathBuf,
    pub connections: NonZeroUsize,
    pub metadata_ttl: Duration,
}

impl From<&Config> for ServerConfig {
    fn from(config: &Config) -> Self {
        Self {
            bind_addr: config.listen_addr,
            media_root: config.media_root.clone(),
            connections: config.connections,
            metadata_ttl: config.metadata_ttl,
        }
    }
}

pub struct RunningServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<anyhow::Result<()>>>,
}

impl RunningServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for in-flight requests to finish.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(join) = self.join.take() {
            join.await.context("server task panicked")??;
        }
        Ok(())
    }

    /// Resolve once the server task exits on its own, e.g. after a serve error.
    pub async fn wait(&mut self) -> anyhow::Result<()> {
        let Some(join) = self.join.as_mut() else {
            return Ok(());
        };
        let res = join.await.context("server task panicked")?;
        self.join = None;
        res
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

/// Serve the media directory at `config.media_root` through `config.connections` pooled
/// directory connections.
pub async fn start(config: ServerConfig) -> anyhow::Result<RunningServer> {
    let meta = tokio::fs::metadata(&config.media_root)
        .await
        .with_context(|| format!("open media root {}", config.media_root.display()))?;
    anyhow::ensure!(
        meta.is_dir(),
        "media root {} is not a directory",
        config.media_root.display()
    );

    let backend = LocalDirConnection::new(&config.media_root);
    let connections: Vec<Arc<dyn Connection>> = (0..config.connections.get())
        .map(|_| Arc::new(backend.clone()) as Arc<dyn Connection>)
        .collect();
    let pool = ConnectionPool::with_metadata_ttl(connections, config.metadata_ttl)
        .context("build connection pool")?;
    let state = AppState::new(Arc::new(pool)).context("register metrics")?;

    let media_root = Arc::new(config.media_root.clone());
    let ready = Router::new().route(
        "/readyz",
        get(move || {
            let media_root = Arc::clone(&media_root);
            async move {
                match tokio::fs::metadata(&*media_root).await {
                    Ok(meta) if meta.is_dir() => StatusCode::OK,
                    _ => StatusCode::SERVICE_UNAVAILABLE,
                }
            }
        }),
    );

    tracing::info!(
        media_root = %config.media_root.display(),
        connections = config.connections.get(),
        metadata_ttl_secs = config.metadata_ttl.as_secs(),
        "media backend ready"
    );
    serve(config.bind_addr, crate::app_with(state, ready)).await
}

/// Serve an already assembled state, e.g. a pool of in-memory connections.
pub async fn start_with_state(bind_addr: SocketAddr, state: AppState) -> anyhow::Result<RunningServer> {
    serve(bind_addr, crate::app(state)).await
}

async fn serve(bind_addr: SocketAddr, app: Router) -> anyhow::Result<RunningServer> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("bind {bind_addr}"))?;
    let addr = listener.local_addr().context("read bound address")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let join = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("serve")?;
        Ok(())
    });

    tracing::info!(%addr, "telestream-server listening");
    Ok(RunningServer {
        addr,
        shutdown_tx: Some(shutdown_tx),
        join: Some(join),
    })
}
