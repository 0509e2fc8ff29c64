use anyhow::Context;
use telestream_server::config::Config;
use telestream_server::ServerConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    // Structured JSON logs; request logs come from the `http_request` span in
    // `http::observability`.
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .init();

    let mut server = telestream_server::start(ServerConfig::from(&config))
        .await
        .context("start server")?;

    let shutdown_requested = tokio::select! {
        res = server.wait() => {
            res?;
            false
        }
        res = tokio::signal::ctrl_c() => {
            res.context("listen for ctrl-c")?;
            true
        }
    };

    if shutdown_requested {
        tracing::info!("shutdown requested; draining in-flight requests");
        server.shutdown().await?;
    }
    Ok(())
}
