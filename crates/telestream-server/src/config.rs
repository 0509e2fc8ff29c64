use std::{net::SocketAddr, num::NonZeroUsize, path::PathBuf, time::Duration};

use clap::Parser;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone, Parser)]
#[command(name = "telestream-server", version, about)]
pub struct Args {
    /// Address the HTTP server listens on.
    ///
    /// Environment variable: `TELESTREAM_LISTEN_ADDR`.
    #[arg(long, env = "TELESTREAM_LISTEN_ADDR")]
    listen_addr: Option<SocketAddr>,

    /// Directory served by the local upstream backend (`manifest.json` or `<id>.<ext>` files).
    ///
    /// Environment variable: `TELESTREAM_MEDIA_ROOT`.
    #[arg(long, env = "TELESTREAM_MEDIA_ROOT")]
    media_root: Option<PathBuf>,

    /// Number of pooled upstream connections.
    ///
    /// Environment variable: `TELESTREAM_CONNECTIONS`.
    #[arg(long, env = "TELESTREAM_CONNECTIONS")]
    connections: Option<NonZeroUsize>,

    /// How long resolved file metadata is reused, in seconds. `0` resolves on every request.
    ///
    /// Environment variable: `TELESTREAM_METADATA_TTL_SECS`.
    #[arg(long, env = "TELESTREAM_METADATA_TTL_SECS")]
    metadata_ttl_secs: Option<u64>,

    /// Log filter (tracing-subscriber EnvFilter syntax).
    ///
    /// Environment variable: `TELESTREAM_LOG_LEVEL`.
    #[arg(long, env = "TELESTREAM_LOG_LEVEL")]
    log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub media_root: PathBuf,
    pub connections: NonZeroUsize,
    pub metadata_ttl: Duration,
    pub log_level: String,
}

impl Config {
    pub fn load() -> Self {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Self {
        let listen_addr = args.listen_addr.unwrap_or_else(default_listen_addr);
        let media_root = args
            .media_root
            .unwrap_or_else(|| PathBuf::from("./media"));
        let connections = args.connections.unwrap_or(NonZeroUsize::MIN);
        let metadata_ttl = Duration::from_secs(args.metadata_ttl_secs.unwrap_or(0));

        let log_level = args
            .log_level
            .map(|level| level.trim().to_string())
            .filter(|level| !level.is_empty())
            .unwrap_or_else(|| "info".to_string());

        Self {
            listen_addr,
            media_root,
            connections,
            metadata_ttl,
            log_level,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    DEFAULT_LISTEN_ADDR
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8080)))
}
