pub mod error;
pub mod headers;
pub mod path;

mod metrics;
pub(crate) mod observability;
mod status;
mod stream;
mod watch;

use axum::routing::get;
use axum::Router;

use crate::AppState;

pub use error::StreamError;
pub use path::{parse_media_path, MalformedPath, MediaTarget};

/// Media, watch page, status and metrics routes.
///
/// Static routes win over the `/*path` catch-all, so `/metrics` is never treated as a media path.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status::handle))
        .route("/metrics", get(metrics::handle))
        .route("/watch/*path", get(watch::handle))
        .route("/*path", get(stream::get_media).head(stream::head_media))
        .with_state(state)
}
