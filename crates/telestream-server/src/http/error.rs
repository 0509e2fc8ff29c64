use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::upstream::UpstreamError;

/// Failures of the media routes, each mapped to one HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("file not found")]
    NotFound,
    #[error("invalid token")]
    InvalidToken,
    #[error("bad request: {0}")]
    BadRequest(&'static str),
    #[error("range not satisfiable for a {size} byte file")]
    RangeNotSatisfiable { size: u64 },
    #[error("upstream failure: {0}")]
    Upstream(#[source] UpstreamError),
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl From<UpstreamError> for StreamError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::NotFound => Self::NotFound,
            other => Self::Upstream(other),
        }
    }
}

impl StreamError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidToken => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Upstream(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::NotFound => "404: File not found".to_string(),
            Self::InvalidToken => "403: Invalid token".to_string(),
            Self::BadRequest(msg) => format!("400: {msg}"),
            Self::RangeNotSatisfiable { .. } => "416: Range not satisfiable".to_string(),
            // Upstream details stay in the logs.
            Self::Upstream(_) | Self::Internal(_) => "500: Internal server error".to_string(),
        };

        let mut response = (status, body).into_response();
        if let Self::RangeNotSatisfiable { size } = self {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }
        response
    }
}
