use std::io;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use futures::TryStreamExt;
use rand::Rng;
use telestream_http_range::{resolve_range, ChunkPlan, RangeError, RangeInput};

use super::error::StreamError;
use super::headers::content_disposition;
use super::path::parse_media_path;
use crate::metrics::RangeOutcome;
use crate::pool::Checkout;
use crate::upstream::{FileHandle, UpstreamError};
use crate::AppState;

const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Default, serde::Deserialize)]
pub(crate) struct MediaQuery {
    hash: Option<String>,
}

pub(crate) async fn get_media(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<MediaQuery>,
    headers: HeaderMap,
) -> Result<Response, StreamError> {
    serve_media(state, &path, query, &headers, true).await
}

pub(crate) async fn head_media(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<MediaQuery>,
    headers: HeaderMap,
) -> Result<Response, StreamError> {
    serve_media(state, &path, query, &headers, false).await
}

/// Pick a connection, resolve the file behind `path` and check the caller's token.
///
/// The returned checkout holds one unit of load on the chosen connection.
pub(super) async fn resolve_media(
    state: &AppState,
    path: &str,
    query: MediaQuery,
) -> Result<(Checkout, FileHandle), StreamError> {
    let target = parse_media_path(path, query.hash.as_deref())
        .map_err(|_| StreamError::BadRequest("malformed media path"))?;

    let checkout = state.pool.checkout();
    let span = tracing::Span::current();
    span.record("connection", checkout.connection_id());
    span.record("message_id", target.message_id);
    tracing::info!(
        connection = checkout.connection_id(),
        message_id = target.message_id,
        "connection selected"
    );

    let file = checkout
        .streamer
        .file_properties(target.message_id)
        .await
        .map_err(|err| upstream_failure(state, target.message_id, err))?;

    let verified = target
        .token
        .as_deref()
        .is_some_and(|token| file.verify(token));
    if !verified {
        tracing::debug!(message_id = target.message_id, "token mismatch");
        return Err(StreamError::InvalidToken);
    }

    Ok((checkout, file))
}

fn upstream_failure(state: &AppState, message_id: u64, err: UpstreamError) -> StreamError {
    if !matches!(err, UpstreamError::NotFound) {
        tracing::error!(message_id, error = %err, "upstream metadata lookup failed");
        state.metrics.inc_upstream_error(err.kind());
    }
    StreamError::from(err)
}

async fn serve_media(
    state: AppState,
    path: &str,
    query: MediaQuery,
    req_headers: &HeaderMap,
    want_body: bool,
) -> Result<Response, StreamError> {
    let (checkout, file) = resolve_media(&state, path, query).await?;

    let range_header = req_headers
        .get(header::RANGE)
        .map(|value| value.to_str())
        .transpose()
        .map_err(|_| StreamError::BadRequest("invalid Range header"))?;
    let input = RangeInput::from_header(range_header);
    let partial = input.is_explicit();

    let presentation = Presentation::for_file(&file);

    if file.size == 0 && !partial {
        let mut response = Response::new(Body::empty());
        presentation.insert_headers(response.headers_mut());
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(0u64));
        return Ok(response);
    }

    let range = match resolve_range(input, file.size) {
        Ok(range) => range,
        Err(RangeError::Invalid) => {
            state.metrics.inc_range_request(RangeOutcome::Invalid);
            return Err(StreamError::BadRequest("invalid Range header"));
        }
        Err(RangeError::NotSatisfiable { size }) => {
            if partial {
                state.metrics.inc_range_request(RangeOutcome::Unsatisfiable);
            }
            return Err(StreamError::RangeNotSatisfiable { size });
        }
    };
    if partial {
        state.metrics.inc_range_request(RangeOutcome::Valid);
    }

    let plan = ChunkPlan::new(range, state.chunk_size());
    tracing::debug!(
        start = range.start(),
        end = range.end(),
        size = file.size,
        chunks = plan.chunk_count,
        "planned range"
    );

    let mut response = Response::new(Body::empty());
    *response.status_mut() = if partial {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let headers = response.headers_mut();
    presentation.insert_headers(headers);
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(plan.requested_length),
    );
    headers.insert(
        header::CONTENT_RANGE,
        HeaderValue::from_str(&format!(
            "bytes {}-{}/{}",
            range.start(), range.end(), file.size
        ))
        .map_err(|_| StreamError::Internal("content range header"))?,
    );

    if want_body {
        *response.body_mut() = media_body(&state, checkout, file, plan);
    }
    Ok(response)
}

fn media_body(state: &AppState, checkout: Checkout, file: FileHandle, plan: ChunkPlan) -> Body {
    let Checkout { lease, streamer } = checkout;
    let connection = lease.connection_id();
    let message_id = file.message_id;
    let metrics = std::sync::Arc::clone(&state.metrics);
    let error_metrics = std::sync::Arc::clone(&state.metrics);

    let stream = streamer
        .producer(file, plan, lease)
        .into_stream()
        .inspect_ok(move |chunk| metrics.observe_bytes_served(chunk.len() as u64))
        .inspect_err(move |err: &io::Error| {
            let kind = err
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<UpstreamError>())
                .map_or("io", UpstreamError::kind);
            error_metrics.inc_upstream_error(kind);
            tracing::error!(connection, message_id, error = %err, "media stream aborted");
        });

    Body::from_stream(stream)
}

/// Content type and download name sent to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Presentation {
    mime_type: String,
    file_name: String,
}

impl Presentation {
    /// Fill in what upstream did not report: the MIME type is guessed from the file name, and a
    /// missing name becomes four random hex digits plus the MIME subtype as extension.
    fn for_file(file: &FileHandle) -> Self {
        let mime_type = file.mime_type.clone().or_else(|| {
            file.file_name
                .as_deref()
                .and_then(|name| mime_guess::from_path(name).first_raw())
                .map(ToOwned::to_owned)
        });

        let file_name = match (&file.file_name, &mime_type) {
            (Some(name), _) => name.clone(),
            (None, Some(mime)) => format!("{}.{}", random_stem(), mime_subtype(mime)),
            (None, None) => format!("{}.unknown", random_stem()),
        };

        Self {
            mime_type: mime_type.unwrap_or_else(|| OCTET_STREAM.to_string()),
            file_name,
        }
    }

    fn insert_headers(&self, headers: &mut HeaderMap) {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(&self.mime_type)
                .unwrap_or_else(|_| HeaderValue::from_static(OCTET_STREAM)),
        );
        headers.insert(
            header::CONTENT_DISPOSITION,
            content_disposition(&self.file_name),
        );
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    }
}

fn random_stem() -> String {
    let stem: u16 = rand::thread_rng().gen();
    format!("{stem:04x}")
}

fn mime_subtype(mime: &str) -> &str {
    mime.split_once('/')
        .map(|(_, subtype)| subtype.split(';').next().unwrap_or_default().trim())
        .filter(|subtype| !subtype.is_empty())
        .unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(mime_type: Option<&str>, file_name: Option<&str>) -> FileHandle {
        FileHandle {
            message_id: 1,
            unique_id: "AbCdEfGh".to_string(),
            size: 10,
            mime_type: mime_type.map(ToOwned::to_owned),
            file_name: file_name.map(ToOwned::to_owned),
        }
    }

    fn is_hex_stem(name: &str, ext: &str) -> bool {
        let Some((stem, actual_ext)) = name.split_once('.') else {
            return false;
        };
        stem.len() == 4 && stem.bytes().all(|b| b.is_ascii_hexdigit()) && actual_ext == ext
    }

    #[test]
    fn reported_metadata_is_used_verbatim() {
        let p = Presentation::for_file(&file(Some("video/mp4"), Some("clip.bin")));
        assert_eq!(p.mime_type, "video/mp4");
        assert_eq!(p.file_name, "clip.bin");
    }

    #[test]
    fn mime_type_is_guessed_from_name() {
        let p = Presentation::for_file(&file(None, Some("song.mp3")));
        assert_eq!(p.mime_type, "audio/mpeg");

        let p = Presentation::for_file(&file(None, Some("blob.zzzz")));
        assert_eq!(p.mime_type, OCTET_STREAM);
        assert_eq!(p.file_name, "blob.zzzz");
    }

    #[test]
    fn missing_name_gets_random_stem() {
        let p = Presentation::for_file(&file(Some("video/x-matroska"), None));
        assert!(is_hex_stem(&p.file_name, "x-matroska"), "{}", p.file_name);

        let p = Presentation::for_file(&file(None, None));
        assert_eq!(p.mime_type, OCTET_STREAM);
        assert!(is_hex_stem(&p.file_name, "unknown"), "{}", p.file_name);
    }

    #[test]
    fn subtype_ignores_parameters() {
        assert_eq!(mime_subtype("video/mp4; codecs=avc1"), "mp4");
        assert_eq!(mime_subtype("garbage"), "unknown");
        assert_eq!(mime_subtype("text/"), "unknown");
    }
}
