//! Media path addressing.
//!
//! Two forms are accepted:
//!
//! * `/{token}{id}`: a six character token from `[A-Za-z0-9_-]` immediately followed by the
//!   decimal message id, e.g. `/AgADBA123`.
//! * `/{id}[/anything]?hash={token}`: the message id as the first path segment, with the token in
//!   the `hash` query parameter. Trailing segments (usually a file name) are ignored.

use crate::upstream::TOKEN_LEN;

/// What a request path points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTarget {
    pub message_id: u64,
    /// Client-supplied access token. `None` when the path form needs a `hash` query parameter and
    /// none was given.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("malformed media path")]
pub struct MalformedPath;

/// Parse the wildcard part of a media route (no leading slash).
pub fn parse_media_path(path: &str, hash: Option<&str>) -> Result<MediaTarget, MalformedPath> {
    if let Some(target) = parse_token_prefixed(path) {
        return Ok(target);
    }

    let id = path.split('/').next().unwrap_or_default();
    Ok(MediaTarget {
        message_id: parse_id(id)?,
        token: hash.map(ToOwned::to_owned),
    })
}

fn parse_token_prefixed(path: &str) -> Option<MediaTarget> {
    if path.len() <= TOKEN_LEN || !path.is_char_boundary(TOKEN_LEN) {
        return None;
    }
    let (token, id) = path.split_at(TOKEN_LEN);
    if !token.bytes().all(is_token_byte) {
        return None;
    }
    Some(MediaTarget {
        message_id: parse_id(id).ok()?,
        token: Some(token.to_owned()),
    })
}

fn parse_id(id: &str) -> Result<u64, MalformedPath> {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MalformedPath);
    }
    id.parse().map_err(|_| MalformedPath)
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(message_id: u64, token: Option<&str>) -> MediaTarget {
        MediaTarget {
            message_id,
            token: token.map(ToOwned::to_owned),
        }
    }

    #[test]
    fn token_prefixed_form() {
        assert_eq!(
            parse_media_path("abcdef123", None),
            Ok(target(123, Some("abcdef")))
        );
        assert_eq!(
            parse_media_path("Ag_-Z9456", Some("ignored")),
            Ok(target(456, Some("Ag_-Z9")))
        );
        // All-digit paths still split after six characters.
        assert_eq!(
            parse_media_path("1234567", None),
            Ok(target(7, Some("123456")))
        );
    }

    #[test]
    fn id_with_hash_query_form() {
        assert_eq!(
            parse_media_path("123", Some("abcdef")),
            Ok(target(123, Some("abcdef")))
        );
        assert_eq!(
            parse_media_path("123/movie.mkv", Some("abcdef")),
            Ok(target(123, Some("abcdef")))
        );
        assert_eq!(parse_media_path("42/video.mp4", None), Ok(target(42, None)));
    }

    #[test]
    fn malformed_paths() {
        for path in [
            "",
            "abc",
            "abcdef",
            "abcdefxyz",
            "abc.ef123",
            "file.mp4",
            "/123",
            "12a/x",
            "abcdef99999999999999999999999",
        ] {
            assert_eq!(
                parse_media_path(path, Some("abcdef")),
                Err(MalformedPath),
                "path={path:?}"
            );
        }
    }

    #[test]
    fn non_ascii_prefix_is_malformed() {
        assert_eq!(parse_media_path("ééé123", None), Err(MalformedPath));
    }
}
