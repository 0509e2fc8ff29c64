//! Boundary to the remote file source.
//!
//! A [`Connection`] is one interchangeable upstream session (for example one logged-in bot
//! client). The relay only needs two primitives from it: metadata lookup for a message and
//! offset-addressed chunk reads.

mod local_fs;
mod manifest;
pub mod memory;

use bytes::Bytes;
use subtle::ConstantTimeEq;

pub use local_fs::LocalDirConnection;
pub use manifest::{Manifest, ManifestEntry, ManifestError};
pub use memory::{MemoryConnection, MemoryFile};

/// Number of leading `unique_id` characters clients present as their access token.
pub const TOKEN_LEN: usize = 6;

/// Resolved metadata for one remote file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub message_id: u64,
    /// Content-derived identifier; its prefix doubles as the access token.
    pub unique_id: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
}

impl FileHandle {
    /// The first [`TOKEN_LEN`] characters of `unique_id`.
    pub fn token(&self) -> &str {
        match self.unique_id.char_indices().nth(TOKEN_LEN) {
            Some((end, _)) => &self.unique_id[..end],
            None => &self.unique_id,
        }
    }

    /// Compare a client-supplied token against [`FileHandle::token`] in constant time.
    pub fn verify(&self, token: &str) -> bool {
        self.token().as_bytes().ct_eq(token.as_bytes()).into()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("file not found")]
    NotFound,
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("message {0} matches more than one file")]
    Ambiguous(u64),
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl UpstreamError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Manifest(_) => "manifest",
            Self::Ambiguous(_) => "ambiguous",
            Self::Unavailable(_) => "unavailable",
            Self::Io(_) => "io",
        }
    }
}

#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Look up the file attached to `message_id`.
    ///
    /// Returns [`UpstreamError::NotFound`] when the message or its media does not exist.
    async fn file_properties(&self, message_id: u64) -> Result<FileHandle, UpstreamError>;

    /// Read at most `limit` bytes starting at `offset`.
    ///
    /// An empty result means there is no data at `offset`.
    async fn read_chunk(
        &self,
        file: &FileHandle,
        offset: u64,
        limit: u64,
    ) -> Result<Bytes, UpstreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(unique_id: &str) -> FileHandle {
        FileHandle {
            message_id: 1,
            unique_id: unique_id.to_string(),
            size: 0,
            mime_type: None,
            file_name: None,
        }
    }

    #[test]
    fn token_is_six_character_prefix() {
        let file = handle("AgADBAADq6kxG_abc");
        assert_eq!(file.token(), "AgADBA");
        assert!(file.verify("AgADBA"));
        assert!(!file.verify("AgADBB"));
        assert!(!file.verify("AgADB"));
        assert!(!file.verify("AgADBAA"));
        assert!(!file.verify(""));
    }

    #[test]
    fn short_unique_id_is_its_own_token() {
        let file = handle("abc");
        assert_eq!(file.token(), "abc");
        assert!(file.verify("abc"));
    }

    #[test]
    fn token_respects_char_boundaries() {
        let file = handle("ééééééé");
        assert_eq!(file.token(), "éééééé");
    }
}
