use std::collections::HashSet;
use std::path::{Component, Path};

use axum::http::HeaderValue;
use thiserror::Error;

const MAX_FILE_PATH_LEN: usize = 512;
const MAX_UNIQUE_ID_LEN: usize = 128;

/// Catalog of media files served by [`super::LocalDirConnection`].
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Manifest {
    pub files: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ManifestEntry {
    /// Message id clients use to address the file.
    pub id: u64,
    /// Path relative to the media root.
    pub file: String,
    /// Stable content identifier. Derived from the file contents when omitted.
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Display name for `Content-Disposition`.
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("duplicate file id: {0}")]
    DuplicateId(u64),
    #[error("invalid file path for id {id}: {file}")]
    InvalidFilePath { id: u64, file: String },
    #[error("invalid unique_id for id {id}: {reason}")]
    InvalidUniqueId { id: u64, reason: &'static str },
    #[error("invalid mime_type for id {id}: {mime_type:?}")]
    InvalidMimeType { id: u64, mime_type: String },
    #[error("manifest must include at least one file")]
    Empty,
}

#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
enum ManifestFormat {
    V1 { files: Vec<ManifestEntry> },
    V0(Vec<ManifestEntry>),
}

impl Manifest {
    pub fn parse_str(json: &str) -> Result<Self, ManifestError> {
        let parsed: ManifestFormat = serde_json::from_str(json)?;
        let mut files = match parsed {
            ManifestFormat::V1 { files } => files,
            ManifestFormat::V0(files) => files,
        };

        if files.is_empty() {
            return Err(ManifestError::Empty);
        }

        let mut ids = HashSet::new();
        for entry in &mut files {
            validate_file_path(entry.id, &entry.file)?;
            if let Some(unique_id) = entry.unique_id.as_mut() {
                *unique_id = unique_id.trim().to_string();
                validate_unique_id(entry.id, unique_id)?;
            }
            if let Some(mime_type) = entry.mime_type.as_mut() {
                *mime_type = mime_type.trim().to_string();
                if mime_type.is_empty() {
                    entry.mime_type = None;
                } else if !mime_type.contains('/') || HeaderValue::from_str(mime_type).is_err() {
                    return Err(ManifestError::InvalidMimeType {
                        id: entry.id,
                        mime_type: truncate(mime_type, 256),
                    });
                }
            }

            if !ids.insert(entry.id) {
                return Err(ManifestError::DuplicateId(entry.id));
            }
        }

        Ok(Self { files })
    }

    pub fn get(&self, id: u64) -> Option<&ManifestEntry> {
        self.files.iter().find(|entry| entry.id == id)
    }
}

fn validate_file_path(id: u64, file: &str) -> Result<(), ManifestError> {
    let invalid = || ManifestError::InvalidFilePath {
        id,
        file: truncate(file, MAX_FILE_PATH_LEN),
    };

    if file.is_empty() || file.len() > MAX_FILE_PATH_LEN || file.contains('\0') {
        return Err(invalid());
    }
    for component in Path::new(file).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(invalid()),
        }
    }
    Ok(())
}

fn validate_unique_id(id: u64, unique_id: &str) -> Result<(), ManifestError> {
    if unique_id.is_empty() {
        return Err(ManifestError::InvalidUniqueId {
            id,
            reason: "must not be empty",
        });
    }
    if unique_id.len() > MAX_UNIQUE_ID_LEN {
        return Err(ManifestError::InvalidUniqueId {
            id,
            reason: "too long",
        });
    }
    // Tokens travel in URL paths, so stick to the URL-safe base64 alphabet.
    if !unique_id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(ManifestError::InvalidUniqueId {
            id,
            reason: "must only contain [A-Za-z0-9_-]",
        });
    }
    Ok(())
}

fn truncate(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &value[..end])
}
