use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::OnceCell;

use super::manifest::Manifest;
use super::{Connection, FileHandle, UpstreamError};

const MANIFEST_FILE: &str = "manifest.json";
const HASH_BUF_LEN: usize = 64 * 1024;

/// Directory-backed [`Connection`].
///
/// # Catalog source
///
/// If a `manifest.json` is present under `root`, it maps message ids to files (preferred).
/// Otherwise the single file whose stem is the decimal message id (`42.mp4`) is served
/// (development only). Two files sharing that stem are rejected as ambiguous.
///
/// Entries without an explicit `unique_id` get one derived from their contents: the URL-safe
/// base64 SHA-256 digest, computed once per message id.
#[derive(Debug, Clone)]
pub struct LocalDirConnection {
    root: PathBuf,
    manifest: Arc<OnceCell<Option<Manifest>>>,
    derived_ids: Arc<Mutex<HashMap<u64, String>>>,
    fallback_paths: Arc<Mutex<HashMap<u64, PathBuf>>>,
}

struct ResolvedFile {
    path: PathBuf,
    unique_id: Option<String>,
    mime_type: Option<String>,
    file_name: Option<String>,
}

impl LocalDirConnection {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            manifest: Arc::new(OnceCell::new()),
            derived_ids: Arc::new(Mutex::new(HashMap::new())),
            fallback_paths: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn load_manifest(&self) -> Result<Option<Manifest>, UpstreamError> {
        let root = self.root.clone();
        self.manifest
            .get_or_try_init(|| async move {
                match fs::read_to_string(root.join(MANIFEST_FILE)).await {
                    Ok(raw) => Ok(Some(Manifest::parse_str(&raw)?)),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
                    Err(err) => Err(UpstreamError::Io(err)),
                }
            })
            .await
            .cloned()
    }

    async fn resolve(&self, message_id: u64) -> Result<ResolvedFile, UpstreamError> {
        if let Some(manifest) = self.load_manifest().await? {
            let entry = manifest.get(message_id).ok_or(UpstreamError::NotFound)?;
            return Ok(ResolvedFile {
                path: self.root.join(&entry.file),
                unique_id: entry.unique_id.clone(),
                mime_type: entry.mime_type.clone(),
                file_name: entry.file_name.clone(),
            });
        }

        // Directory-listing fallback (dev mode): `<message_id>[.ext]`.
        let path = self.fallback_path(message_id).await?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToOwned::to_owned);
        Ok(ResolvedFile {
            path,
            unique_id: None,
            mime_type: None,
            file_name,
        })
    }

    /// Path served for `message_id` in fallback mode.
    ///
    /// The first successful scan is memoized, so every later chunk read targets the same file
    /// that metadata and the derived id were computed from.
    async fn fallback_path(&self, message_id: u64) -> Result<PathBuf, UpstreamError> {
        let cached = self.lock_paths().get(&message_id).cloned();
        if let Some(path) = cached {
            return Ok(path);
        }

        let wanted = message_id.to_string();
        let mut matches = Vec::new();
        let mut dir = fs::read_dir(&self.root).await.map_err(map_not_found)?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.file_stem().and_then(|stem| stem.to_str()) == Some(wanted.as_str()) {
                matches.push(path);
            }
        }

        let path = match matches.len() {
            0 => return Err(UpstreamError::NotFound),
            1 => matches.remove(0),
            _ => return Err(UpstreamError::Ambiguous(message_id)),
        };
        self.lock_paths().insert(message_id, path.clone());
        Ok(path)
    }

    async fn unique_id_for(&self, message_id: u64, path: &Path) -> Result<String, UpstreamError> {
        let cached = self.lock_derived().get(&message_id).cloned();
        if let Some(id) = cached {
            return Ok(id);
        }

        let digest = hash_file(path).await?;
        let id = URL_SAFE_NO_PAD.encode(digest);
        self.lock_derived().insert(message_id, id.clone());
        Ok(id)
    }

    fn lock_derived(&self) -> std::sync::MutexGuard<'_, HashMap<u64, String>> {
        self.derived_ids.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_paths(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PathBuf>> {
        self.fallback_paths.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn hash_file(path: &Path) -> Result<[u8; 32], UpstreamError> {
    let mut file = fs::File::open(path).await.map_err(map_not_found)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF_LEN];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

fn map_not_found(err: std::io::Error) -> UpstreamError {
    if err.kind() == std::io::ErrorKind::NotFound {
        UpstreamError::NotFound
    } else {
        UpstreamError::Io(err)
    }
}

#[async_trait::async_trait]
impl Connection for LocalDirConnection {
    async fn file_properties(&self, message_id: u64) -> Result<FileHandle, UpstreamError> {
        let resolved = self.resolve(message_id).await?;
        let meta = fs::metadata(&resolved.path).await.map_err(map_not_found)?;
        if !meta.is_file() {
            return Err(UpstreamError::NotFound);
        }

        let unique_id = match resolved.unique_id {
            Some(id) => id,
            None => self.unique_id_for(message_id, &resolved.path).await?,
        };

        Ok(FileHandle {
            message_id,
            unique_id,
            size: meta.len(),
            mime_type: resolved.mime_type,
            file_name: resolved.file_name,
        })
    }

    async fn read_chunk(
        &self,
        file: &FileHandle,
        offset: u64,
        limit: u64,
    ) -> Result<Bytes, UpstreamError> {
        let resolved = self.resolve(file.message_id).await?;
        let mut reader = fs::File::open(&resolved.path)
            .await
            .map_err(map_not_found)?;
        let size = reader.metadata().await?.len();
        if offset >= size {
            return Ok(Bytes::new());
        }

        let want = limit.min(size - offset);
        reader.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity(usize::try_from(want).unwrap_or(0));
        reader.take(want).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}
