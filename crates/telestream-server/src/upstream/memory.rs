//! In-process [`Connection`] backed by byte buffers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use bytes::Bytes;

use super::{Connection, FileHandle, UpstreamError};

/// One file served by a [`MemoryConnection`].
#[derive(Debug, Clone)]
pub struct MemoryFile {
    handle: FileHandle,
    data: Bytes,
}

impl MemoryFile {
    pub fn new(message_id: u64, unique_id: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            handle: FileHandle {
                message_id,
                unique_id: unique_id.into(),
                size: data.len() as u64,
                mime_type: None,
                file_name: None,
            },
            data,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.handle.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.handle.file_name = Some(file_name.into());
        self
    }

    /// Advertise a size different from the stored data, e.g. to simulate upstream truncation.
    pub fn with_reported_size(mut self, size: u64) -> Self {
        self.handle.size = size;
        self
    }

    pub fn handle(&self) -> &FileHandle {
        &self.handle
    }
}

#[derive(Debug, Default)]
pub struct MemoryConnection {
    files: RwLock<HashMap<u64, MemoryFile>>,
    property_lookups: AtomicU64,
    chunk_reads: AtomicU64,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, file: MemoryFile) -> Self {
        self.insert(file);
        self
    }

    pub fn insert(&self, file: MemoryFile) {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.insert(file.handle.message_id, file);
    }

    /// Number of `file_properties` calls served so far.
    pub fn property_lookups(&self) -> u64 {
        self.property_lookups.load(Ordering::Relaxed)
    }

    /// Number of `read_chunk` calls served so far.
    pub fn chunk_reads(&self) -> u64 {
        self.chunk_reads.load(Ordering::Relaxed)
    }

    fn data_for(&self, message_id: u64) -> Option<Bytes> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files.get(&message_id).map(|file| file.data.clone())
    }
}

#[async_trait::async_trait]
impl Connection for MemoryConnection {
    async fn file_properties(&self, message_id: u64) -> Result<FileHandle, UpstreamError> {
        self.property_lookups.fetch_add(1, Ordering::Relaxed);
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .get(&message_id)
            .map(|file| file.handle.clone())
            .ok_or(UpstreamError::NotFound)
    }

    async fn read_chunk(
        &self,
        file: &FileHandle,
        offset: u64,
        limit: u64,
    ) -> Result<Bytes, UpstreamError> {
        self.chunk_reads.fetch_add(1, Ordering::Relaxed);
        let data = self
            .data_for(file.message_id)
            .ok_or(UpstreamError::NotFound)?;

        let len = data.len() as u64;
        if offset >= len {
            return Ok(Bytes::new());
        }
        let end = offset.saturating_add(limit).min(len);
        Ok(data.slice(offset as usize..end as usize))
    }
}
