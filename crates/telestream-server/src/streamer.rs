//! Long-lived per-connection stream wrappers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use telestream_http_range::ChunkPlan;

use crate::pool::LoadLease;
use crate::producer::ChunkProducer;
use crate::upstream::{Connection, FileHandle, UpstreamError};

/// Fetches file metadata and chunks through one upstream connection.
pub struct ByteStreamer {
    connection_id: usize,
    connection: Arc<dyn Connection>,
    metadata_ttl: Duration,
    metadata: Mutex<HashMap<u64, (Instant, FileHandle)>>,
}

impl ByteStreamer {
    pub fn new(connection_id: usize, connection: Arc<dyn Connection>, metadata_ttl: Duration) -> Self {
        Self {
            connection_id,
            connection,
            metadata_ttl,
            metadata: Mutex::new(HashMap::new()),
        }
    }

    pub fn connection_id(&self) -> usize {
        self.connection_id
    }

    /// Resolve size, MIME type, name and unique id of the file attached to `message_id`.
    ///
    /// With a non-zero metadata TTL, results are reused until they expire.
    pub async fn file_properties(&self, message_id: u64) -> Result<FileHandle, UpstreamError> {
        if let Some(file) = self.cached(message_id) {
            tracing::debug!(
                connection = self.connection_id,
                message_id,
                "file properties served from cache"
            );
            return Ok(file);
        }

        let file = self.connection.file_properties(message_id).await?;
        if !self.metadata_ttl.is_zero() {
            let now = Instant::now();
            let mut cache = self.lock_metadata();
            cache.retain(|_, (at, _)| now.duration_since(*at) < self.metadata_ttl);
            cache.insert(message_id, (now, file.clone()));
        }
        Ok(file)
    }

    /// Lazily stream the bytes described by `plan`. `lease` is held until the producer finishes
    /// or is dropped.
    pub fn producer(&self, file: FileHandle, plan: ChunkPlan, lease: LoadLease) -> ChunkProducer {
        ChunkProducer::new(Arc::clone(&self.connection), file, plan)
            .with_connection_id(self.connection_id)
            .with_lease(lease)
    }

    fn cached(&self, message_id: u64) -> Option<FileHandle> {
        if self.metadata_ttl.is_zero() {
            return None;
        }
        let cache = self.lock_metadata();
        let (at, file) = cache.get(&message_id)?;
        (at.elapsed() < self.metadata_ttl).then(|| file.clone())
    }

    fn lock_metadata(&self) -> MutexGuard<'_, HashMap<u64, (Instant, FileHandle)>> {
        self.metadata.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One [`ByteStreamer`] per connection, created on first use and kept for the process lifetime.
pub struct StreamerCache {
    connections: Vec<Arc<dyn Connection>>,
    metadata_ttl: Duration,
    streamers: Mutex<HashMap<usize, Arc<ByteStreamer>>>,
}

impl StreamerCache {
    pub fn new(connections: Vec<Arc<dyn Connection>>, metadata_ttl: Duration) -> Self {
        Self {
            connections,
            metadata_ttl,
            streamers: Mutex::new(HashMap::new()),
        }
    }

    /// # Panics
    ///
    /// Panics if `connection_id` is not an index into the pooled connections.
    pub fn get_or_create(&self, connection_id: usize) -> Arc<ByteStreamer> {
        let mut streamers = self.streamers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(streamer) = streamers.get(&connection_id) {
            tracing::debug!(connection = connection_id, "using cached stream wrapper");
            return Arc::clone(streamer);
        }

        tracing::debug!(connection = connection_id, "creating stream wrapper");
        let streamer = Arc::new(ByteStreamer::new(
            connection_id,
            Arc::clone(&self.connections[connection_id]),
            self.metadata_ttl,
        ));
        streamers.insert(connection_id, Arc::clone(&streamer));
        streamer
    }

    pub fn len(&self) -> usize {
        self.streamers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
