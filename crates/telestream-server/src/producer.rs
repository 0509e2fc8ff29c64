//! Lazy chunk-by-chunk reader for one planned byte range.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use telestream_http_range::ChunkPlan;

use crate::pool::LoadLease;
use crate::upstream::{Connection, FileHandle, UpstreamError};

/// Fetches the chunks of a [`ChunkPlan`] in ascending offset order, one upstream read per call to
/// [`ChunkProducer::next_chunk`], and trims them to the requested window.
///
/// The sequence is finite and cannot be restarted. It ends early when upstream returns an empty
/// chunk, or after yielding a short chunk that was not planned to be the last one. Any held
/// [`LoadLease`] is released as soon as the sequence ends, fails, or the producer is dropped.
pub struct ChunkProducer {
    connection: Arc<dyn Connection>,
    connection_id: usize,
    file: FileHandle,
    plan: ChunkPlan,
    next_index: u64,
    finished: bool,
    lease: Option<LoadLease>,
}

impl ChunkProducer {
    pub fn new(connection: Arc<dyn Connection>, file: FileHandle, plan: ChunkPlan) -> Self {
        Self {
            connection,
            connection_id: 0,
            file,
            plan,
            next_index: 0,
            finished: plan.chunk_count == 0,
            lease: None,
        }
    }

    /// Connection id reported in logs.
    pub fn with_connection_id(mut self, connection_id: usize) -> Self {
        self.connection_id = connection_id;
        self
    }

    pub fn with_lease(mut self, lease: LoadLease) -> Self {
        if !self.finished {
            self.lease = Some(lease);
        }
        self
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fetch, trim and return the next chunk, or `None` once the sequence has ended.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, UpstreamError> {
        if self.finished {
            return Ok(None);
        }

        let index = self.next_index;
        let offset = self.plan.chunk_offset(index);
        let chunk = match self
            .connection
            .read_chunk(&self.file, offset, self.plan.chunk_size)
            .await
        {
            Ok(chunk) => chunk,
            Err(err) => {
                self.finish();
                return Err(err);
            }
        };
        self.next_index += 1;

        if chunk.is_empty() {
            tracing::warn!(
                connection = self.connection_id,
                message_id = self.file.message_id,
                offset,
                chunk = index,
                planned = self.plan.chunk_count,
                "upstream returned no data before the planned end"
            );
            self.finish();
            return Ok(None);
        }

        let last = self.plan.is_last(index);
        let chunk_len = chunk.len() as u64;
        let truncated = if last {
            chunk_len < self.plan.last_chunk_trim
        } else {
            chunk_len < self.plan.chunk_size
        };
        if truncated {
            tracing::warn!(
                connection = self.connection_id,
                message_id = self.file.message_id,
                offset,
                chunk = index,
                received = chunk_len,
                "short upstream read; ending stream"
            );
        }

        let piece = chunk.slice(self.plan.trim_bounds(index, chunk.len()));
        if last || truncated {
            self.finish();
        }
        if piece.is_empty() {
            return Ok(None);
        }
        Ok(Some(piece))
    }

    /// Adapt the producer into a body stream. Upstream failures surface as I/O errors, which
    /// abort the response mid-body.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static {
        futures::stream::try_unfold(self, |mut producer| async move {
            match producer.next_chunk().await {
                Ok(Some(chunk)) => Ok(Some((chunk, producer))),
                Ok(None) => Ok(None),
                Err(err) => Err(io::Error::other(err)),
            }
        })
    }

    fn finish(&mut self) {
        self.finished = true;
        self.lease.take();
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use futures::TryStreamExt;
    use telestream_http_range::ByteRange;

    use super::*;
    use crate::pool::LoadTracker;
    use crate::upstream::{MemoryConnection, MemoryFile};

    const CHUNK: u64 = 4;

    fn fixture(len: u8) -> (Arc<MemoryConnection>, FileHandle, Vec<u8>) {
        let data: Vec<u8> = (0..len).collect();
        let file = MemoryFile::new(1, "AbCdEfGh", data.clone());
        let handle = file.handle().clone();
        (Arc::new(MemoryConnection::new().with_file(file)), handle, data)
    }

    fn producer(conn: &Arc<MemoryConnection>, file: &FileHandle, start: u64, end: u64) -> ChunkProducer {
        let plan = ChunkPlan::new(ByteRange::new(start, end).unwrap(), CHUNK);
        ChunkProducer::new(conn.clone(), file.clone(), plan)
    }

    async fn drain(producer: &mut ChunkProducer) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = producer.next_chunk().await.unwrap() {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn yields_exactly_the_requested_bytes() {
        for (start, end) in [(0, 49), (3, 3), (3, 10), (4, 7), (4, 8), (5, 48), (48, 49)] {
            let (conn, file, data) = fixture(50);
            let mut producer = producer(&conn, &file, start, end);
            let expected_reads = producer.plan().chunk_count;

            let out = drain(&mut producer).await;
            assert_eq!(out, &data[start as usize..=end as usize], "range {start}-{end}");
            assert_eq!(conn.chunk_reads(), expected_reads, "range {start}-{end}");
            assert!(producer.is_finished());
        }
    }

    #[tokio::test]
    async fn fetches_one_chunk_per_step() {
        let (conn, file, data) = fixture(50);
        let mut producer = producer(&conn, &file, 2, 45);
        assert_eq!(conn.chunk_reads(), 0);

        let first = producer.next_chunk().await.unwrap().unwrap();
        assert_eq!(&first[..], &data[2..4]);
        assert_eq!(conn.chunk_reads(), 1);

        let second = producer.next_chunk().await.unwrap().unwrap();
        assert_eq!(&second[..], &data[4..8]);
        assert_eq!(conn.chunk_reads(), 2);
    }

    #[tokio::test]
    async fn stops_after_short_upstream_read() {
        let data: Vec<u8> = (0..10).collect();
        let file = MemoryFile::new(1, "AbCdEfGh", data.clone()).with_reported_size(100);
        let handle = file.handle().clone();
        let conn = Arc::new(MemoryConnection::new().with_file(file));

        let mut producer = producer(&conn, &handle, 0, 99);
        let out = drain(&mut producer).await;
        assert_eq!(out, data);
        // Chunks at 0 and 4 are full, the one at 8 is short and ends the stream.
        assert_eq!(conn.chunk_reads(), 3);
        assert!(producer.next_chunk().await.unwrap().is_none());
        assert_eq!(conn.chunk_reads(), 3);
    }

    #[tokio::test]
    async fn stops_on_empty_upstream_read() {
        let data: Vec<u8> = (0..8).collect();
        let file = MemoryFile::new(1, "AbCdEfGh", data.clone()).with_reported_size(40);
        let handle = file.handle().clone();
        let conn = Arc::new(MemoryConnection::new().with_file(file));

        let mut producer = producer(&conn, &handle, 0, 39);
        assert_eq!(drain(&mut producer).await, data);
        assert_eq!(conn.chunk_reads(), 3);
    }

    #[tokio::test]
    async fn lease_is_released_on_completion() {
        let tracker = Arc::new(LoadTracker::new(NonZeroUsize::new(2).unwrap()));
        let (conn, file, _) = fixture(20);

        let mut producer = producer(&conn, &file, 0, 19).with_lease(tracker.acquire());
        assert_eq!(tracker.snapshot(), vec![1, 0]);

        producer.next_chunk().await.unwrap();
        assert_eq!(tracker.snapshot(), vec![1, 0]);

        drain(&mut producer).await;
        assert_eq!(tracker.snapshot(), vec![0, 0]);
    }

    #[tokio::test]
    async fn lease_is_released_when_dropped_mid_stream() {
        let tracker = Arc::new(LoadTracker::new(NonZeroUsize::new(1).unwrap()));
        let (conn, file, _) = fixture(20);

        let mut producer = producer(&conn, &file, 0, 19).with_lease(tracker.acquire());
        producer.next_chunk().await.unwrap();
        assert_eq!(tracker.snapshot(), vec![1]);

        drop(producer);
        assert_eq!(tracker.snapshot(), vec![0]);
    }

    #[tokio::test]
    async fn upstream_error_ends_stream_and_releases_lease() {
        let tracker = Arc::new(LoadTracker::new(NonZeroUsize::new(1).unwrap()));
        let conn = Arc::new(MemoryConnection::new());
        let missing = MemoryFile::new(5, "AbCdEfGh", vec![0u8; 16]).handle().clone();

        let mut producer = producer(&conn, &missing, 0, 15).with_lease(tracker.acquire());
        assert!(matches!(
            producer.next_chunk().await,
            Err(UpstreamError::NotFound)
        ));
        assert_eq!(tracker.snapshot(), vec![0]);
        assert!(producer.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stream_adapter_concatenates_chunks() {
        let (conn, file, data) = fixture(30);
        let chunks: Vec<Bytes> = producer(&conn, &file, 1, 28)
            .into_stream()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(chunks.len(), 8);
        assert_eq!(chunks.concat(), &data[1..=28]);
    }
}
