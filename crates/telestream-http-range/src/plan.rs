use std::ops::Range;

use crate::range::ByteRange;

/// Size of one upstream fetch (1 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Chunk-aligned fetch schedule for one [`ByteRange`].
///
/// Fetching `chunk_count` chunks of `chunk_size` bytes starting at `aligned_offset`, dropping
/// `first_chunk_trim` bytes from the front of the first chunk and keeping only `last_chunk_trim`
/// bytes of the last one, yields exactly `requested_length` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunk_size: u64,
    /// Largest multiple of `chunk_size` not exceeding the range start.
    pub aligned_offset: u64,
    /// Bytes to skip at the start of the first chunk.
    pub first_chunk_trim: u64,
    /// Bytes to keep at the start of the last chunk.
    pub last_chunk_trim: u64,
    pub chunk_count: u64,
    /// `end - start + 1`; the `Content-Length` of the response.
    pub requested_length: u64,
}

impl ChunkPlan {
    /// # Panics
    ///
    /// Panics if `chunk_size` is zero.
    pub fn new(range: ByteRange, chunk_size: u64) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        let (start, end) = (range.start(), range.end());

        let aligned_offset = start - start % chunk_size;
        // Index of the chunk holding the last byte, minus the index of the first chunk, plus one.
        // `ceil(end / chunk_size)` would undercount by one whenever `end` is itself aligned.
        let chunk_count = end / chunk_size - aligned_offset / chunk_size + 1;

        Self {
            chunk_size,
            aligned_offset,
            first_chunk_trim: start - aligned_offset,
            last_chunk_trim: end % chunk_size + 1,
            chunk_count,
            requested_length: range.len(),
        }
    }

    /// Upstream offset of the chunk at `index` (zero-based).
    pub fn chunk_offset(&self, index: u64) -> u64 {
        self.aligned_offset + index * self.chunk_size
    }

    /// Upstream offsets of every planned chunk, in fetch order.
    pub fn chunk_offsets(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.chunk_count).map(|index| self.chunk_offset(index))
    }

    pub fn is_last(&self, index: u64) -> bool {
        index + 1 == self.chunk_count
    }

    /// Slice of the chunk at `index` that belongs in the response.
    ///
    /// A single-chunk plan is cut on both sides; otherwise the first chunk loses its front, the
    /// last chunk its tail, and middle chunks pass through. Bounds are clamped to `chunk_len` so
    /// a short upstream read never produces an out-of-range slice.
    pub fn trim_bounds(&self, index: u64, chunk_len: usize) -> Range<usize> {
        let clamp = |n: u64| usize::try_from(n).map_or(chunk_len, |n| n.min(chunk_len));

        let start = if index == 0 {
            clamp(self.first_chunk_trim)
        } else {
            0
        };
        let end = if self.is_last(index) {
            clamp(self.last_chunk_trim)
        } else {
            chunk_len
        };

        start.min(end)..end
    }
}
