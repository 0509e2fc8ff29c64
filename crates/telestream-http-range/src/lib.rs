//! Byte-range resolution and chunk planning for relaying remote files over HTTP.
//!
//! The upstream file source hands out data in fixed-size, chunk-aligned pieces. Serving an HTTP
//! `Range` request therefore takes two steps:
//!
//! 1. [`resolve_range`] turns the request (an explicit `Range` header, or transport-provided
//!    start/stop bounds) into an inclusive [`ByteRange`] validated against the file size.
//! 2. [`ChunkPlan::new`] converts that range into the aligned chunk fetches needed to produce it,
//!    including how much to cut from the first and last chunk.
//!
//! Everything here is pure integer arithmetic on `u64`; there is no I/O.

#![forbid(unsafe_code)]

mod plan;
mod range;

pub use plan::{ChunkPlan, DEFAULT_CHUNK_SIZE};
pub use range::{resolve_range, ByteRange, RangeError, RangeInput};
