//! Rent and return size-classed buffers from a bounded, thread-safe pool.
//!
//! A [BufferPool] lends out [Buffer]s of at least a requested length and takes them back for
//! reuse. Buffers are grouped into power-of-two size classes (16, 32, 64, ... elements), each
//! backed by a bucket holding at most a configured number of idle buffers. Requests larger than
//! the biggest size class, or arriving while the matching buckets are empty, are served by a fresh
//! allocation instead of failing.
//!
//! # Example
//!
//! ```rust
//! use commonware_pool::{BufferPool, Config};
//!
//! let pool = BufferPool::<u8>::new(Config::default()).unwrap();
//!
//! // Stage 3000 bytes (rounded up to the 4096-element size class).
//! let mut frame = pool.rent(3000);
//! assert_eq!(frame.len(), 4096);
//! frame[..3].copy_from_slice(&[1, 2, 3]);
//!
//! // Hand it back, zeroing its contents first.
//! pool.return_buffer(frame, true).unwrap();
//! ```
//!
//! # Status
//!
//! `commonware-pool` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use thiserror::Error;

mod bucket;
mod buffer;
pub use buffer::{Buffer, Lease, EMPTY_BUFFER_ID};
pub mod lock;
mod pool;
pub use pool::{
    BufferPool, Config, DEFAULT_MAX_BUFFERS_PER_BUCKET, DEFAULT_MAX_BUFFER_LENGTH,
    MAX_BUFFER_LENGTH_CEILING,
};
pub mod size_class;
pub use size_class::MIN_LENGTH as MIN_BUFFER_LENGTH;
pub mod telemetry;

/// Element types a [BufferPool] can hold.
///
/// Clearing a buffer resets every element to its [Default] value.
pub trait Element: Copy + Default + Send + 'static {}

impl<T: Copy + Default + Send + 'static> Element for T {}

/// Errors that can occur when interacting with a [BufferPool].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid config: {0} must be greater than zero")]
    InvalidConfig(&'static str),
    #[error("buffer not associated with this pool: length {length} (expected {expected})")]
    NotPooled { length: usize, expected: usize },
}
