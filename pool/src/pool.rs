//! The size-classed buffer pool.

use crate::{
    bucket::Bucket,
    buffer::{Buffer, Lease},
    size_class::{bucket_index, canonical_length, MIN_LENGTH},
    telemetry::{AllocationReason, Event, Sink},
    Element, Error,
};
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// Default largest length managed by buckets.
pub const DEFAULT_MAX_BUFFER_LENGTH: usize = 1024 * 1024;

/// Default number of idle buffers retained per bucket.
pub const DEFAULT_MAX_BUFFERS_PER_BUCKET: usize = 50;

/// Largest value [Config::max_buffer_length] is clamped to.
pub const MAX_BUFFER_LENGTH_CEILING: usize = 1024 * 1024 * 1024;

/// Next identifier handed out to a pool.
static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Configuration for a [BufferPool].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Largest request served from a bucket. Larger requests bypass the pool.
    ///
    /// Clamped into `[MIN_BUFFER_LENGTH, MAX_BUFFER_LENGTH_CEILING]`. The largest size class is
    /// the smallest one that fits this length, so it may exceed it when the length is not a
    /// power of two.
    pub max_buffer_length: usize,
    /// Maximum number of idle buffers retained per size class.
    pub max_buffers_per_bucket: usize,
    /// Whether to fill every bucket to capacity when the pool is created.
    pub prefill: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_buffer_length: DEFAULT_MAX_BUFFER_LENGTH,
            max_buffers_per_bucket: DEFAULT_MAX_BUFFERS_PER_BUCKET,
            prefill: false,
        }
    }
}

impl Config {
    /// Preset for staging decoded camera frames: up to 4000x3000 elements per buffer,
    /// 50 idle buffers per size class, not prefilled.
    pub const fn for_frames() -> Self {
        Self {
            max_buffer_length: 4000 * 3000,
            max_buffers_per_bucket: DEFAULT_MAX_BUFFERS_PER_BUCKET,
            prefill: false,
        }
    }

    /// Checks that all parameters are positive and clamps `max_buffer_length`.
    fn normalize(self) -> Result<Self, Error> {
        if self.max_buffer_length == 0 {
            return Err(Error::InvalidConfig("max_buffer_length"));
        }
        if self.max_buffers_per_bucket == 0 {
            return Err(Error::InvalidConfig("max_buffers_per_bucket"));
        }
        Ok(Self {
            max_buffer_length: self
                .max_buffer_length
                .clamp(MIN_LENGTH, MAX_BUFFER_LENGTH_CEILING),
            ..self
        })
    }

    /// Number of size classes needed to cover `max_buffer_length`.
    fn num_buckets(&self) -> usize {
        bucket_index(self.max_buffer_length) + 1
    }
}

/// Internal state of the buffer pool.
struct Inner<T> {
    id: u64,
    config: Config,
    buckets: Box<[Bucket<T>]>,
    sink: Option<Arc<dyn Sink>>,
}

/// A pool of reusable buffers, shared across threads.
///
/// Buckets are organized into power-of-two size classes starting at
/// [MIN_BUFFER_LENGTH](crate::MIN_BUFFER_LENGTH). [Self::rent] serves a request from the smallest
/// class that fits it, or from the next larger class if that one is empty, and otherwise falls
/// back to a fresh allocation. It never fails.
///
/// Buffers are only pooled again if explicitly handed back with [Self::return_buffer] (or by
/// dropping a [Lease]). Buffers that are never returned are simply deallocated.
///
/// Cloning a pool is cheap and yields a handle to the same buckets.
pub struct BufferPool<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BufferPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for BufferPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .field("num_buckets", &self.inner.buckets.len())
            .finish()
    }
}

impl<T: Element> Default for BufferPool<T> {
    fn default() -> Self {
        Self::build(Config::default(), None)
    }
}

impl<T: Element> BufferPool<T> {
    /// Creates a new buffer pool without instrumentation.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidConfig] if a parameter is zero.
    pub fn new(config: Config) -> Result<Self, Error> {
        Ok(Self::build(config.normalize()?, None))
    }

    /// Creates a new buffer pool that reports its activity to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidConfig] if a parameter is zero.
    pub fn with_sink(config: Config, sink: Arc<dyn Sink>) -> Result<Self, Error> {
        Ok(Self::build(config.normalize()?, Some(sink)))
    }

    fn build(config: Config, sink: Option<Arc<dyn Sink>>) -> Self {
        let buckets = (0..config.num_buckets())
            .map(|index| {
                Bucket::new(
                    index,
                    canonical_length(index),
                    config.max_buffers_per_bucket,
                )
            })
            .collect();
        let pool = Self {
            inner: Arc::new(Inner {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                config,
                buckets,
                sink,
            }),
        };
        if config.prefill {
            pool.prefill();
        }
        pool
    }

    /// Fills every bucket to capacity.
    fn prefill(&self) {
        let sink = self.sink();
        for bucket in self.inner.buckets.iter() {
            for _ in 0..bucket.capacity() {
                let buffer = Buffer::allocate(bucket.canonical_length());
                if let Some(sink) = sink {
                    sink.record(&Event::Allocated {
                        buffer: buffer.id(),
                        size: buffer.len(),
                        pool: self.inner.id,
                        bucket: Some(bucket.index()),
                        reason: AllocationReason::Pooled,
                    });
                }
                if bucket.give(buffer).is_err() {
                    break;
                }
            }
        }
    }

    /// Returns the sink, if one is attached and enabled.
    #[inline]
    fn sink(&self) -> Option<&dyn Sink> {
        self.inner.sink.as_deref().filter(|sink| sink.is_enabled())
    }

    /// Rents a buffer of at least `min_length` elements.
    ///
    /// - `min_length == 0` returns the shared empty buffer.
    /// - Otherwise the bucket for `min_length` is checked, then the next larger one. If both are
    ///   empty a new buffer of the bucket's canonical length is allocated, so it can be pooled
    ///   once returned.
    /// - Requests beyond the largest size class are allocated at exactly `min_length` and are
    ///   never pooled.
    ///
    /// The contents of a reused buffer are whatever its previous renter left in it, unless it
    /// was returned with `clear`.
    pub fn rent(&self, min_length: usize) -> Buffer<T> {
        if min_length == 0 {
            return Buffer::empty();
        }

        let inner = &*self.inner;
        let sink = self.sink();
        let index = bucket_index(min_length);
        let (buffer, reason) = if index < inner.buckets.len() {
            // Probe exactly two buckets to bound latency.
            let end = (index + 2).min(inner.buckets.len());
            for bucket in &inner.buckets[index..end] {
                if let Some(buffer) = bucket.take() {
                    if let Some(sink) = sink {
                        sink.record(&Event::Rented {
                            buffer: buffer.id(),
                            size: buffer.len(),
                            pool: inner.id,
                            bucket: Some(bucket.index()),
                        });
                    }
                    return buffer;
                }
            }
            (
                Buffer::allocate(canonical_length(index)),
                AllocationReason::PoolExhausted,
            )
        } else {
            (
                Buffer::allocate(min_length),
                AllocationReason::OverMaximumSize,
            )
        };

        if let Some(sink) = sink {
            sink.record(&Event::Rented {
                buffer: buffer.id(),
                size: buffer.len(),
                pool: inner.id,
                bucket: None,
            });
            sink.record(&Event::Allocated {
                buffer: buffer.id(),
                size: buffer.len(),
                pool: inner.id,
                bucket: (reason == AllocationReason::PoolExhausted).then_some(index),
                reason,
            });
        }
        buffer
    }

    /// Rents a buffer of at least `min_length` elements that is returned when dropped.
    pub fn lease(&self, min_length: usize) -> Lease<'_, T> {
        Lease::new(self, self.rent(min_length))
    }

    /// Hands `buffer` back to the pool, zeroing its contents first if `clear` is set.
    ///
    /// Zero-length buffers are ignored. Buffers longer than the largest size class are
    /// dropped, as are buffers returned to a bucket that is already full.
    ///
    /// # Errors
    ///
    /// Returns [Error::NotPooled] (and drops `buffer`) if its length falls within the pool's size
    /// classes but is not a canonical length.
    pub fn return_buffer(&self, mut buffer: Buffer<T>, clear: bool) -> Result<(), Error> {
        if buffer.is_empty() {
            return Ok(());
        }

        let inner = &*self.inner;
        let (id, length) = (buffer.id(), buffer.len());
        if let Some(bucket) = inner.buckets.get(bucket_index(length)) {
            if length != bucket.canonical_length() {
                return Err(Error::NotPooled {
                    length,
                    expected: bucket.canonical_length(),
                });
            }
            if clear {
                buffer.clear();
            }

            // A full bucket hands the buffer back and it is dropped here, outside of the lock.
            let _ = bucket.give(buffer);
        }

        if let Some(sink) = self.sink() {
            sink.record(&Event::Returned {
                buffer: id,
                size: length,
                pool: inner.id,
            });
        }
        Ok(())
    }

    /// Returns the identifier reported to sinks.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns the pool configuration, with `max_buffer_length` clamped.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns the number of size classes.
    pub fn num_buckets(&self) -> usize {
        self.inner.buckets.len()
    }

    /// Returns the canonical length of the largest size class.
    pub fn max_pooled_length(&self) -> usize {
        canonical_length(self.inner.buckets.len() - 1)
    }

    /// Returns the number of idle buffers in bucket `index`, or `None` if there is no such bucket.
    pub fn available(&self, index: usize) -> Option<usize> {
        self.inner.buckets.get(index).map(Bucket::len)
    }

    /// Returns the number of idle buffers across all buckets.
    pub fn available_total(&self) -> usize {
        self.inner.buckets.iter().map(Bucket::len).sum()
    }
}
