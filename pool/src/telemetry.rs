//! Observe pool activity.
//!
//! A [BufferPool](crate::BufferPool) reports every rent, allocation, and return to an optional
//! [Sink]. Sinks are a side-channel: they never influence which buffer is handed out or whether a
//! return succeeds.
//!
//! Three sinks are provided:
//! - [TracingSink] emits structured log records through `tracing`.
//! - [MetricsSink] maintains `prometheus-client` counters in a [Registry].
//! - [Fanout] forwards each event to several sinks.

use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::sync::Arc;
use tracing::{debug, enabled, trace, Level};

/// Why a buffer was freshly allocated instead of being reused.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum AllocationReason {
    /// Allocated to populate a bucket.
    Pooled,
    /// The request exceeded the largest size class, so the buffer will never be pooled.
    OverMaximumSize,
    /// Every bucket that could serve the request was empty.
    PoolExhausted,
}

/// A single observation of pool activity.
///
/// `buffer` is the [Buffer::id](crate::Buffer::id) of the buffer involved, `size` its length in
/// elements, and `pool` the [BufferPool::id](crate::BufferPool::id) of the reporting pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// A buffer was handed to a caller.
    ///
    /// `bucket` is the index of the bucket that supplied it, or `None` if it was freshly
    /// allocated.
    Rented {
        buffer: u64,
        size: usize,
        pool: u64,
        bucket: Option<usize>,
    },
    /// A buffer was created.
    ///
    /// `bucket` is the index of the bucket the buffer was created for, or `None` if it was
    /// allocated outside of any bucket.
    Allocated {
        buffer: u64,
        size: usize,
        pool: u64,
        bucket: Option<usize>,
        reason: AllocationReason,
    },
    /// A buffer was handed back by a caller, whether or not it was retained.
    Returned { buffer: u64, size: usize, pool: u64 },
}

/// Receives [Event]s from a pool.
///
/// Implementations must be cheap and must not call back into the pool that reports to them.
pub trait Sink: Send + Sync {
    /// Returns `false` if events would be discarded.
    ///
    /// Pools check this before building an event.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Records a single event.
    fn record(&self, event: &Event);
}

/// Logs every event through `tracing`.
///
/// Allocations are logged at `DEBUG` and rents and returns at `TRACE`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl Sink for TracingSink {
    fn is_enabled(&self) -> bool {
        enabled!(Level::DEBUG)
    }

    fn record(&self, event: &Event) {
        match *event {
            Event::Rented {
                buffer,
                size,
                pool,
                bucket,
            } => trace!(buffer, size, pool, ?bucket, "rented buffer"),
            Event::Allocated {
                buffer,
                size,
                pool,
                bucket,
                reason,
            } => debug!(buffer, size, pool, ?bucket, ?reason, "allocated buffer"),
            Event::Returned { buffer, size, pool } => {
                trace!(buffer, size, pool, "returned buffer")
            }
        }
    }
}

/// Label identifying the size class a rented buffer was drawn from.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct SizeClassLabel {
    size_class: u64,
}

/// Label identifying why a buffer was allocated.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ReasonLabel {
    reason: AllocationReason,
}

/// Maintains `prometheus-client` metrics for one or more pools.
#[derive(Clone, Debug, Default)]
pub struct MetricsSink {
    /// Total number of buffers handed to callers.
    rented: Counter,
    /// Total number of rents served from a bucket, by size class.
    reused: Family<SizeClassLabel, Counter>,
    /// Total number of buffers allocated, by reason.
    allocated: Family<ReasonLabel, Counter>,
    /// Total number of elements allocated.
    allocated_elements: Counter,
    /// Total number of buffers handed back.
    returned: Counter,
    /// Rents minus returns.
    ///
    /// Pools accept foreign buffers of a canonical length, so this is a net balance rather than
    /// a count of outstanding rents and may go negative.
    balance: Gauge,
}

impl MetricsSink {
    /// Creates the metrics and registers them with `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "buffer_pool_rented",
            "Total number of buffers rented from the pool",
            metrics.rented.clone(),
        );
        registry.register(
            "buffer_pool_reused",
            "Total number of rents served by a pooled buffer",
            metrics.reused.clone(),
        );
        registry.register(
            "buffer_pool_allocated",
            "Total number of buffers allocated by the pool",
            metrics.allocated.clone(),
        );
        registry.register(
            "buffer_pool_allocated_elements",
            "Total number of elements allocated by the pool",
            metrics.allocated_elements.clone(),
        );
        registry.register(
            "buffer_pool_returned",
            "Total number of buffers returned to the pool",
            metrics.returned.clone(),
        );
        registry.register(
            "buffer_pool_balance",
            "Number of buffers rented minus number of buffers returned",
            metrics.balance.clone(),
        );
        metrics
    }

    /// Total number of buffers rented.
    pub fn rented(&self) -> u64 {
        self.rented.get()
    }

    /// Total number of buffers allocated for `reason`.
    pub fn allocated(&self, reason: AllocationReason) -> u64 {
        self.allocated.get_or_create(&ReasonLabel { reason }).get()
    }

    /// Total number of buffers returned.
    pub fn returned(&self) -> u64 {
        self.returned.get()
    }

    /// Number of buffers rented minus number of buffers returned.
    pub fn balance(&self) -> i64 {
        self.balance.get()
    }
}

impl Sink for MetricsSink {
    fn record(&self, event: &Event) {
        match *event {
            Event::Rented { size, bucket, .. } => {
                self.rented.inc();
                self.balance.inc();
                if bucket.is_some() {
                    let label = SizeClassLabel {
                        size_class: size as u64,
                    };
                    self.reused.get_or_create(&label).inc();
                }
            }
            Event::Allocated { size, reason, .. } => {
                self.allocated.get_or_create(&ReasonLabel { reason }).inc();
                self.allocated_elements.inc_by(size as u64);
            }
            Event::Returned { .. } => {
                self.returned.inc();
                self.balance.dec();
            }
        }
    }
}

/// Forwards every event to each enabled sink.
#[derive(Clone, Default)]
pub struct Fanout {
    sinks: Vec<Arc<dyn Sink>>,
}

impl Fanout {
    /// Creates an empty fanout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink.
    pub fn with(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl Sink for Fanout {
    fn is_enabled(&self) -> bool {
        self.sinks.iter().any(|sink| sink.is_enabled())
    }

    fn record(&self, event: &Event) {
        for sink in self.sinks.iter().filter(|sink| sink.is_enabled()) {
            sink.record(event);
        }
    }
}

#[cfg(test)]
pub(crate) mod mocks {
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    };

    /// Keeps every recorded event in order.
    #[derive(Default)]
    pub struct Recorder {
        events: Mutex<Vec<Event>>,
        disabled: AtomicBool,
    }

    impl Recorder {
        pub fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        pub fn clear(&self) {
            self.events.lock().unwrap().clear();
        }

        pub fn disable(&self) {
            self.disabled.store(true, Ordering::Relaxed);
        }
    }

    impl Sink for Recorder {
        fn is_enabled(&self) -> bool {
            !self.disabled.load(Ordering::Relaxed)
        }

        fn record(&self, event: &Event) {
            self.events.lock().unwrap().push(*event);
        }
    }
}
