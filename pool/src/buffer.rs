//! Owned buffer handles.

use crate::{pool::BufferPool, Element};
use std::{
    fmt,
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU64, Ordering},
};

/// Identifier shared by every zero-length buffer.
pub const EMPTY_BUFFER_ID: u64 = 0;

/// Next identifier handed out to a non-empty buffer.
static NEXT_ID: AtomicU64 = AtomicU64::new(EMPTY_BUFFER_ID + 1);

/// A fixed-length block of elements with exactly one owner.
///
/// A [Buffer] is either held by a pool bucket or by the caller that rented it. It cannot be
/// cloned, and [BufferPool::return_buffer] consumes it, so a buffer can be neither returned twice
/// nor used after it has been returned.
///
/// Every non-empty buffer carries a process-unique [id](Self::id) that is reported to
/// instrumentation sinks.
pub struct Buffer<T> {
    id: u64,
    data: Box<[T]>,
}

impl<T> Buffer<T> {
    /// Returns the shared zero-length buffer.
    ///
    /// Empty boxed slices never allocate, so every instance refers to the same dangling
    /// allocation and they are all interchangeable.
    pub fn empty() -> Self {
        Self {
            id: EMPTY_BUFFER_ID,
            data: Box::default(),
        }
    }

    /// Returns the identifier of this buffer.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the number of elements in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the buffer holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Releases the underlying storage.
    ///
    /// The storage is no longer associated with any pool.
    pub fn into_inner(self) -> Box<[T]> {
        self.data
    }
}

impl<T: Element> Buffer<T> {
    /// Allocates a new buffer of `len` default-initialized elements.
    pub(crate) fn allocate(len: usize) -> Self {
        if len == 0 {
            return Self::empty();
        }
        Self::from(vec![T::default(); len].into_boxed_slice())
    }

    /// Resets every element to its default value.
    pub fn clear(&mut self) {
        self.data.fill(T::default());
    }
}

impl<T> From<Box<[T]>> for Buffer<T> {
    fn from(data: Box<[T]>) -> Self {
        if data.is_empty() {
            return Self::empty();
        }
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            data,
        }
    }
}

impl<T> From<Vec<T>> for Buffer<T> {
    fn from(data: Vec<T>) -> Self {
        Self::from(data.into_boxed_slice())
    }
}

impl<T> Deref for Buffer<T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T> DerefMut for Buffer<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T> AsRef<[T]> for Buffer<T> {
    fn as_ref(&self) -> &[T] {
        &self.data
    }
}

impl<T> AsMut<[T]> for Buffer<T> {
    fn as_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T> fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .finish()
    }
}

/// A rented [Buffer] that is returned to its pool when dropped.
///
/// The buffer is returned without clearing. Use [Lease::detach] to keep the buffer instead.
///
/// A lease only exposes the buffer's elements, so the buffer it returns is always the one it
/// rented.
pub struct Lease<'a, T: Element> {
    pool: &'a BufferPool<T>,
    buffer: ManuallyDrop<Buffer<T>>,
}

impl<'a, T: Element> Lease<'a, T> {
    pub(crate) fn new(pool: &'a BufferPool<T>, buffer: Buffer<T>) -> Self {
        Self {
            pool,
            buffer: ManuallyDrop::new(buffer),
        }
    }

    /// Identifier of the leased buffer.
    #[inline]
    pub fn id(&self) -> u64 {
        self.buffer.id()
    }

    /// Takes the buffer out of the lease without returning it to the pool.
    pub fn detach(self) -> Buffer<T> {
        let mut me = ManuallyDrop::new(self);
        // SAFETY: me is wrapped in ManuallyDrop so its Drop impl won't run and the
        // buffer is taken exactly once.
        unsafe { ManuallyDrop::take(&mut me.buffer) }
    }
}

impl<T: Element> Deref for Lease<'_, T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &[T] {
        &self.buffer
    }
}

impl<T: Element> DerefMut for Lease<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.buffer
    }
}

impl<T: Element> fmt::Debug for Lease<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Lease").field(&*self.buffer).finish()
    }
}

impl<T: Element> Drop for Lease<'_, T> {
    fn drop(&mut self) {
        // SAFETY: drop runs at most once and the buffer is not used afterwards.
        let buffer = unsafe { ManuallyDrop::take(&mut self.buffer) };

        let result = self.pool.return_buffer(buffer, false);
        debug_assert!(result.is_ok(), "leased buffer rejected by its pool: {result:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    #[test]
    fn test_ids_are_unique() {
        let a = Buffer::<u8>::allocate(16);
        let b = Buffer::<u8>::allocate(16);
        assert_ne!(a.id(), b.id());
        assert_ne!(a.id(), EMPTY_BUFFER_ID);
        assert_ne!(b.id(), EMPTY_BUFFER_ID);
    }

    #[test]
    fn test_empty() {
        let a = Buffer::<u32>::empty();
        let b = Buffer::<u32>::allocate(0);
        let c = Buffer::from(Vec::<u32>::new());
        for buffer in [a, b, c] {
            assert!(buffer.is_empty());
            assert_eq!(buffer.len(), 0);
            assert_eq!(buffer.id(), EMPTY_BUFFER_ID);
        }
    }

    #[test]
    fn test_clear() {
        let mut buffer = Buffer::<u16>::allocate(32);
        assert!(buffer.iter().all(|&x| x == 0));
        buffer.iter_mut().for_each(|x| *x = 0xBEEF);
        assert!(buffer.iter().all(|&x| x == 0xBEEF));
        buffer.clear();
        assert!(buffer.iter().all(|&x| x == 0));
    }

    #[test]
    fn test_lease_returns_rented_buffer() {
        let pool = BufferPool::<u8>::new(Config {
            max_buffer_length: 64,
            max_buffers_per_bucket: 1,
            prefill: false,
        })
        .unwrap();

        let id = {
            let mut lease = pool.lease(20);
            assert_eq!(lease.len(), 32);
            lease.fill(7);
            lease.id()
        };
        assert_eq!(pool.available(1), Some(1));

        let buffer = pool.rent(20);
        assert_eq!(buffer.id(), id);
        assert!(buffer.iter().all(|&x| x == 7));
    }

    #[test]
    fn test_lease_oversized() {
        let pool = BufferPool::<u8>::new(Config {
            max_buffer_length: 64,
            max_buffers_per_bucket: 1,
            prefill: false,
        })
        .unwrap();

        // Oversized leases are discarded on drop without tripping the return check.
        let lease = pool.lease(100);
        assert_eq!(lease.len(), 100);
        drop(lease);
        assert_eq!(pool.available_total(), 0);

        // Zero-length leases are ignored.
        drop(pool.lease(0));
        assert_eq!(pool.available_total(), 0);
    }

    #[test]
    fn test_foreign_buffer() {
        let buffer = Buffer::from(vec![1u8, 2, 3]);
        assert_eq!(&*buffer, &[1, 2, 3]);
        assert_eq!(buffer.into_inner().len(), 3);
    }
}
