//! A bounded stack of buffers sharing one size class.

use crate::{
    buffer::Buffer,
    lock::{BucketLock, Lock},
};

/// Slot array guarded by a bucket's lock.
///
/// Slots `0..top` are occupied and slots `top..` are empty.
struct Slots<T> {
    buffers: Box<[Option<Buffer<T>>]>,
    top: usize,
}

/// Stores up to a fixed number of buffers of exactly [Bucket::canonical_length] elements.
///
/// Buffers are taken from and given back to the top of the stack, so the most recently returned
/// buffer is the next one rented. While a buffer sits in a slot the bucket owns it; once taken the
/// bucket keeps no reference to it.
pub(crate) struct Bucket<T> {
    index: usize,
    canonical_length: usize,
    capacity: usize,
    slots: BucketLock<Slots<T>>,
}

impl<T: Send> Bucket<T> {
    /// Creates an empty bucket with room for `capacity` buffers.
    pub fn new(index: usize, canonical_length: usize, capacity: usize) -> Self {
        let buffers = (0..capacity).map(|_| None).collect();
        Self {
            index,
            canonical_length,
            capacity,
            slots: BucketLock::new(Slots { buffers, top: 0 }),
        }
    }

    /// Position of this bucket in its pool.
    #[inline]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Length of every buffer this bucket stores.
    #[inline]
    pub const fn canonical_length(&self) -> usize {
        self.canonical_length
    }

    /// Removes the most recently given buffer, if any.
    pub fn take(&self) -> Option<Buffer<T>> {
        self.slots.with(|slots| {
            if slots.top == 0 {
                return None;
            }
            slots.top -= 1;
            let top = slots.top;
            slots.buffers[top].take()
        })
    }

    /// Stores `buffer` on top of the stack.
    ///
    /// Returns the buffer back if every slot is occupied. The caller is expected to drop it.
    ///
    /// # Panics
    ///
    /// Panics if `buffer` is not [Self::canonical_length] elements long.
    pub fn give(&self, buffer: Buffer<T>) -> Result<(), Buffer<T>> {
        assert_eq!(
            buffer.len(),
            self.canonical_length,
            "buffer length does not match bucket {}",
            self.index
        );
        self.slots.with(|slots| {
            if slots.top == self.capacity {
                return Err(buffer);
            }
            let top = slots.top;
            slots.buffers[top] = Some(buffer);
            slots.top += 1;
            Ok(())
        })
    }

    /// Number of buffers currently stored.
    pub fn len(&self) -> usize {
        self.slots.with(|slots| slots.top)
    }

    /// Maximum number of buffers this bucket stores.
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size_class::canonical_length;

    fn bucket(index: usize, capacity: usize) -> Bucket<u8> {
        Bucket::new(index, canonical_length(index), capacity)
    }

    #[test]
    fn test_take_empty() {
        let bucket = bucket(0, 2);
        assert!(bucket.take().is_none());
        assert_eq!(bucket.len(), 0);
        assert_eq!(bucket.capacity(), 2);
    }

    #[test]
    fn test_lifo() {
        let bucket = bucket(1, 4);
        let first = Buffer::<u8>::allocate(32);
        let second = Buffer::<u8>::allocate(32);
        let (first_id, second_id) = (first.id(), second.id());

        bucket.give(first).unwrap();
        bucket.give(second).unwrap();
        assert_eq!(bucket.len(), 2);

        assert_eq!(bucket.take().unwrap().id(), second_id);
        assert_eq!(bucket.take().unwrap().id(), first_id);
        assert!(bucket.take().is_none());
    }

    #[test]
    fn test_give_full() {
        let bucket = bucket(0, 1);
        bucket.give(Buffer::allocate(16)).unwrap();

        let extra = Buffer::allocate(16);
        let extra_id = extra.id();
        let rejected = bucket.give(extra).unwrap_err();
        assert_eq!(rejected.id(), extra_id);
        assert_eq!(bucket.len(), 1);
    }

    #[test]
    #[should_panic(expected = "buffer length does not match bucket 2")]
    fn test_give_wrong_length() {
        let bucket = bucket(2, 1);
        let _ = bucket.give(Buffer::allocate(63));
    }

    #[test]
    fn test_capacity_matches_slots() {
        let bucket = bucket(3, 5);
        assert_eq!(bucket.capacity(), 5);
        bucket.slots.with(|slots| {
            // Capacity is readable while the slots are held.
            assert_eq!(bucket.capacity(), slots.buffers.len());
        });

        for _ in 0..5 {
            bucket.give(Buffer::allocate(128)).unwrap();
        }
        assert!(bucket.give(Buffer::allocate(128)).is_err());
        assert_eq!(bucket.capacity(), 5);
        assert_eq!(bucket.len(), 5);
    }

    #[test]
    fn test_slot_cleared_on_take() {
        let bucket = bucket(0, 1);
        bucket.give(Buffer::allocate(16)).unwrap();
        let _taken = bucket.take().unwrap();
        bucket.slots.with(|slots| {
            assert_eq!(slots.top, 0);
            assert!(slots.buffers.iter().all(Option::is_none));
        });
    }
}
