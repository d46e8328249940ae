//! Bounded single-producer/single-consumer exchange buffer.
//!
//! The producer never waits: when every slot holds an unread item, the oldest
//! one is evicted and counted as a drop. The consumer never waits either, and
//! `pop` returns `None` when nothing is ready.
//!
//! Positions are unbounded counters and the slot for position `p` is
//! `p & mask`. Every slot carries a stamp that encodes ownership:
//!
//! - `stamp == p`: the slot is free and the producer may write position `p`.
//! - `stamp == p + 1`: the value for position `p` is published.
//!
//! The consumer hands a slot back by storing `p + capacity`. Eviction and
//! consumption both claim the tail position with a compare-exchange, so an
//! item is either delivered or counted as dropped, never both.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Default number of slots between the capture pump and the aggregator.
pub const DEFAULT_CAPACITY: usize = 8192;

/// Errors raised while constructing an exchange buffer.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("capacity must be a power of two of at least 2, got {0}")]
    InvalidCapacity(usize),
}

struct Slot<T> {
    stamp: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

struct Shared<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    /// Next position the producer writes. Only the producer stores it.
    head: AtomicUsize,
    /// Oldest unread position. Advanced by pops and by evictions.
    tail: AtomicUsize,
    drops: AtomicU64,
}

// Safety: slot access is serialized through the stamp protocol described in
// the module docs; values only move between threads, so `T: Send` suffices.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn len(&self) -> usize {
        // Tail first: head only grows, so the difference never underflows.
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.wrapping_sub(tail).min(self.capacity())
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        let mut pos = *self.tail.get_mut();

        while pos != head {
            let slot = &mut self.slots[pos & self.mask];
            if *slot.stamp.get_mut() == pos.wrapping_add(1) {
                // Safety: a published stamp means the slot holds an initialized value
                // and no handle is left to race with us.
                unsafe { slot.value.get_mut().assume_init_drop() };
            }
            pos = pos.wrapping_add(1);
        }
    }
}

/// Creates an exchange buffer with `capacity` slots.
///
/// Returns the single producer and single consumer handles. Neither is
/// `Clone`, which is what keeps the buffer single-producer/single-consumer.
pub fn bounded<T: Send>(capacity: usize) -> Result<(Producer<T>, Consumer<T>), ExchangeError> {
    // With one slot a published stamp equals the next free stamp.
    if capacity < 2 || !capacity.is_power_of_two() {
        return Err(ExchangeError::InvalidCapacity(capacity));
    }

    let slots = (0..capacity)
        .map(|i| Slot {
            stamp: AtomicUsize::new(i),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        })
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let shared = Arc::new(Shared {
        slots,
        mask: capacity - 1,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
        drops: AtomicU64::new(0),
    });

    Ok((
        Producer {
            shared: Arc::clone(&shared),
        },
        Consumer { shared },
    ))
}

/// Writing half of the exchange buffer.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Producer<T> {
    /// Appends an item, evicting the oldest unread item if the buffer is full.
    pub fn push(&mut self, item: T) {
        let shared = &*self.shared;
        let capacity = shared.capacity();
        let head = shared.head.load(Ordering::Relaxed);
        let slot = &shared.slots[head & shared.mask];

        loop {
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == head {
                // Safety: the stamp says the slot is free for this position and only
                // the producer ever writes free slots.
                unsafe { (*slot.value.get()).write(item) };
                slot.stamp.store(head.wrapping_add(1), Ordering::Release);
                shared.head.store(head.wrapping_add(1), Ordering::Release);
                return;
            }

            // Full: the slot still holds position `head - capacity`, which is
            // the tail unless the consumer has already claimed it.
            let oldest = head.wrapping_sub(capacity);
            if shared
                .tail
                .compare_exchange(
                    oldest,
                    oldest.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                // Safety: winning the claim on `oldest` grants exclusive access to
                // its slot, whose stamp marks an initialized value.
                unsafe {
                    let value = &mut *slot.value.get();
                    value.assume_init_drop();
                    value.write(item);
                }
                shared.drops.fetch_add(1, Ordering::Relaxed);
                slot.stamp.store(head.wrapping_add(1), Ordering::Release);
                shared.head.store(head.wrapping_add(1), Ordering::Release);
                return;
            }

            // The consumer is mid-read on this slot and releases it right after.
            std::hint::spin_loop();
        }
    }

    /// Returns a read-only view for health reporting.
    pub fn monitor(&self) -> BufferMonitor<T> {
        BufferMonitor {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Reading half of the exchange buffer.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Consumer<T> {
    /// Removes and returns the oldest item, or `None` if nothing is ready.
    pub fn pop(&mut self) -> Option<T> {
        let shared = &*self.shared;
        let capacity = shared.capacity();

        loop {
            let tail = shared.tail.load(Ordering::Acquire);
            let slot = &shared.slots[tail & shared.mask];
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == tail.wrapping_add(1) {
                if shared
                    .tail
                    .compare_exchange(
                        tail,
                        tail.wrapping_add(1),
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    // Safety: the claim on `tail` succeeded and the acquire load of
                    // the stamp observed the producer's completed write.
                    let item = unsafe { (*slot.value.get()).assume_init_read() };
                    slot.stamp
                        .store(tail.wrapping_add(capacity), Ordering::Release);
                    return Some(item);
                }
                // Evicted by the producer, retry at the new tail.
                continue;
            }

            if shared.tail.load(Ordering::Acquire) == tail {
                return None;
            }
        }
    }

    /// Number of unread items.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    /// Whether no item is ready.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a read-only view for health reporting.
    pub fn monitor(&self) -> BufferMonitor<T> {
        BufferMonitor {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Read-only, cloneable view of buffer occupancy and drops.
pub struct BufferMonitor<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BufferMonitor<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> BufferMonitor<T> {
    /// Total items evicted because the buffer was full.
    pub fn drops(&self) -> u64 {
        self.shared.drops.load(Ordering::Relaxed)
    }

    /// Number of unread items.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    /// Whether no item is unread.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot count.
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Unread items over capacity, in `[0, 1]`.
    pub fn fill_ratio(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32
    }
}
