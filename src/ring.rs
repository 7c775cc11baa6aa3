//! Bounded lock-free MPMC ring (Vyukov-style sequence arbitration).
//!
//! # Design
//!
//! Based on Dmitry Vyukov's bounded MPMC queue, the canonical design behind
//! crossbeam's `ArrayQueue` and countless runtime ingress queues. Each slot
//! carries its own sequence counter; producers and consumers arbitrate
//! through the slot sequence, not through the shared indices, so a stalled
//! peer can delay at most the one slot it has claimed.
//!
//! # Key properties
//!
//! - **Lock-free MPMC**: any number of producers and consumers; under
//!   contention at least one operation completes.
//! - **Globally FIFO**: values pop in the order their slots were claimed,
//!   across all producers and consumers.
//! - **Fixed capacity**: power-of-two, rounded up from the requested
//!   minimum at construction, never resized.
//! - **Cache-line padded indices**: `write` and `read` live on separate
//!   cache lines to keep producer and consumer traffic from false sharing.
//! - **Full/Empty are outcomes**: a full push hands the value back
//!   (`Err(value)`), an empty pop returns `None`; neither is a failure.
//!
//! # Ordering rationale
//!
//! ```text
//! writer: claim slot (CAS write, Relaxed) → write value → store seq = pos + 1 (Release)
//! reader: load seq (Acquire), seq == pos + 1 → read value → store seq = pos + cap (Release)
//! ```
//!
//! The Release store of a slot's sequence publishes the value written before
//! it; the Acquire load on the other side makes that value visible before
//! the slot is touched. The index compare-exchanges can stay Relaxed on both
//! success and failure because no data is published through the indices;
//! correctness flows entirely through the per-slot sequence. The sequence
//! orderings themselves must never be weakened.
//!
//! # Safety
//!
//! Slot storage is `UnsafeCell<MaybeUninit<T>>`. A slot is written only by
//! the producer that claimed its position and read only by the consumer
//! whose position it matches; the sequence protocol makes those accesses
//! mutually exclusive. Invariants are documented per operation.

#[cfg(not(loom))]
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(loom)]
use loom::sync::atomic::{AtomicUsize, Ordering};

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

use crossbeam_utils::CachePadded;

/// Largest accepted minimum capacity; leaves headroom so the power-of-two
/// round-up and the wrapping index arithmetic cannot overflow.
const MAX_MIN_CAPACITY: usize = usize::MAX / 4;

/// One ring slot: a sequence counter plus value storage.
///
/// The sequence encodes the slot's lifecycle relative to a position `pos`
/// mapping onto it:
/// - `seq == pos`: writable by the producer claiming `pos`.
/// - `seq == pos + 1`: readable by the consumer claiming `pos`.
/// - `seq == pos + capacity`: writable again, one generation later.
struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded lock-free MPMC FIFO.
///
/// Shared by reference (`push`/`pop` take `&self`); wrap it in an `Arc` to
/// share across threads. Destruction must be non-concurrent: quiesce all
/// producers and consumers first, then drop. Undrained values are dropped
/// with the ring.
pub struct Ring<T> {
    buffer: Box<[Slot<T>]>,
    /// `capacity - 1`; capacity is a power of two.
    mask: usize,
    /// Next position to claim for writing. Monotone, wraps modulo `2^word`.
    write: CachePadded<AtomicUsize>,
    /// Next position to claim for reading. Monotone, wraps modulo `2^word`.
    read: CachePadded<AtomicUsize>,
}

// SAFETY: The sequence protocol hands each value from exactly one producer
// to exactly one consumer; slots are never accessed concurrently for the
// same position. Values are moved, never shared, so `T: Send` suffices.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    /// Construct a ring whose capacity is the next power of two
    /// `>= max(2, min_capacity)`.
    ///
    /// # Panics
    ///
    /// Panics if `min_capacity` exceeds `usize::MAX / 4`.
    pub fn new(min_capacity: usize) -> Self {
        assert!(
            min_capacity <= MAX_MIN_CAPACITY,
            "ring capacity overflows the index space"
        );
        let capacity = min_capacity.max(2).next_power_of_two();

        let mut buffer = Vec::with_capacity(capacity);
        for seq in 0..capacity {
            buffer.push(Slot {
                sequence: AtomicUsize::new(seq),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            });
        }

        Self {
            buffer: buffer.into_boxed_slice(),
            mask: capacity - 1,
            write: CachePadded::new(AtomicUsize::new(0)),
            read: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Fixed capacity of the ring.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Attempt to publish `value`.
    ///
    /// Returns `Err(value)` when no writable slot is available, keeping
    /// ownership with the caller. The ring is left unchanged on `Err`.
    pub fn push(&self, value: T) -> Result<(), T> {
        let mut pos = self.write.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let dif = seq.wrapping_sub(pos) as isize;

            if dif == 0 {
                // Slot is writable for this position; claim it by advancing
                // the write index.
                match self.write.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: The claim above makes this producer the
                        // only accessor of the slot until the sequence store
                        // below publishes it to the matching consumer.
                        unsafe { (*slot.value.get()).write(value) };
                        slot.sequence
                            .store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if dif < 0 {
                // Sequence is a full lap behind: the consumer of the
                // previous generation has not freed the slot.
                return Err(value);
            } else {
                // Another producer claimed this position; reload and retry.
                pos = self.write.load(Ordering::Relaxed);
            }
        }
    }

    /// Attempt to consume the oldest value. Returns `None` when the ring is
    /// empty.
    pub fn pop(&self) -> Option<T> {
        let mut pos = self.read.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let dif = seq.wrapping_sub(pos.wrapping_add(1)) as isize;

            if dif == 0 {
                match self.read.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: The claim above makes this consumer the
                        // only accessor; the Acquire load of the sequence
                        // made the producer's write visible.
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        // Mark the slot writable one generation later.
                        slot.sequence
                            .store(pos.wrapping_add(self.mask).wrapping_add(1), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if dif < 0 {
                // No producer has published this position yet.
                return None;
            } else {
                pos = self.read.load(Ordering::Relaxed);
            }
        }
    }

    /// Advisory element count: wrapping `write - read`.
    ///
    /// Racy by nature; use it for diagnostics and heuristics, never for
    /// synchronization.
    #[inline]
    pub fn approx_len(&self) -> usize {
        let write = self.write.load(Ordering::Relaxed);
        let read = self.read.load(Ordering::Relaxed);
        write.wrapping_sub(read)
    }

    /// Advisory emptiness check; same caveats as [`Ring::approx_len`].
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.approx_len() == 0
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        // Destruction is non-concurrent, so [read, write) is exactly the set
        // of published, unconsumed positions.
        let mut pos = self.read.load(Ordering::Relaxed);
        let write = self.write.load(Ordering::Relaxed);
        while pos != write {
            let slot = &self.buffer[pos & self.mask];
            // SAFETY: Slots in [read, write) hold initialized values.
            unsafe { (*slot.value.get()).assume_init_drop() };
            pos = pos.wrapping_add(1);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================


// ============================================================================
// Property Tests
// ============================================================================


// ============================================================================
// Loom Tests
// ============================================================================
