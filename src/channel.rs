//! Async-aware MPMC channel over three lock-free rings.
//!
//! # Design
//!
//! A [`BlockingChannel`] composes an item ring with two pending-waiter rings
//! (one per side) and a one-way `running` flag. The non-blocking operations
//! (`push_nowait`/`pop_nowait`) are thin wrappers over the item ring that
//! release one opposite-side waiter on success. The blocking operations park
//! the calling task by publishing a [`Waiter`] record into the appropriate
//! pending ring and suspending through the task's own scheduler.
//!
//! # Park/release protocol
//!
//! Parking publishes the waiter record *before* suspending; the pending
//! ring's Release store of its slot sequence makes the record visible to any
//! release that follows. Two re-checks close the classic wakeup races:
//!
//! - `running` is re-tested after the record is published and before the
//!   suspend, so a shutdown that drained the pending rings concurrently can
//!   never strand the task (it exits without suspending).
//! - the non-blocking operation is re-tested after the record is published,
//!   so a peer that created room (or an item) between the failed attempt
//!   and the publish (finding the pending ring still empty) cannot
//!   strand the task either. When that re-test succeeds the task retracts
//!   its own record so no release is later absorbed by a record with no
//!   sleeper behind it.
//!
//! Spurious wakeups are tolerated everywhere: a released task always
//! re-tests the non-blocking operation and re-parks if it still cannot
//! proceed.
//!
//! # Ordering rationale
//!
//! The re-checks are store-then-load on *different* locations on both sides
//! (parker: publish record, then load flag/items; releaser: store flag/free
//! a slot, then load the pending ring), which plain Release/Acquire lets
//! both sides miss simultaneously: a store-load reordering strands the
//! parker. Each side therefore places a SeqCst fence between its store and
//! its load; the fence pairing guarantees at least one side observes the
//! other, so either the parker exits on its own or the releaser finds the
//! record.
//!
//! # Fairness
//!
//! Items are globally FIFO. Waiters are released in FIFO order per pending
//! ring, but a newly arriving operation may complete before a just-released
//! waiter retries; wakeup fairness is best-effort only.

#[cfg(not(loom))]
use std::sync::atomic::{fence, AtomicBool, Ordering};

#[cfg(loom)]
use loom::sync::atomic::{fence, AtomicBool, Ordering};

use std::fmt;

use crate::ring::Ring;
use crate::runtime::{Scheduler, TaskContext, Waiter};

/// Outcome of a blocking [`BlockingChannel::push`] that could not complete.
///
/// Both variants hand the unsent value back to the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum PushError<T> {
    /// The channel was shut down; the value was not enqueued.
    ShutdownWhileFull(T),
    /// The pending-push ring was full: more producers are parked than the
    /// channel's waiter capacity allows for.
    NotifyCapacity(T),
}

impl<T> PushError<T> {
    /// Recover the value that could not be pushed.
    pub fn into_value(self) -> T {
        match self {
            PushError::ShutdownWhileFull(v) | PushError::NotifyCapacity(v) => v,
        }
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::ShutdownWhileFull(_) => write!(f, "channel shut down"),
            PushError::NotifyCapacity(_) => write!(f, "pending-push ring full"),
        }
    }
}

/// Outcome of a blocking [`BlockingChannel::pop`] that could not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    /// The channel was shut down.
    Shutdown,
    /// The pending-pop ring was full: more consumers are parked than the
    /// channel's waiter capacity allows for.
    NotifyCapacity,
}

impl fmt::Display for PopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PopError::Shutdown => write!(f, "channel shut down"),
            PopError::NotifyCapacity => write!(f, "pending-pop ring full"),
        }
    }
}

/// Async-aware bounded MPMC channel.
///
/// Generic over the element type and the host scheduler; all tasks using one
/// channel must share a scheduler *type*, though not necessarily a scheduler
/// instance.
pub struct BlockingChannel<T, S: Scheduler> {
    items: Ring<T>,
    /// Parked consumers, released one per successful push.
    pending_pops: Ring<Waiter<S>>,
    /// Parked producers, released one per successful pop.
    pending_pushes: Ring<Waiter<S>>,
    /// One-way flag; cleared exactly once by `shutdown`.
    running: AtomicBool,
}

impl<T, S: Scheduler> BlockingChannel<T, S> {
    /// Construct a channel holding at most `item_capacity` items (rounded up
    /// to a power of two, minimum 2) and at most `waiter_capacity` parked
    /// tasks per side (same rounding).
    pub fn new(item_capacity: usize, waiter_capacity: usize) -> Self {
        Self {
            items: Ring::new(item_capacity),
            pending_pops: Ring::new(waiter_capacity),
            pending_pushes: Ring::new(waiter_capacity),
            running: AtomicBool::new(true),
        }
    }

    /// Item capacity after rounding.
    #[inline]
    pub fn item_capacity(&self) -> usize {
        self.items.capacity()
    }

    /// True until [`BlockingChannel::shutdown`] runs.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Advisory item count; see [`Ring::approx_len`].
    #[inline]
    pub fn approx_len(&self) -> usize {
        self.items.approx_len()
    }

    /// Attempt to enqueue without suspending. On success, releases one
    /// parked consumer if any. Returns `Err(value)` when the item ring is
    /// full.
    pub fn push_nowait(&self, value: T) -> Result<(), T> {
        self.items.push(value)?;
        // Pairs with the fence a parking consumer places between publishing
        // its record and re-testing the items; see the module docs.
        fence(Ordering::SeqCst);
        if let Some(waiter) = self.pending_pops.pop() {
            waiter.release();
        }
        Ok(())
    }

    /// Attempt to dequeue without suspending. On success, releases one
    /// parked producer if any. Returns `None` when the item ring is empty.
    pub fn pop_nowait(&self) -> Option<T> {
        let value = self.items.pop()?;
        // Pairs with the fence a parking producer places between publishing
        // its record and re-testing the items; see the module docs.
        fence(Ordering::SeqCst);
        if let Some(waiter) = self.pending_pushes.pop() {
            waiter.release();
        }
        Some(value)
    }

    /// Pop repeatedly into `out` until the channel is empty or `out`
    /// reaches its capacity; returns the number of values moved.
    ///
    /// Each value releases one parked producer, same as
    /// [`BlockingChannel::pop_nowait`].
    pub fn drain_nowait(&self, out: &mut Vec<T>) -> usize {
        let mut moved = 0;
        while out.len() < out.capacity() {
            match self.pop_nowait() {
                Some(value) => {
                    out.push(value);
                    moved += 1;
                }
                None => break,
            }
        }
        moved
    }

    /// Enqueue `value`, suspending the calling task while the item ring is
    /// full.
    ///
    /// Fails with [`PushError::ShutdownWhileFull`] once the channel is shut
    /// down (even if the ring has room; post-shutdown pushes are refused)
    /// and with [`PushError::NotifyCapacity`] when the pending-push ring
    /// cannot hold another waiter.
    pub fn push(&self, ctx: &TaskContext<S>, value: T) -> Result<(), PushError<T>> {
        let mut value = value;
        loop {
            if !self.is_running() {
                return Err(PushError::ShutdownWhileFull(value));
            }
            value = match self.push_nowait(value) {
                Ok(()) => return Ok(()),
                Err(back) => back,
            };

            if self.pending_pushes.push(ctx.waiter()).is_err() {
                return Err(PushError::NotifyCapacity(value));
            }
            // Pairs with the fences on the release and shutdown sides; the
            // re-checks below must not overtake the record publish above.
            fence(Ordering::SeqCst);
            // Shutdown may have drained the pending ring between the flag
            // store and our publish; never suspend once the flag is down.
            if !self.is_running() {
                return Err(PushError::ShutdownWhileFull(value));
            }
            // Room may have appeared between the failed attempt and the
            // publish, with the releasing consumer finding the pending ring
            // still empty. Re-test before suspending.
            value = match self.push_nowait(value) {
                Ok(()) => {
                    self.retract(&self.pending_pushes, ctx);
                    return Ok(());
                }
                Err(back) => back,
            };

            ctx.scheduler.trigger_await();
        }
    }

    /// Dequeue a value, suspending the calling task while the item ring is
    /// empty.
    ///
    /// Fails with [`PopError::Shutdown`] once the channel is shut down
    /// (residual items remain reachable through the non-blocking
    /// operations) and with [`PopError::NotifyCapacity`] when the
    /// pending-pop ring cannot hold another waiter.
    pub fn pop(&self, ctx: &TaskContext<S>) -> Result<T, PopError> {
        loop {
            if !self.is_running() {
                return Err(PopError::Shutdown);
            }
            if let Some(value) = self.pop_nowait() {
                return Ok(value);
            }

            if self.pending_pops.push(ctx.waiter()).is_err() {
                return Err(PopError::NotifyCapacity);
            }
            // Pairs with the fences on the release and shutdown sides; the
            // re-checks below must not overtake the record publish above.
            fence(Ordering::SeqCst);
            if !self.is_running() {
                return Err(PopError::Shutdown);
            }
            if let Some(value) = self.pop_nowait() {
                self.retract(&self.pending_pops, ctx);
                return Ok(value);
            }

            ctx.scheduler.trigger_await();
        }
    }

    /// Shut the channel down: clear `running` and release every currently
    /// parked waiter on both sides, each exactly once.
    ///
    /// Released waiters observe `running == false` and exit their park
    /// loops; records published after the drain belong to tasks that
    /// re-check the flag before suspending and exit on their own. Idempotent
    /// and infallible.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        // Pairs with the fence a parking task places between publishing its
        // record and re-checking the flag: either that task sees the flag
        // down, or the drains below see its record.
        fence(Ordering::SeqCst);
        while let Some(waiter) = self.pending_pops.pop() {
            waiter.release();
        }
        while let Some(waiter) = self.pending_pushes.pop() {
            waiter.release();
        }
    }

    /// Withdraw this task's just-published waiter record after the wait
    /// condition resolved on its own.
    ///
    /// Pulls records until it meets this task's own; every other record
    /// pulled gets its trigger immediately (a spurious wakeup the park loop
    /// tolerates), so no release is ever absorbed by a record without a
    /// sleeper behind it. Bounded by the pending capacity. If a concurrent
    /// release already consumed our record we stop at empty or the bound,
    /// having only added spurious wakeups.
    fn retract(&self, pending: &Ring<Waiter<S>>, ctx: &TaskContext<S>) {
        for _ in 0..pending.capacity() {
            match pending.pop() {
                Some(waiter) if waiter.is_for(ctx) => return,
                Some(waiter) => waiter.release(),
                None => return,
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================


// ============================================================================
// Loom Tests
// ============================================================================
