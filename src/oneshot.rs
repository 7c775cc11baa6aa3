//! Single-shot task-notifying future.
//!
//! # Design
//!
//! An [`Oneshot`] is a cell that settles exactly once into a value, an
//! error, or cancellation, and wakes at most one waiting task across
//! threads. It is independent of the channel: use it wherever a one-shot
//! result must flow back to exactly one waiter (request/response fan-out,
//! worker completion, timer races composed by higher layers).
//!
//! # State machine
//!
//! ```text
//! Pending --set_ok/set_err--> Setting --> Ready
//! Pending --set_cancelled------------------> Cancelled
//! ```
//!
//! `Ready` and `Cancelled` are terminal and sticky. `Setting` is a brief
//! serialization window: the winning producer holds it for exactly two
//! stores (result, then state), so observers spin through it with
//! `spin_loop` hints rather than suspending. A producer never suspends
//! inside `set_*`, which keeps the window bounded even under cooperative
//! scheduling.
//!
//! # Waiter slot
//!
//! At most one task may register as the waiter. The slot is guarded by a
//! three-state tag (`Empty -> Installing -> Installed`): registration claims
//! the tag by CAS, writes the record, then publishes with a store of
//! `Installed`. A producer that catches the tag mid-install spins until the
//! record is visible (bounded, the installer is two stores away). A second,
//! distinct task attempting to register is refused with `AlreadyAwaited`;
//! the registered task itself may re-enter freely (its await loop does so
//! after every wakeup).
//!
//! # Ordering rationale
//!
//! The result is published by the Release/Acquire pairing on `state`. The
//! settle/register race additionally needs a store-load agreement: the
//! producer stores the terminal state then loads the waiter tag, while the
//! waiter stores `Installed` then re-loads the state. Both stores and both
//! loads are SeqCst so at least one side always observes the other; plain
//! Release/Acquire would allow both to miss and the wakeup to be lost.

#[cfg(not(loom))]
use std::sync::atomic::{AtomicU8, Ordering};

#[cfg(loom)]
use loom::sync::atomic::{AtomicU8, Ordering};

use std::cell::UnsafeCell;
use std::fmt;

use crate::runtime::{Scheduler, TaskContext, Waiter};

const PENDING: u8 = 0;
const SETTING: u8 = 1;
const READY: u8 = 2;
const CANCELLED: u8 = 3;

const WAITER_EMPTY: u8 = 0;
const WAITER_INSTALLING: u8 = 1;
const WAITER_INSTALLED: u8 = 2;

/// Outcome of a `set_ok`/`set_err` that lost the settle race. Hands the
/// unconsumed value back to the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum SetError<V> {
    /// Another producer already settled the future.
    AlreadySet(V),
    /// The future was cancelled before this set.
    Cancelled(V),
}

impl<V> SetError<V> {
    /// Recover the value that was not stored.
    pub fn into_value(self) -> V {
        match self {
            SetError::AlreadySet(v) | SetError::Cancelled(v) => v,
        }
    }
}

impl<V> fmt::Display for SetError<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetError::AlreadySet(_) => write!(f, "future already set"),
            SetError::Cancelled(_) => write!(f, "future cancelled"),
        }
    }
}

/// Outcome of a `set_cancelled` that lost the settle race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelError {
    /// A producer settled the future with a result first.
    AlreadySet,
    /// The future was already cancelled.
    AlreadyCancelled,
}

impl fmt::Display for CancelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelError::AlreadySet => write!(f, "future already set"),
            CancelError::AlreadyCancelled => write!(f, "future already cancelled"),
        }
    }
}

/// Outcome of an `await_result` that did not yield a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwaitError<E> {
    /// The producer settled the future with an error.
    Failed(E),
    /// The future was cancelled.
    Cancelled,
    /// A different task is already registered as the waiter.
    AlreadyAwaited,
}

impl<E: fmt::Display> fmt::Display for AwaitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AwaitError::Failed(e) => write!(f, "future failed: {e}"),
            AwaitError::Cancelled => write!(f, "future cancelled"),
            AwaitError::AlreadyAwaited => write!(f, "future already awaited by another task"),
        }
    }
}

/// Single-shot cell carrying `Ok(T)`, `Err(E)`, or cancellation, with
/// cross-thread wakeup of at most one waiting task.
///
/// Multi-waiter broadcast is an explicit non-goal; fan-out belongs to a
/// layer above. Late readers of an already-settled future are fine: they
/// read without registering, which is why `await_result` clones the stored
/// result instead of moving it.
pub struct Oneshot<T, E, S: Scheduler> {
    state: AtomicU8,
    /// Valid exactly when `state == READY`; written once inside the
    /// `Setting` window.
    result: UnsafeCell<Option<Result<T, E>>>,
    waiter_tag: AtomicU8,
    /// Valid exactly when `waiter_tag == WAITER_INSTALLED`; written once
    /// inside the `Installing` window.
    waiter: UnsafeCell<Option<Waiter<S>>>,
}

// SAFETY: The state machine serializes all writes: `result` is written by
// the single producer that won the Pending->Setting CAS, `waiter` by the
// single task that won the Empty->Installing CAS. After publication both
// cells are only read through shared references, so `Sync` additionally
// requires `T: Sync` and `E: Sync` (concurrent late readers clone through
// `&T`/`&E`).
unsafe impl<T: Send, E: Send, S: Scheduler> Send for Oneshot<T, E, S> {}
unsafe impl<T: Send + Sync, E: Send + Sync, S: Scheduler> Sync for Oneshot<T, E, S> {}

impl<T, E, S: Scheduler> fmt::Debug for Oneshot<T, E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Oneshot")
            .field("state", &self.state.load(Ordering::Relaxed))
            .field("waiter_tag", &self.waiter_tag.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T, E, S: Scheduler> Oneshot<T, E, S> {
    /// A pending future with no waiter registered.
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            result: UnsafeCell::new(None),
            waiter_tag: AtomicU8::new(WAITER_EMPTY),
            waiter: UnsafeCell::new(None),
        }
    }

    /// A pending future with the calling task pre-registered as the waiter.
    ///
    /// A later `await_result` from the same task proceeds as if it had
    /// registered itself; any other task is refused.
    pub fn new_notifying(ctx: &TaskContext<S>) -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            result: UnsafeCell::new(None),
            waiter_tag: AtomicU8::new(WAITER_INSTALLED),
            waiter: UnsafeCell::new(Some(ctx.waiter())),
        }
    }

    /// True once the future has left `Pending` (including the brief
    /// `Setting` window).
    #[inline]
    pub fn done(&self) -> bool {
        self.state.load(Ordering::Acquire) != PENDING
    }

    /// True iff the future was cancelled.
    #[inline]
    pub fn cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Settle the future with a success value and wake the waiter, if any.
    pub fn set_ok(&self, value: T) -> Result<(), SetError<T>> {
        match self.claim_setting() {
            Ok(()) => {
                // SAFETY: Winning the Pending->Setting CAS makes this
                // producer the sole accessor of `result` until the state
                // store below.
                unsafe { *self.result.get() = Some(Ok(value)) };
                self.state.store(READY, Ordering::SeqCst);
                self.notify();
                Ok(())
            }
            Err(CANCELLED) => Err(SetError::Cancelled(value)),
            Err(_) => Err(SetError::AlreadySet(value)),
        }
    }

    /// Settle the future with an error value and wake the waiter, if any.
    pub fn set_err(&self, err: E) -> Result<(), SetError<E>> {
        match self.claim_setting() {
            Ok(()) => {
                // SAFETY: As in `set_ok`.
                unsafe { *self.result.get() = Some(Err(err)) };
                self.state.store(READY, Ordering::SeqCst);
                self.notify();
                Ok(())
            }
            Err(CANCELLED) => Err(SetError::Cancelled(err)),
            Err(_) => Err(SetError::AlreadySet(err)),
        }
    }

    /// Cancel the future and wake the waiter, if any.
    pub fn set_cancelled(&self) -> Result<(), CancelError> {
        match self.state.compare_exchange(
            PENDING,
            CANCELLED,
            Ordering::SeqCst,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.notify();
                Ok(())
            }
            Err(CANCELLED) => Err(CancelError::AlreadyCancelled),
            Err(_) => Err(CancelError::AlreadySet),
        }
    }

    /// Wait for the future to settle and return its outcome.
    ///
    /// Registers the calling task as the single waiter when the future is
    /// still pending; a second, distinct task is refused with
    /// [`AwaitError::AlreadyAwaited`] and the existing registration is left
    /// intact. A settled future returns immediately without registering, so
    /// any number of late readers may collect the result.
    pub fn await_result(&self, ctx: &TaskContext<S>) -> Result<T, AwaitError<E>>
    where
        T: Clone,
        E: Clone,
    {
        // Fast path: already terminal, no registration.
        loop {
            match self.state.load(Ordering::Acquire) {
                PENDING => break,
                SETTING => core::hint::spin_loop(),
                state => return self.read_result(state),
            }
        }

        self.register_waiter(ctx)?;

        loop {
            // SeqCst pairs with the producer's terminal store: having
            // published our registration above, we either see the terminal
            // state here or the producer sees the registration and triggers.
            match self.state.load(Ordering::SeqCst) {
                PENDING => ctx.scheduler.trigger_await(),
                SETTING => core::hint::spin_loop(),
                state => return self.read_result(state),
            }
        }
    }

    /// CAS `Pending -> Setting`; on failure returns the observed state.
    fn claim_setting(&self) -> Result<(), u8> {
        match self
            .state
            .compare_exchange(PENDING, SETTING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(observed) => Err(observed),
        }
    }

    /// Install (or confirm) the calling task as the single waiter.
    fn register_waiter(&self, ctx: &TaskContext<S>) -> Result<(), AwaitError<E>> {
        match self.waiter_tag.compare_exchange(
            WAITER_EMPTY,
            WAITER_INSTALLING,
            Ordering::Acquire,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                // SAFETY: Winning the Empty->Installing CAS makes this task
                // the sole accessor of `waiter` until the store below.
                unsafe { *self.waiter.get() = Some(ctx.waiter()) };
                self.waiter_tag.store(WAITER_INSTALLED, Ordering::SeqCst);
                Ok(())
            }
            // Mid-install by necessity means a different task: this task
            // cannot be inside its own transient window.
            Err(WAITER_INSTALLING) => Err(AwaitError::AlreadyAwaited),
            Err(_) => {
                // Installed: allowed only for the registered task itself
                // (re-entry from the await loop or a `new_notifying`
                // pre-registration).
                // SAFETY: Tag Installed means the record was published
                // before a Release-or-stronger store; it is never mutated
                // again.
                let same = unsafe { (*self.waiter.get()).as_ref() }
                    .map(|w| w.is_for(ctx))
                    .unwrap_or(false);
                if same {
                    Ok(())
                } else {
                    Err(AwaitError::AlreadyAwaited)
                }
            }
        }
    }

    /// Trigger and wake the registered waiter, if any.
    fn notify(&self) {
        loop {
            // SeqCst pairs with the waiter's Installed store; see the
            // module-level ordering rationale.
            match self.waiter_tag.load(Ordering::SeqCst) {
                WAITER_EMPTY => return,
                // The installer is at most two stores from publishing.
                WAITER_INSTALLING => core::hint::spin_loop(),
                _ => break,
            }
        }
        // SAFETY: Tag Installed guarantees the record was published and is
        // never mutated again.
        if let Some(waiter) = unsafe { (*self.waiter.get()).as_ref() } {
            waiter.release();
        }
    }

    /// Read the outcome of a terminal `state`.
    fn read_result(&self, state: u8) -> Result<T, AwaitError<E>>
    where
        T: Clone,
        E: Clone,
    {
        if state == CANCELLED {
            return Err(AwaitError::Cancelled);
        }
        debug_assert_eq!(state, READY);
        // SAFETY: The Acquire (or stronger) load that observed READY also
        // made the producer's result store visible; the cell is never
        // mutated after that store.
        match unsafe { (*self.result.get()).as_ref() } {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(err)) => Err(AwaitError::Failed(err.clone())),
            None => unreachable!("state Ready without a stored result"),
        }
    }
}

impl<T, E, S: Scheduler> Default for Oneshot<T, E, S> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================


// ============================================================================
// Loom Tests
// ============================================================================

#[cfg(all(test, loom))]
mod loom_tests {
    use super::*;
    use crate::runtime::{Scheduler, TaskContext, TaskId};
    use loom::sync::atomic::{AtomicBool, Ordering};
    use loom::sync::Arc;
    use loom::thread;

    #[derive(Clone)]
    struct FlagHost {
        flag: Arc<AtomicBool>,
    }

    impl PartialEq for FlagHost {
        fn eq(&self, other: &Self) -> bool {
            Arc::ptr_eq(&self.flag, &other.flag)
        }
    }

    impl Scheduler for FlagHost {
        fn trigger(&self, _: TaskId) {
            self.flag.store(true, Ordering::SeqCst);
        }
        fn trigger_await(&self) {
            while !self.flag.swap(false, Ordering::SeqCst) {
                loom::thread::yield_now();
            }
        }
        fn wake(&self) {}
    }

    /// Set racing await: the waiter always observes the value, regardless
    /// of which side publishes first.
    #[test]
    fn loom_set_vs_await() {
        loom::model(|| {
            let shot = Arc::new(Oneshot::<u32, u32, FlagHost>::new());
            let ctx = TaskContext {
                task: TaskId(0),
                scheduler: FlagHost {
                    flag: Arc::new(AtomicBool::new(false)),
                },
            };

            let producer = {
                let shot = shot.clone();
                thread::spawn(move || {
                    shot.set_ok(42).unwrap();
                })
            };

            assert_eq!(shot.await_result(&ctx), Ok(42));
            producer.join().unwrap();
        });
    }

    /// Set racing cancel: exactly one side wins and the loser gets the
    /// matching refusal.
    #[test]
    fn loom_set_vs_cancel() {
        loom::model(|| {
            let shot = Arc::new(Oneshot::<u32, u32, FlagHost>::new());

            let canceller = {
                let shot = shot.clone();
                thread::spawn(move || shot.set_cancelled())
            };
            let set_res = shot.set_ok(1);
            let cancel_res = canceller.join().unwrap();

            match (set_res, cancel_res) {
                (Ok(()), Err(CancelError::AlreadySet)) => {
                    assert!(shot.done());
                    assert!(!shot.cancelled());
                }
                (Err(SetError::Cancelled(1)), Ok(())) => {
                    assert!(shot.cancelled());
                }
                other => panic!("no single winner: {other:?}"),
            }
        });
    }
}
