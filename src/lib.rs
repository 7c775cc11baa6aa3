//! Synchronization kernel for cooperative-task runtimes.
//!
//! Three components, leaves first, that let many cooperative tasks,
//! scheduled on one or more OS threads, exchange work and results without
//! locks:
//!
//! - [`ring::Ring`]: bounded lock-free MPMC FIFO (Vyukov-style per-slot
//!   sequence arbitration). The primitive everything else is built from.
//! - [`channel::BlockingChannel`]: async-aware wrapper around an item ring
//!   plus two pending-waiter rings. Pushes and pops park the calling task
//!   when the channel is full/empty, release one opposite-side waiter per
//!   successful operation, and shut down in an orderly fashion.
//! - [`oneshot::Oneshot`]: single-shot cell carrying a value, an error, or
//!   cancellation, waking exactly one waiting task across threads.
//!
//! The kernel never owns an executor. Blocking operations take a
//! [`runtime::TaskContext`] and suspend through the host's
//! [`runtime::Scheduler`] handle (`trigger` / `trigger_await` / `wake`);
//! every parked waiter carries its own scheduler handle so releases land on
//! the owning scheduler regardless of which thread performs them. The
//! thread-backed [`runtime::ThreadHost`] is a reference host for tests and
//! runtime-less embedders.
//!
//! Typical wiring: worker pools feed a `BlockingChannel` of jobs and hand
//! each job a `Oneshot` for its result; request pipelines chain channels;
//! fan-out layers race oneshots composed with external timers. Full/empty
//! and shutdown are ordinary outcomes returned to the caller; the kernel
//! never logs or retries on its own.

pub mod channel;
pub mod oneshot;
pub mod ring;
pub mod runtime;
#[cfg(test)]
pub mod test_utils;

pub use channel::{BlockingChannel, PopError, PushError};
pub use oneshot::{AwaitError, CancelError, Oneshot, SetError};
pub use ring::Ring;
pub use runtime::{Scheduler, TaskContext, TaskId, ThreadHost, Waiter};
