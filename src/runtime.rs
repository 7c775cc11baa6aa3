//! Host-runtime contract consumed by the synchronization kernel.
//!
//! The kernel never owns an executor. Everything it needs from the host is
//! captured by three operations on a [`Scheduler`] handle:
//!
//! - `trigger(task)`: mark a task runnable. Idempotent, callable from any
//!   thread. A trigger delivered while the task is running (or before it
//!   suspends) is banked: the task's next `trigger_await` returns
//!   immediately.
//! - `trigger_await()`: suspend the calling task until it is triggered.
//! - `wake()`: nudge the scheduler's event loop if it is idle on I/O.
//!   Callable from any thread.
//!
//! The kernel is correct for schedulers backed by 1..N OS threads; every
//! parked task records its *own* scheduler handle so releases always land on
//! the owning scheduler, never the releasing side's.
//!
//! [`ThreadHost`] is a reference host that maps each task to an OS thread.
//! It exists for integration tests and for embedders that want the blocking
//! primitives without a cooperative runtime of their own.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_utils::sync::{Parker, Unparker};

/// Identifier of a cooperative task, unique within its scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

/// Handle onto the executor that owns a task.
///
/// Handles are cheap to clone and comparable: the kernel stores one per
/// parked task and uses equality to recognize its own waiter records (task
/// ids are only unique within a scheduler), so two handles must compare
/// equal iff they refer to the same scheduler.
pub trait Scheduler: Clone + PartialEq + Send + Sync + 'static {
    /// Mark `task` runnable. Idempotent; safe from any thread.
    fn trigger(&self, task: TaskId);

    /// Suspend the current task until it is triggered.
    ///
    /// Returns immediately if a trigger was banked while the task was
    /// running. Callers must tolerate spurious returns by re-testing their
    /// wait condition.
    fn trigger_await(&self);

    /// Nudge the scheduler's event loop if it is idle on I/O. Safe from any
    /// thread.
    fn wake(&self);
}

/// The "current task" capability threaded through blocking operations.
#[derive(Clone, Debug)]
pub struct TaskContext<S> {
    pub task: TaskId,
    pub scheduler: S,
}

impl<S: Scheduler> TaskContext<S> {
    /// Snapshot this task's identity into a parked-waiter record.
    pub fn waiter(&self) -> Waiter<S> {
        Waiter {
            task: self.task,
            scheduler: self.scheduler.clone(),
        }
    }
}

/// A parked task awaiting release: its id plus its owning scheduler.
///
/// Waiters are plain stack-sized values. They are moved through pending
/// rings by value and never aliased.
#[derive(Clone, Debug)]
pub struct Waiter<S> {
    pub task: TaskId,
    pub scheduler: S,
}

impl<S: Scheduler> Waiter<S> {
    /// Release the parked task: trigger it on its owning scheduler, then
    /// nudge that scheduler in case it is idle on I/O.
    pub fn release(&self) {
        self.scheduler.trigger(self.task);
        self.scheduler.wake();
    }

    /// True when this record identifies the task behind `ctx`.
    pub(crate) fn is_for(&self, ctx: &TaskContext<S>) -> bool {
        self.task == ctx.task && self.scheduler == ctx.scheduler
    }
}

// ============================================================================
// Reference host: one OS thread per task
// ============================================================================

thread_local! {
    /// Parker of the task registered on this thread, if any.
    static CURRENT_PARKER: RefCell<Option<Parker>> = const { RefCell::new(None) };
}

struct ThreadHostInner {
    /// Unparkers for every registered task, keyed by raw task id.
    tasks: Mutex<HashMap<u64, Unparker>>,
    next_task: AtomicU64,
}

/// Thread-backed [`Scheduler`]: each registered task is an OS thread.
///
/// `trigger` unparks the task's thread; `trigger_await` parks the calling
/// thread. The Parker/Unparker pair banks one token, so a trigger delivered
/// before the park makes the park return immediately and no wakeup is lost.
/// `wake` is a no-op: there is no event loop to nudge, a parked thread *is*
/// the idle state.
#[derive(Clone)]
pub struct ThreadHost {
    inner: Arc<ThreadHostInner>,
}

impl ThreadHost {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ThreadHostInner {
                tasks: Mutex::new(HashMap::new()),
                next_task: AtomicU64::new(0),
            }),
        }
    }

    /// Register the calling thread as a task and return its context.
    ///
    /// The context is valid on this thread only; `trigger_await` looks the
    /// parker up through thread-local state.
    pub fn register_current(&self) -> TaskContext<ThreadHost> {
        let parker = Parker::new();
        let unparker = parker.unparker().clone();
        let id = self.inner.next_task.fetch_add(1, Ordering::Relaxed);

        self.inner
            .tasks
            .lock()
            .expect("task table lock poisoned")
            .insert(id, unparker);
        CURRENT_PARKER.with(|p| *p.borrow_mut() = Some(parker));

        TaskContext {
            task: TaskId(id),
            scheduler: self.clone(),
        }
    }

    /// Drop the calling thread's registration. Later triggers for this task
    /// id are ignored.
    pub fn deregister_current(&self, ctx: &TaskContext<ThreadHost>) {
        self.inner
            .tasks
            .lock()
            .expect("task table lock poisoned")
            .remove(&ctx.task.0);
        CURRENT_PARKER.with(|p| *p.borrow_mut() = None);
    }
}

impl Default for ThreadHost {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ThreadHost {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Scheduler for ThreadHost {
    fn trigger(&self, task: TaskId) {
        // Unknown ids are ignored: triggers are idempotent and may outlive
        // their task (a stale waiter record, a task that deregistered).
        if let Some(unparker) = self
            .inner
            .tasks
            .lock()
            .expect("task table lock poisoned")
            .get(&task.0)
        {
            unparker.unpark();
        }
    }

    fn trigger_await(&self) {
        CURRENT_PARKER.with(|p| {
            let slot = p.borrow();
            let parker = slot
                .as_ref()
                .expect("trigger_await on a thread with no registered task");
            parker.park();
        });
    }

    fn wake(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn trigger_before_await_returns_immediately() {
        let host = ThreadHost::new();
        let ctx = host.register_current();

        host.trigger(ctx.task);
        // The banked token makes this return without blocking.
        ctx.scheduler.trigger_await();

        host.deregister_current(&ctx);
    }

    #[test]
    fn cross_thread_trigger_releases_parked_task() {
        let host = ThreadHost::new();
        let (tx, rx) = std::sync::mpsc::channel();

        let worker_host = host.clone();
        let worker = std::thread::spawn(move || {
            let ctx = worker_host.register_current();
            tx.send(ctx.task).unwrap();
            ctx.scheduler.trigger_await();
            worker_host.deregister_current(&ctx);
        });

        let task = rx.recv().unwrap();
        // Give the worker a moment to actually park; a banked token is
        // equally fine, the test only requires the join to complete.
        std::thread::sleep(Duration::from_millis(10));
        host.trigger(task);
        host.wake();

        worker.join().unwrap();
    }

    #[test]
    fn trigger_unknown_task_is_ignored() {
        let host = ThreadHost::new();
        host.trigger(TaskId(12345));
    }

    #[test]
    fn hosts_compare_by_identity() {
        let a = ThreadHost::new();
        let b = ThreadHost::new();
        assert!(a == a.clone());
        assert!(a != b);
    }
}
