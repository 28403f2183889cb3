//! The execution context and its single-threaded driver loop.

use std::cell::{Cell, UnsafeCell};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, trace};

use super::op::{OpHeader, TaskOp};
use super::queue::OpQueue;
use super::remote::RemoteOpQueue;
use super::scheduler::Scheduler;
use super::stop::StopToken;
use crate::runtime::{Alarm, Completion, CompletionQueue, Tag};

thread_local! {
    /// The context currently executing [`RpcContext::run`] on this
    /// thread, if any. Stored type-erased; only compared by address.
    static CURRENT_CONTEXT: Cell<*const ()> = const { Cell::new(ptr::null()) };
}

/// State only the driver thread touches.
struct DriverState {
    /// Operations waiting to resume on the driver.
    local: OpQueue,

    /// True while the remote queue is marked inactive, i.e. the next
    /// wake-up is owed by a producer and there is no point re-checking.
    remote_read_pending: bool,

    /// The completion dequeued last. A resuming operation reads its `ok`
    /// outcome here; valid because the driver takes exactly one
    /// completion per iteration and resumes it before dequeuing again.
    last_event: Completion,
}

/// An execution context driving one completion queue.
///
/// The context fuses three sources of work: a local FIFO owned by the
/// driver thread, a cross-thread inbox, and the blocking dequeue of the
/// runtime's completion queue. Exactly one thread at a time may call
/// [`run`](Self::run); every RPC issuance and every receiver resumption
/// happens on that thread. Other threads interact only by enqueuing to
/// the inbox, waking the driver through the runtime's alarm when it is
/// parked in the blocking dequeue.
///
/// Operations borrow the context, so it cannot be dropped while any
/// sender is still connected to it.
pub struct RpcContext<Q: CompletionQueue> {
    cq: Q,
    /// Re-armed for every inactive-to-active transition of the inbox.
    alarm: Q::Alarm,
    remote: RemoteOpQueue,
    driver: UnsafeCell<DriverState>,
    running: AtomicBool,
}

// SAFETY: the `driver` cell is only ever touched by the thread inside
// `run` (enforced by the `running` flag and the thread-local current
// context); everything else is atomics or the runtime's own sync.
unsafe impl<Q: CompletionQueue + Send> Send for RpcContext<Q> where Q::Alarm: Send {}
unsafe impl<Q: CompletionQueue + Sync> Sync for RpcContext<Q> where Q::Alarm: Sync {}

impl<Q: CompletionQueue> RpcContext<Q> {
    /// Create a context owning `completion_queue`.
    pub fn new(completion_queue: Q) -> Self {
        RpcContext {
            alarm: Q::Alarm::default(),
            cq: completion_queue,
            remote: RemoteOpQueue::new(),
            driver: UnsafeCell::new(DriverState {
                local: OpQueue::new(),
                remote_read_pending: false,
                last_event: Completion {
                    tag: Tag::WAKEUP,
                    ok: false,
                },
            }),
            running: AtomicBool::new(false),
        }
    }

    /// Get the underlying completion queue.
    #[inline]
    pub fn completion_queue(&self) -> &Q {
        &self.cq
    }

    /// Get a scheduler routing RPC senders to this context.
    #[inline]
    pub fn scheduler(&self) -> Scheduler<'_, Q> {
        Scheduler::new(self)
    }

    /// Whether the calling thread is this context's driver.
    #[inline]
    pub fn is_running_on_this_thread(&self) -> bool {
        CURRENT_CONTEXT.with(|current| current.get() == self as *const Self as *const ())
    }

    /// Drive the context until `stop_token` is signalled or the runtime
    /// shuts down.
    ///
    /// The stop request travels through the ordinary queue discipline, so
    /// it is serialized against work scheduled earlier by the same
    /// producer. A token that is already stopped makes `run` process the
    /// pending local work once and return without blocking.
    pub fn run(&self, stop_token: StopToken) {
        let was_running = self.running.swap(true, Ordering::Acquire);
        assert!(!was_running, "RpcContext::run entered reentrantly");
        let _running = RunningGuard(&self.running);
        let _entered = CurrentContextGuard::enter(self as *const Self as *const ());
        debug!("run loop started");

        let should_stop = Cell::new(false);
        let stop_op = TaskOp::new(|| should_stop.set(true));
        let mut stop_op = std::pin::pin!(stop_op);
        let stop_header = stop_op.as_mut().header_ptr();

        let context_addr = self as *const Self as usize;
        let stop_addr = stop_header.as_ptr() as usize;
        let registration = stop_token.callback(move || {
            // SAFETY: the registration is dropped before `run` returns,
            // and dropping it waits out a concurrent invocation, so both
            // the context and the stack-pinned stop operation are alive
            // whenever this runs.
            unsafe {
                let context = &*(context_addr as *const Self);
                context.schedule(NonNull::new_unchecked(stop_addr as *mut OpHeader));
            }
        });

        loop {
            self.run_pending_local();
            if should_stop.get() {
                debug!("stop observed");
                break;
            }
            self.migrate_remote_work();
            if self.has_pending_local() {
                // Work became runnable; dispatch it before parking in the
                // runtime.
                continue;
            }
            if !self.acquire_completion_event() {
                debug!("completion queue shut down");
                break;
            }
        }

        // The callback can no longer fire after this.
        drop(registration);

        // The stop operation may still sit in a queue if the runtime shut
        // down between the stop request and the next drain; it must not
        // survive this stack frame. Other leftovers stay queued for a
        // later `run`.
        //
        // SAFETY: the loop has exited, only this thread touches the
        // queues.
        unsafe {
            let state = &mut *self.driver.get();
            let mut leftovers = state.local.take();
            leftovers.append(self.remote.try_mark_inactive_or_dequeue_all());
            while let Some(op) = leftovers.pop_front() {
                if op != stop_header {
                    state.local.push_back(op);
                }
            }
        }

        debug!("run loop exited");
    }

    /// Hand an operation to the context from any thread.
    ///
    /// On the driver thread it goes straight onto the local queue;
    /// elsewhere it goes through the inbox, waking the driver if this
    /// enqueue is the one that reactivated it.
    ///
    /// # Safety
    ///
    /// `op` must point to a live, pinned operation with its resume slot
    /// armed, not currently on any queue, staying valid until its resume
    /// function has run.
    pub(crate) unsafe fn schedule(&self, op: NonNull<OpHeader>) {
        if self.is_running_on_this_thread() {
            self.schedule_local(op);
        } else {
            self.schedule_remote(op);
        }
    }

    /// # Safety
    ///
    /// Same as [`schedule`](Self::schedule); additionally the caller must
    /// be on the driver thread.
    pub(crate) unsafe fn schedule_local(&self, op: NonNull<OpHeader>) {
        (*self.driver.get()).local.push_back(op);
    }

    /// # Safety
    ///
    /// Same as [`schedule`](Self::schedule).
    pub(crate) unsafe fn schedule_remote(&self, op: NonNull<OpHeader>) {
        if self.remote.enqueue(op) {
            trace!("inbox reactivated, arming wake-up alarm");
            self.alarm.set(&self.cq, Tag::WAKEUP);
        }
    }

    /// The `ok` outcome of the completion currently being resumed.
    ///
    /// Only meaningful on the driver thread, from the resume function of
    /// the operation whose tag was just dequeued.
    pub(crate) fn completion_ok(&self) -> bool {
        debug_assert!(self.is_running_on_this_thread());
        // SAFETY: driver thread only.
        unsafe { (*self.driver.get()).last_event.ok }
    }

    /// Run everything on the local queue at the start of this iteration.
    /// Operations scheduled by a resume land on the fresh queue and wait
    /// for the next iteration.
    fn run_pending_local(&self) {
        // SAFETY: driver thread only; the borrow ends before any resume
        // function (which may re-enter `schedule_local`) runs.
        let mut pending = unsafe { (*self.driver.get()).local.take() };
        if pending.is_empty() {
            return;
        }
        let mut count = 0usize;
        while let Some(op) = pending.pop_front() {
            // SAFETY: queued operations are live and armed; taking the
            // resume slot makes a double schedule trip the assertion.
            unsafe {
                let resume = (*op.as_ptr())
                    .resume
                    .take()
                    .expect("operation queued with no resume function");
                resume(op.as_ptr());
            }
            count += 1;
        }
        trace!("processed {count} local queue items");
    }

    /// Pull whatever the inbox holds onto the local queue, or mark the
    /// consumer inactive so the next producer wakes us.
    fn migrate_remote_work(&self) {
        // SAFETY: driver thread only; no resume runs under this borrow.
        let state = unsafe { &mut *self.driver.get() };
        if state.remote_read_pending {
            return;
        }
        let migrated = self.remote.try_mark_inactive_or_dequeue_all();
        if migrated.is_empty() {
            trace!("inbox empty, consumer marked inactive");
            state.remote_read_pending = true;
        } else {
            trace!("migrating inbox items to the local queue");
            state.local.append(migrated);
        }
    }

    fn has_pending_local(&self) -> bool {
        // SAFETY: driver thread only.
        unsafe { !(*self.driver.get()).local.is_empty() }
    }

    /// Block for one completion event. Returns false once the runtime has
    /// shut down.
    fn acquire_completion_event(&self) -> bool {
        let Some(event) = self.cq.next() else {
            return false;
        };
        // SAFETY: driver thread only; no resume runs under this borrow.
        let state = unsafe { &mut *self.driver.get() };
        if event.tag.is_wakeup() {
            trace!("wake-up event consumed");
            state.remote_read_pending = false;
        } else {
            state.last_event = event;
            let op = event.tag.as_ptr() as *mut OpHeader;
            // SAFETY: every non-sentinel tag is the address of an
            // operation this context put in flight.
            unsafe { state.local.push_back(NonNull::new_unchecked(op)) };
        }
        true
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Scoped ownership of the thread-local current-context cell.
struct CurrentContextGuard {
    previous: *const (),
}

impl CurrentContextGuard {
    fn enter(context: *const ()) -> Self {
        CurrentContextGuard {
            previous: CURRENT_CONTEXT.with(|current| current.replace(context)),
        }
    }
}

impl Drop for CurrentContextGuard {
    fn drop(&mut self) {
        CURRENT_CONTEXT.with(|current| current.set(self.previous));
    }
}
