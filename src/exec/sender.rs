//! Lazy RPC senders and the operation states they connect into.

use std::io;
use std::marker::PhantomPinned;
use std::pin::Pin;
use std::ptr::NonNull;

use log::warn;
use thiserror::Error;

use super::context::RpcContext;
use super::op::OpHeader;
use super::scheduler::Scheduler;
use crate::runtime::{CompletionQueue, Tag};

/// Error delivered to a receiver in place of its value.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The runtime reported an I/O-level failure.
    #[error("I/O error from the RPC runtime")]
    Io(#[from] io::Error),

    /// The value channel itself failed (the consumer went away); carries
    /// the failure description.
    #[error("completion rejected by the receiver: {0}")]
    Rejected(String),
}

/// The continuation an RPC sender delivers its outcome to.
///
/// Exactly one of the three methods is invoked, exactly once, on the
/// driver thread. The value is the `ok` boolean the runtime reported for
/// the completed invocation. A receiver whose value channel can fail
/// hands itself back from [`set_value`](Self::set_value); the driver then
/// routes the failure to [`set_error`](Self::set_error).
pub trait Receiver: Send + Sized {
    /// Deliver the runtime-reported outcome.
    fn set_value(self, ok: bool) -> Result<(), (Self, RpcError)>;

    /// Deliver a failure.
    fn set_error(self, error: RpcError);

    /// The operation was abandoned without completing. The context itself
    /// never takes this path (shutdown resolves in-flight operations
    /// through the completion queue); it exists for composition layers
    /// that cancel before starting.
    fn set_done(self);
}

/// A lazy description of one RPC invocation, bound to a context.
///
/// The sender performs no runtime call; connect it to a [`Receiver`] and
/// start the resulting [`RpcOperation`] to issue the call on the driver
/// thread.
pub struct RpcSender<'a, Q: CompletionQueue, F> {
    scheduler: Scheduler<'a, Q>,
    invoke: F,
}

impl<'a, Q, F> RpcSender<'a, Q, F>
where
    Q: CompletionQueue,
    F: FnOnce(Tag) + Send,
{
    pub(crate) fn new(scheduler: Scheduler<'a, Q>, invoke: F) -> Self {
        RpcSender { scheduler, invoke }
    }

    /// Bind the sender to `receiver`, producing the operation state.
    /// Nothing is invoked until the operation is started.
    pub fn connect<R: Receiver>(self, receiver: R) -> RpcOperation<'a, Q, F, R> {
        RpcOperation {
            header: OpHeader::new(),
            context: self.scheduler.context(),
            invoke: Some(self.invoke),
            receiver: Some(receiver),
            phase: Phase::Init,
            _pin: PhantomPinned,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Constructed, not yet started.
    Init,
    /// Travelling through the inbox to the driver thread.
    Scheduling,
    /// The RPC invocation has been issued with this operation's address
    /// as the completion tag.
    InFlight,
    /// The receiver has been signalled.
    Completed,
}

/// One in-flight RPC: the pinned record whose address doubles as the
/// completion tag.
///
/// From `start` until the receiver is signalled the operation is
/// reachable by exactly one of the local queue, the inbox, or the runtime
/// as a pending tag, never two at once.
#[repr(C)]
pub struct RpcOperation<'a, Q: CompletionQueue, F, R> {
    header: OpHeader,
    context: &'a RpcContext<Q>,
    invoke: Option<F>,
    receiver: Option<R>,
    phase: Phase,
    _pin: PhantomPinned,
}

impl<'a, Q, F, R> RpcOperation<'a, Q, F, R>
where
    Q: CompletionQueue,
    F: FnOnce(Tag) + Send,
    R: Receiver,
{
    /// Submit the operation.
    ///
    /// On the driver thread the RPC invocation is issued immediately;
    /// from any other thread the operation travels through the context's
    /// inbox and the driver issues it.
    ///
    /// # Safety
    ///
    /// The operation must stay pinned and alive until its receiver has
    /// been signalled: its address is handed to the queues and to the
    /// runtime as the completion tag. Must be called at most once
    /// (a second call is a fatal assertion, not undefined behavior).
    pub unsafe fn start(self: Pin<&mut Self>) {
        let this = self.get_unchecked_mut();
        assert_eq!(this.phase, Phase::Init, "operation started twice");
        let context = this.context;
        if context.is_running_on_this_thread() {
            this.phase = Phase::InFlight;
            this.header.resume = Some(Self::resume_completion);
            let invoke = this.invoke.take().expect("invocation present in Init phase");
            invoke(Tag::from_raw(this as *mut Self as *mut ()));
        } else {
            this.phase = Phase::Scheduling;
            this.header.resume = Some(Self::resume_schedule);
            context.schedule_remote(NonNull::from(&mut this.header));
        }
    }

    /// Runs on the driver after the inbox hop: issue the RPC invocation.
    ///
    /// # Safety
    ///
    /// `op` must be the header of a live, pinned operation in the
    /// `Scheduling` phase.
    unsafe fn resume_schedule(op: *mut OpHeader) {
        let this = op as *mut Self;
        (*this).phase = Phase::InFlight;
        (*this).header.resume = Some(Self::resume_completion);
        let invoke = (*this)
            .invoke
            .take()
            .expect("invocation present in Scheduling phase");
        invoke(Tag::from_raw(op as *mut ()));
    }

    /// Runs on the driver after the runtime returned this operation's
    /// tag: complete the receiver with the dequeued outcome.
    ///
    /// # Safety
    ///
    /// `op` must be the header of a live, pinned operation in the
    /// `InFlight` phase, and the context's last dequeued event must be
    /// this operation's.
    unsafe fn resume_completion(op: *mut OpHeader) {
        let this = op as *mut Self;
        (*this).phase = Phase::Completed;
        let ok = (*this).context.completion_ok();
        let receiver = (*this)
            .receiver
            .take()
            .expect("receiver present in InFlight phase");
        if let Err((receiver, error)) = receiver.set_value(ok) {
            warn!("receiver rejected completion value: {error}");
            receiver.set_error(error);
        }
    }
}

impl<'a, Q: CompletionQueue, F, R> Drop for RpcOperation<'a, Q, F, R> {
    fn drop(&mut self) {
        // A pending operation's address is still held by a queue or by
        // the runtime; letting it die is how tags come to dangle.
        if !std::thread::panicking() {
            assert!(
                self.phase == Phase::Init || self.phase == Phase::Completed,
                "RPC operation dropped while pending ({:?})",
                self.phase
            );
        }
    }
}
