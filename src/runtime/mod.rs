//! Contracts the external RPC runtime must satisfy.
//!
//! The execution context in this crate does not talk to any concrete RPC
//! stack. Instead, it drives anything that exposes the completion-queue
//! discipline described by [`CompletionQueue`]: a blocking dequeue that
//! yields `{tag, ok}` pairs, a shutdown request that eventually drains the
//! queue, and a one-shot [`Alarm`] that can unblock the dequeue from any
//! thread. The per-verb responder traits ([`AcceptCall`], [`StreamRead`],
//! [`StreamWrite`], [`FinishCall`], [`ClientCall`]) describe the call
//! objects the sender factories operate on.

mod status;

use std::fmt;
use std::ptr;

pub use self::status::{Status, StatusCode};

#[cfg(test)]
pub(crate) mod mock;

/// An opaque, pointer-sized completion tag.
///
/// A tag is submitted to the runtime together with an RPC invocation and
/// handed back verbatim when that invocation completes. The execution
/// context uses the address of the in-flight operation as the tag, except
/// for the distinguished [`Tag::WAKEUP`] value which signifies "re-check
/// the cross-thread queue" and never names a real operation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Tag(*mut ());

// SAFETY: a tag is an opaque token. It is only ever dereferenced by the
// driver thread that created it, after the runtime has handed it back.
unsafe impl Send for Tag {}
unsafe impl Sync for Tag {}

impl Tag {
    /// The wake-up sentinel. Delivered by the context's own alarm; no real
    /// operation can ever have this (null) address.
    pub const WAKEUP: Tag = Tag(ptr::null_mut());

    /// Whether this tag is the wake-up sentinel.
    #[inline]
    pub fn is_wakeup(self) -> bool {
        self.0.is_null()
    }

    /// Get the raw tag value.
    #[inline]
    pub fn as_ptr(self) -> *mut () {
        self.0
    }

    /// Wrap a raw operation address.
    #[inline]
    pub(crate) fn from_raw(raw: *mut ()) -> Self {
        Tag(raw)
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wakeup() {
            f.write_str("Tag(WAKEUP)")
        } else {
            write!(f, "Tag({:p})", self.0)
        }
    }
}

/// One completion event dequeued from the runtime.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    /// The tag submitted with the completed invocation, or [`Tag::WAKEUP`].
    pub tag: Tag,

    /// Whether the invocation succeeded. The exact meaning is
    /// verb-specific; the runtime reports `false` for operations it
    /// resolves during shutdown.
    pub ok: bool,
}

/// The completion-queue discipline of the external RPC runtime.
///
/// Implementations must guarantee:
///
/// - [`next`](Self::next) blocks until an event is available and returns
///   events in the order the runtime linearizes them;
/// - after [`shutdown`](Self::shutdown), every tag submitted to the
///   runtime is still delivered (with `ok = false` for operations the
///   runtime resolves unfinished), and only then does `next` return
///   `None`;
/// - an alarm armed via [`Alarm::set`] causes `next` to deliver
///   `{tag, ok: true}` promptly, from any arming thread.
pub trait CompletionQueue {
    /// The one-shot timer type used to unblock [`next`](Self::next).
    type Alarm: Alarm<Self> + Default;

    /// Blocking dequeue of the next completion event.
    ///
    /// Returns `None` once the queue has been shut down and fully drained.
    fn next(&self) -> Option<Completion>;

    /// Request shutdown. Pending tags are delivered before [`next`](Self::next)
    /// starts returning `None`.
    fn shutdown(&self);
}

/// A one-shot wake-up timer bound to a completion queue.
///
/// Arming the alarm with an already-expired deadline makes the queue
/// deliver `{tag, ok: true}` promptly. The context owns a single alarm and
/// re-arms it; the wake-up protocol guarantees at most one arming is
/// outstanding at a time.
pub trait Alarm<Q: ?Sized> {
    /// Arm the alarm on `cq` so that it fires immediately, delivering
    /// `tag`. Callable from any thread.
    fn set(&self, cq: &Q, tag: Tag);
}

/// A server-side call-acceptance slot.
///
/// Implementations bundle whatever the runtime needs to begin accepting
/// one incoming RPC (service, per-call context, request slot, responder).
/// `request` registers that interest; the completion reports `ok = false`
/// when the server is shutting down and no call will arrive.
pub trait AcceptCall {
    /// Begin asynchronously accepting one call, completing with `tag`.
    fn request(&mut self, tag: Tag);
}

/// The reading half of a streaming call.
pub trait StreamRead {
    /// The inbound message type.
    type Message;

    /// Begin asynchronously reading one message into `into`, completing
    /// with `tag`. `ok = false` on completion means end-of-stream.
    fn read(&mut self, into: &mut Self::Message, tag: Tag);
}

/// The writing half of a streaming call.
pub trait StreamWrite {
    /// The outbound message type.
    type Message;

    /// Begin asynchronously writing `msg`, completing with `tag`.
    fn write(&mut self, msg: &Self::Message, tag: Tag);

    /// Coalesced write-then-finish with the given `status`, completing
    /// with `tag`.
    fn write_and_finish(&mut self, msg: &Self::Message, status: Status, tag: Tag);
}

/// The responding half of a server-side call.
pub trait FinishCall {
    /// The response message type.
    type Response;

    /// Begin asynchronously sending the initial metadata, completing with
    /// `tag`.
    fn send_initial_metadata(&mut self, tag: Tag);

    /// Begin asynchronously finishing the call with `response` and
    /// `status`, completing with `tag`.
    fn finish(&mut self, response: &Self::Response, status: Status, tag: Tag);

    /// Begin asynchronously finishing the call with an error `status` and
    /// no payload, completing with `tag`.
    fn finish_with_error(&mut self, status: Status, tag: Tag);
}

/// A client-side call whose final status can be awaited.
pub trait ClientCall {
    /// Begin asynchronously receiving the call's final status, completing
    /// with `tag`.
    fn finish(&mut self, tag: Tag);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wakeup_tag_is_distinguished() {
        assert!(Tag::WAKEUP.is_wakeup());
        assert!(Tag::WAKEUP.as_ptr().is_null());

        let slot = 0u64;
        let tag = Tag::from_raw(&slot as *const u64 as *mut ());
        assert!(!tag.is_wakeup());
        assert_ne!(tag, Tag::WAKEUP);
    }
}
