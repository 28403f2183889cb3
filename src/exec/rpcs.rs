//! Sender factories, one per RPC verb.
//!
//! Each factory captures the relevant call borrows and produces a lazy
//! [`RpcSender`] whose invocation closure performs the single
//! corresponding runtime call with the operation's completion tag. The
//! call happens only after the sender is connected and started, on the
//! driver thread of the scheduler's context.

use super::scheduler::Scheduler;
use super::sender::RpcSender;
use crate::runtime::{
    AcceptCall, ClientCall, CompletionQueue, FinishCall, Status, StreamRead, StreamWrite, Tag,
};

/// Begin accepting one incoming call on `call`.
///
/// The delivered value is `false` when the server is shutting down and no
/// call will arrive.
pub fn async_request<'a, Q, C>(
    scheduler: Scheduler<'a, Q>,
    call: &'a mut C,
) -> RpcSender<'a, Q, impl FnOnce(Tag) + Send + 'a>
where
    Q: CompletionQueue,
    C: AcceptCall + Send,
{
    RpcSender::new(scheduler, move |tag| call.request(tag))
}

/// Read one message from the stream into `into`.
///
/// The delivered value is `false` at end-of-stream.
pub fn async_read<'a, Q, C>(
    scheduler: Scheduler<'a, Q>,
    call: &'a mut C,
    into: &'a mut C::Message,
) -> RpcSender<'a, Q, impl FnOnce(Tag) + Send + 'a>
where
    Q: CompletionQueue,
    C: StreamRead + Send,
    C::Message: Send,
{
    RpcSender::new(scheduler, move |tag| call.read(into, tag))
}

/// Write one message to the stream.
pub fn async_write<'a, Q, C>(
    scheduler: Scheduler<'a, Q>,
    call: &'a mut C,
    msg: &'a C::Message,
) -> RpcSender<'a, Q, impl FnOnce(Tag) + Send + 'a>
where
    Q: CompletionQueue,
    C: StreamWrite + Send,
    C::Message: Sync,
{
    RpcSender::new(scheduler, move |tag| call.write(msg, tag))
}

/// Write one message and finish the stream with `status` in a single
/// coalesced step.
pub fn async_write_and_finish<'a, Q, C>(
    scheduler: Scheduler<'a, Q>,
    call: &'a mut C,
    msg: &'a C::Message,
    status: Status,
) -> RpcSender<'a, Q, impl FnOnce(Tag) + Send + 'a>
where
    Q: CompletionQueue,
    C: StreamWrite + Send,
    C::Message: Sync,
{
    RpcSender::new(scheduler, move |tag| call.write_and_finish(msg, status, tag))
}

/// Finish a server-side call with `response` and `status`.
pub fn async_finish<'a, Q, C>(
    scheduler: Scheduler<'a, Q>,
    call: &'a mut C,
    response: &'a C::Response,
    status: Status,
) -> RpcSender<'a, Q, impl FnOnce(Tag) + Send + 'a>
where
    Q: CompletionQueue,
    C: FinishCall + Send,
    C::Response: Sync,
{
    RpcSender::new(scheduler, move |tag| call.finish(response, status, tag))
}

/// Finish a server-side call with an error `status` and no payload.
pub fn async_finish_with_error<'a, Q, C>(
    scheduler: Scheduler<'a, Q>,
    call: &'a mut C,
    status: Status,
) -> RpcSender<'a, Q, impl FnOnce(Tag) + Send + 'a>
where
    Q: CompletionQueue,
    C: FinishCall + Send,
{
    RpcSender::new(scheduler, move |tag| call.finish_with_error(status, tag))
}

/// Send the initial metadata of a server-side call ahead of the first
/// response payload.
pub fn async_send_initial_metadata<'a, Q, C>(
    scheduler: Scheduler<'a, Q>,
    call: &'a mut C,
) -> RpcSender<'a, Q, impl FnOnce(Tag) + Send + 'a>
where
    Q: CompletionQueue,
    C: FinishCall + Send,
{
    RpcSender::new(scheduler, move |tag| call.send_initial_metadata(tag))
}

/// Await the final status of a client-side call.
pub fn async_client_finish<'a, Q, C>(
    scheduler: Scheduler<'a, Q>,
    call: &'a mut C,
) -> RpcSender<'a, Q, impl FnOnce(Tag) + Send + 'a>
where
    Q: CompletionQueue,
    C: ClientCall + Send,
{
    RpcSender::new(scheduler, move |tag| call.finish(tag))
}
