//! An execution context that adapts completion-queue-driven RPC runtimes
//! to a structured, sender/receiver style of asynchrony.
//!
//! The heart of the crate is [`RpcContext`]: a single-threaded driver
//! that fuses a local FIFO of runnable operations, a lock-free
//! cross-thread inbox, and the blocking dequeue of the runtime's
//! completion queue. Application code describes RPC steps as lazy sender
//! values built by the verb factories ([`async_request`], [`async_read`],
//! [`async_write`], [`async_finish`] and friends), connects them to a
//! [`Receiver`], and starts the resulting operation; the driver issues
//! the call with the operation's own address as the completion tag and
//! resumes the receiver when the runtime hands the tag back.
//!
//! The runtime itself is abstract: anything implementing the traits in
//! the [`runtime`] module can be driven. Threads other than the driver
//! interact only by scheduling work through the inbox, which wakes the
//! parked driver via the runtime's one-shot alarm, at most once per
//! quiet period however many producers pile on.
//!
//! Stopping is cooperative: [`RpcContext::run`] takes a [`StopToken`]
//! whose signal travels through the ordinary queue discipline, so a stop
//! is always serialized behind work scheduled earlier by the same thread.

/// Contracts of the external RPC runtime.
pub mod runtime;

/// Execution context internals.
/// Not to be publicly exposed, instead `pub use` necessary items.
mod exec;

pub use exec::context::*;
pub use exec::rpcs::*;
pub use exec::scheduler::*;
pub use exec::sender::*;
pub use exec::stop::*;
