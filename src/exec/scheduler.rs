//! Cheap handle routing RPC senders to a context.

use super::context::RpcContext;
use crate::runtime::CompletionQueue;

/// A copyable borrow of an [`RpcContext`], used to select the context an
/// RPC sender will run on. Carries no state of its own.
pub struct Scheduler<'a, Q: CompletionQueue> {
    context: &'a RpcContext<Q>,
}

impl<'a, Q: CompletionQueue> Scheduler<'a, Q> {
    pub(crate) fn new(context: &'a RpcContext<Q>) -> Self {
        Scheduler { context }
    }

    /// The context this scheduler routes to.
    #[inline]
    pub(crate) fn context(&self) -> &'a RpcContext<Q> {
        self.context
    }

    /// The completion queue of the underlying context, for senders that
    /// need to address the queue itself.
    #[inline]
    pub fn completion_queue(&self) -> &'a Q {
        self.context.completion_queue()
    }
}

impl<Q: CompletionQueue> Clone for Scheduler<'_, Q> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Q: CompletionQueue> Copy for Scheduler<'_, Q> {}
