//! Cross-thread inbox: a lock-free MPSC queue fused with the
//! consumer-active bit of the wake-up protocol.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

use super::op::OpHeader;
use super::queue::OpQueue;

/// The head value meaning "empty, and the consumer will not look again
/// until woken". Never a valid operation address.
const INACTIVE: *mut OpHeader = usize::MAX as *mut OpHeader;

/// A multi-producer, single-consumer intrusive queue carrying the
/// auxiliary "consumer active" state in the same atomic word as the list
/// head, in the style of Vyukov's intrusive MPSC.
///
/// The single head pointer is one of:
///
/// - `null`: empty, consumer active (it will re-check on its own);
/// - [`INACTIVE`]: empty, consumer inactive (the next producer must send
///   the wake-up);
/// - anything else: a LIFO chain of pending operations, consumer active.
///
/// Fusing the bit with the head is what makes the wake-up discipline
/// race-free: a producer learns atomically with its insertion whether it
/// is the one obligated to signal, and the consumer declares itself
/// inactive atomically with observing emptiness.
pub(crate) struct RemoteOpQueue {
    head: AtomicPtr<OpHeader>,
}

impl RemoteOpQueue {
    /// A new queue starts inactive: work can be submitted before the
    /// driver has entered its loop, and the first producer wakes it.
    pub(crate) const fn new() -> Self {
        RemoteOpQueue {
            head: AtomicPtr::new(INACTIVE),
        }
    }

    /// Atomically link `op` at the producer side.
    ///
    /// Returns `true` iff the queue transitioned from inactive to active,
    /// i.e. the caller is the producer obligated to wake the consumer.
    /// Exactly one enqueue returns `true` per inactive interval.
    ///
    /// # Safety
    ///
    /// `op` must point to a live, pinned operation that is not currently
    /// on any queue, and must remain valid until the consumer runs it.
    pub(crate) unsafe fn enqueue(&self, op: NonNull<OpHeader>) -> bool {
        let op = op.as_ptr();
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            (*op).next = if head == INACTIVE { ptr::null_mut() } else { head };
            match self
                .head
                .compare_exchange_weak(head, op, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return head == INACTIVE,
                Err(observed) => head = observed,
            }
        }
    }

    /// If the queue is non-empty, atomically extract the whole list in
    /// insertion order, leaving the consumer marked active. If it is
    /// empty, atomically mark the consumer inactive and return an empty
    /// list.
    ///
    /// Only the consumer may call this.
    pub(crate) fn try_mark_inactive_or_dequeue_all(&self) -> OpQueue {
        let mut head = self.head.load(Ordering::Acquire);
        if head == INACTIVE {
            // Nothing arrived since the last time we went inactive.
            return OpQueue::new();
        }
        if head.is_null() {
            match self.head.compare_exchange(
                ptr::null_mut(),
                INACTIVE,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return OpQueue::new(),
                // A producer slipped in; take its work instead.
                Err(observed) => head = observed,
            }
        }
        debug_assert!(!head.is_null() && head != INACTIVE);
        let chain = self.head.swap(ptr::null_mut(), Ordering::Acquire);

        // The chain is newest-first; reverse it into insertion order.
        let tail = chain;
        let mut fifo_head: *mut OpHeader = ptr::null_mut();
        let mut cursor = chain;
        while !cursor.is_null() {
            // SAFETY: queued operations are live per `enqueue`'s contract.
            let next = unsafe { (*cursor).next };
            unsafe { (*cursor).next = fifo_head };
            fifo_head = cursor;
            cursor = next;
        }
        // SAFETY: `fifo_head..=tail` is the reversed, null-terminated
        // chain we just extracted and now exclusively own.
        unsafe { OpQueue::from_chain(fifo_head, tail) }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    #[repr(C)]
    struct TestNode {
        header: OpHeader,
        producer: usize,
        seq: usize,
    }

    impl TestNode {
        fn new(producer: usize, seq: usize) -> Box<Self> {
            Box::new(TestNode {
                header: OpHeader::new(),
                producer,
                seq,
            })
        }

        fn op(&mut self) -> NonNull<OpHeader> {
            NonNull::from(&mut self.header)
        }
    }

    fn drain(queue: &RemoteOpQueue) -> Vec<(usize, usize)> {
        let mut list = queue.try_mark_inactive_or_dequeue_all();
        let mut out = Vec::new();
        while let Some(op) = list.pop_front() {
            let node = op.as_ptr() as *mut TestNode;
            out.push(unsafe { ((*node).producer, (*node).seq) });
        }
        out
    }

    #[test]
    fn first_enqueue_per_inactive_interval_signals() {
        let queue = RemoteOpQueue::new();
        let mut a = TestNode::new(0, 0);
        let mut b = TestNode::new(0, 1);

        // Starts inactive: the very first producer must signal.
        assert!(unsafe { queue.enqueue(a.op()) });
        assert!(!unsafe { queue.enqueue(b.op()) });

        assert_eq!(drain(&queue), vec![(0, 0), (0, 1)]);

        // Still active after a non-empty dequeue.
        let mut c = TestNode::new(0, 2);
        assert!(!unsafe { queue.enqueue(c.op()) });
        assert_eq!(drain(&queue), vec![(0, 2)]);

        // An empty check marks the consumer inactive again.
        assert!(drain(&queue).is_empty());
        let mut d = TestNode::new(0, 3);
        assert!(unsafe { queue.enqueue(d.op()) });
        assert_eq!(drain(&queue), vec![(0, 3)]);
    }

    #[test]
    fn checking_an_inactive_queue_is_harmless() {
        let queue = RemoteOpQueue::new();
        // Inactive from construction; repeated checks stay empty.
        assert!(drain(&queue).is_empty());
        assert!(drain(&queue).is_empty());

        let mut a = TestNode::new(0, 0);
        assert!(unsafe { queue.enqueue(a.op()) });
        assert_eq!(drain(&queue), vec![(0, 0)]);
    }

    #[test]
    fn concurrent_producers_keep_per_producer_order() {
        const PRODUCERS: usize = 3;
        const PER_PRODUCER: usize = 500;

        let queue = RemoteOpQueue::new();
        let signals = AtomicUsize::new(0);
        let received = Mutex::new(Vec::new());
        let mut storage: Vec<Vec<Box<TestNode>>> = (0..PRODUCERS)
            .map(|p| (0..PER_PRODUCER).map(|s| TestNode::new(p, s)).collect())
            .collect();
        let op_lists: Vec<Vec<usize>> = storage
            .iter_mut()
            .map(|nodes| {
                nodes
                    .iter_mut()
                    .map(|n| n.op().as_ptr() as usize)
                    .collect()
            })
            .collect();

        let mut inactive_marks = 0usize;
        std::thread::scope(|scope| {
            for ops in op_lists {
                scope.spawn(|| {
                    for addr in ops {
                        let op = NonNull::new(addr as *mut OpHeader).unwrap();
                        // SAFETY: the node outlives the scope and is
                        // enqueued exactly once.
                        if unsafe { queue.enqueue(op) } {
                            signals.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }

            let mut got = 0;
            while got < PRODUCERS * PER_PRODUCER {
                let batch = drain(&queue);
                if batch.is_empty() {
                    inactive_marks += 1;
                    std::thread::yield_now();
                } else {
                    got += batch.len();
                    received.lock().unwrap().extend(batch);
                }
            }
        });

        let received = received.into_inner().unwrap();
        assert_eq!(received.len(), PRODUCERS * PER_PRODUCER);

        let mut last_seq = vec![None; PRODUCERS];
        for (producer, seq) in received {
            if let Some(prev) = last_seq[producer] {
                assert!(seq > prev, "producer {producer} reordered: {prev} then {seq}");
            }
            last_seq[producer] = Some(seq);
        }
        for (producer, last) in last_seq.iter().enumerate() {
            assert_eq!(*last, Some(PER_PRODUCER - 1), "producer {producer} lost items");
        }

        // One signal per inactive interval: the initial one, plus at most
        // one per time the consumer marked itself inactive.
        let signals = signals.load(Ordering::SeqCst);
        assert!(signals >= 1);
        assert!(
            signals <= inactive_marks + 1,
            "{signals} signals for {inactive_marks} inactive marks"
        );
    }
}
