//! A conforming in-memory runtime for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use super::{AcceptCall, Alarm, ClientCall, Completion, CompletionQueue, FinishCall, Status, Tag};

struct MockState {
    /// Events ready to be dequeued, in delivery order.
    events: VecDeque<Completion>,
    /// Tags of invocations issued but not yet completed. Shutdown drains
    /// these with `ok = false`.
    pending: Vec<Tag>,
    /// When true, `next` pretends `events` is empty so tests can pile up
    /// work while the driver stays blocked.
    held: bool,
    shutdown: bool,
}

struct MockCqInner {
    state: Mutex<MockState>,
    ready: Condvar,
    wakeups: AtomicUsize,
    next_calls: AtomicUsize,
}

/// In-memory completion queue. Clones share the same queue, so tests can
/// keep a handle while the context owns another.
#[derive(Clone)]
pub(crate) struct MockCq {
    inner: Arc<MockCqInner>,
}

impl MockCq {
    pub fn new() -> Self {
        MockCq {
            inner: Arc::new(MockCqInner {
                state: Mutex::new(MockState {
                    events: VecDeque::new(),
                    pending: Vec::new(),
                    held: false,
                    shutdown: false,
                }),
                ready: Condvar::new(),
                wakeups: AtomicUsize::new(0),
                next_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Deliver a completion for `tag`, unblocking `next`.
    pub fn post(&self, tag: Tag, ok: bool) {
        let mut state = self.inner.state.lock().unwrap();
        state.pending.retain(|t| *t != tag);
        state.events.push_back(Completion { tag, ok });
        drop(state);
        self.inner.ready.notify_all();
    }

    /// Record `tag` as issued-but-incomplete, to be drained by `shutdown`.
    pub fn expect(&self, tag: Tag) {
        self.inner.state.lock().unwrap().pending.push(tag);
    }

    /// Stop delivering events until [`release_events`](Self::release_events).
    pub fn hold_events(&self) {
        self.inner.state.lock().unwrap().held = true;
    }

    pub fn release_events(&self) {
        self.inner.state.lock().unwrap().held = false;
        self.inner.ready.notify_all();
    }

    /// How many times the alarm has been armed on this queue.
    pub fn wakeups(&self) -> usize {
        self.inner.wakeups.load(Ordering::SeqCst)
    }

    /// How many times `next` has been called.
    pub fn next_calls(&self) -> usize {
        self.inner.next_calls.load(Ordering::SeqCst)
    }
}

impl CompletionQueue for MockCq {
    type Alarm = MockAlarm;

    fn next(&self) -> Option<Completion> {
        self.inner.next_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.inner.state.lock().unwrap();
        loop {
            if !state.held {
                if let Some(event) = state.events.pop_front() {
                    return Some(event);
                }
                if state.shutdown {
                    return None;
                }
            }
            state = self.inner.ready.wait(state).unwrap();
        }
    }

    fn shutdown(&self) {
        let mut state = self.inner.state.lock().unwrap();
        let unresolved = std::mem::take(&mut state.pending);
        for tag in unresolved {
            state.events.push_back(Completion { tag, ok: false });
        }
        state.shutdown = true;
        drop(state);
        self.inner.ready.notify_all();
    }
}

/// Alarm companion to [`MockCq`]: posts the tag back immediately.
#[derive(Default)]
pub(crate) struct MockAlarm;

impl Alarm<MockCq> for MockAlarm {
    fn set(&self, cq: &MockCq, tag: Tag) {
        cq.inner.wakeups.fetch_add(1, Ordering::SeqCst);
        cq.post(tag, true);
    }
}

/// How a mock call object resolves the invocations issued on it.
#[derive(Clone, Copy)]
pub(crate) enum MockBehavior {
    /// Post `{tag, ok}` as soon as the verb is invoked.
    Complete(bool),
    /// Record the tag as pending; the test (or shutdown) resolves it.
    Manual,
}

struct MockCallInner {
    cq: MockCq,
    behavior: MockBehavior,
    invocations: Mutex<Vec<(&'static str, Tag)>>,
}

/// A call object implementing every responder verb, recording each
/// invocation as a `(verb, tag)` pair.
#[derive(Clone)]
pub(crate) struct MockCall {
    inner: Arc<MockCallInner>,
}

impl MockCall {
    pub fn new(cq: MockCq, behavior: MockBehavior) -> Self {
        MockCall {
            inner: Arc::new(MockCallInner {
                cq,
                behavior,
                invocations: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn invocations(&self) -> Vec<(&'static str, Tag)> {
        self.inner.invocations.lock().unwrap().clone()
    }

    fn record(&self, verb: &'static str, tag: Tag) {
        self.inner.invocations.lock().unwrap().push((verb, tag));
        match self.inner.behavior {
            MockBehavior::Complete(ok) => self.inner.cq.post(tag, ok),
            MockBehavior::Manual => self.inner.cq.expect(tag),
        }
    }
}

impl AcceptCall for MockCall {
    fn request(&mut self, tag: Tag) {
        self.record("request", tag);
    }
}

impl super::StreamRead for MockCall {
    type Message = String;

    fn read(&mut self, _into: &mut String, tag: Tag) {
        self.record("read", tag);
    }
}

impl super::StreamWrite for MockCall {
    type Message = String;

    fn write(&mut self, _msg: &String, tag: Tag) {
        self.record("write", tag);
    }

    fn write_and_finish(&mut self, _msg: &String, _status: Status, tag: Tag) {
        self.record("write_and_finish", tag);
    }
}

impl FinishCall for MockCall {
    type Response = String;

    fn send_initial_metadata(&mut self, tag: Tag) {
        self.record("send_initial_metadata", tag);
    }

    fn finish(&mut self, _response: &String, _status: Status, tag: Tag) {
        self.record("finish", tag);
    }

    fn finish_with_error(&mut self, _status: Status, tag: Tag) {
        self.record("finish_with_error", tag);
    }
}

impl ClientCall for MockCall {
    fn finish(&mut self, tag: Tag) {
        self.record("client_finish", tag);
    }
}
