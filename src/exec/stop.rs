//! Cooperative stop signalling for the driver loop.
//!
//! [`StopSource`] is the owning side; any number of [`StopToken`] clones
//! observe it. A token accepts scoped callback registrations: the callback
//! runs at most once, on the thread that requests the stop (or immediately
//! on the registering thread if stop was already requested), and dropping
//! the [`StopCallback`] guarantees the callback is either removed or has
//! finished running.

use std::sync::{Arc, Condvar, Mutex};

type Callback = Box<dyn FnOnce() + Send>;

struct StopState {
    stopped: bool,
    /// Callbacks not yet invoked, keyed for removal on deregistration.
    callbacks: Vec<(u64, Callback)>,
    next_id: u64,
    /// True while `request_stop` is running the drained callbacks;
    /// deregistration waits for this to clear.
    invoking: bool,
}

struct StopInner {
    state: Mutex<StopState>,
    idle: Condvar,
}

/// The owning side of a stop signal. Clones share the same signal.
#[derive(Clone)]
pub struct StopSource {
    inner: Arc<StopInner>,
}

impl StopSource {
    pub fn new() -> Self {
        StopSource {
            inner: Arc::new(StopInner {
                state: Mutex::new(StopState {
                    stopped: false,
                    callbacks: Vec::new(),
                    next_id: 0,
                    invoking: false,
                }),
                idle: Condvar::new(),
            }),
        }
    }

    /// Get a token observing this source.
    pub fn token(&self) -> StopToken {
        StopToken {
            inner: self.inner.clone(),
        }
    }

    /// Request a stop. Idempotent; returns `true` on the first request.
    ///
    /// Registered callbacks run on the calling thread before this
    /// returns.
    pub fn request_stop(&self) -> bool {
        let mut state = self.inner.state.lock().expect("stop state poisoned");
        if state.stopped {
            return false;
        }
        state.stopped = true;
        state.invoking = true;
        let callbacks = std::mem::take(&mut state.callbacks);
        drop(state);

        for (_, callback) in callbacks {
            callback();
        }

        let mut state = self.inner.state.lock().expect("stop state poisoned");
        state.invoking = false;
        drop(state);
        self.inner.idle.notify_all();
        true
    }
}

impl Default for StopSource {
    fn default() -> Self {
        Self::new()
    }
}

/// A cheap, clonable observer of a [`StopSource`].
#[derive(Clone)]
pub struct StopToken {
    inner: Arc<StopInner>,
}

impl StopToken {
    /// Whether a stop has been requested.
    pub fn stop_requested(&self) -> bool {
        self.inner.state.lock().expect("stop state poisoned").stopped
    }

    /// Register `callback` to run when a stop is requested.
    ///
    /// If stop was already requested, `callback` runs immediately on the
    /// calling thread. Otherwise it runs at most once, on the thread
    /// calling [`StopSource::request_stop`]. The registration is scoped:
    /// drop the returned [`StopCallback`] to deregister.
    ///
    /// The callback must not register or deregister callbacks on the same
    /// token; doing so deadlocks.
    pub fn callback<F>(&self, callback: F) -> StopCallback
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock().expect("stop state poisoned");
        if state.stopped {
            drop(state);
            callback();
            return StopCallback {
                inner: self.inner.clone(),
                id: None,
            };
        }
        let id = state.next_id;
        state.next_id += 1;
        state.callbacks.push((id, Box::new(callback)));
        StopCallback {
            inner: self.inner.clone(),
            id: Some(id),
        }
    }
}

/// Scoped callback registration returned by [`StopToken::callback`].
///
/// On drop, either the callback is removed before it ever ran, or, if a
/// concurrent [`StopSource::request_stop`] already drained it, the drop
/// blocks until the invocation pass has finished. Afterwards the callback
/// can no longer run, so state it captured may be torn down.
pub struct StopCallback {
    inner: Arc<StopInner>,
    id: Option<u64>,
}

impl Drop for StopCallback {
    fn drop(&mut self) {
        let Some(id) = self.id else { return };
        let mut state = self.inner.state.lock().expect("stop state poisoned");
        if let Some(pos) = state.callbacks.iter().position(|(i, _)| *i == id) {
            state.callbacks.remove(pos);
            return;
        }
        // Our callback was drained by a stop request; wait out the
        // invocation pass.
        while state.invoking {
            state = self.inner.idle.wait(state).expect("stop state poisoned");
        }
    }
}
