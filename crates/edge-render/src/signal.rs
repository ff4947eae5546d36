//! Render signal: the cancellation signal of a dry-run prerender.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

struct SignalState {
    aborted: AtomicBool,
    next_listener: AtomicU64,
    wakers: Mutex<Vec<(u64, Waker)>>,
}

impl SignalState {
    fn wakers(&self) -> MutexGuard<'_, Vec<(u64, Waker)>> {
        self.wakers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cancellation signal owned by a dry-run work unit.
///
/// Firing is a single event: the first `abort` wins, and every task waiting
/// on the signal is woken exactly once.
#[derive(Clone)]
pub struct RenderSignal {
    state: Arc<SignalState>,
}

impl RenderSignal {
    /// Create a signal that has not fired.
    pub fn new() -> Self {
        Self {
            state: Arc::new(SignalState {
                aborted: AtomicBool::new(false),
                next_listener: AtomicU64::new(0),
                wakers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Whether the signal has fired.
    pub fn is_aborted(&self) -> bool {
        self.state.aborted.load(Ordering::Acquire)
    }

    /// Fire the signal. Returns `true` only for the call that fired it.
    pub fn abort(&self) -> bool {
        if self.state.aborted.swap(true, Ordering::AcqRel) {
            return false;
        }

        let wakers = std::mem::take(&mut *self.state.wakers());
        for (_, waker) in wakers {
            waker.wake();
        }
        true
    }

    /// Start listening for the signal.
    pub fn listen(&self) -> SignalListener {
        SignalListener {
            signal: self.clone(),
            id: self.state.next_listener.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Number of listeners currently waiting.
    pub fn waiters(&self) -> usize {
        self.state.wakers().len()
    }

    /// Whether two signals are the same signal.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.state, &b.state)
    }
}

impl Default for RenderSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RenderSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderSignal")
            .field("aborted", &self.is_aborted())
            .field("waiters", &self.waiters())
            .finish()
    }
}

/// One waiter on a [`RenderSignal`].
///
/// Holds at most one waker slot, released when the listener is dropped.
#[derive(Debug)]
pub struct SignalListener {
    signal: RenderSignal,
    id: u64,
}

impl SignalListener {
    /// Ready once the signal has fired; otherwise stores the task's waker.
    pub fn poll_fired(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        let mut wakers = self.signal.state.wakers();
        // Checked under the lock so an abort cannot drain between check and store.
        if self.signal.is_aborted() {
            return Poll::Ready(());
        }
        match wakers.iter_mut().find(|(id, _)| *id == self.id) {
            Some((_, waker)) => {
                if !waker.will_wake(cx.waker()) {
                    *waker = cx.waker().clone();
                }
            }
            None => wakers.push((self.id, cx.waker().clone())),
        }
        Poll::Pending
    }
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        self.signal.state.wakers().retain(|(id, _)| *id != self.id);
    }
}
