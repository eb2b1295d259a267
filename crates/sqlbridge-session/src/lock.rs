//! Single-slot rendezvous between a parked transaction body and the caller
//! that later decides when it may finish.
//!
//! [`SessionLock`] parks one waiter until `signal_continue`. [`Handoff`]
//! carries one value the other way, from the parked body back to the caller
//! that opened the transaction.
//!
//! Both are runtime agnostic: plain `std::sync::Mutex` plus a stored `Waker`,
//! so the runtime may drive the body on any task or thread.

use sqlbridge_core::{Error, Result};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

fn lock_state<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    released: bool,
    waker: Option<Waker>,
}

#[derive(Debug, Default)]
struct LockState {
    next_id: u64,
    waiter: Option<Waiter>,
}

/// Holds at most one pending waiter.
///
/// The waiter is registered when [`wait`](SessionLock::wait) is called, not
/// when its future is first polled, so a body can register, hand out its
/// handle, and only then park without losing a continue delivered in between.
#[derive(Clone, Default)]
pub struct SessionLock {
    state: Arc<Mutex<LockState>>,
}

impl SessionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register as the waiter and return a future that resolves on
    /// [`signal_continue`](SessionLock::signal_continue).
    ///
    /// There is no timeout here; the runtime's transaction timeout bounds how
    /// long a parked body can live. A second `wait` replaces the first
    /// waiter, which then never resolves.
    pub fn wait(&self) -> Wait {
        let mut state = lock_state(&self.state);
        let id = state.next_id;
        state.next_id += 1;
        if state.waiter.is_some() {
            tracing::warn!(waiter = id, "replacing an unreleased session lock waiter");
        }
        state.waiter = Some(Waiter {
            id,
            released: false,
            waker: None,
        });
        Wait {
            state: Arc::clone(&self.state),
            id,
            done: false,
        }
    }

    /// Release the pending waiter.
    ///
    /// A no-op when nobody waits or the waiter was already released.
    pub fn signal_continue(&self) {
        let mut state = lock_state(&self.state);
        match state.waiter.as_mut() {
            Some(waiter) if !waiter.released => {
                waiter.released = true;
                tracing::trace!(waiter = waiter.id, "session lock released");
                if let Some(waker) = waiter.waker.take() {
                    waker.wake();
                }
            }
            _ => tracing::trace!("session lock continue with no pending waiter"),
        }
    }

    /// Abort the pending waiter.
    ///
    /// Always fails: a parked body cannot be told from outside to fail, so an
    /// abort can never be delivered.
    pub fn signal_abort(&self) -> Result<()> {
        Err(Error::transaction_aborted())
    }

    /// Whether a registered waiter has not been released yet.
    pub fn is_waiting(&self) -> bool {
        lock_state(&self.state)
            .waiter
            .as_ref()
            .is_some_and(|waiter| !waiter.released)
    }
}

impl fmt::Debug for SessionLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLock")
            .field("waiting", &self.is_waiting())
            .finish()
    }
}

/// Future returned by [`SessionLock::wait`].
#[must_use = "a waiter does nothing unless awaited"]
#[derive(Debug)]
pub struct Wait {
    state: Arc<Mutex<LockState>>,
    id: u64,
    done: bool,
}

impl Future for Wait {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.done {
            return Poll::Ready(());
        }
        let shared = Arc::clone(&self.state);
        let mut state = lock_state(&shared);
        let released = match state.waiter.as_mut() {
            Some(waiter) if waiter.id == self.id => {
                if !waiter.released {
                    waiter.waker = Some(cx.waker().clone());
                }
                waiter.released
            }
            // Replaced by a newer waiter.
            _ => false,
        };
        if !released {
            return Poll::Pending;
        }
        state.waiter = None;
        drop(state);
        self.done = true;
        Poll::Ready(())
    }
}

impl Drop for Wait {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut state = lock_state(&self.state);
        if state.waiter.as_ref().is_some_and(|waiter| waiter.id == self.id) {
            state.waiter = None;
        }
    }
}

struct HandoffState<T> {
    value: Option<T>,
    waker: Option<Waker>,
}

/// One-shot slot carrying a value from a parked body to the caller polling it.
pub struct Handoff<T> {
    state: Arc<Mutex<HandoffState<T>>>,
}

impl<T> Handoff<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HandoffState {
                value: None,
                waker: None,
            })),
        }
    }

    /// Store the value and wake the receiver. A second publish replaces an
    /// untaken value.
    pub fn publish(&self, value: T) {
        let mut state = lock_state(&self.state);
        state.value = Some(value);
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
    }

    /// Take the value if one was published, without registering a waker.
    pub fn take(&self) -> Option<T> {
        lock_state(&self.state).value.take()
    }

    /// Take the value if published, otherwise register to be woken.
    pub fn poll_take(&self, cx: &mut Context<'_>) -> Poll<T> {
        let mut state = lock_state(&self.state);
        match state.value.take() {
            Some(value) => Poll::Ready(value),
            None => {
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T> Clone for Handoff<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for Handoff<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_waker() -> (Arc<CountingWaker>, Waker) {
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));
        (counter, waker)
    }

    #[test]
    fn test_wait_stays_pending_until_continue() {
        let lock = SessionLock::new();
        let (counter, waker) = counting_waker();
        let mut cx = Context::from_waker(&waker);

        let mut wait = lock.wait();
        assert!(lock.is_waiting());
        for _ in 0..3 {
            assert!(Pin::new(&mut wait).poll(&mut cx).is_pending());
        }

        lock.signal_continue();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(!lock.is_waiting());
        assert!(Pin::new(&mut wait).poll(&mut cx).is_ready());
    }

    #[test]
    fn test_continue_before_first_poll_is_kept() {
        let lock = SessionLock::new();
        let (_counter, waker) = counting_waker();
        let mut cx = Context::from_waker(&waker);

        let mut wait = lock.wait();
        lock.signal_continue();
        assert!(Pin::new(&mut wait).poll(&mut cx).is_ready());
    }

    #[test]
    fn test_continue_without_waiter_is_noop() {
        let lock = SessionLock::new();
        lock.signal_continue();
        lock.signal_continue();
        assert!(!lock.is_waiting());

        // A later waiter is not released by the earlier signals.
        let (_counter, waker) = counting_waker();
        let mut cx = Context::from_waker(&waker);
        let mut wait = lock.wait();
        assert!(Pin::new(&mut wait).poll(&mut cx).is_pending());
    }

    #[test]
    fn test_second_continue_is_noop() {
        let lock = SessionLock::new();
        let (counter, waker) = counting_waker();
        let mut cx = Context::from_waker(&waker);

        let mut wait = lock.wait();
        assert!(Pin::new(&mut wait).poll(&mut cx).is_pending());
        lock.signal_continue();
        lock.signal_continue();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(Pin::new(&mut wait).poll(&mut cx).is_ready());
    }

    #[test]
    fn test_abort_always_fails() {
        let lock = SessionLock::new();
        let err = lock.signal_abort().unwrap_err();
        assert!(err.is_transaction_state());
        assert!(err.to_string().contains("Current transaction is aborted"));

        let _wait = lock.wait();
        assert!(lock.signal_abort().is_err());
        assert!(lock.is_waiting());
    }

    #[test]
    fn test_dropped_waiter_unregisters() {
        let lock = SessionLock::new();
        let wait = lock.wait();
        assert!(lock.is_waiting());
        drop(wait);
        assert!(!lock.is_waiting());
    }

    #[test]
    fn test_replaced_waiter_never_resolves() {
        let lock = SessionLock::new();
        let (_counter, waker) = counting_waker();
        let mut cx = Context::from_waker(&waker);

        let mut first = lock.wait();
        let mut second = lock.wait();
        lock.signal_continue();
        assert!(Pin::new(&mut first).poll(&mut cx).is_pending());
        assert!(Pin::new(&mut second).poll(&mut cx).is_ready());
    }

    #[test]
    fn test_handoff_wakes_receiver() {
        let handoff = Handoff::new();
        let (counter, waker) = counting_waker();
        let mut cx = Context::from_waker(&waker);

        assert!(handoff.poll_take(&mut cx).is_pending());
        handoff.clone().publish(7_u32);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(handoff.poll_take(&mut cx), Poll::Ready(7));
        assert!(handoff.poll_take(&mut cx).is_pending());
    }

    #[test]
    fn test_handoff_take_does_not_wait() {
        let handoff = Handoff::new();
        assert_eq!(handoff.take(), None);
        handoff.clone().publish("done");
        assert_eq!(handoff.take(), Some("done"));
        assert_eq!(handoff.take(), None);
    }
}
