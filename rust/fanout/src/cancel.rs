//! One-shot broadcast cancellation.
//!
//! A [`CancelSignal`] has two states, open and closed. Closing it is monotonic and
//! idempotent: the first [`cancel`](CancelSignal::cancel) performs the transition and
//! notifies every subscribed [`CancelListener`], later calls do nothing.
//!
//! Blocking primitives that want to race an operation against cancellation (see
//! [`simple_mpmc::cancellable_channel`](crate::simple_mpmc::cancellable_channel))
//! subscribe a listener that wakes their waiters. Listeners are held weakly, so a
//! long-lived signal never keeps a finished channel alive.
//!
//! The `'a` lifetime bounds what the subscribed listeners may borrow. It lets a
//! signal drive channels that carry non-`'static` items.

use std::sync::{
    Arc, Mutex, Weak,
    atomic::{AtomicBool, Ordering},
};

/// Receives the notification when a [`CancelSignal`] closes.
pub trait CancelListener: Send + Sync {
    /// Called exactly once, on the thread that closed the signal.
    fn on_cancel(&self);
}

/// A cloneable handle to a one-shot, broadcast cancellation signal.
#[derive(Clone)]
pub struct CancelSignal<'a>(Arc<SignalInner<'a>>);

impl<'a> CancelSignal<'a> {
    /// Creates a new signal in the open state.
    pub fn new() -> CancelSignal<'a> {
        CancelSignal(Arc::new(SignalInner {
            fired: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
        }))
    }

    /// Closes the signal.
    ///
    /// Returns `true` if this call performed the transition, `false` if the signal
    /// was already closed.
    pub fn cancel(&self) -> bool {
        self.0.fire()
    }

    /// Returns `true` once the signal has been closed.
    pub fn is_cancelled(&self) -> bool {
        self.0.fired.load(Ordering::SeqCst)
    }

    /// Registers a listener.
    ///
    /// If the signal is already closed the listener is notified immediately, on the
    /// calling thread.
    pub fn subscribe(&self, listener: Weak<dyn CancelListener + 'a>) {
        let mut listeners = self.0.listeners.lock().unwrap();
        if self.is_cancelled() {
            drop(listeners);
            if let Some(listener) = listener.upgrade() {
                listener.on_cancel();
            }
            return;
        }
        listeners.retain(|l| l.strong_count() > 0);
        listeners.push(listener);
    }

    /// Creates a signal that closes whenever this one closes.
    ///
    /// The child can also be closed on its own; doing so does not affect the parent.
    pub fn child(&self) -> CancelSignal<'a> {
        let child = CancelSignal::new();
        let weak = Arc::downgrade(&child.0);
        self.subscribe(weak);
        child
    }

    /// Returns a guard that closes the signal when dropped, including during unwinding.
    pub fn cancel_on_drop(&self) -> CancelGuard<'a> {
        CancelGuard(self.clone())
    }
}

impl Default for CancelSignal<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelSignal<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Closes its [`CancelSignal`] on drop.
#[must_use = "the signal is closed as soon as the guard is dropped"]
pub struct CancelGuard<'a>(CancelSignal<'a>);

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

struct SignalInner<'a> {
    fired: AtomicBool,
    listeners: Mutex<Vec<Weak<dyn CancelListener + 'a>>>,
}

impl SignalInner<'_> {
    fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        // `subscribe` checks `fired` under this lock, so no listener is pushed after
        // the list is taken.
        let listeners = std::mem::take(&mut *self.listeners.lock().unwrap());
        for listener in listeners {
            if let Some(listener) = listener.upgrade() {
                listener.on_cancel();
            }
        }
        true
    }
}

/// A child signal closes when its parent closes.
impl CancelListener for SignalInner<'_> {
    fn on_cancel(&self) {
        self.fire();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct Counter(AtomicUsize);

    impl CancelListener for Counter {
        fn on_cancel(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let signal = CancelSignal::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let weak = Arc::downgrade(&counter);
        signal.subscribe(weak);

        assert!(!signal.is_cancelled());
        assert!(signal.cancel());
        assert!(!signal.cancel());
        assert!(!signal.clone().cancel());
        assert!(signal.is_cancelled());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribe_after_cancel_notifies_immediately() {
        let signal = CancelSignal::new();
        signal.cancel();

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let weak = Arc::downgrade(&counter);
        signal.subscribe(weak);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        signal.cancel();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_listener_is_skipped() {
        let signal = CancelSignal::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let weak = Arc::downgrade(&counter);
        signal.subscribe(weak);
        drop(counter);
        assert!(signal.cancel());
    }

    #[test]
    fn test_child_follows_parent() {
        let parent = CancelSignal::new();
        let child = parent.child();
        let independent = parent.child();

        independent.cancel();
        assert!(!parent.is_cancelled());
        assert!(!child.is_cancelled());

        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_guard_cancels_on_drop() {
        let signal = CancelSignal::new();
        {
            let _guard = signal.cancel_on_drop();
            assert!(!signal.is_cancelled());
        }
        assert!(signal.is_cancelled());

        let signal = CancelSignal::new();
        let handle = signal.clone();
        let res = std::panic::catch_unwind::<_, ()>(std::panic::AssertUnwindSafe(move || {
            let _guard = handle.cancel_on_drop();
            panic!("unwinding");
        }));
        assert!(res.is_err());
        assert!(signal.is_cancelled());
    }

    #[test]
    fn test_concurrent_cancel_fires_once() {
        let signal = CancelSignal::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let weak = Arc::downgrade(&counter);
        signal.subscribe(weak);

        let winners = std::thread::scope(|s| {
            let handles = (0..8)
                .map(|_| s.spawn(|| signal.cancel()))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|&won| won)
                .count()
        });
        assert_eq!(winners, 1);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
