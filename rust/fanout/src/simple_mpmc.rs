//! A bounded, blocking multi-producer, multi-consumer channel that can be tied to a
//! [`CancelSignal`].
//!
//! Channels created with [`cancellable_channel`] race every blocking `send` and
//! `recv` against the signal: as soon as the signal closes, all waiters wake up and
//! every later operation fails with a `Cancelled` error. A run hands work items and
//! results over this way, so no thread stays blocked on a peer that has given up.
//!
//! Handle counting follows the usual rules: dropping the last [`Sender`] lets the
//! receivers drain what is buffered and then report `Disconnected`; dropping the last
//! [`Receiver`] discards the buffer and makes `send` fail.

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard},
};

use crate::cancel::{CancelListener, CancelSignal};

/// Creates a channel that buffers at most `bound` items.
///
/// # Panics
///
/// Panics if `bound` is zero; rendezvous channels are not supported.
pub fn sync_channel<T>(bound: usize) -> (Sender<T>, Receiver<T>) {
    assert_ne!(bound, 0, "sync_channel does not support zero bound");
    let shared = Arc::new(Shared {
        state: Mutex::new(ChannelState {
            buffer: VecDeque::with_capacity(bound),
            bound,
            senders: 1,
            receivers: 1,
            cancelled: false,
        }),
        readable: Condvar::new(),
        writable: Condvar::new(),
    });
    (
        Sender {
            shared: shared.clone(),
        },
        Receiver { shared },
    )
}

/// Creates a channel that is closed for good when `signal` closes.
///
/// Once the signal fires, blocked senders and receivers wake up and return
/// [`EnqueueError::Cancelled`] / [`DequeueError::Cancelled`]. Buffered items are
/// dropped. Binding to a signal that has already fired yields a channel that is
/// cancelled from the start.
pub fn cancellable_channel<'a, T: Send + 'a>(
    bound: usize,
    signal: &CancelSignal<'a>,
) -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = sync_channel(bound);
    let listener = Arc::downgrade(&tx.shared);
    signal.subscribe(listener);
    (tx, rx)
}

/// The sending half of a channel. Clone it to send from several threads.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Sender<T> {
    /// Sends a value, blocking while the buffer is full.
    ///
    /// Fails with [`EnqueueError::Disconnected`] when every receiver is gone, or
    /// with [`EnqueueError::Cancelled`] when the channel is cancelled before the
    /// value could be buffered. Both variants give the value back.
    pub fn send(&self, item: T) -> Result<(), EnqueueError<T>> {
        let mut state = self.shared.lock();
        loop {
            if state.cancelled {
                return Err(EnqueueError::Cancelled(item));
            }
            if state.receivers == 0 {
                return Err(EnqueueError::Disconnected(item));
            }
            if state.buffer.len() < state.bound {
                break;
            }
            state = self.shared.wait(&self.shared.writable, state);
        }

        state.buffer.push_back(item);
        drop(state);
        self.shared.readable.notify_one();
        Ok(())
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.lock().senders += 1;
        Sender {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.senders -= 1;
        if state.senders == 0 {
            drop(state);
            self.shared.readable.notify_all();
        }
    }
}

/// The receiving half of a channel. Clone it to receive on several threads; each
/// item is delivered to exactly one receiver.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Receiver<T> {
    /// Waits for a value.
    ///
    /// Buffered values are still delivered after every sender is dropped; once the
    /// buffer is drained this returns [`DequeueError::Disconnected`]. A cancelled
    /// channel returns [`DequeueError::Cancelled`] right away.
    pub fn recv(&self) -> Result<T, DequeueError> {
        let mut state = self.shared.lock();
        loop {
            if state.cancelled {
                return Err(DequeueError::Cancelled);
            }
            if let Some(item) = state.buffer.pop_front() {
                drop(state);
                self.shared.writable.notify_one();
                return Ok(item);
            }
            if state.senders == 0 {
                return Err(DequeueError::Disconnected);
            }
            state = self.shared.wait(&self.shared.readable, state);
        }
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.shared.lock().receivers += 1;
        Receiver {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.receivers -= 1;
        if state.receivers == 0 {
            let discarded = std::mem::take(&mut state.buffer);
            drop(state);
            self.shared.writable.notify_all();
            drop(discarded);
        }
    }
}

/// Error of [`Sender::send`]. The rejected item is handed back.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum EnqueueError<T> {
    /// Every receiver has been dropped.
    Disconnected(T),
    /// The channel was cancelled.
    Cancelled(T),
}

impl<T> EnqueueError<T> {
    pub fn into_inner(self) -> T {
        match self {
            EnqueueError::Disconnected(item) | EnqueueError::Cancelled(item) => item,
        }
    }
}

impl<T> std::fmt::Display for EnqueueError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnqueueError::Disconnected(_) => write!(f, "channel has no receivers"),
            EnqueueError::Cancelled(_) => write!(f, "channel is cancelled"),
        }
    }
}

impl<T: std::fmt::Debug> std::error::Error for EnqueueError<T> {}

/// Error of [`Receiver::recv`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DequeueError {
    /// The buffer is empty and every sender has been dropped.
    Disconnected,
    /// The channel was cancelled.
    Cancelled,
}

impl std::fmt::Display for DequeueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DequeueError::Disconnected => write!(f, "channel is empty and has no senders"),
            DequeueError::Cancelled => write!(f, "channel is cancelled"),
        }
    }
}

impl std::error::Error for DequeueError {}

struct ChannelState<T> {
    buffer: VecDeque<T>,
    bound: usize,
    senders: usize,
    receivers: usize,
    cancelled: bool,
}

struct Shared<T> {
    state: Mutex<ChannelState<T>>,
    /// Signalled when an item is pushed, the last sender leaves or the channel is
    /// cancelled.
    readable: Condvar,
    /// Signalled when an item is popped, the last receiver leaves or the channel is
    /// cancelled.
    writable: Condvar,
}

impl<T> Shared<T> {
    // No user code runs under this lock, so a poisoned state is still consistent.
    fn lock(&self) -> MutexGuard<'_, ChannelState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait<'g>(
        &self,
        condvar: &Condvar,
        guard: MutexGuard<'g, ChannelState<T>>,
    ) -> MutexGuard<'g, ChannelState<T>> {
        condvar.wait(guard).unwrap_or_else(|e| e.into_inner())
    }
}

impl<T: Send> CancelListener for Shared<T> {
    fn on_cancel(&self) {
        let mut state = self.lock();
        if state.cancelled {
            return;
        }
        state.cancelled = true;
        let discarded = std::mem::take(&mut state.buffer);
        // Waiters re-check `cancelled` under the same lock, so none of them can miss
        // this wake-up.
        self.readable.notify_all();
        self.writable.notify_all();
        drop(state);
        drop(discarded);
    }
}
