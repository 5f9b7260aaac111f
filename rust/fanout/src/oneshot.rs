//! Single-value handoff between two threads.
//!
//! A run uses it for the feeder's final `FeedStatus`: the feeder
//! thread owns the sender and the collecting thread waits on the receiver after the
//! results are drained. The sender is consumed by [`OneshotSender::send`]; dropping
//! it unsent (for example while unwinding) closes the channel, so [`OneshotReceiver::recv`]
//! never blocks on a value that cannot arrive.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// Creates a connected sender/receiver pair.
pub fn channel<T>() -> (OneshotSender<T>, OneshotReceiver<T>) {
    let slot = Arc::new(Slot {
        state: Mutex::new(SlotState::Waiting),
        filled: Condvar::new(),
    });
    (
        OneshotSender {
            slot: Some(slot.clone()),
        },
        OneshotReceiver { slot },
    )
}

pub struct OneshotSender<T> {
    slot: Option<Arc<Slot<T>>>,
}

impl<T> OneshotSender<T> {
    /// Stores `value` and wakes the receiver.
    pub fn send(mut self, value: T) {
        if let Some(slot) = self.slot.take() {
            slot.resolve(SlotState::Full(value));
        }
    }
}

impl<T> Drop for OneshotSender<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.resolve(SlotState::Closed);
        }
    }
}

pub struct OneshotReceiver<T> {
    slot: Arc<Slot<T>>,
}

impl<T> OneshotReceiver<T> {
    /// Waits for the sender to either send or go away.
    ///
    /// Returns `None` when the sender was dropped unsent, or when the value was
    /// already taken by an earlier call.
    pub fn recv(&self) -> Option<T> {
        let state = self.slot.lock();
        let mut state = self
            .slot
            .filled
            .wait_while(state, |s| matches!(s, SlotState::Waiting))
            .unwrap_or_else(|e| e.into_inner());
        state.take()
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&self) -> TryRecv<T> {
        let mut state = self.slot.lock();
        if matches!(*state, SlotState::Waiting) {
            return TryRecv::Pending;
        }
        match state.take() {
            Some(value) => TryRecv::Value(value),
            None => TryRecv::Closed,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.slot.lock(), SlotState::Waiting)
    }
}

/// Result of [`OneshotReceiver::try_recv`].
#[derive(Debug, PartialEq, Eq)]
pub enum TryRecv<T> {
    Value(T),
    Pending,
    Closed,
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    filled: Condvar,
}

impl<T> Slot<T> {
    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn resolve(&self, next: SlotState<T>) {
        let mut state = self.lock();
        if matches!(*state, SlotState::Waiting) {
            *state = next;
        }
        drop(state);
        self.filled.notify_all();
    }
}

/// `Waiting` moves once, to `Full` or `Closed`; taking a `Full` value leaves `Closed`.
enum SlotState<T> {
    Waiting,
    Full(T),
    Closed,
}

impl<T> SlotState<T> {
    fn take(&mut self) -> Option<T> {
        match std::mem::replace(self, SlotState::Closed) {
            SlotState::Full(value) => Some(value),
            SlotState::Waiting | SlotState::Closed => None,
        }
    }
}
