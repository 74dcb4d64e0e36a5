use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

/// Pushes `value` without blocking. When the queue is full the oldest entry
/// is discarded to make room; returns `true` if that happened.
pub fn push_drop_oldest<T>(tx: &Sender<T>, rx: &Receiver<T>, value: T) -> bool {
    match tx.try_send(value) {
        Ok(()) => false,
        Err(TrySendError::Full(value)) => {
            let dropped = rx.try_recv().is_ok();
            // A concurrent producer may have refilled the slot, in which case
            // the newest value is the one lost.
            let _ = tx.try_send(value);
            dropped
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

/// One-slot notification. At most one notification is pending; a newer one
/// replaces it, and a waiter that arrives late still observes it.
#[derive(Debug)]
pub struct Signal<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    pub fn notify(&self, value: T) {
        push_drop_oldest(&self.tx, &self.rx, value);
    }

    /// Drops any pending notification.
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    pub fn try_take(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// For use in `crossbeam_channel::select!`.
    pub fn receiver(&self) -> &Receiver<T> {
        &self.rx
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}
