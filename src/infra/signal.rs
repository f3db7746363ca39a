//! One-shot broadcast primitives for cooperative shutdown and fan-out.
//!
//! `CloseSignal` is the crate-wide cancellation mechanism: fire once, await
//! many. `FanoutCell` extends the same pattern to carry a value: it delivers
//! one terminal outcome to every current and future waiter, which is what
//! lets several logical watchers share a single background renewal task.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A cooperative close signal.
///
/// Clone-cheap (wraps `Arc`). Safe to fire before any waiter has registered;
/// the fired flag is checked on each `wait()` call.
#[derive(Debug, Clone, Default)]
pub struct CloseSignal {
    fired: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CloseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal all current and future waiters.
    pub fn fire(&self) {
        self.fired.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Check whether the signal has fired (non-blocking).
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Wait until the signal fires. Returns immediately if it already has.
    pub async fn wait(&self) {
        // Register for notification before checking the flag, so a fire()
        // between the check and the await is not missed.
        loop {
            let notified = self.notify.notified();
            if self.fired.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}

/// A set-once cell that broadcasts its value to every waiter.
///
/// The first `set()` wins; later calls are ignored. Waiters that subscribe
/// after the value was set observe it immediately, so the producer never
/// needs to know how many consumers exist.
#[derive(Debug, Clone)]
pub struct FanoutCell<T> {
    inner: Arc<FanoutInner<T>>,
}

#[derive(Debug)]
struct FanoutInner<T> {
    value: Mutex<Option<T>>,
    set: AtomicBool,
    notify: Notify,
}

impl<T: Clone> FanoutCell<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FanoutInner {
                value: Mutex::new(None),
                set: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Publish the terminal value. Returns `false` if a value was already set.
    pub fn set(&self, value: T) -> bool {
        {
            let mut slot = self.inner.value.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
        }
        self.inner.set.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
        true
    }

    /// The published value, if any (non-blocking).
    pub fn get(&self) -> Option<T> {
        if self.inner.set.load(Ordering::Acquire) {
            self.inner.value.lock().clone()
        } else {
            None
        }
    }

    /// Wait for the value, whether it was set before or after this call.
    pub async fn wait(&self) -> T {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(value) = self.get() {
                return value;
            }
            notified.await;
        }
    }
}

impl<T: Clone> Default for FanoutCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn close_signal_wakes_waiters() {
        let signal = CloseSignal::new();
        let waiter = signal.clone();

        let handle = tokio::spawn(async move {
            waiter.wait().await;
            true
        });

        tokio::task::yield_now().await;
        signal.fire();

        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn close_signal_pre_fired_returns_immediately() {
        let signal = CloseSignal::new();
        signal.fire();
        assert!(signal.is_fired());
        timeout(Duration::from_secs(1), signal.wait())
            .await
            .expect("pre-fired signal must not block");
    }

    #[tokio::test]
    async fn fanout_delivers_to_multiple_waiters() {
        let cell: FanoutCell<u32> = FanoutCell::new();
        let a = cell.clone();
        let b = cell.clone();

        let first = tokio::spawn(async move { a.wait().await });
        let second = tokio::spawn(async move { b.wait().await });

        tokio::task::yield_now().await;
        assert!(cell.set(7));

        assert_eq!(first.await.unwrap(), 7);
        assert_eq!(second.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn fanout_delivers_to_late_subscriber() {
        let cell: FanoutCell<&'static str> = FanoutCell::new();
        cell.set("done");
        // Subscribing after the fact still observes the value.
        let late = cell.clone();
        let value = timeout(Duration::from_secs(1), late.wait())
            .await
            .expect("late waiter must not block");
        assert_eq!(value, "done");
    }

    #[tokio::test]
    async fn fanout_first_set_wins() {
        let cell: FanoutCell<u32> = FanoutCell::new();
        assert!(cell.set(1));
        assert!(!cell.set(2));
        assert_eq!(cell.wait().await, 1);
    }
}
