use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

/// Single-shot readiness signal for the underlying channel's bind.
///
/// Starts unbound. [`signal_bound`](Self::signal_bound) moves it to bound
/// for good and releases every current and future waiter.
#[derive(Debug, Default)]
pub struct BindGate {
    bound: Mutex<bool>,
    released: Condvar,
    #[cfg(feature = "async")]
    notify: tokio::sync::Notify,
}

impl BindGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the channel bound. Later calls are no-ops.
    ///
    /// Never blocks beyond the gate's own short critical section, so it is
    /// safe to call from the channel's callback context.
    pub fn signal_bound(&self) {
        let mut bound = self.lock();
        if *bound {
            debug!("bind already signalled; ignoring");
            return;
        }
        *bound = true;
        drop(bound);

        self.released.notify_all();
        #[cfg(feature = "async")]
        self.notify.notify_waiters();
        debug!("bind gate open");
    }

    pub fn is_bound(&self) -> bool {
        *self.lock()
    }

    /// Block the calling thread until the channel is bound.
    pub fn wait_bound(&self) {
        let bound = self.lock();
        let _bound = self
            .released
            .wait_while(bound, |bound| !*bound)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Like [`wait_bound`](Self::wait_bound) but gives up after `timeout`.
    ///
    /// Returns whether the channel is bound.
    pub fn wait_bound_timeout(&self, timeout: Duration) -> bool {
        let bound = self.lock();
        let (bound, _) = self
            .released
            .wait_timeout_while(bound, timeout, |bound| !*bound)
            .unwrap_or_else(PoisonError::into_inner);
        *bound
    }

    /// Wait for the bind from an async task.
    #[cfg(feature = "async")]
    pub async fn wait_bound_async(&self) {
        loop {
            // Registered before the check, so a signal in between is not lost.
            let notified = self.notify.notified();
            if self.is_bound() {
                return;
            }
            notified.await;
        }
    }

    // The flag is a plain bool; a panicking holder cannot leave it torn.
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.bound.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn wait_after_signal_returns_immediately() {
        let gate = BindGate::new();
        gate.signal_bound();
        let start = Instant::now();
        gate.wait_bound();
        assert!(start.elapsed() < Duration::from_millis(100));
        assert!(gate.is_bound());
    }

    #[test]
    fn waiters_before_signal_are_released() {
        let gate = Arc::new(BindGate::new());
        let (tx, rx) = mpsc::channel();

        let waiters: Vec<_> = (0..4)
            .map(|i| {
                let gate = Arc::clone(&gate);
                let tx = tx.clone();
                thread::spawn(move || {
                    gate.wait_bound();
                    tx.send(i).unwrap();
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        assert!(rx.try_recv().is_err(), "no waiter may pass before bind");

        gate.signal_bound();
        for waiter in waiters {
            waiter.join().unwrap();
        }
        let mut released: Vec<i32> = rx.try_iter().collect();
        released.sort_unstable();
        assert_eq!(released, vec![0, 1, 2, 3]);
    }

    #[test]
    fn double_signal_is_harmless() {
        let gate = BindGate::new();
        gate.signal_bound();
        gate.signal_bound();
        assert!(gate.is_bound());
        gate.wait_bound();
        assert!(gate.wait_bound_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn timeout_without_signal_reports_unbound() {
        let gate = BindGate::new();
        assert!(!gate.wait_bound_timeout(Duration::from_millis(10)));
        assert!(!gate.is_bound());
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn async_waiter_released_by_signal() {
        let gate = Arc::new(BindGate::new());
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.wait_bound_async().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.signal_bound();

        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("async waiter should be released")
            .unwrap();

        // Already bound: returns without waiting.
        gate.wait_bound_async().await;
    }
}
