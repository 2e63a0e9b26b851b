//! Timers owned by a client.
//!
//! Every timer is a spawned tokio task; the registry keeps the handles so all of them can be
//! aborted when the client is destroyed.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::future;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{trace, warn};

/// Handle to a registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug, Default)]
pub struct TimerRegistry {
    timers: Mutex<Timers>,
}

#[derive(Debug, Default)]
struct Timers {
    next_id: u64,
    handles: HashMap<u64, JoinHandle<()>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `callback` once after `delay`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_timer<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce() + Send + 'static,
    {
        self.register(tokio::spawn(async move {
            time::sleep(delay).await;
            callback();
        }))
    }

    /// Runs `callback` every `period`, the first time one period from now.
    pub fn add_periodic_timer<F>(&self, period: Duration, mut callback: F) -> TimerId
    where
        F: FnMut() + Send + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        self.register(tokio::spawn(async move {
            let Some(start) = Instant::now().checked_add(period) else {
                warn!(?period, "timer period out of range, it never fires");
                return future::pending().await;
            };
            let mut interval = time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                callback();
            }
        }))
    }

    /// Aborts one timer. Returns false if it was unknown or already cancelled.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        match self.timers.lock().handles.remove(&id.0) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Aborts every timer.
    pub fn cancel_all(&self) {
        let handles: Vec<_> = self.timers.lock().handles.drain().map(|(_, handle)| handle).collect();
        trace!(timers = handles.len(), "cancelling timers");
        for handle in handles {
            handle.abort();
        }
    }

    /// Timers which have neither fired (one-shot) nor been cancelled.
    pub fn active(&self) -> usize {
        let mut timers = self.timers.lock();
        timers.handles.retain(|_, handle| !handle.is_finished());
        timers.handles.len()
    }

    fn register(&self, handle: JoinHandle<()>) -> TimerId {
        let mut timers = self.timers.lock();
        timers.handles.retain(|_, handle| !handle.is_finished());

        let id = timers.next_id;
        timers.next_id += 1;
        timers.handles.insert(id, handle);
        TimerId(id)
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn one_shot_timer_fires_once() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        registry.add_timer(Duration::from_secs(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(registry.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_timer_repeats_until_cancelled() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let id = registry.add_periodic_timer(Duration::from_secs(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        time::sleep(Duration::from_secs(35)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);

        assert!(registry.cancel_timer(id));
        assert!(!registry.cancel_timer(id));
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_stops_everything() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));

        for delay in [1, 2, 3] {
            let counter = fired.clone();
            registry.add_timer(Duration::from_secs(delay), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        let counter = fired.clone();
        registry.add_periodic_timer(Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(registry.active(), 4);

        registry.cancel_all();
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(registry.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_period_stays_registered() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let id = registry.add_periodic_timer(Duration::MAX, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(registry.active(), 1);
        assert!(registry.cancel_timer(id));
    }
}
