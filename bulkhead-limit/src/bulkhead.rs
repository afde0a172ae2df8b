use std::ops::ControlFlow;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use quanta::Clock;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio::time::timeout_at;

use crate::BulkheadConfig;
use crate::Reason;

#[derive(Debug)]
struct Shared {
    name: String,
    config: BulkheadConfig,
    available: AtomicUsize,
    waiting: AtomicUsize,
    released: Notify,
    clock: Clock,
}

impl Shared {
    fn try_take(&self) -> bool {
        self.available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    fn release(&self) {
        let previous = self.available.fetch_add(1, Ordering::AcqRel);
        debug_assert!(
            previous < self.config.max_concurrent_calls().get(),
            "bulkhead `{}` released more permits than it granted",
            self.name
        );
        self.released.notify_one();
    }
}

/// A named admission gate bounding concurrent calls to one resource.
///
/// `Bulkhead` is a handle: clones share the same permits, so a single
/// bulkhead can be handed to every task that touches the resource.
#[derive(Clone, Debug)]
pub struct Bulkhead {
    shared: Arc<Shared>,
}

/// A point-in-time view of a bulkhead's admission state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BulkheadMetrics {
    pub max_concurrent_calls: usize,
    pub available_permits: usize,
    pub waiting_calls: usize,
}

impl BulkheadMetrics {
    /// Calls currently holding a permit.
    pub fn in_flight_calls(&self) -> usize {
        self.max_concurrent_calls - self.available_permits
    }
}

impl Bulkhead {
    pub fn new(name: impl Into<String>, config: BulkheadConfig) -> Self {
        Self::with_clock(name, config, Clock::new())
    }

    /// Build a bulkhead that measures permit hold times with `clock`.
    pub fn with_clock(name: impl Into<String>, config: BulkheadConfig, clock: Clock) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                config,
                available: AtomicUsize::new(config.max_concurrent_calls().get()),
                waiting: AtomicUsize::new(0),
                released: Notify::new(),
                clock,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> &BulkheadConfig {
        &self.shared.config
    }

    /// Attempts to admit a call, queueing for up to the configured
    /// `max_wait_duration` when no permit is free.
    ///
    /// The returned [`Permit`] must be held for the duration of the protected
    /// work. Rejection never consumes a permit. Dropping this future while it
    /// is queued abandons the wait without side effects.
    pub async fn acquire(&self) -> ControlFlow<Reason, Permit> {
        let started = Instant::now();
        if self.shared.try_take() {
            return ControlFlow::Continue(self.permit(Duration::ZERO));
        }

        let max_wait = self.shared.config.max_wait_duration();
        if max_wait.is_zero() {
            return ControlFlow::Break(Reason::Saturated {
                waited: Duration::ZERO,
            });
        }

        let deadline = started + max_wait;
        let _waiting = Waiting::enter(&self.shared.waiting);
        loop {
            // Register interest before re-checking so a release between the
            // check and the await still wakes us.
            let mut released = pin!(self.shared.released.notified());
            released.as_mut().enable();

            if self.shared.try_take() {
                return ControlFlow::Continue(self.permit(started.elapsed()));
            }

            if timeout_at(deadline, released).await.is_err() {
                return ControlFlow::Break(Reason::Saturated {
                    waited: started.elapsed(),
                });
            }
        }
    }

    /// Admits a call only if a permit is free right now.
    pub fn try_acquire_now(&self) -> ControlFlow<Reason, Permit> {
        if self.shared.try_take() {
            ControlFlow::Continue(self.permit(Duration::ZERO))
        } else {
            ControlFlow::Break(Reason::Saturated {
                waited: Duration::ZERO,
            })
        }
    }

    pub fn metrics(&self) -> BulkheadMetrics {
        BulkheadMetrics {
            max_concurrent_calls: self.shared.config.max_concurrent_calls().get(),
            available_permits: self.shared.available.load(Ordering::Acquire),
            waiting_calls: self.shared.waiting.load(Ordering::Acquire),
        }
    }

    fn permit(&self, waited: Duration) -> Permit {
        Permit {
            shared: Arc::clone(&self.shared),
            waited,
            granted_at: self.shared.clock.now(),
        }
    }
}

/// One unit of bulkhead capacity, returned to the bulkhead on drop.
#[derive(Debug)]
#[must_use = "dropping a permit releases it immediately"]
pub struct Permit {
    shared: Arc<Shared>,
    waited: Duration,
    granted_at: quanta::Instant,
}

impl Permit {
    /// Name of the bulkhead that granted this permit.
    pub fn bulkhead(&self) -> &str {
        &self.shared.name
    }

    /// How long the caller queued before being admitted.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// How long this permit has been held so far.
    pub fn held_for(&self) -> Duration {
        self.shared.clock.now().duration_since(self.granted_at)
    }

    /// Return the permit to its bulkhead.
    pub fn release(self) {
        drop(self)
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.shared.release();
    }
}

struct Waiting<'a>(&'a AtomicUsize);

impl<'a> Waiting<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self(count)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use more_asserts::assert_ge;
    use more_asserts::assert_le;

    use super::*;

    fn bulkhead(capacity: usize, max_wait: Duration) -> Bulkhead {
        Bulkhead::new(
            "test",
            BulkheadConfig::new(NonZeroUsize::new(capacity).unwrap()).with_max_wait(max_wait),
        )
    }

    #[tokio::test]
    async fn it_rejects_immediately_without_queueing() {
        let bh = bulkhead(2, Duration::ZERO);

        let first = bh.acquire().await;
        let second = bh.acquire().await;
        assert!(first.is_continue());
        assert!(second.is_continue());

        assert_eq!(
            bh.acquire().await.break_value(),
            Some(Reason::Saturated {
                waited: Duration::ZERO
            })
        );
        assert_eq!(bh.metrics().available_permits, 0);
        assert_eq!(bh.metrics().in_flight_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn it_admits_a_queued_caller_on_release() {
        let bh = bulkhead(1, Duration::from_millis(50));
        let held = bh.acquire().await.continue_value().unwrap();

        let waiter = {
            let bh = bh.clone();
            tokio::spawn(async move { bh.acquire().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        held.release();

        let permit = waiter.await.unwrap().continue_value().expect("should be admitted");
        assert_ge!(permit.waited(), Duration::from_millis(20));
        assert_le!(permit.waited(), Duration::from_millis(21));
        assert_eq!(bh.metrics().available_permits, 0);

        drop(permit);
        assert_eq!(bh.metrics().available_permits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn it_rejects_after_max_wait() {
        let bh = bulkhead(1, Duration::from_millis(100));
        let _held = bh.acquire().await.continue_value().unwrap();

        let start = Instant::now();
        let outcome = bh.acquire().await;
        let elapsed = start.elapsed();

        let Some(Reason::Saturated { waited }) = outcome.break_value() else {
            panic!("should have been rejected");
        };
        assert_ge!(elapsed, Duration::from_millis(100));
        assert_le!(elapsed, Duration::from_millis(101));
        assert_eq!(waited, elapsed);
        assert_eq!(bh.metrics().waiting_calls, 0);
        assert_eq!(bh.metrics().available_permits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn it_counts_waiting_callers() {
        let bh = bulkhead(1, Duration::from_secs(1));
        let held = bh.acquire().await.continue_value().unwrap();

        let mut waiters = Vec::new();
        for _ in 0..3 {
            let bh = bh.clone();
            waiters.push(tokio::spawn(async move {
                bh.acquire().await.continue_value().map(|permit| permit.release())
            }));
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(bh.metrics().waiting_calls, 3);

        held.release();
        for waiter in waiters {
            assert!(waiter.await.unwrap().is_some());
        }
        assert_eq!(
            bh.metrics(),
            BulkheadMetrics {
                max_concurrent_calls: 1,
                available_permits: 1,
                waiting_calls: 0,
            }
        );
    }

    #[tokio::test]
    async fn it_abandons_a_cancelled_wait() {
        let bh = bulkhead(1, Duration::from_secs(10));
        let held = bh.acquire().await.continue_value().unwrap();

        let mut queued = Box::pin(bh.acquire());
        assert!(futures::poll!(queued.as_mut()).is_pending());
        assert_eq!(bh.metrics().waiting_calls, 1);

        drop(queued);
        assert_eq!(bh.metrics().waiting_calls, 0);

        held.release();
        assert_eq!(bh.metrics().available_permits, 1);
        assert!(bh.try_acquire_now().is_continue());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn it_never_exceeds_capacity_under_contention() {
        let capacity = 5;
        let bh = bulkhead(capacity, Duration::from_secs(5));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..200 {
            let bh = bh.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let ControlFlow::Continue(permit) = bh.acquire().await else {
                    return false;
                };
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
                true
            }));
        }

        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 200, "every caller should fit in the wait budget");
        assert_le!(peak.load(Ordering::SeqCst), capacity);
        assert_eq!(bh.metrics().available_permits, capacity);
        assert_eq!(bh.metrics().waiting_calls, 0);
    }

    #[test]
    fn it_shares_permits_across_clones() {
        let bh = bulkhead(1, Duration::ZERO);
        let other = bh.clone();

        let permit = bh.try_acquire_now().continue_value().unwrap();
        assert!(other.try_acquire_now().is_break());
        assert_eq!(permit.bulkhead(), "test");

        permit.release();
        assert!(other.try_acquire_now().is_continue());
    }

    #[test]
    fn it_measures_hold_time_with_the_supplied_clock() {
        let (clock, mock) = Clock::mock();
        let bh = Bulkhead::with_clock(
            "timed",
            BulkheadConfig::new(NonZeroUsize::new(1).unwrap()),
            clock,
        );

        let permit = bh.try_acquire_now().continue_value().unwrap();
        mock.increment(Duration::from_millis(250));
        assert_eq!(permit.held_for(), Duration::from_millis(250));
    }
}
