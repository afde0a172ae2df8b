use std::future::Future;
use std::ops::ControlFlow;
use std::sync::OnceLock;
use std::time::Duration;

use bulkhead_limit::Bulkhead;
use bulkhead_limit::NotFoundError;
use bulkhead_limit::Reason;
use bulkhead_limit::Registry;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use opentelemetry::metrics::Histogram;
use tokio::time::Instant;
use tower::BoxError;
use tracing::info;
use tracing::warn;

use crate::fallback::Failure;

/// Terminal state of one guarded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Succeeded,
    Failed,
    Rejected,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }
}

struct InvokeMetrics {
    calls: Counter<u64>,
    wait: Histogram<f64>,
}

fn instruments() -> &'static InvokeMetrics {
    static INSTRUMENTS: OnceLock<InvokeMetrics> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("bulkhead");
        InvokeMetrics {
            calls: meter
                .u64_counter("bulkhead_calls")
                .with_description("Guarded calls by outcome")
                .build(),
            wait: meter
                .f64_histogram("bulkhead_wait")
                .with_unit("ms")
                .with_description("Time spent queueing for a permit")
                .build(),
        }
    })
}

/// One caller's pass through a bulkhead, from arrival to outcome.
#[derive(Debug)]
pub(crate) struct CallAttempt<'a> {
    bulkhead: &'a str,
    admitted: bool,
    started: Instant,
}

impl<'a> CallAttempt<'a> {
    fn start(bulkhead: &'a Bulkhead) -> Self {
        Self {
            bulkhead: bulkhead.name(),
            admitted: false,
            started: Instant::now(),
        }
    }

    fn finish(self, outcome: CallOutcome, waited: Duration) {
        let elapsed = self.started.elapsed();
        let waited_ms = waited.as_secs_f64() * 1_000.0;
        match outcome {
            CallOutcome::Succeeded => info!(
                bulkhead = self.bulkhead,
                outcome = outcome.as_str(),
                admitted = self.admitted,
                waited_ms,
                elapsed_ms = elapsed.as_millis() as u64,
                "bulkhead call"
            ),
            CallOutcome::Failed | CallOutcome::Rejected => warn!(
                bulkhead = self.bulkhead,
                outcome = outcome.as_str(),
                admitted = self.admitted,
                waited_ms,
                elapsed_ms = elapsed.as_millis() as u64,
                "bulkhead call"
            ),
        }

        let metrics = instruments();
        let attributes = [
            KeyValue::new("bulkhead", self.bulkhead.to_string()),
            KeyValue::new("outcome", outcome.as_str()),
        ];
        metrics.calls.add(1, &attributes);
        metrics.wait.record(waited_ms, &attributes[..1]);
    }
}

/// Runs `operation` under `bulkhead`, or produces `fallback` instead.
///
/// - Rejected: `operation` never runs and `Err(fallback(Failure::Rejected))`
///   is returned.
/// - Admitted: `operation` runs while holding the permit. Its error, if any,
///   is logged and replaced with `Err(fallback(Failure::Operation))`.
///
/// The permit is released exactly once however this future ends, including
/// when it is dropped mid-operation.
pub async fn invoke<T, E, Op, Fut, Fb, R>(
    bulkhead: &Bulkhead,
    operation: Op,
    fallback: Fb,
) -> Result<T, R>
where
    Op: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
    Fb: FnOnce(Failure) -> R,
{
    let mut attempt = CallAttempt::start(bulkhead);

    let permit = match bulkhead.acquire().await {
        ControlFlow::Continue(permit) => permit,
        ControlFlow::Break(Reason::Saturated { waited }) => {
            attempt.finish(CallOutcome::Rejected, waited);
            return Err(fallback(Failure::Rejected {
                bulkhead: bulkhead.name().to_string(),
                waited,
            }));
        }
    };
    attempt.admitted = true;
    let waited = permit.waited();

    let result = operation().await;
    permit.release();

    match result {
        Ok(value) => {
            attempt.finish(CallOutcome::Succeeded, waited);
            Ok(value)
        }
        Err(err) => {
            let source = err.into();
            warn!(bulkhead = bulkhead.name(), error = %source, "guarded operation failed");
            attempt.finish(CallOutcome::Failed, waited);
            Err(fallback(Failure::Operation {
                bulkhead: bulkhead.name().to_string(),
                source,
            }))
        }
    }
}

/// Looks up `name` in `registry` and runs [`invoke`] under it.
///
/// # Errors
///
/// An unregistered name is a caller bug and is returned as `NotFoundError`
/// without running anything.
pub async fn guarded<T, E, Op, Fut, Fb, R>(
    registry: &Registry,
    name: &str,
    operation: Op,
    fallback: Fb,
) -> Result<Result<T, R>, NotFoundError>
where
    Op: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
    Fb: FnOnce(Failure) -> R,
{
    let bulkhead = registry.get(name)?;
    Ok(invoke(&bulkhead, operation, fallback).await)
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use bulkhead_limit::BulkheadConfig;
    use futures::future::join_all;
    use http::StatusCode;
    use more_asserts::assert_ge;
    use more_asserts::assert_le;
    use tokio::time::sleep;

    use super::*;
    use crate::fallback::FallbackOutcome;
    use crate::fallback::service_unavailable;

    fn bulkhead(capacity: usize, max_wait: Duration) -> Bulkhead {
        Bulkhead::new(
            "test",
            BulkheadConfig::new(NonZeroUsize::new(capacity).unwrap()).with_max_wait(max_wait),
        )
    }

    async fn work(duration: Duration) -> Result<&'static str, BoxError> {
        sleep(duration).await;
        Ok("done")
    }

    #[tokio::test(start_paused = true)]
    async fn it_sheds_the_overflow_without_queueing() {
        let bh = bulkhead(2, Duration::ZERO);

        let results = join_all((0..3).map(|_| {
            invoke(&bh, || work(Duration::from_millis(100)), service_unavailable)
        }))
        .await;

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        let rejected: Vec<&FallbackOutcome> =
            results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(succeeded, 2);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(bh.metrics().available_permits, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn it_admits_queued_callers_within_the_wait_budget() {
        let bh = &bulkhead(2, Duration::from_millis(50));

        let results = join_all((0..3).map(|_| async move {
            let start = Instant::now();
            let res = invoke(bh, || work(Duration::from_millis(20)), service_unavailable).await;
            (res, start.elapsed())
        }))
        .await;

        for (res, _) in &results {
            assert_eq!(res.as_ref().ok(), Some(&"done"));
        }
        // The third caller waits for one of the first two to finish.
        let slowest = results.iter().map(|(_, elapsed)| *elapsed).max().unwrap();
        assert_ge!(slowest, Duration::from_millis(40));
        assert_le!(slowest, Duration::from_millis(42));
    }

    #[tokio::test(start_paused = true)]
    async fn it_rejects_at_the_wait_deadline() {
        let bh = bulkhead(1, Duration::from_millis(100));

        let holder = invoke(&bh, || work(Duration::from_millis(200)), service_unavailable);
        let late = async {
            let start = Instant::now();
            let res = invoke(&bh, || work(Duration::from_millis(1)), |failure| failure);
            (res.await, start.elapsed())
        };
        let (held, (late, elapsed)) = tokio::join!(holder, late);

        assert!(held.is_ok());
        let failure = late.unwrap_err();
        assert!(failure.is_rejected());
        assert_ge!(elapsed, Duration::from_millis(100));
        assert_le!(elapsed, Duration::from_millis(101));
    }

    #[tokio::test(start_paused = true)]
    async fn it_releases_the_permit_when_the_operation_fails() {
        let bh = bulkhead(1, Duration::from_secs(1));

        let failed = invoke(
            &bh,
            || async { Err::<(), _>("database unavailable") },
            |failure| failure,
        )
        .await;
        let failure = failed.unwrap_err();
        assert!(!failure.is_rejected());
        assert_eq!(failure.bulkhead(), "test");

        // A follow-up call is admitted at once rather than waiting a full second.
        let start = Instant::now();
        let next = invoke(&bh, || work(Duration::ZERO), service_unavailable).await;
        assert_eq!(next, Ok("done"));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(bh.metrics().available_permits, 1);
    }

    #[tokio::test]
    async fn it_never_runs_the_operation_when_rejected() {
        let bh = bulkhead(1, Duration::ZERO);
        let _held = bh.try_acquire_now().continue_value().unwrap();

        let mut ran = false;
        let res = invoke(
            &bh,
            || {
                ran = true;
                work(Duration::ZERO)
            },
            service_unavailable,
        )
        .await;

        assert!(!ran);
        assert_eq!(res.unwrap_err().reason, "`test` is at capacity");
    }

    #[tokio::test]
    async fn it_releases_the_permit_when_cancelled() {
        let bh = bulkhead(1, Duration::ZERO);

        let mut call = Box::pin(invoke(
            &bh,
            || futures::future::pending::<Result<(), BoxError>>(),
            service_unavailable,
        ));
        assert!(futures::poll!(call.as_mut()).is_pending());
        assert_eq!(bh.metrics().available_permits, 0);

        drop(call);
        assert_eq!(bh.metrics().available_permits, 1);
    }

    #[tokio::test]
    async fn it_releases_the_permit_when_the_operation_panics() {
        let bh = bulkhead(1, Duration::ZERO);

        let task = {
            let bh = bh.clone();
            tokio::spawn(async move {
                invoke(
                    &bh,
                    || async {
                        if bh.name() == "test" {
                            panic!("operation blew up");
                        }
                        Ok::<(), BoxError>(())
                    },
                    service_unavailable,
                )
                .await
            })
        };

        assert!(task.await.unwrap_err().is_panic());
        assert_eq!(bh.metrics().available_permits, 1);
    }

    #[tokio::test]
    async fn it_resolves_bulkheads_by_name() {
        let registry = Registry::new();
        registry
            .create("a", BulkheadConfig::new(NonZeroUsize::new(1).unwrap()))
            .unwrap();

        let res = guarded(&registry, "a", || work(Duration::ZERO), service_unavailable).await;
        assert_eq!(res, Ok(Ok("done")));

        let missing = guarded(&registry, "b", || work(Duration::ZERO), service_unavailable).await;
        assert_eq!(missing, Err(NotFoundError("b".to_string())));
    }
}
