use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use bulkhead_limit::Bulkhead;
use bulkhead_limit::Permit;
use bulkhead_limit::Reason;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use pin_project_lite::pin_project;
use tower::BoxError;
use tower::Service;
use tracing::debug;

use crate::error::BulkheadError;

type Acquiring = Pin<Box<dyn Future<Output = ControlFlow<Reason, Permit>> + Send + Sync>>;

#[derive(Clone, Debug)]
struct BulkheadServiceMetrics {
    rejected: Counter<u64>,
}

/// Holds a bulkhead permit from `poll_ready` until the response completes.
pub struct BulkheadService<S> {
    inner: S,
    bulkhead: Bulkhead,
    acquiring: Option<Acquiring>,
    permit: Option<Permit>,
    instruments: BulkheadServiceMetrics,
}

pin_project! {
    /// Drives the inner response future while holding its permit.
    ///
    /// `inner` is `None` when `call` ran without a permit.
    pub struct ResponseFuture<F> {
        #[pin]
        inner: Option<F>,
        permit: Option<Permit>,
    }
}

impl<F, T> Future for ResponseFuture<F>
where
    F: Future<Output = Result<T, BoxError>>,
{
    type Output = Result<T, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let Some(inner) = this.inner.as_pin_mut() else {
            return Poll::Ready(Err(Box::new(BulkheadError::Unadmitted)));
        };
        match inner.poll(cx) {
            Poll::Ready(res) => {
                // Release as soon as the response is ready, not when the
                // caller gets round to dropping us.
                drop(this.permit.take());
                Poll::Ready(res)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for BulkheadService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkheadService")
            .field("inner", &self.inner)
            .field("bulkhead", &self.bulkhead)
            .field("acquiring", &self.acquiring.is_some())
            .field("permit", &self.permit)
            .finish()
    }
}

// Manually implement Clone: an in-progress acquisition belongs to this
// instance only, and a permit must never be duplicated.
impl<S> Clone for BulkheadService<S>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            bulkhead: self.bulkhead.clone(),
            acquiring: None,
            permit: None,
            instruments: self.instruments.clone(),
        }
    }
}

impl<S, Req> Service<Req> for BulkheadService<S>
where
    S: Service<Req, Error = BoxError>,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // 1. Secure a permit first; inner readiness is irrelevant without one.
        if self.permit.is_none() {
            let acquiring = self.acquiring.get_or_insert_with(|| {
                let bulkhead = self.bulkhead.clone();
                Box::pin(async move { bulkhead.acquire().await }) as Acquiring
            });

            let outcome = match acquiring.as_mut().poll(cx) {
                Poll::Ready(outcome) => outcome,
                Poll::Pending => return Poll::Pending,
            };
            self.acquiring = None;

            match outcome {
                ControlFlow::Continue(permit) => {
                    debug!(
                        bulkhead = self.bulkhead.name(),
                        waited_ms = permit.waited().as_millis() as u64,
                        "permit acquired"
                    );
                    self.permit = Some(permit);
                }
                ControlFlow::Break(Reason::Saturated { waited }) => {
                    self.instruments.rejected.add(
                        1,
                        &[KeyValue::new("bulkhead", self.bulkhead.name().to_string())],
                    );
                    return Poll::Ready(Err(Box::new(BulkheadError::Rejected {
                        bulkhead: self.bulkhead.name().to_string(),
                        waited,
                    })));
                }
            }
        }

        // 2. Then wait for the inner service while holding it.
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        match self.permit.take() {
            Some(permit) => ResponseFuture {
                inner: Some(self.inner.call(req)),
                permit: Some(permit),
            },
            None => ResponseFuture {
                inner: None,
                permit: None,
            },
        }
    }
}

impl<S> BulkheadService<S> {
    pub fn new(inner: S, bulkhead: Bulkhead) -> Self {
        let meter = global::meter("bulkhead_service");
        let instruments = BulkheadServiceMetrics {
            rejected: meter.u64_counter("bulkhead_rejected").build(),
        };

        Self {
            inner,
            bulkhead,
            acquiring: None,
            permit: None,
            instruments,
        }
    }

    pub fn bulkhead(&self) -> &Bulkhead {
        &self.bulkhead
    }
}
