use std::marker::PhantomData;

use bulkhead_limit::Bulkhead;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::util::BoxCloneSyncService;

use crate::BulkheadError;
use crate::BulkheadService;

/// A bulkhead stack whose every error is a [`BulkheadError`].
///
/// Requests queue for at most the bulkhead's `max_wait_duration` in
/// `poll_ready`; past that they fail fast with `BulkheadError::Rejected`.
/// Once admitted, a request runs to completion under its permit.
///
/// ### Error Responsibilities:
/// - **Rejected (`BulkheadError::Rejected`)**: no permit freed up within the
///   wait budget. The inner service never sees the request.
/// - **Inner (`BulkheadError::Inner`)**: the inner service failed while
///   holding a permit. The permit is still returned.
pub struct ManagedBulkheadLayer<Req> {
    bulkhead: Bulkhead,
    _phantom: PhantomData<fn(Req)>,
}

// Note: Deriving Clone causes issues when using the layer with Axum.
// We'll just implemented it explicitly.
impl<Req> Clone for ManagedBulkheadLayer<Req> {
    fn clone(&self) -> Self {
        Self {
            bulkhead: self.bulkhead.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<S, Req> Layer<S> for ManagedBulkheadLayer<Req>
where
    S: Service<Req, Error = BoxError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Response: 'static,
    Req: Send + 'static,
{
    type Service = BoxCloneSyncService<Req, S::Response, BoxError>;

    fn layer(&self, inner: S) -> Self::Service {
        let svc = BulkheadService::new(inner, self.bulkhead.clone());

        // Map the mixed errors into BulkheadError
        let mapped_svc = tower::util::MapErr::new(svc, |err: BoxError| {
            if let Some(bulkhead_err) = err.downcast_ref::<BulkheadError>() {
                BoxError::from(bulkhead_err.clone())
            } else {
                // Wrap any other inner service errors
                Box::from(BulkheadError::Inner(err.to_string()))
            }
        });

        BoxCloneSyncService::new(mapped_svc)
    }
}

impl<Req> ManagedBulkheadLayer<Req> {
    pub fn new(bulkhead: Bulkhead) -> Self {
        Self {
            bulkhead,
            _phantom: PhantomData,
        }
    }
}
