use bulkhead_limit::Bulkhead;
use tower::Layer;

use crate::service::BulkheadService;

/// Applies a [`Bulkhead`] to requests.
#[derive(Clone, Debug)]
pub struct BulkheadLayer {
    bulkhead: Bulkhead,
}

impl BulkheadLayer {
    /// Create a BulkheadLayer
    ///
    /// Every service produced by this layer shares the bulkhead's permits.
    pub fn new(bulkhead: Bulkhead) -> Self {
        BulkheadLayer { bulkhead }
    }
}

impl<S> Layer<S> for BulkheadLayer {
    type Service = BulkheadService<S>;

    fn layer(&self, service: S) -> Self::Service {
        BulkheadService::new(service, self.bulkhead.clone())
    }
}
