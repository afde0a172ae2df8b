use bulkhead_limit::Bulkhead;
use bulkhead_limit::NotFoundError;
use bulkhead_limit::Registry;
use tower::ServiceBuilder;
use tower::layer::util::Stack;

use crate::BulkheadLayer;

/// Service Builder Extension with additional useful functions for tower::ServiceBuilder.
pub trait ServiceBuilderExt<L> {
    /// Add a bulkhead layer
    fn bulkhead(self, bulkhead: Bulkhead) -> ServiceBuilder<Stack<BulkheadLayer, L>>;

    /// Add the bulkhead registered as `name`
    fn named_bulkhead(
        self,
        registry: &Registry,
        name: &str,
    ) -> Result<ServiceBuilder<Stack<BulkheadLayer, L>>, NotFoundError>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn bulkhead(self, bulkhead: Bulkhead) -> ServiceBuilder<Stack<BulkheadLayer, L>> {
        self.layer(BulkheadLayer::new(bulkhead))
    }

    fn named_bulkhead(
        self,
        registry: &Registry,
        name: &str,
    ) -> Result<ServiceBuilder<Stack<BulkheadLayer, L>>, NotFoundError> {
        Ok(self.bulkhead(registry.get(name)?))
    }
}
