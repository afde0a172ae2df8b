//! # bulkhead-limit
//!
//! `bulkhead-limit` provides named, independently configured bulkheads: admission
//! gates that bound how many calls may use a resource at once.
//!
//! ## Core Philosophy
//!
//! The hot path is a single Compare-And-Swap on an atomic permit counter. Only callers
//! that find the bulkhead full touch anything else: they park on a notifier for at most
//! the configured `max_wait_duration` and are then rejected. Permits are RAII guards,
//! so a permit cannot be released twice or leaked by an early return.
//!
//! ## Key Concepts
//!
//! * **Capacity**: No more than `max_concurrent_calls` permits are ever outstanding.
//! * **Bounded Wait**: Queued callers wait at most `max_wait_duration`; zero means
//!   reject immediately.
//! * **Isolation**: Every named bulkhead in a [`Registry`] has its own permits.
//!
//! ## Example
//!
//! ```rust
//! use bulkhead_limit::BulkheadConfig;
//! use bulkhead_limit::Registry;
//! use std::num::NonZeroUsize;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let registry = Registry::new();
//! let config = BulkheadConfig::new(NonZeroUsize::new(8).unwrap())
//!     .with_max_wait(Duration::from_millis(100));
//! let bulkhead = registry.create("db", config).unwrap();
//!
//! if let std::ops::ControlFlow::Continue(permit) = bulkhead.acquire().await {
//!     // Call the database, then let `permit` drop.
//!     # drop(permit);
//! }
//! # }
//! ```

use std::time::Duration;

mod bulkhead;
mod config;
mod registry;

pub use bulkhead::Bulkhead;
pub use bulkhead::BulkheadMetrics;
pub use bulkhead::Permit;
pub use config::BulkheadConfig;
pub use config::ConfigError;
pub use registry::NotFoundError;
pub use registry::Registry;

/// Reasons why a call might not be admitted by a bulkhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// Every permit stayed in use for the whole wait budget.
    Saturated { waited: Duration },
}
