//! # Tower Bulkhead
//!
//! `tower-bulkhead` puts [`bulkhead_limit`] bulkheads in front of work: either a
//! single async operation via [`invoke`], or a whole [Tower](https://github.com/tower-rs/tower)
//! service via [`BulkheadLayer`].
//!
//! ## Guarded Invocation
//! [`invoke`] is the composition point: admission, execution, release and fallback
//! in one explicit function.
//!
//! 1. **Admission**: waits up to the bulkhead's `max_wait_duration` for a permit.
//! 2. **Execution**: runs the operation while holding the permit. The permit is
//!    released on every exit path, including cancellation.
//! 3. **Fallback**: a rejection or an operation error is handed to the caller's
//!    fallback, e.g. [`service_unavailable`], and never escapes as a raw error.
//!
//! ## The Managed Stack
//! [`ManagedBulkheadLayer`] wraps a service so that every error it yields is a
//! cloneable [`BulkheadError`].
//!
//! ## Startup
//! [`Settings`] loads per-bulkhead configuration from TOML into a
//! [`Registry`](bulkhead_limit::Registry); [`Telemetry`] owns the process-wide
//! log pipeline.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`FallbackOutcome`] and [`BulkheadError`].

mod error;
mod fallback;
mod invoke;
mod layer;
mod managed_layer;
mod service;
mod settings;
mod telemetry;
mod utils;


pub use error::BulkheadError;
pub use fallback::FallbackOutcome;
pub use fallback::Failure;
pub use fallback::service_unavailable;
pub use invoke::CallOutcome;
pub use invoke::guarded;
pub use invoke::invoke;
pub use layer::BulkheadLayer;
pub use managed_layer::ManagedBulkheadLayer;
pub use service::BulkheadService;
pub use service::ResponseFuture;
pub use settings::BulkheadSettings;
pub use settings::Settings;
pub use settings::SettingsError;
pub use telemetry::Telemetry;
pub use telemetry::TelemetryConfig;
pub use telemetry::TelemetryError;
pub use utils::ServiceBuilderExt;
