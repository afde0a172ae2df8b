use std::time::Duration;

/// Errors produced by the bulkhead middleware stack.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BulkheadError {
    /// Every permit stayed in use for the whole wait budget.
    ///
    /// When the `axum` feature is enabled, this converts to `503 Service Unavailable`.
    #[error("bulkhead `{bulkhead}` is saturated; rejected after {waited:?}")]
    Rejected {
        /// The bulkhead that refused admission.
        bulkhead: String,
        /// How long the request queued before being refused.
        waited: Duration,
    },

    /// `call` was invoked without a permit granted by `poll_ready`.
    ///
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("call made without a bulkhead permit; poll_ready must succeed first")]
    Unadmitted,

    /// An unexpected error occurred in the inner service.
    ///
    /// The string contains the `Display` representation of the inner error.
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Internal service error: {0}")]
    Inner(String),
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for BulkheadError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match self {
            Self::Rejected { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unadmitted | Self::Inner(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, self.to_string()).into_response()
    }
}
