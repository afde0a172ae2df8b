use std::time::Duration;

use http::StatusCode;
use tower::BoxError;

/// Why a guarded call produced a fallback instead of a result.
#[derive(Debug, thiserror::Error)]
pub enum Failure {
    /// The bulkhead refused admission; the operation never ran.
    #[error("bulkhead `{bulkhead}` rejected the call after {waited:?}")]
    Rejected { bulkhead: String, waited: Duration },

    /// The operation ran while holding a permit and returned an error.
    #[error("operation guarded by `{bulkhead}` failed: {source}")]
    Operation {
        bulkhead: String,
        #[source]
        source: BoxError,
    },
}

impl Failure {
    pub fn bulkhead(&self) -> &str {
        match self {
            Self::Rejected { bulkhead, .. } | Self::Operation { bulkhead, .. } => bulkhead,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// A degraded, renderable result standing in for the operation's own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackOutcome {
    pub status: StatusCode,
    pub reason: String,
}

impl From<&Failure> for FallbackOutcome {
    fn from(failure: &Failure) -> Self {
        let reason = match failure {
            Failure::Rejected { bulkhead, .. } => format!("`{bulkhead}` is at capacity"),
            Failure::Operation { bulkhead, .. } => format!("`{bulkhead}` operation failed"),
        };
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            reason,
        }
    }
}

/// The default fallback policy: every failure becomes `503 Service Unavailable`.
pub fn service_unavailable(failure: Failure) -> FallbackOutcome {
    FallbackOutcome::from(&failure)
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for FallbackOutcome {
    fn into_response(self) -> axum::response::Response {
        (self.status, self.reason).into_response()
    }
}
