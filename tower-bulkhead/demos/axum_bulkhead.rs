use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::Form;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use bulkhead_limit::Registry;
use serde::Deserialize;
use tokio::time::sleep;
use tower::BoxError;
use tower_bulkhead::Settings;
use tower_bulkhead::Telemetry;
use tower_bulkhead::TelemetryConfig;
use tower_bulkhead::guarded;
use tower_bulkhead::service_unavailable;
use tracing::info;

const SETTINGS: &str = r#"
[bulkheads.bulkhead-a]
max_concurrent_calls = 8
max_wait_duration = "1s"

[bulkheads.bulkhead-b]
max_concurrent_calls = 2
max_wait_duration = "1s"
"#;

#[derive(Clone)]
struct AppState {
    registry: Arc<Registry>,
    // Artificial latency for /api/a, to push it into its bulkhead under load.
    delay_ms: Arc<AtomicU64>,
}

#[derive(Deserialize)]
struct WaitDuration {
    #[serde(rename = "wait-duration")]
    wait_duration: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 1. Logging, optionally mirrored to $LOG_PATH
    let telemetry = Telemetry::init(&TelemetryConfig {
        filter: None,
        log_path: std::env::var_os("LOG_PATH").map(Into::into),
    })?;

    // 2. One bulkhead per protected resource
    let registry = Arc::new(Settings::from_toml(SETTINGS)?.build_registry()?);
    let state = AppState {
        registry,
        delay_ms: Arc::new(AtomicU64::new(0)),
    };

    // 3. Build the Router
    let app = Router::new()
        .route("/api/a", get(get_a))
        .route("/api/b", get(get_b))
        .route("/api/a/wait-duration", post(post_wait_duration))
        .with_state(state);

    // 4. Serve
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    info!("📡 Listening on http://127.0.0.1:3000");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    telemetry.shutdown()?;
    Ok(())
}

async fn get_a(State(state): State<AppState>) -> Response {
    let delay = Duration::from_millis(state.delay_ms.load(Ordering::Relaxed));
    respond(&state.registry, "bulkhead-a", move || async move {
        sleep(delay).await;
        Ok("A")
    })
    .await
}

async fn get_b(State(state): State<AppState>) -> Response {
    respond(&state.registry, "bulkhead-b", || async { Ok("B") }).await
}

async fn post_wait_duration(
    State(state): State<AppState>,
    Form(form): Form<WaitDuration>,
) -> StatusCode {
    if let Some(ms) = form.wait_duration.and_then(|ms| u64::try_from(ms).ok()) {
        state.delay_ms.store(ms, Ordering::Relaxed);
        info!(wait_duration_ms = ms, "wait duration updated");
    }
    StatusCode::NO_CONTENT
}

async fn respond<Op, Fut>(registry: &Registry, name: &str, operation: Op) -> Response
where
    Op: FnOnce() -> Fut,
    Fut: Future<Output = Result<&'static str, BoxError>>,
{
    let response = match guarded(registry, name, operation, service_unavailable).await {
        Ok(Ok(body)) => (StatusCode::OK, body).into_response(),
        Ok(Err(fallback)) => fallback.into_response(),
        Err(not_found) => {
            (StatusCode::INTERNAL_SERVER_ERROR, not_found.to_string()).into_response()
        }
    };
    info!(
        bulkhead = name,
        status = response.status().as_u16(),
        "response status"
    );
    response
}
