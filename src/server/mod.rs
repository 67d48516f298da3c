//! HTTP transport for the write and read endpoints.
//!
//! Routes:
//! - `POST /`, `POST /events`: ingest one event payload
//! - `GET /`, `GET /summary`: aggregate counters
//! - `GET /health`: liveness, no document access
//!
//! Clients branch on the JSON body (`status` / `reason`); status codes are
//! advisory. The ingest pipeline is blocking (file I/O plus a bounded guard
//! wait) and runs on the blocking pool.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, serve as axum_serve};
use serde_json::json;
use tokio::net::TcpListener;

use crate::core::config::Config;
use crate::core::errors::{Result, TelemetryError};
use crate::ingest::service::{IngestError, IngestService};
use crate::logger::activity::ActivityEvent;

/// Shared state for axum handlers.
#[derive(Clone)]
struct AppState {
    service: Arc<IngestService>,
}

/// Build the router over `service`, capping request bodies at `max_body_bytes`.
pub fn router(service: Arc<IngestService>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", post(ingest_handler).get(summary_handler))
        .route("/events", post(ingest_handler))
        .route("/summary", get(summary_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(AppState { service })
}

/// Bind `config.server.bind_addr` and serve until Ctrl-C or SIGTERM.
pub async fn serve(config: &Config, service: Arc<IngestService>) -> Result<()> {
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| TelemetryError::Runtime {
            details: format!("failed to bind to {addr}: {e}"),
        })?;
    serve_on(listener, config, service, shutdown_signal()).await
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve_on<F>(
    listener: TcpListener,
    config: &Config,
    service: Arc<IngestService>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr().map_err(|e| TelemetryError::Runtime {
        details: format!("listener has no local address: {e}"),
    })?;
    let activity = service.activity().clone();
    let started = Instant::now();

    activity.record(ActivityEvent::ServerStarted {
        bind_addr: local_addr.to_string(),
        config_hash: config.stable_hash()?,
    });

    let app = router(service, config.server.max_body_bytes);
    let result = axum_serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| TelemetryError::Runtime {
            details: format!("server error: {e}"),
        });

    if let Err(e) = &result {
        activity.record(ActivityEvent::from_error(e));
    }
    activity.record(ActivityEvent::ServerStopped {
        uptime_secs: started.elapsed().as_secs(),
    });
    activity.sync();
    result
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

// ──────────────────── handlers ────────────────────

/// POST / and /events
async fn ingest_handler(
    State(state): State<AppState>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            let error = IngestError::MalformedBody {
                details: rejection.body_text(),
            };
            state.service.activity().record(ActivityEvent::EventRejected {
                reason: error.reason().to_string(),
                details: error.to_string(),
            });
            return error_response(&error);
        }
    };

    let service = Arc::clone(&state.service);
    let outcome = tokio::task::spawn_blocking(move || service.ingest(&body))
        .await
        .unwrap_or_else(|join| {
            let error = TelemetryError::Runtime {
                details: format!("ingest task failed: {join}"),
            };
            state
                .service
                .activity()
                .record(ActivityEvent::from_error(&error));
            Err(IngestError::Internal(error))
        });

    match outcome {
        Ok(receipt) => (StatusCode::OK, Json(receipt.to_body())).into_response(),
        Err(error) => error_response(&error),
    }
}

/// GET / and /summary
async fn summary_handler(State(state): State<AppState>) -> Response {
    let service = Arc::clone(&state.service);
    match tokio::task::spawn_blocking(move || service.summary()).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(join) => {
            let error = TelemetryError::Runtime {
                details: format!("summary task failed: {join}"),
            };
            state
                .service
                .activity()
                .record(ActivityEvent::from_error(&error));
            error_response(&IngestError::Internal(error))
        }
    }
}

/// GET /health
async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

fn error_response(error: &IngestError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(error.to_body())).into_response()
}
