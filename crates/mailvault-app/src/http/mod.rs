//! On-demand HTTP trigger.
//!
//! # Design
//! - `/backup-email` runs the same orchestrator the scheduler drives and
//!   answers with the run report.
//! - An optional shared key guards the trigger; `/health` and `/metrics` stay
//!   open for probes and scrapers.
//! - Every matched route gets a request id, a request span, and a metrics count.

mod handlers;
mod telemetry;

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::http::{HeaderMap, Request};
use axum::routing::get;
use mailvault_backup::BackupOrchestrator;
use mailvault_config::Secret;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{Span, info};

use crate::error::{AppError, AppResult};
use telemetry::HttpMetricsLayer;

/// Header carrying the shared trigger key.
pub const HEADER_TRIGGER_KEY: &str = "x-mailvault-trigger-key";
/// Header carrying the request correlation id.
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// Shared state for the trigger routes.
#[derive(Clone)]
pub struct HttpState {
    orchestrator: BackupOrchestrator,
    trigger_key: Option<Secret>,
}

impl HttpState {
    /// State for a router driving `orchestrator`. With `trigger_key` set, the
    /// backup route requires it in [`HEADER_TRIGGER_KEY`].
    #[must_use]
    pub const fn new(orchestrator: BackupOrchestrator, trigger_key: Option<Secret>) -> Self {
        Self {
            orchestrator,
            trigger_key,
        }
    }

    fn authorised(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.trigger_key else {
            return true;
        };
        headers
            .get(HEADER_TRIGGER_KEY)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|presented| {
                constant_time_eq(presented.as_bytes(), expected.expose().as_bytes())
            })
    }
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .zip(right)
            .fold(0_u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}

/// Build the trigger router.
pub fn router(state: HttpState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            let request_id = request
                .headers()
                .get(HEADER_REQUEST_ID)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default();
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                route = %request.uri().path(),
                request_id = %request_id,
                status_code = tracing::field::Empty,
                latency_ms = tracing::field::Empty
            )
        })
        .on_request(|_request: &Request<_>, _span: &Span| {})
        .on_response(
            |response: &axum::response::Response, latency: Duration, span: &Span| {
                span.record("status_code", response.status().as_u16());
                let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                span.record("latency_ms", latency_ms);
            },
        );
    let layered = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(HttpMetricsLayer::new(state.orchestrator.metrics().clone()));

    Router::new()
        .route(
            "/backup-email",
            get(handlers::backup_email).post(handlers::backup_email),
        )
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route_layer(layered)
        .with_state(state)
}

/// Serve `router` on `addr` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn serve<F>(router: Router, addr: SocketAddr, shutdown: F) -> AppResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::io("http.bind", err))?;
    info!(%addr, "http trigger listening");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|err| AppError::io("http.serve", err))
}
