//! Route handlers: on-demand backup, health, and metrics.

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header::CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use mailvault_backup::{BackupError, Trigger, describe};
use mailvault_telemetry::build_sha;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::http::HttpState;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorBody { error })).into_response()
}

/// Liveness payload for `/health`.
#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    build_sha: &'static str,
    backup_running: bool,
    last_success: Option<DateTime<Utc>>,
}

/// Run a backup now. `200` with the report on success, `500` with the report
/// on failure, `409` while another run is in flight.
pub(crate) async fn backup_email(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    if !state.authorised(&headers) {
        warn!("backup trigger rejected: trigger key missing or wrong");
        return error_response(StatusCode::UNAUTHORIZED, "invalid trigger key".to_string());
    }

    match state.orchestrator.try_run_backup(Trigger::Manual).await {
        Ok(report) if report.success => {
            info!(run_id = %report.run_id, "on-demand backup completed");
            (StatusCode::OK, Json(report)).into_response()
        }
        Ok(report) => {
            warn!(run_id = %report.run_id, "on-demand backup failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(report)).into_response()
        }
        Err(err @ BackupError::AlreadyRunning { .. }) => {
            error_response(StatusCode::CONFLICT, err.to_string())
        }
        Err(err) => {
            let message = describe(&err);
            error!(error = %message, "on-demand backup could not start");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, message)
        }
    }
}

pub(crate) async fn health(State(state): State<HttpState>) -> Json<HealthResponse> {
    let last_success = state
        .orchestrator
        .metrics()
        .snapshot()
        .backup_last_success_timestamp;
    Json(HealthResponse {
        status: "ok",
        build_sha: build_sha(),
        backup_running: state.orchestrator.is_running(),
        last_success: DateTime::from_timestamp(last_success, 0).filter(|_| last_success > 0),
    })
}

pub(crate) async fn metrics(State(state): State<HttpState>) -> Response {
    let rendered = match state.orchestrator.metrics().render() {
        Ok(body) => body,
        Err(err) => {
            error!(error = %err, "failed to render metrics");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to render metrics".to_string(),
            );
        }
    };
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(rendered))
        .unwrap_or_else(|err| {
            error!(error = %err, "failed to build metrics response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}
