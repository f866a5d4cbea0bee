use axum::{
    Json,
    response::{IntoResponse, Response},
};

use crate::app::health::types::Snapshot;
use crate::app::runtime::PressureMonitor;

/// `GET <status url>`: `{"status": "ok" | "not-ok", ...}` or the rejection.
pub async fn status(monitor: PressureMonitor) -> Response {
    match monitor.status_report().await {
        Ok(body) => Json(body).into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

/// `GET <details url>`: raw latest snapshot.
pub async fn details(monitor: PressureMonitor) -> Json<Snapshot> {
    Json(monitor.memory_usage())
}
