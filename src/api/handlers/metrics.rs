use axum::{
    Extension,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::app::runtime::PressureMonitor;
use crate::error::ApiError;

/// Prometheus text exposition of the monitor's registry.
pub async fn metrics(Extension(monitor): Extension<PressureMonitor>) -> Response {
    match monitor.encode_prometheus_text() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}
