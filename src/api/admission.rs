use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{MatchedPath, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::app::health::types::PressureKind;
use crate::app::runtime::PressureMonitor;
use crate::error::{ApiError, AppError, BoxError};

/// Takes over the response for a request that arrives under pressure.
///
/// - `Ok(None)`: admit the request anyway
/// - `Ok(Some(resp))`: send `resp` instead of the default rejection
/// - `Err(e)`: answered as a 500 carrying `e`'s message
///
/// Any `Fn(&Parts, PressureKind, Option<f64>) -> impl Future` closure works,
/// as long as its parameter types are spelled out.
#[async_trait]
pub trait PressureHandler: Send + Sync + 'static {
    async fn on_pressure(
        &self,
        request: &Parts,
        kind: PressureKind,
        value: Option<f64>,
    ) -> Result<Option<Response>, BoxError>;
}

#[async_trait]
impl<F, Fut> PressureHandler for F
where
    F: Fn(&Parts, PressureKind, Option<f64>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Response>, BoxError>> + Send + 'static,
{
    async fn on_pressure(
        &self,
        request: &Parts,
        kind: PressureKind,
        value: Option<f64>,
    ) -> Result<Option<Response>, BoxError> {
        self(request, kind, value).await
    }
}

/// Request extension that overrides every configured handler for one request.
///
/// Insert it from a layer that runs before the admission gate.
#[derive(Clone)]
pub struct PressureOverride(pub Arc<dyn PressureHandler>);

impl PressureOverride {
    pub fn new(handler: impl PressureHandler) -> Self {
        Self(Arc::new(handler))
    }
}

/// request extension > route handler > global handler
fn resolve_pressure_handler(
    monitor: &PressureMonitor,
    parts: &Parts,
) -> Option<Arc<dyn PressureHandler>> {
    if let Some(PressureOverride(h)) = parts.extensions.get::<PressureOverride>() {
        return Some(h.clone());
    }
    if let Some(h) = parts
        .extensions
        .get::<MatchedPath>()
        .and_then(|p| monitor.route_pressure_handler(p.as_str()))
    {
        return Some(h.clone());
    }
    monitor.global_pressure_handler().cloned()
}

/// Admission middleware. Evaluates pressure once per request.
pub async fn admission_gate(
    State(monitor): State<PressureMonitor>,
    req: Request,
    next: Next,
) -> Response {
    let verdict = monitor.verdict();
    monitor.record_admission(&verdict);

    let Some(kind) = verdict.kind() else {
        return next.run(req).await;
    };

    let (parts, body) = req.into_parts();

    let Some(handler) = resolve_pressure_handler(&monitor, &parts) else {
        tracing::debug!(
            component = "admission",
            kind = %kind,
            value = ?verdict.value(),
            path = %parts.uri.path(),
            "request shed under pressure"
        );
        return monitor.rejection().to_response();
    };

    monitor.metrics().inc_pressure_handler_calls();

    match handler.on_pressure(&parts, kind, verdict.value()).await {
        Ok(None) => next.run(Request::from_parts(parts, body)).await,
        Ok(Some(resp)) => resp,
        Err(e) => {
            tracing::warn!(
                component = "admission",
                kind = %kind,
                error = %e,
                "pressure handler failed"
            );
            ApiError(AppError::PressureHandler(e)).into_response()
        }
    }
}
