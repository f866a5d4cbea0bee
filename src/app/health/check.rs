// src/app/health/check.rs

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::metrics::PressureMetrics;
use crate::error::BoxError;

use super::types::{HealthOutcome, HealthReport};

/// User-supplied liveness probe.
///
/// Any `Fn() -> impl Future<Output = Result<HealthReport, BoxError>>` closure works.
#[async_trait]
pub trait HealthCheck: Send + Sync + 'static {
    async fn check(&self) -> Result<HealthReport, BoxError>;
}

#[async_trait]
impl<F, Fut> HealthCheck for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HealthReport, BoxError>> + Send + 'static,
{
    async fn check(&self) -> Result<HealthReport, BoxError> {
        self().await
    }
}

/// Cloneable read side of the health check scheduler.
#[derive(Clone)]
pub struct HealthCheckHandle {
    check: Option<Arc<dyn HealthCheck>>,
    outcome: Arc<ArcSwap<HealthOutcome>>,
}

impl std::fmt::Debug for HealthCheckHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheckHandle")
            .field("configured", &self.check.is_some())
            .field("outcome", &self.outcome.load())
            .finish()
    }
}

impl HealthCheckHandle {
    #[inline]
    pub fn is_configured(&self) -> bool {
        self.check.is_some()
    }

    /// Latest completed outcome.
    #[inline]
    pub fn outcome(&self) -> Arc<HealthOutcome> {
        self.outcome.load_full()
    }

    /// Runs the check for a single caller without publishing the result.
    /// `None` when no check is configured.
    pub async fn run_detached(&self) -> Option<Result<HealthReport, BoxError>> {
        match &self.check {
            Some(check) => Some(check.check().await),
            None => None,
        }
    }
}

/// Starts the health check scheduler.
///
/// - no check: outcome is fixed healthy, no task
/// - check: outcome starts fail-closed, the first run is awaited here, then
///   (with an interval) a task re-arms the timer only after each run completes,
///   so two runs never overlap however slow the check is
pub async fn start_health_check_scheduler(
    check: Option<Arc<dyn HealthCheck>>,
    interval: Option<Duration>,
    metrics: Option<Arc<PressureMetrics>>,
    shutdown: CancellationToken,
) -> (HealthCheckHandle, Option<JoinHandle<()>>) {
    let Some(check) = check else {
        let handle = HealthCheckHandle {
            check: None,
            outcome: Arc::new(ArcSwap::from_pointee(HealthOutcome::healthy())),
        };
        if let Some(m) = metrics.as_ref() {
            m.set_health_check_healthy(true);
        }
        return (handle, None);
    };

    let outcome = Arc::new(ArcSwap::from_pointee(HealthOutcome::pending()));
    let handle = HealthCheckHandle {
        check: Some(check.clone()),
        outcome: outcome.clone(),
    };

    run_and_publish(check.as_ref(), &outcome, metrics.as_deref()).await;

    let Some(period) = interval else {
        return (handle, None);
    };

    let jh = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(period) => {}
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = run_and_publish(check.as_ref(), &outcome, metrics.as_deref()) => {}
            }
        }
        tracing::info!(component = "health_check", "health check scheduler shutting down");
    });

    (handle, Some(jh))
}

async fn run_and_publish(
    check: &dyn HealthCheck,
    outcome: &ArcSwap<HealthOutcome>,
    metrics: Option<&PressureMetrics>,
) {
    let next = match check.check().await {
        Ok(report) => {
            let next = HealthOutcome::from_report(report);
            if !next.healthy {
                tracing::warn!(
                    component = "health_check",
                    "external health check reported unhealthy"
                );
            }
            next
        }
        Err(e) => {
            tracing::error!(
                component = "health_check",
                error = %e,
                "external health check failed; marking the service unhealthy"
            );
            HealthOutcome::from_error(e.as_ref())
        }
    };

    if let Some(m) = metrics {
        m.set_health_check_healthy(next.healthy);
        if !next.healthy {
            m.inc_health_check_failures();
        }
    }

    outcome.store(Arc::new(next));
}
