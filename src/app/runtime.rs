use crate::api::admission::PressureHandler;
use crate::api::types::Rejection;
use crate::app::config::{PressureConfig, StatusRoute};
use crate::app::health::check::{HealthCheck, HealthCheckHandle, start_health_check_scheduler};
use crate::app::health::eval::evaluate_pressure;
use crate::app::health::guard::{Sampler, SnapshotHandle, start_sampling_loop};
use crate::app::health::sampler::{
    DELAY_RESOLUTION, DelayMode, DelaySampler, HistogramDelaySampler, MemoryProbe,
    PollingDelaySampler, ProcMemoryProbe, UtilizationSampler, select_utilization_sampler,
};
use crate::app::health::types::{
    HealthOutcome, HealthReport, PressureVerdict, Snapshot, Thresholds,
};
use crate::app::metrics::PressureMetrics;
use crate::error::{AppError, AppResult};

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type ErrorFactory = Box<dyn FnOnce() -> Rejection + Send>;

/// Cheap, cloneable handle to one running pressure monitor.
///
/// Owns the sampling loop, the delay probe and the health check scheduler.
/// Each instance is fully isolated; nothing is process-global.
#[derive(Clone)]
pub struct PressureMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    thresholds: Thresholds,
    rejection: Rejection,
    status_route: Option<StatusRoute>,

    snapshot: SnapshotHandle,
    health: HealthCheckHandle,

    pressure_handler: Option<Arc<dyn PressureHandler>>,
    route_handlers: HashMap<String, Arc<dyn PressureHandler>>,

    metrics: Arc<PressureMetrics>,
    last_shed: AtomicBool,

    // Keep the JoinHandles private and shared across clones.
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        // last handle gone: no task may outlive the state it publishes to
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for PressureMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PressureMonitor")
            .field("thresholds", &self.inner.thresholds)
            .field("status_route", &self.inner.status_route)
            .field("health", &self.inner.health)
            .finish_non_exhaustive()
    }
}

/// Collects the non-data pieces (callbacks, probes) before `start`.
pub struct PressureMonitorBuilder {
    config: PressureConfig,
    health_check: Option<Arc<dyn HealthCheck>>,
    pressure_handler: Option<Arc<dyn PressureHandler>>,
    route_handlers: HashMap<String, Arc<dyn PressureHandler>>,
    memory_probe: Arc<dyn MemoryProbe>,
    utilization_sampler: Option<Box<dyn UtilizationSampler>>,
    error_factory: Option<ErrorFactory>,
    metrics: Option<Arc<PressureMetrics>>,
}

impl PressureMonitorBuilder {
    pub fn health_check(mut self, check: impl HealthCheck) -> Self {
        self.health_check = Some(Arc::new(check));
        self
    }

    /// Global override used when a request is under pressure.
    pub fn pressure_handler(mut self, handler: impl PressureHandler) -> Self {
        self.pressure_handler = Some(Arc::new(handler));
        self
    }

    /// Override for one route, keyed by its route path as registered
    /// (e.g. `/users/{id}`). Wins over the global handler.
    pub fn route_pressure_handler(
        mut self,
        path: impl Into<String>,
        handler: impl PressureHandler,
    ) -> Self {
        self.route_handlers.insert(path.into(), Arc::new(handler));
        self
    }

    pub fn memory_probe(mut self, probe: impl MemoryProbe) -> Self {
        self.memory_probe = Arc::new(probe);
        self
    }

    /// Replaces the platform utilization source picked at `start`.
    pub fn utilization_sampler(mut self, sampler: impl UtilizationSampler + 'static) -> Self {
        self.utilization_sampler = Some(Box::new(sampler));
        self
    }

    /// Replaces the default rejection. Called once during `start`.
    pub fn error_factory(mut self, factory: impl FnOnce() -> Rejection + Send + 'static) -> Self {
        self.error_factory = Some(Box::new(factory));
        self
    }

    /// Share an existing metrics registry instead of creating one.
    pub fn metrics(mut self, metrics: Arc<PressureMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validates config, awaits the first health check, then spawns the loops.
    ///
    /// Must run inside a tokio runtime. Do not accept traffic before this returns.
    pub async fn start(self) -> AppResult<PressureMonitor> {
        let resolved = self.config.resolve(self.health_check.is_some())?;

        let rejection = match self.error_factory {
            Some(f) => f(),
            None => resolved.rejection,
        };

        let metrics = match self.metrics {
            Some(m) => m,
            None => Arc::new(PressureMetrics::new()?),
        };

        let token = CancellationToken::new();
        // a dropped `start` must not leave the loops running
        let guard = token.clone().drop_guard();
        let mut tasks = Vec::with_capacity(3);

        // --------------------------------------------------
        // Sampling loop (+ delay probe in histogram mode)
        // --------------------------------------------------
        let delay: Box<dyn DelaySampler> = match resolved.delay_mode {
            DelayMode::Histogram => {
                let (s, jh) = HistogramDelaySampler::start(DELAY_RESOLUTION, token.child_token());
                tasks.push(jh);
                Box::new(s)
            }
            DelayMode::Polling => Box::new(PollingDelaySampler::new(resolved.sample_interval)),
        };

        let utilization = self
            .utilization_sampler
            .unwrap_or_else(select_utilization_sampler);
        let sampler = Sampler::new(self.memory_probe, delay, utilization);
        let (snapshot, jh) = start_sampling_loop(
            resolved.sample_interval,
            sampler,
            Some(metrics.clone()),
            token.child_token(),
        );
        tasks.push(jh);

        // --------------------------------------------------
        // Health check (first run awaited here)
        // --------------------------------------------------
        let (health, jh) = start_health_check_scheduler(
            self.health_check,
            resolved.health_check_interval,
            Some(metrics.clone()),
            token.child_token(),
        )
        .await;
        tasks.extend(jh);

        info!(
            component = "monitor",
            delay_mode = ?resolved.delay_mode,
            sample_interval_ms = resolved.sample_interval.as_millis() as u64,
            health_check = health.is_configured(),
            healthy = health.outcome().healthy,
            status_route = resolved.status_route.as_ref().map(|r| r.url.as_str()),
            "pressure monitor started"
        );

        Ok(PressureMonitor {
            inner: Arc::new(MonitorInner {
                thresholds: resolved.thresholds,
                rejection,
                status_route: resolved.status_route,
                snapshot,
                health,
                pressure_handler: self.pressure_handler,
                route_handlers: self.route_handlers,
                metrics,
                last_shed: AtomicBool::new(false),
                tasks: Mutex::new(tasks),
                shutdown: guard.disarm(),
            }),
        })
    }
}

impl PressureMonitor {
    pub fn builder(config: PressureConfig) -> PressureMonitorBuilder {
        PressureMonitorBuilder {
            config,
            health_check: None,
            pressure_handler: None,
            route_handlers: HashMap::new(),
            memory_probe: Arc::new(ProcMemoryProbe),
            utilization_sampler: None,
            error_factory: None,
            metrics: None,
        }
    }

    /// Cancels every background task and waits for them to finish.
    /// Safe to call more than once.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().await.drain(..).collect();
        for jh in tasks {
            if let Err(e) = jh.await.map_err(AppError::from) {
                warn!(component = "monitor", error = %e, "background task ended abnormally");
            }
        }
        info!(component = "monitor", "pressure monitor closed");
    }
}

// --------------------------------------------------
// Queries
// --------------------------------------------------
impl PressureMonitor {
    /// Latest sampled snapshot.
    #[inline]
    pub fn memory_usage(&self) -> Snapshot {
        self.inner.snapshot.load()
    }

    #[inline]
    pub fn health_outcome(&self) -> Arc<HealthOutcome> {
        self.inner.health.outcome()
    }

    pub fn verdict(&self) -> PressureVerdict {
        evaluate_pressure(
            &self.inner.snapshot.load(),
            &self.inner.health.outcome(),
            &self.inner.thresholds,
        )
    }

    #[inline]
    pub fn is_under_pressure(&self) -> bool {
        self.verdict().is_pressure()
    }

    /// Whether the most recent gated request found the process under pressure,
    /// whether or not a pressure handler hid the rejection.
    #[inline]
    pub fn last_request_shed(&self) -> bool {
        self.inner.last_shed.load(Ordering::Relaxed)
    }

    /// False when nothing could ever produce pressure; the gate is then skipped.
    #[inline]
    pub fn enforcement_enabled(&self) -> bool {
        self.inner.thresholds.any() || self.inner.health.is_configured()
    }

    #[inline]
    pub fn thresholds(&self) -> &Thresholds {
        &self.inner.thresholds
    }

    #[inline]
    pub fn rejection(&self) -> &Rejection {
        &self.inner.rejection
    }

    #[inline]
    pub fn status_route(&self) -> Option<&StatusRoute> {
        self.inner.status_route.as_ref()
    }

    #[inline]
    pub fn metrics(&self) -> &Arc<PressureMetrics> {
        &self.inner.metrics
    }

    pub fn encode_prometheus_text(&self) -> AppResult<String> {
        self.inner.metrics.encode_text()
    }
}

// --------------------------------------------------
// Admission bookkeeping
// --------------------------------------------------
impl PressureMonitor {
    pub(crate) fn global_pressure_handler(&self) -> Option<&Arc<dyn PressureHandler>> {
        self.inner.pressure_handler.as_ref()
    }

    pub(crate) fn route_pressure_handler(&self, path: &str) -> Option<&Arc<dyn PressureHandler>> {
        self.inner.route_handlers.get(path)
    }

    pub(crate) fn record_admission(&self, verdict: &PressureVerdict) {
        let pressured = verdict.is_pressure();
        self.inner.last_shed.store(pressured, Ordering::Relaxed);
        self.inner.metrics.set_under_pressure(pressured);
        if let Some(kind) = verdict.kind() {
            self.inner.metrics.inc_shed(kind);
        }
    }
}

// --------------------------------------------------
// Status reporting
// --------------------------------------------------
impl PressureMonitor {
    /// Body for the status route.
    ///
    /// Re-runs the health check for this call (the cached periodic outcome is
    /// not used). A failing or erroring check yields the rejection.
    pub async fn status_report(&self) -> Result<Map<String, Value>, Rejection> {
        let mut body = Map::new();
        body.insert("status".into(), Value::from("ok"));

        match self.inner.health.run_detached().await {
            None | Some(Ok(HealthReport::Status(true))) => {}
            Some(Ok(HealthReport::Status(false))) => {
                error!(component = "status", "external health check failed");
                return Err(self.inner.rejection.clone());
            }
            Some(Ok(HealthReport::Details(extra))) => body.extend(extra),
            Some(Err(e)) => {
                error!(
                    component = "status",
                    error = %e,
                    "external health check failed with error"
                );
                return Err(self.inner.rejection.clone());
            }
        }

        // health passed; other pressure still shows up as "not-ok"
        let threshold_verdict = evaluate_pressure(
            &self.inner.snapshot.load(),
            &HealthOutcome::healthy(),
            &self.inner.thresholds,
        );
        if let Some(kind) = threshold_verdict.kind() {
            debug!(component = "status", kind = %kind, "status reported not-ok");
            body.insert("status".into(), Value::from("not-ok"));
        }

        Ok(body)
    }
}
