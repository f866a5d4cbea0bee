use crate::app::health::types::{PressureKind, Snapshot};
use crate::error::AppResult;

#[cfg(not(feature = "metrics"))]
use crate::error::AppError;

#[cfg(feature = "metrics")]
use prometheus::{Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Process pressure metrics.
///
/// Scope:
/// - latest sampled snapshot (delay, utilization, memory)
/// - health check state + failures
/// - admission outcomes (shed per cause, pressure handler calls)
///
/// Only label is the pressure kind (5 values).
#[derive(Clone, Debug)]
pub struct PressureMetrics {
    #[cfg(feature = "metrics")]
    registry: Registry,

    // --------------------------------------------------
    // Snapshot
    // --------------------------------------------------
    #[cfg(feature = "metrics")]
    pub event_loop_delay_ms: Gauge,
    #[cfg(feature = "metrics")]
    pub event_loop_utilization: Gauge,
    #[cfg(feature = "metrics")]
    pub heap_used_bytes: IntGauge,
    #[cfg(feature = "metrics")]
    pub rss_bytes: IntGauge,

    // --------------------------------------------------
    // Health check
    // --------------------------------------------------
    #[cfg(feature = "metrics")]
    pub health_check_healthy: IntGauge, // 1=healthy, 0=unhealthy
    #[cfg(feature = "metrics")]
    pub health_check_failures_total: IntCounter,

    // --------------------------------------------------
    // Admission
    // --------------------------------------------------
    #[cfg(feature = "metrics")]
    pub under_pressure: IntGauge,
    #[cfg(feature = "metrics")]
    pub requests_shed_total: IntCounterVec,
    #[cfg(feature = "metrics")]
    pub pressure_handler_calls_total: IntCounter,

    // no-op fallback
    #[cfg(not(feature = "metrics"))]
    _noop: (),
}

impl PressureMetrics {
    pub fn new() -> AppResult<Self> {
        #[cfg(feature = "metrics")]
        {
            let registry = Registry::new();

            let event_loop_delay_ms = Gauge::with_opts(Opts::new(
                "pressure_event_loop_delay_ms",
                "Latest sampled scheduler delay in milliseconds",
            ))?;
            let event_loop_utilization = Gauge::with_opts(Opts::new(
                "pressure_event_loop_utilization",
                "Latest sampled scheduler utilization (0..1)",
            ))?;
            let heap_used_bytes = IntGauge::with_opts(Opts::new(
                "pressure_heap_used_bytes",
                "Latest sampled heap usage in bytes",
            ))?;
            let rss_bytes = IntGauge::with_opts(Opts::new(
                "pressure_rss_bytes",
                "Latest sampled resident set size in bytes",
            ))?;

            let health_check_healthy = IntGauge::with_opts(Opts::new(
                "pressure_health_check_healthy",
                "Latest external health check outcome (1=healthy, 0=unhealthy)",
            ))?;
            let health_check_failures_total = IntCounter::with_opts(Opts::new(
                "pressure_health_check_failures_total",
                "Total external health check runs that failed or reported unhealthy",
            ))?;

            let under_pressure = IntGauge::with_opts(Opts::new(
                "pressure_under_pressure",
                "Whether the last admitted-or-shed request saw pressure (0/1)",
            ))?;
            let requests_shed_total = IntCounterVec::new(
                Opts::new(
                    "pressure_requests_shed_total",
                    "Total requests that hit pressure, by cause",
                ),
                &["kind"],
            )?;
            let pressure_handler_calls_total = IntCounter::with_opts(Opts::new(
                "pressure_handler_calls_total",
                "Total pressure handler invocations",
            ))?;

            // pre-create every label so series exist from boot
            for kind in PressureKind::ALL {
                requests_shed_total.with_label_values(&[kind.as_str()]);
            }

            for g in [&heap_used_bytes, &rss_bytes, &health_check_healthy, &under_pressure] {
                registry.register(Box::new(g.clone()))?;
            }
            for g in [&event_loop_delay_ms, &event_loop_utilization] {
                registry.register(Box::new(g.clone()))?;
            }
            for c in [&health_check_failures_total, &pressure_handler_calls_total] {
                registry.register(Box::new(c.clone()))?;
            }
            registry.register(Box::new(requests_shed_total.clone()))?;

            Ok(Self {
                registry,
                event_loop_delay_ms,
                event_loop_utilization,
                heap_used_bytes,
                rss_bytes,
                health_check_healthy,
                health_check_failures_total,
                under_pressure,
                requests_shed_total,
                pressure_handler_calls_total,
            })
        }

        #[cfg(not(feature = "metrics"))]
        {
            Ok(Self { _noop: () })
        }
    }

    // --------------------------------------------------
    // Encoding
    // --------------------------------------------------
    #[cfg(feature = "metrics")]
    pub fn encode_text(&self) -> AppResult<String> {
        use prometheus::{Encoder, TextEncoder};

        let mf = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new().encode(&mf, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    #[cfg(not(feature = "metrics"))]
    pub fn encode_text(&self) -> AppResult<String> {
        Err(AppError::Disabled("metrics feature is disabled".into()))
    }

    // --------------------------------------------------
    // Helpers (safe to call unconditionally)
    // --------------------------------------------------
    #[inline]
    pub fn observe_snapshot(&self, snap: &Snapshot) {
        #[cfg(feature = "metrics")]
        {
            self.event_loop_delay_ms.set(snap.event_loop_delay_ms);
            self.event_loop_utilization
                .set(snap.event_loop_utilized.unwrap_or(0.0));
            self.heap_used_bytes
                .set(i64::try_from(snap.heap_used_bytes).unwrap_or(i64::MAX));
            self.rss_bytes
                .set(i64::try_from(snap.rss_bytes).unwrap_or(i64::MAX));
        }
        #[cfg(not(feature = "metrics"))]
        let _ = snap;
    }

    #[inline]
    pub fn set_health_check_healthy(&self, healthy: bool) {
        #[cfg(feature = "metrics")]
        self.health_check_healthy.set(healthy as i64);
        #[cfg(not(feature = "metrics"))]
        let _ = healthy;
    }

    #[inline]
    pub fn inc_health_check_failures(&self) {
        #[cfg(feature = "metrics")]
        self.health_check_failures_total.inc();
    }

    #[inline]
    pub fn set_under_pressure(&self, pressured: bool) {
        #[cfg(feature = "metrics")]
        self.under_pressure.set(pressured as i64);
        #[cfg(not(feature = "metrics"))]
        let _ = pressured;
    }

    #[inline]
    pub fn inc_shed(&self, kind: PressureKind) {
        #[cfg(feature = "metrics")]
        self.requests_shed_total
            .with_label_values(&[kind.as_str()])
            .inc();
        #[cfg(not(feature = "metrics"))]
        let _ = kind;
    }

    #[inline]
    pub fn inc_pressure_handler_calls(&self) {
        #[cfg(feature = "metrics")]
        self.pressure_handler_calls_total.inc();
    }
}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;

    #[test]
    fn encodes_registered_series() {
        let m = PressureMetrics::new().expect("metrics");
        m.inc_shed(PressureKind::HeapUsedBytes);
        m.set_health_check_healthy(true);

        let text = m.encode_text().expect("encode");
        assert!(text.contains("pressure_requests_shed_total{kind=\"heapUsedBytes\"} 1"));
        assert!(text.contains("pressure_requests_shed_total{kind=\"rssBytes\"} 0"));
        assert!(text.contains("pressure_health_check_healthy 1"));
    }
}
