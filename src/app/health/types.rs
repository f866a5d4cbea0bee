// src/app/health/types.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

pub const TYPE_EVENT_LOOP_DELAY: &str = "eventLoopDelay";
pub const TYPE_HEAP_USED_BYTES: &str = "heapUsedBytes";
pub const TYPE_RSS_BYTES: &str = "rssBytes";
pub const TYPE_HEALTH_CHECK: &str = "healthCheck";
pub const TYPE_EVENT_LOOP_UTILIZATION: &str = "eventLoopUtilization";

/// Latest sampled process measurements.
///
/// Keep this small and stable:
/// - sampling loop publishes it (whole-value swap)
/// - evaluator reads it
/// - status/details routes export it
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Snapshot {
    /// Smoothed scheduler delay, in ms. `+inf` when the last window recorded nothing.
    pub event_loop_delay_ms: f64,

    /// Scheduler busy fraction (0..=1) since the previous sample, if measurable.
    pub event_loop_utilized: Option<f64>,

    pub heap_used_bytes: u64,
    pub rss_bytes: u64,

    pub captured_at: DateTime<Utc>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            event_loop_delay_ms: 0.0,
            event_loop_utilized: None,
            heap_used_bytes: 0,
            rss_bytes: 0,
            captured_at: Utc::now(),
        }
    }
}

/// Raw memory counters returned by a `MemoryProbe`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub heap_used_bytes: u64,
    pub rss_bytes: u64,
}

/// Upper bounds, fixed at startup. `None` disables the check.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Thresholds {
    pub max_event_loop_delay_ms: Option<f64>,
    pub max_heap_used_bytes: Option<u64>,
    pub max_rss_bytes: Option<u64>,
    pub max_event_loop_utilization: Option<f64>,
}

impl Thresholds {
    #[inline]
    pub fn any(&self) -> bool {
        self.max_event_loop_delay_ms.is_some()
            || self.max_heap_used_bytes.is_some()
            || self.max_rss_bytes.is_some()
            || self.max_event_loop_utilization.is_some()
    }
}

/// Cause tag handed to pressure handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PressureKind {
    EventLoopDelay,
    HeapUsedBytes,
    RssBytes,
    HealthCheck,
    EventLoopUtilization,
}

impl PressureKind {
    pub const ALL: [PressureKind; 5] = [
        PressureKind::EventLoopDelay,
        PressureKind::HeapUsedBytes,
        PressureKind::RssBytes,
        PressureKind::HealthCheck,
        PressureKind::EventLoopUtilization,
    ];

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            PressureKind::EventLoopDelay => TYPE_EVENT_LOOP_DELAY,
            PressureKind::HeapUsedBytes => TYPE_HEAP_USED_BYTES,
            PressureKind::RssBytes => TYPE_RSS_BYTES,
            PressureKind::HealthCheck => TYPE_HEALTH_CHECK,
            PressureKind::EventLoopUtilization => TYPE_EVENT_LOOP_UTILIZATION,
        }
    }
}

impl std::fmt::Display for PressureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one evaluation. Derived on demand, never stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PressureVerdict {
    None,
    EventLoopDelay(f64),
    HeapUsedBytes(u64),
    RssBytes(u64),
    HealthCheck,
    EventLoopUtilization(f64),
}

impl PressureVerdict {
    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, PressureVerdict::None)
    }

    #[inline]
    pub fn is_pressure(&self) -> bool {
        !self.is_none()
    }

    pub fn kind(&self) -> Option<PressureKind> {
        match self {
            PressureVerdict::None => None,
            PressureVerdict::EventLoopDelay(_) => Some(PressureKind::EventLoopDelay),
            PressureVerdict::HeapUsedBytes(_) => Some(PressureKind::HeapUsedBytes),
            PressureVerdict::RssBytes(_) => Some(PressureKind::RssBytes),
            PressureVerdict::HealthCheck => Some(PressureKind::HealthCheck),
            PressureVerdict::EventLoopUtilization(_) => Some(PressureKind::EventLoopUtilization),
        }
    }

    /// Offending metric value. The health-check verdict carries none.
    pub fn value(&self) -> Option<f64> {
        match *self {
            PressureVerdict::None | PressureVerdict::HealthCheck => None,
            PressureVerdict::EventLoopDelay(v) | PressureVerdict::EventLoopUtilization(v) => {
                Some(v)
            }
            PressureVerdict::HeapUsedBytes(v) | PressureVerdict::RssBytes(v) => Some(v as f64),
        }
    }
}

/// What a health check reported.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthReport {
    /// Plain pass/fail.
    Status(bool),
    /// Healthy, with extra fields merged into status responses.
    Details(Map<String, Value>),
}

impl HealthReport {
    #[inline]
    pub fn is_healthy(&self) -> bool {
        match self {
            HealthReport::Status(ok) => *ok,
            HealthReport::Details(_) => true,
        }
    }
}

impl From<bool> for HealthReport {
    fn from(ok: bool) -> Self {
        HealthReport::Status(ok)
    }
}

impl From<Map<String, Value>> for HealthReport {
    fn from(fields: Map<String, Value>) -> Self {
        HealthReport::Details(fields)
    }
}

/// Most recent completed health check.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthOutcome {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl HealthOutcome {
    /// Outcome used when no health check is configured.
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            ..Self::default()
        }
    }

    /// Fail-closed outcome used until the first check completes.
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn from_report(report: HealthReport) -> Self {
        match report {
            HealthReport::Status(healthy) => Self {
                healthy,
                ..Self::default()
            },
            HealthReport::Details(fields) => Self {
                healthy: true,
                detail: Some(fields),
                last_error: None,
            },
        }
    }

    pub fn from_error(err: &dyn std::error::Error) -> Self {
        Self {
            healthy: false,
            detail: None,
            last_error: Some(err.to_string()),
        }
    }
}
