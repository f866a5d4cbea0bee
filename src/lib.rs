pub mod api;
pub mod app;
pub mod error;
pub mod telemetry;

#[cfg(test)]
mod tests;

pub use api::{PressureHandler, PressureOverride, Rejection};
pub use app::health::{
    HealthCheck, HealthOutcome, HealthReport, MemoryUsage, PressureKind, PressureVerdict,
    Snapshot, TYPE_EVENT_LOOP_DELAY, TYPE_EVENT_LOOP_UTILIZATION, TYPE_HEALTH_CHECK,
    TYPE_HEAP_USED_BYTES, TYPE_RSS_BYTES, Thresholds,
};
pub use app::{PressureConfig, PressureMonitor, PressureMonitorBuilder};
pub use error::{ApiError, AppError, AppResult, BoxError};
