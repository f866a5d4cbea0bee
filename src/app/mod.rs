pub mod config;
pub mod health;
pub mod metrics;
pub mod runtime;

pub use config::{ExposeStatusRoute, PressureConfig, RejectionConfig, ResolvedConfig, StatusRoute};
pub use metrics::PressureMetrics;
pub use runtime::{PressureMonitor, PressureMonitorBuilder};
