use crate::api::types::Rejection;
use crate::app::health::sampler::{DELAY_RESOLUTION, DelayMode};
use crate::app::health::types::Thresholds;
use crate::error::{AppError, AppResult};

use axum::http::StatusCode;
use serde::Deserialize;
use std::{io::ErrorKind, path::Path, time::Duration};

pub const DEFAULT_STATUS_URL: &str = "/status";
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 10;
pub const DEFAULT_MESSAGE: &str = "Service Unavailable";
pub const DEFAULT_ERROR_CODE: &str = "UNDER_PRESSURE";

const HISTOGRAM_DEFAULT_SAMPLE_MS: u64 = 1000;
const POLLING_DEFAULT_SAMPLE_MS: u64 = 5;

/// Registration-time options. All optional; validated once by `resolve`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PressureConfig {
    // Thresholds (omit to disable a check)
    pub max_event_loop_delay_ms: Option<f64>,
    pub max_event_loop_utilization: Option<f64>, // 0 < x <= 1
    pub max_heap_used_bytes: Option<u64>,
    pub max_rss_bytes: Option<u64>,

    // Rejection response
    pub message: Option<String>,
    pub retry_after_secs: Option<u64>,
    pub rejection: RejectionConfig,

    // Sampling
    pub sample_interval_ms: Option<u64>,
    pub delay_mode: DelayMode,

    // Health check scheduling
    pub health_check_interval_ms: Option<u64>,

    pub expose_status_route: ExposeStatusRoute,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RejectionConfig {
    pub status_code: u16,
    pub code: String,
}

impl Default for RejectionConfig {
    fn default() -> Self {
        Self {
            status_code: StatusCode::SERVICE_UNAVAILABLE.as_u16(),
            code: DEFAULT_ERROR_CODE.to_string(),
        }
    }
}

/// `expose_status_route = false | true | "/path" | { url = "...", details_url = "..." }`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExposeStatusRoute {
    Enabled(bool),
    Path(String),
    Options(StatusRouteOptions),
}

impl Default for ExposeStatusRoute {
    fn default() -> Self {
        ExposeStatusRoute::Enabled(false)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatusRouteOptions {
    pub url: Option<String>,
    pub details_url: Option<String>,
}

/// Normalized status route placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRoute {
    pub url: String,
    pub details_url: Option<String>,
}

impl ExposeStatusRoute {
    pub fn resolve(&self) -> Option<StatusRoute> {
        match self {
            ExposeStatusRoute::Enabled(false) => None,
            ExposeStatusRoute::Enabled(true) => Some(StatusRoute {
                url: DEFAULT_STATUS_URL.to_string(),
                details_url: None,
            }),
            ExposeStatusRoute::Path(url) => Some(StatusRoute {
                url: url.clone(),
                details_url: None,
            }),
            ExposeStatusRoute::Options(o) => Some(StatusRoute {
                url: o
                    .url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_STATUS_URL.to_string()),
                details_url: o.details_url.clone(),
            }),
        }
    }
}

/// Internal form of `PressureConfig`, free of optional/shape-shifting fields.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub thresholds: Thresholds,
    pub sample_interval: Duration,
    pub delay_mode: DelayMode,
    pub health_check_interval: Option<Duration>,
    pub status_route: Option<StatusRoute>,
    pub rejection: Rejection,
}

impl PressureConfig {
    pub fn from_toml_str(raw: &str) -> AppResult<Self> {
        let cfg: Self = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let p = path.as_ref();
        let raw = std::fs::read_to_string(p).map_err(|e| match e.kind() {
            ErrorKind::NotFound => AppError::InvalidConfig(format!(
                "pressure config file not found: `{}`",
                p.display()
            )),
            ErrorKind::PermissionDenied => AppError::InvalidConfig(format!(
                "pressure config file is not readable (permission denied): `{}`",
                p.display()
            )),
            _ => AppError::ConfigIo(e),
        })?;
        Self::from_toml_str(&raw)
    }

    /// `PRESSURE_GATE_CONFIG_PATH` if set, else `src/config/pressure.toml`.
    pub fn load_default() -> AppResult<Self> {
        match std::env::var("PRESSURE_GATE_CONFIG_PATH") {
            Ok(p) => Self::load_from_file(p),
            Err(std::env::VarError::NotPresent) => Self::load_from_file(
                Path::new(env!("CARGO_MANIFEST_DIR"))
                    .join("src")
                    .join("config")
                    .join("pressure.toml"),
            ),
            Err(std::env::VarError::NotUnicode(_)) => Err(AppError::InvalidConfig(
                "PRESSURE_GATE_CONFIG_PATH is not valid unicode".into(),
            )),
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            max_event_loop_delay_ms: self.max_event_loop_delay_ms,
            max_heap_used_bytes: self.max_heap_used_bytes,
            max_rss_bytes: self.max_rss_bytes,
            max_event_loop_utilization: self.max_event_loop_utilization,
        }
    }

    /// Sampling period. Histogram mode never samples faster than the probe resolution.
    pub fn sample_interval(&self) -> Duration {
        match self.delay_mode {
            DelayMode::Histogram => Duration::from_millis(
                self.sample_interval_ms
                    .unwrap_or(HISTOGRAM_DEFAULT_SAMPLE_MS),
            )
            .max(DELAY_RESOLUTION),
            DelayMode::Polling => Duration::from_millis(
                self.sample_interval_ms.unwrap_or(POLLING_DEFAULT_SAMPLE_MS),
            ),
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        // --------------------------------------------------
        // Thresholds (if present)
        // --------------------------------------------------
        if let Some(d) = self.max_event_loop_delay_ms {
            if d.is_nan() || d <= 0.0 {
                return Err(AppError::InvalidConfig(
                    "max_event_loop_delay_ms must be > 0 (or omit it)".into(),
                ));
            }
        }

        if let Some(u) = self.max_event_loop_utilization {
            if u.is_nan() || u <= 0.0 || u > 1.0 {
                return Err(AppError::InvalidConfig(
                    "max_event_loop_utilization must be in (0, 1]".into(),
                ));
            }
        }

        if self.max_heap_used_bytes == Some(0) {
            return Err(AppError::InvalidConfig(
                "max_heap_used_bytes must be > 0 (or omit it)".into(),
            ));
        }

        if self.max_rss_bytes == Some(0) {
            return Err(AppError::InvalidConfig(
                "max_rss_bytes must be > 0 (or omit it)".into(),
            ));
        }

        // --------------------------------------------------
        // Timers
        // --------------------------------------------------
        if self.sample_interval_ms == Some(0) {
            return Err(AppError::InvalidConfig(
                "sample_interval_ms must be > 0".into(),
            ));
        }

        if self.health_check_interval_ms == Some(0) {
            return Err(AppError::InvalidConfig(
                "health_check_interval_ms must be > 0 (or omit it)".into(),
            ));
        }

        // --------------------------------------------------
        // Rejection / routes
        // --------------------------------------------------
        if !(400..=599).contains(&self.rejection.status_code) {
            return Err(AppError::InvalidConfig(format!(
                "rejection.status_code must be between 400 and 599 (got {})",
                self.rejection.status_code
            )));
        }

        if self.rejection.code.trim().is_empty() {
            return Err(AppError::InvalidConfig(
                "rejection.code must not be empty".into(),
            ));
        }

        if let Some(route) = self.expose_status_route.resolve() {
            for url in std::iter::once(&route.url).chain(route.details_url.as_ref()) {
                if !url.starts_with('/') {
                    return Err(AppError::InvalidConfig(format!(
                        "status route url '{url}' must start with '/'"
                    )));
                }
                if url.split('/').any(|seg| {
                    seg.starts_with(':') || seg.starts_with('*') || seg.contains(['{', '}'])
                }) {
                    return Err(AppError::InvalidConfig(format!(
                        "status route url '{url}' must be a literal path (no captures or wildcards)"
                    )));
                }
            }
            if route.details_url.as_deref() == Some(route.url.as_str()) {
                return Err(AppError::InvalidConfig(
                    "status route and details route must differ".into(),
                ));
            }
        }

        Ok(())
    }

    /// Validates and normalizes once at startup.
    ///
    /// `has_health_check` tells whether a health check function was supplied: it
    /// needs either an interval or a status route to ever run after startup.
    pub fn resolve(&self, has_health_check: bool) -> AppResult<ResolvedConfig> {
        self.validate()?;

        let status_route = self.expose_status_route.resolve();
        let health_check_interval = self.health_check_interval_ms.map(Duration::from_millis);

        if has_health_check && health_check_interval.is_none() && status_route.is_none() {
            return Err(AppError::InvalidConfig(
                "a health check requires health_check_interval_ms or expose_status_route".into(),
            ));
        }

        let status = StatusCode::from_u16(self.rejection.status_code).map_err(|e| {
            AppError::InvalidConfig(format!("rejection.status_code is invalid: {e}"))
        })?;

        Ok(ResolvedConfig {
            thresholds: self.thresholds(),
            sample_interval: self.sample_interval(),
            delay_mode: self.delay_mode,
            health_check_interval,
            status_route,
            rejection: Rejection {
                status,
                code: self.rejection.code.clone(),
                message: self
                    .message
                    .clone()
                    .unwrap_or_else(|| DEFAULT_MESSAGE.to_string()),
                retry_after_secs: self.retry_after_secs.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            },
        })
    }
}
