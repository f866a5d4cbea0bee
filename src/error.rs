/// Crate-wide result type.
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Boxed error returned by user-supplied health checks and pressure handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // =========
    // Config / startup
    // =========
    #[error("Configuration file IO error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Failed to parse TOML config: {0}")]
    ConfigToml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // =========
    // Metrics / Prometheus
    // =========
    #[cfg(feature = "metrics")]
    #[error("Prometheus registry error: {0}")]
    Prometheus(#[from] prometheus::Error),

    // =========
    // Runtime
    // =========
    /// A user pressure handler failed while deciding how to shed a request.
    #[error("{0}")]
    PressureHandler(BoxError),

    #[error("Failed to join task: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// A probe or capability is not available on this platform.
    #[error("Disabled error: {0}")]
    Disabled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// ============================
// Axum HTTP adapter
// ============================

mod axum_impl {
    use super::AppError;
    use axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    };
    use serde::Serialize;

    /// Thin HTTP wrapper so core errors don't depend on HTTP.
    #[derive(Debug)]
    pub struct ApiError(pub AppError);

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    struct ErrorBody {
        status_code: u16,
        error: &'static str,
        message: String,
    }

    impl From<AppError> for ApiError {
        fn from(e: AppError) -> Self {
            Self(e)
        }
    }

    impl IntoResponse for ApiError {
        fn into_response(self) -> Response {
            let status = map_status(&self.0);
            let body = ErrorBody {
                status_code: status.as_u16(),
                error: status.canonical_reason().unwrap_or("Unknown"),
                message: self.0.to_string(),
            };
            (status, Json(body)).into_response()
        }
    }

    fn map_status(e: &AppError) -> StatusCode {
        match e {
            AppError::Disabled(_) => StatusCode::SERVICE_UNAVAILABLE,
            // Everything else, including pressure handler failures
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub use axum_impl::ApiError;
