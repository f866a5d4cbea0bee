pub mod admission;
pub mod config;
pub mod handlers;
pub mod router;
pub mod server;
pub mod types;

pub use admission::{PressureHandler, PressureOverride, admission_gate};
pub use config::ApiConfig;
pub use types::Rejection;
