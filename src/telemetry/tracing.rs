use tracing_subscriber::{EnvFilter, fmt};

/// Initialize tracing with:
/// - `RUST_LOG` support via EnvFilter
/// - crate at info, hyper at warn if RUST_LOG is not set
///
/// Call this once at startup (main).
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,tower_http=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .compact()
        .init();
}

/// Test-friendly init (won't panic if called multiple times).
pub fn init_for_tests() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pressure_gate=debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_test_writer()
        .compact()
        .try_init();
}
