use std::time::Instant;

use pressure_gate::api::config::ApiConfig;
use pressure_gate::api::server::run_api_server;
use pressure_gate::app::config::PressureConfig;
use pressure_gate::app::health::HealthReport;
use pressure_gate::app::runtime::PressureMonitor;
use pressure_gate::error::{AppResult, BoxError};
use pressure_gate::telemetry::tracing as app_tracing;

#[tokio::main]
async fn main() -> AppResult<()> {
    app_tracing::init();

    let pressure_cfg = PressureConfig::load_default()?;
    let api_cfg = ApiConfig::load_default()?;

    let started = Instant::now();
    let monitor = PressureMonitor::builder(pressure_cfg)
        .health_check(move || async move {
            let mut details = serde_json::Map::new();
            details.insert(
                "uptime_secs".into(),
                serde_json::Value::from(started.elapsed().as_secs()),
            );
            Ok::<_, BoxError>(HealthReport::Details(details))
        })
        .start()
        .await?;

    run_api_server(monitor, api_cfg).await
}
