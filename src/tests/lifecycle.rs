use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::app::config::PressureConfig;
use crate::app::health::types::{HealthReport, MemoryUsage};
use crate::app::runtime::PressureMonitor;
use crate::error::{AppResult, BoxError};
use crate::telemetry::tracing::init_for_tests;

fn counting_probe(calls: Arc<AtomicUsize>) -> impl Fn() -> AppResult<MemoryUsage> + Send + Sync {
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryUsage::default())
    }
}

#[tokio::test(start_paused = true)]
async fn close_stops_sampling_and_health_checks() {
    init_for_tests();

    let samples = Arc::new(AtomicUsize::new(0));
    let checks = Arc::new(AtomicUsize::new(0));
    let c = checks.clone();

    let cfg = PressureConfig::from_toml_str(
        r#"
        sample_interval_ms = 100
        health_check_interval_ms = 100
        "#,
    )
    .unwrap();
    let monitor = PressureMonitor::builder(cfg)
        .memory_probe(counting_probe(samples.clone()))
        .health_check(move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, BoxError>(HealthReport::Status(true)) }
        })
        .start()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(samples.load(Ordering::SeqCst) >= 3);
    assert!(checks.load(Ordering::SeqCst) >= 3);

    monitor.close().await;
    // second close is a no-op
    monitor.close().await;

    let (s, c) = (samples.load(Ordering::SeqCst), checks.load(Ordering::SeqCst));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(samples.load(Ordering::SeqCst), s);
    assert_eq!(checks.load(Ordering::SeqCst), c);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_last_handle_stops_sampling() {
    let samples = Arc::new(AtomicUsize::new(0));

    let cfg = PressureConfig::from_toml_str("sample_interval_ms = 100").unwrap();
    let monitor = PressureMonitor::builder(cfg)
        .memory_probe(counting_probe(samples.clone()))
        .start()
        .await
        .unwrap();
    let clone = monitor.clone();

    tokio::time::sleep(Duration::from_millis(250)).await;
    drop(monitor);
    tokio::time::sleep(Duration::from_millis(250)).await;
    // a live clone keeps the loops running
    assert!(samples.load(Ordering::SeqCst) >= 4);

    drop(clone);
    tokio::task::yield_now().await;
    let s = samples.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(samples.load(Ordering::SeqCst), s);
}

#[tokio::test(start_paused = true)]
async fn monitors_are_isolated() {
    let a = PressureMonitor::builder(PressureConfig::from_toml_str("max_heap_used_bytes = 1").unwrap())
        .memory_probe(|| -> AppResult<MemoryUsage> {
            Ok(MemoryUsage {
                heap_used_bytes: 10,
                rss_bytes: 0,
            })
        })
        .start()
        .await
        .unwrap();
    let b = PressureMonitor::builder(PressureConfig::from_toml_str("max_heap_used_bytes = 100").unwrap())
        .memory_probe(|| -> AppResult<MemoryUsage> {
            Ok(MemoryUsage {
                heap_used_bytes: 10,
                rss_bytes: 0,
            })
        })
        .start()
        .await
        .unwrap();

    super::first_sample().await;
    assert!(a.is_under_pressure());
    assert!(!b.is_under_pressure());

    a.close().await;
    b.close().await;
}

#[tokio::test(start_paused = true)]
async fn abandoned_start_stops_its_loops() {
    let samples = Arc::new(AtomicUsize::new(0));

    let cfg = PressureConfig::from_toml_str(
        r#"
        sample_interval_ms = 10
        health_check_interval_ms = 100
        "#,
    )
    .unwrap();
    let starting = PressureMonitor::builder(cfg)
        .memory_probe(counting_probe(samples.clone()))
        .health_check(|| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, BoxError>(HealthReport::Status(true))
        })
        .start();

    let res = tokio::time::timeout(Duration::from_millis(55), starting).await;
    assert!(res.is_err(), "first health check is still pending");
    tokio::task::yield_now().await;

    let s = samples.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(samples.load(Ordering::SeqCst), s);
}
