use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::http::{StatusCode, header::RETRY_AFTER, request::Parts};

use super::{body_json, first_sample, fixed_memory, hello_router, send};
use crate::app::config::PressureConfig;
use crate::app::health::types::{HealthReport, PressureKind, PressureVerdict};
use crate::app::runtime::PressureMonitor;
use crate::error::{AppError, BoxError};

#[tokio::test(start_paused = true)]
async fn status_route_reports_ok() {
    let cfg = PressureConfig::from_toml_str("expose_status_route = true").unwrap();
    let monitor = PressureMonitor::builder(cfg)
        .memory_probe(fixed_memory(0, 0))
        .start()
        .await
        .unwrap();
    let app = monitor.attach(hello_router());

    let resp = send(&app, "/status").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, serde_json::json!({ "status": "ok" }));
}

#[tokio::test(start_paused = true)]
async fn status_route_at_custom_path() {
    let cfg = PressureConfig::from_toml_str(r#"expose_status_route = "/alive""#).unwrap();
    let monitor = PressureMonitor::builder(cfg)
        .memory_probe(fixed_memory(0, 0))
        .start()
        .await
        .unwrap();
    let app = monitor.attach(hello_router());

    assert_eq!(send(&app, "/alive").await.status(), StatusCode::OK);
    assert_eq!(send(&app, "/status").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn status_reruns_check_and_rejects_on_failure() {
    // startup run passes, every later run fails
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();

    let cfg = PressureConfig::from_toml_str("expose_status_route = true").unwrap();
    let monitor = PressureMonitor::builder(cfg)
        .memory_probe(fixed_memory(0, 0))
        .health_check(move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, BoxError>(HealthReport::Status(n == 0)) }
        })
        .start()
        .await
        .unwrap();
    let app = monitor.attach(hello_router());

    let resp = send(&app, "/status").await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(resp.headers()[RETRY_AFTER], "10");
    assert_eq!(body_json(resp).await["code"], "UNDER_PRESSURE");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // the per-request result is not published to the gate
    assert!(!monitor.is_under_pressure());
    assert_eq!(send(&app, "/").await.status(), StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn status_rejects_when_check_errors_after_startup() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();

    let cfg = PressureConfig::from_toml_str("expose_status_route = true").unwrap();
    let monitor = PressureMonitor::builder(cfg)
        .memory_probe(fixed_memory(0, 0))
        .health_check(move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(HealthReport::Status(true))
                } else {
                    Err::<HealthReport, BoxError>("Kaboom!".into())
                }
            }
        })
        .start()
        .await
        .unwrap();
    let app = monitor.attach(hello_router());

    let resp = send(&app, "/status").await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(resp).await["statusCode"], 503);
}

#[tokio::test(start_paused = true)]
async fn status_merges_health_details() {
    let cfg = PressureConfig::from_toml_str("expose_status_route = true").unwrap();
    let monitor = PressureMonitor::builder(cfg)
        .memory_probe(fixed_memory(0, 0))
        .health_check(|| async {
            let mut m = serde_json::Map::new();
            m.insert("db".into(), serde_json::json!("up"));
            m.insert("queue_depth".into(), serde_json::json!(3));
            Ok::<_, BoxError>(HealthReport::Details(m))
        })
        .start()
        .await
        .unwrap();
    let app = monitor.attach(hello_router());

    let resp = send(&app, "/status").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        body_json(resp).await,
        serde_json::json!({ "status": "ok", "db": "up", "queue_depth": 3 })
    );
}

#[tokio::test(start_paused = true)]
async fn status_reports_not_ok_when_a_threshold_is_breached() {
    let cfg = PressureConfig::from_toml_str(
        r#"
        max_heap_used_bytes = 1
        expose_status_route = true
        "#,
    )
    .unwrap();
    let monitor = PressureMonitor::builder(cfg)
        .memory_probe(fixed_memory(100, 100))
        // let requests through so the status body itself is observable
        .pressure_handler(|_req: &Parts, _kind: PressureKind, _value: Option<f64>| async {
            Ok::<Option<axum::response::Response>, BoxError>(None)
        })
        .start()
        .await
        .unwrap();
    let app = monitor.attach(hello_router());
    first_sample().await;

    let resp = send(&app, "/status").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, serde_json::json!({ "status": "not-ok" }));

    let direct = monitor.status_report().await.expect("health passes");
    assert_eq!(direct["status"], "not-ok");
}

#[tokio::test(start_paused = true)]
async fn status_route_is_gated_like_any_other() {
    let cfg = PressureConfig::from_toml_str(
        r#"
        max_heap_used_bytes = 1
        expose_status_route = true
        "#,
    )
    .unwrap();
    let monitor = PressureMonitor::builder(cfg)
        .memory_probe(fixed_memory(100, 100))
        .start()
        .await
        .unwrap();
    let app = monitor.attach(hello_router());
    first_sample().await;

    assert_eq!(
        send(&app, "/status").await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
}

#[tokio::test(start_paused = true)]
async fn details_route_exports_snapshot() {
    let cfg = PressureConfig::from_toml_str(
        r#"
        [expose_status_route]
        url = "/health"
        details_url = "/health/details"
        "#,
    )
    .unwrap();
    let monitor = PressureMonitor::builder(cfg)
        .memory_probe(fixed_memory(1234, 5678))
        .start()
        .await
        .unwrap();
    let app = monitor.attach(hello_router());
    first_sample().await;

    assert_eq!(send(&app, "/health").await.status(), StatusCode::OK);

    let resp = send(&app, "/health/details").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["heap_used_bytes"], 1234);
    assert_eq!(body["rss_bytes"], 5678);
    assert!(body["event_loop_delay_ms"].is_number());
    assert!(body["captured_at"].is_string());
}

#[tokio::test(start_paused = true)]
async fn failing_check_with_handler_answers_status_through_handler() {
    let cfg = PressureConfig::from_toml_str(
        r#"
        health_check_interval_ms = 500
        expose_status_route = true
        "#,
    )
    .unwrap();
    let monitor = PressureMonitor::builder(cfg)
        .memory_probe(fixed_memory(0, 0))
        .health_check(|| async { Err::<HealthReport, BoxError>("Kaboom!".into()) })
        .pressure_handler(|_req: &Parts, kind: PressureKind, _value: Option<f64>| async move {
            use axum::response::IntoResponse;
            Ok::<_, BoxError>(Some(format!("handled {kind}").into_response()))
        })
        .start()
        .await
        .unwrap();
    let app = monitor.attach(hello_router());

    let resp = send(&app, "/status").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(super::body_text(resp).await, "handled healthCheck");

    assert!(monitor.is_under_pressure());
    assert_eq!(monitor.verdict(), PressureVerdict::HealthCheck);
    assert_eq!(monitor.health_outcome().last_error.as_deref(), Some("Kaboom!"));
}

#[tokio::test]
async fn health_check_needs_an_interval_or_a_status_route() {
    let cfg = PressureConfig::from_toml_str("").unwrap();
    let err = PressureMonitor::builder(cfg)
        .health_check(|| async { Ok::<_, BoxError>(HealthReport::Status(true)) })
        .start()
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidConfig(_)), "{err}");
}
